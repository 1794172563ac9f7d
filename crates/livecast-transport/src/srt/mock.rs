//! In-process [`SrtApi`] for tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::native::{RawSocket, SrtApi};
use super::option::{OptionValue, SrtSocketOption};
use super::SrtSocketStatus;

#[derive(Default)]
struct MockState {
    next_socket: RawSocket,
    created: usize,
    options: Vec<(RawSocket, SrtSocketOption, OptionValue)>,
    connects: Vec<(RawSocket, SocketAddr)>,
    sent: Vec<(RawSocket, Vec<u8>)>,
    statuses: HashMap<RawSocket, SrtSocketStatus>,
    closed: Vec<RawSocket>,
    fail_create: Option<String>,
    fail_connect: Option<String>,
    fail_send: Option<String>,
    send_delay: Option<Duration>,
    reject_option: Option<SrtSocketOption>,
}

/// Records every call and lets tests script failures and status changes.
#[derive(Default)]
pub struct MockSrt {
    state: Mutex<MockState>,
}

impl MockSrt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, reason: &str) {
        self.state.lock().fail_create = Some(reason.to_string());
    }

    pub fn fail_connect(&self, reason: &str) {
        self.state.lock().fail_connect = Some(reason.to_string());
    }

    pub fn fail_send(&self, reason: Option<&str>) {
        self.state.lock().fail_send = reason.map(str::to_string);
    }

    /// Make every send take `delay`, like a congested link.
    pub fn delay_send(&self, delay: Duration) {
        self.state.lock().send_delay = Some(delay);
    }

    pub fn reject_option(&self, option: SrtSocketOption) {
        self.state.lock().reject_option = Some(option);
    }

    /// Change the status of every socket that is not closed.
    pub fn set_status(&self, status: SrtSocketStatus) {
        let mut state = self.state.lock();
        let MockState {
            statuses, closed, ..
        } = &mut *state;
        for (socket, current) in statuses.iter_mut() {
            if !closed.contains(socket) {
                *current = status;
            }
        }
    }

    pub fn created_sockets(&self) -> usize {
        self.state.lock().created
    }

    pub fn last_socket(&self) -> Option<RawSocket> {
        let state = self.state.lock();
        (state.created > 0).then_some(state.next_socket)
    }

    /// Options in the order they were set.
    pub fn options(&self) -> Vec<(SrtSocketOption, OptionValue)> {
        self.state
            .lock()
            .options
            .iter()
            .map(|(_, option, value)| (*option, value.clone()))
            .collect()
    }

    pub fn connects(&self) -> Vec<SocketAddr> {
        self.state.lock().connects.iter().map(|(_, addr)| *addr).collect()
    }

    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.iter().map(|(_, data)| data.clone()).collect()
    }

    /// Payloads sent through one native socket.
    pub fn sent_on(&self, socket: RawSocket) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(s, _)| *s == socket)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn closed_sockets(&self) -> Vec<RawSocket> {
        self.state.lock().closed.clone()
    }
}

impl SrtApi for MockSrt {
    fn create_socket(&self) -> Result<RawSocket, String> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.fail_create {
            return Err(reason.clone());
        }
        state.next_socket += 1;
        state.created += 1;
        let socket = state.next_socket;
        state.statuses.insert(socket, SrtSocketStatus::Init);
        Ok(socket)
    }

    fn set_option(
        &self,
        socket: RawSocket,
        option: SrtSocketOption,
        value: &OptionValue,
    ) -> Result<(), String> {
        let mut state = self.state.lock();
        if state.reject_option == Some(option) {
            return Err(format!("{} rejected", option.name()));
        }
        state.options.push((socket, option, value.clone()));
        Ok(())
    }

    fn connect(&self, socket: RawSocket, addr: SocketAddr) -> Result<(), String> {
        let mut state = self.state.lock();
        state.connects.push((socket, addr));
        if let Some(reason) = &state.fail_connect {
            let reason = reason.clone();
            state.statuses.insert(socket, SrtSocketStatus::Broken);
            return Err(reason);
        }
        state.statuses.insert(socket, SrtSocketStatus::Connected);
        Ok(())
    }

    fn send(&self, socket: RawSocket, data: &[u8]) -> Result<usize, String> {
        let delay = self.state.lock().send_delay;
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        let mut state = self.state.lock();
        if state.closed.contains(&socket) {
            return Err("Socket closed".to_string());
        }
        if let Some(reason) = &state.fail_send {
            return Err(reason.clone());
        }
        state.sent.push((socket, data.to_vec()));
        Ok(data.len())
    }

    fn status(&self, socket: RawSocket) -> SrtSocketStatus {
        self.state
            .lock()
            .statuses
            .get(&socket)
            .copied()
            .unwrap_or(SrtSocketStatus::Invalid)
    }

    fn close(&self, socket: RawSocket) {
        let mut state = self.state.lock();
        state.closed.push(socket);
        state.statuses.insert(socket, SrtSocketStatus::Closed);
    }
}
