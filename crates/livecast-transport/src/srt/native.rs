//! Boundary to the native SRT library.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::option::{OptionValue, SrtSocketOption};
use super::SrtSocketStatus;
use crate::error::TransportError;
use crate::TransportResult;

/// Native socket descriptor.
pub type RawSocket = i32;

/// The calls the socket makes into an SRT implementation.
///
/// Errors carry the library's last error text.
pub trait SrtApi: Send + Sync {
    fn create_socket(&self) -> Result<RawSocket, String>;

    fn set_option(
        &self,
        socket: RawSocket,
        option: SrtSocketOption,
        value: &OptionValue,
    ) -> Result<(), String>;

    /// Blocking caller connect.
    fn connect(&self, socket: RawSocket, addr: SocketAddr) -> Result<(), String>;

    /// Send one message of at most one payload size.
    fn send(&self, socket: RawSocket, data: &[u8]) -> Result<usize, String>;

    fn status(&self, socket: RawSocket) -> SrtSocketStatus;

    fn close(&self, socket: RawSocket);
}

/// Map the library startup result; negative codes are failures.
#[cfg_attr(not(feature = "libsrt"), allow(dead_code))]
pub(crate) fn check_startup(code: i32, last_error: impl FnOnce() -> String) -> TransportResult<()> {
    if code < 0 {
        return Err(TransportError::IllegalState(format!(
            "SRT startup failed: {}",
            last_error()
        )));
    }
    Ok(())
}

/// An owned native socket. Closed exactly once, on [`SrtHandle::close`] or drop.
pub struct SrtHandle {
    api: Arc<dyn SrtApi>,
    raw: RawSocket,
    closed: AtomicBool,
}

impl SrtHandle {
    pub fn create(api: Arc<dyn SrtApi>) -> TransportResult<Self> {
        let raw = api
            .create_socket()
            .map_err(|e| TransportError::IllegalState(format!("Failed to create SRT socket: {}", e)))?;
        trace!(socket = raw, "SRT socket created");
        Ok(Self {
            api,
            raw,
            closed: AtomicBool::new(false),
        })
    }

    pub fn raw(&self) -> RawSocket {
        self.raw
    }

    pub fn set_option(&self, option: SrtSocketOption, value: &OptionValue) -> Result<(), String> {
        self.api.set_option(self.raw, option, value)
    }

    pub fn connect(&self, addr: SocketAddr) -> TransportResult<()> {
        self.api
            .connect(self.raw, addr)
            .map_err(|e| TransportError::IllegalState(format!("SRT connect to {} failed: {}", addr, e)))
    }

    pub fn send(&self, data: &[u8]) -> Result<usize, String> {
        self.api.send(self.raw, data)
    }

    pub fn status(&self) -> SrtSocketStatus {
        if self.is_closed() {
            return SrtSocketStatus::Closed;
        }
        self.api.status(self.raw)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the native socket. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            trace!(socket = self.raw, "SRT socket closed");
            self.api.close(self.raw);
        }
    }
}

impl Drop for SrtHandle {
    fn drop(&mut self) {
        self.close();
    }
}
