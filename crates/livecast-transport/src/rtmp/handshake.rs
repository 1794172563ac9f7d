//! RTMP simple handshake, client side.
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (version) + C1 ----------->|
//!   |<------ S0 (version) + S1 ------------|
//!   |------- C2 (echo of S1) ------------->|
//!   |<------ S2 (echo of C1) --------------|
//! ```
//!
//! Only the packets live here. Waiting for the peer's bytes, and giving up on
//! a silent peer, belong to the socket's read loop.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;

/// Size of C1/S1/C2/S2.
pub const SIG_SIZE: usize = 1536;

/// C0/S0 protocol version.
pub const PROTOCOL_VERSION: u8 = 3;

/// Handshake packets for one connection attempt.
#[derive(Debug, Default)]
pub struct Handshake {
    challenge: Option<Bytes>,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// C0+C1, generated once per attempt.
    pub fn generate_challenge(&mut self) -> Bytes {
        self.challenge
            .get_or_insert_with(build_challenge)
            .clone()
    }

    /// C2 for a peer response starting with S0+S1.
    ///
    /// `peer` must hold at least `SIG_SIZE + 1` bytes; the ack echoes S1
    /// verbatim so it depends on nothing but the peer's bytes.
    pub fn derive_ack(&self, peer: &[u8]) -> Bytes {
        debug_assert!(peer.len() > SIG_SIZE);
        Bytes::copy_from_slice(&peer[1..=SIG_SIZE])
    }

    /// Forget the challenge so the next attempt starts fresh.
    pub fn reset(&mut self) {
        self.challenge = None;
    }
}

fn build_challenge() -> Bytes {
    let mut packet = BytesMut::with_capacity(SIG_SIZE + 1);
    packet.put_u8(PROTOCOL_VERSION);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);
    packet.put_u32(timestamp);
    packet.put_u32(0);

    let mut random = [0u8; SIG_SIZE - 8];
    rand::thread_rng().fill_bytes(&mut random);
    packet.put_slice(&random);

    packet.freeze()
}
