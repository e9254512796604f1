//! Client side of the RTMP handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |------- C2 (1536 bytes: echo S1) ----->|
//! ```
//!
//! Only the "simple" handshake is implemented (no HMAC digest). S2 is not
//! checked against C1 because several servers do not echo it faithfully.
//!
//! Reference: RTMP Specification Section 5.2

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Initial,
    WaitingForServer,
    Done,
}

/// Client handshake state machine
#[derive(Debug)]
pub struct ClientHandshake {
    state: HandshakeState,
}

impl ClientHandshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Initial,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Bytes the server must send before `process` can make progress
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            HandshakeState::WaitingForServer => 1 + HANDSHAKE_SIZE * 2,
            _ => 0,
        }
    }

    /// Produce C0+C1 (1 + 1536 bytes)
    pub fn start(&mut self) -> Result<Bytes> {
        if self.state != HandshakeState::Initial {
            return Err(HandshakeError::InvalidState.into());
        }

        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        buf.put_u8(RTMP_VERSION);
        buf.put_slice(&generate_packet());

        self.state = HandshakeState::WaitingForServer;
        Ok(buf.freeze())
    }

    /// Consume S0+S1+S2 from `buf` once complete and return C2
    ///
    /// Returns `Ok(None)` while more bytes are needed. Bytes after S2 stay in
    /// `buf`; they belong to the chunk stream.
    pub fn process(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        if self.state != HandshakeState::WaitingForServer {
            return Err(HandshakeError::InvalidState.into());
        }
        if buf.len() < self.bytes_needed() {
            return Ok(None);
        }

        let version = buf.get_u8();
        if version < RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version).into());
        }

        let mut s1 = [0u8; HANDSHAKE_SIZE];
        buf.copy_to_slice(&mut s1);
        buf.advance(HANDSHAKE_SIZE); // S2

        self.state = HandshakeState::Done;
        Ok(Some(Bytes::copy_from_slice(&generate_echo(&s1))))
    }
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// C1 layout: timestamp (4) + zero (4) + random (1528)
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let timestamp = now_millis();
    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());

    // LCG filler; the simple handshake has no randomness requirement
    let mut seed = timestamp as u64 | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let bytes = seed.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }

    packet
}

/// C2 layout: peer timestamp (4) + our receive time (4) + peer random
fn generate_echo(peer_packet: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer_packet;
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_reply(version: u8) -> BytesMut {
        let mut reply = BytesMut::new();
        reply.put_u8(version);
        let mut s1 = [0u8; HANDSHAKE_SIZE];
        s1[100] = 0xAB;
        reply.put_slice(&s1);
        reply.put_slice(&[0u8; HANDSHAKE_SIZE]);
        reply
    }

    #[test]
    fn test_client_handshake() {
        let mut hs = ClientHandshake::new();
        let c0c1 = hs.start().unwrap();
        assert_eq!(c0c1.len(), 1 + HANDSHAKE_SIZE);
        assert_eq!(c0c1[0], RTMP_VERSION);
        assert_eq!(&c0c1[5..9], &[0, 0, 0, 0]);

        let mut reply = server_reply(RTMP_VERSION);
        reply.put_slice(b"rest");

        let c2 = hs.process(&mut reply).unwrap().expect("C2");
        assert_eq!(c2.len(), HANDSHAKE_SIZE);
        assert_eq!(c2[100], 0xAB);
        assert!(hs.is_done());
        assert_eq!(&reply[..], b"rest");
    }

    #[test]
    fn test_partial_server_reply() {
        let mut hs = ClientHandshake::new();
        hs.start().unwrap();

        let full = server_reply(RTMP_VERSION);
        let mut partial = BytesMut::from(&full[..1000]);
        assert!(hs.process(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 1000);
        assert!(!hs.is_done());
    }

    #[test]
    fn test_bad_version_and_state() {
        let mut hs = ClientHandshake::new();
        let mut reply = server_reply(RTMP_VERSION);
        assert!(hs.process(&mut reply).is_err());

        hs.start().unwrap();
        assert!(hs.start().is_err());

        let mut reply = server_reply(1);
        assert!(hs.process(&mut reply).is_err());
    }
}
