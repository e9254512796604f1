//! RTMP chunk stream codec
//!
//! ```text
//! +-------------+----------------+-------------------+
//! | Basic Header| Message Header | Chunk Data        |
//! | (1-3 bytes) | (0,3,7,11 bytes)| (variable)       |
//! +-------------+----------------+-------------------+
//!
//! Basic Header formats:
//! - 1 byte:  fmt(2) + csid(6)        for csid 2-63
//! - 2 bytes: fmt(2) + 0 + csid(8)    for csid 64-319
//! - 3 bytes: fmt(2) + 1 + csid(16)   for csid 64-65599
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4 LE)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  (use previous chunk's values)
//!
//! Extended timestamp (4 bytes) follows when the 3-byte field is 0xFFFFFF
//! ```
//!
//! Reference: RTMP Specification Section 5.3

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// A complete RTMP message (reassembled from chunks)
#[derive(Debug, Clone)]
pub struct RtmpChunk {
    /// Chunk stream ID (for multiplexing)
    pub csid: u32,
    /// Message timestamp (milliseconds)
    pub timestamp: u32,
    /// Message type ID
    pub message_type: u8,
    /// Message stream ID
    pub stream_id: u32,
    /// Message payload
    pub payload: Bytes,
}

/// Per-chunk-stream header state
#[derive(Debug, Clone, Default)]
struct ChunkStreamState {
    initialized: bool,
    /// Absolute timestamp of the current/last message
    timestamp: u32,
    /// Last timestamp field (delta for fmt 1-3, absolute for fmt 0)
    timestamp_delta: u32,
    message_length: u32,
    message_type: u8,
    stream_id: u32,
    has_extended_timestamp: bool,
    /// Reassembly buffer for the message in flight
    partial_message: BytesMut,
}

/// Chunk stream decoder
///
/// Demultiplexes chunks and reassembles messages. A call either consumes one
/// complete chunk from the buffer or leaves the buffer and the decoder state
/// untouched.
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
    max_message_size: u32,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Apply a peer SetChunkSize
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Decode chunks until a message completes or the buffer runs dry
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpChunk>> {
        loop {
            let before = buf.len();
            if let Some(message) = self.decode_chunk(buf)? {
                return Ok(Some(message));
            }
            if buf.len() == before {
                return Ok(None);
            }
        }
    }

    /// Consume at most one chunk
    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpChunk>> {
        let (fmt, csid, basic_len) = match parse_basic_header(buf) {
            Some(v) => v,
            None => return Ok(None),
        };

        let state = self.streams.entry(csid).or_default();
        if fmt != 0 && !state.initialized {
            return Err(ProtocolError::InvalidChunkHeader.into());
        }

        let header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if buf.len() < basic_len + header_len {
            return Ok(None);
        }

        let header = &buf[basic_len..basic_len + header_len];
        let (timestamp_field, message_length, message_type, stream_id) = match fmt {
            0 => (
                read_u24(&header[0..3]),
                read_u24(&header[3..6]),
                header[6],
                u32::from_le_bytes([header[7], header[8], header[9], header[10]]),
            ),
            1 => (
                read_u24(&header[0..3]),
                read_u24(&header[3..6]),
                header[6],
                state.stream_id,
            ),
            2 => (
                read_u24(&header[0..3]),
                state.message_length,
                state.message_type,
                state.stream_id,
            ),
            _ => (
                state.timestamp_delta,
                state.message_length,
                state.message_type,
                state.stream_id,
            ),
        };

        let has_extended = if fmt == 3 {
            state.has_extended_timestamp
        } else {
            timestamp_field >= EXTENDED_TIMESTAMP_THRESHOLD
        };
        let extended_len = if has_extended { 4 } else { 0 };
        let prefix_len = basic_len + header_len + extended_len;
        if buf.len() < prefix_len {
            return Ok(None);
        }

        if message_length > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: message_length,
                max: self.max_message_size,
            }
            .into());
        }

        // A non-continuation header abandons any half-received message
        let continuing = fmt == 3 && !state.partial_message.is_empty();
        let received = if continuing { state.partial_message.len() as u32 } else { 0 };
        let chunk_len = (message_length - received).min(self.chunk_size) as usize;
        if buf.len() < prefix_len + chunk_len {
            return Ok(None);
        }

        // Everything is available: commit
        let timestamp_value = if has_extended {
            let ext = &buf[basic_len + header_len..prefix_len];
            u32::from_be_bytes([ext[0], ext[1], ext[2], ext[3]])
        } else {
            timestamp_field
        };
        buf.advance(prefix_len);

        if !continuing {
            state.partial_message.clear();
            state.timestamp = if fmt == 0 {
                timestamp_value
            } else {
                state.timestamp.wrapping_add(timestamp_value)
            };
            state.timestamp_delta = timestamp_value;
            state.message_length = message_length;
            state.message_type = message_type;
            state.stream_id = stream_id;
            state.partial_message.reserve(message_length as usize);
        }
        state.has_extended_timestamp = has_extended;
        state.initialized = true;

        state.partial_message.put_slice(&buf[..chunk_len]);
        buf.advance(chunk_len);

        if state.partial_message.len() as u32 >= state.message_length {
            Ok(Some(RtmpChunk {
                csid,
                timestamp: state.timestamp,
                message_type: state.message_type,
                stream_id: state.stream_id,
                payload: state.partial_message.split().freeze(),
            }))
        } else {
            Ok(None)
        }
    }

    /// Drop the partially received message on a chunk stream (Abort message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.partial_message.clear();
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns (fmt, csid, basic header length)
fn parse_basic_header(buf: &[u8]) -> Option<(u8, u32, usize)> {
    let first = *buf.first()?;
    let fmt = first >> 6;
    match first & 0x3F {
        0 => Some((fmt, 64 + *buf.get(1)? as u32, 2)),
        1 => {
            let low = *buf.get(1)? as u32;
            let high = *buf.get(2)? as u32;
            Some((fmt, 64 + low + high * 256, 3))
        }
        csid => Some((fmt, csid as u32, 1)),
    }
}

fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32)
}

/// Chunk stream encoder
pub struct ChunkEncoder {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Set the outgoing chunk size; announce it with SetChunkSize first
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Encode a message into chunks
    pub fn encode(&mut self, chunk: &RtmpChunk, buf: &mut BytesMut) {
        let chunk_size = self.chunk_size as usize;
        let state = self.streams.entry(chunk.csid).or_default();
        let fmt = select_format(chunk, state);

        let delta = chunk.timestamp.wrapping_sub(state.timestamp);
        let timestamp_value = match fmt {
            0 => chunk.timestamp,
            3 => state.timestamp_delta,
            _ => delta,
        };
        let extended = timestamp_value >= EXTENDED_TIMESTAMP_THRESHOLD;
        let field = timestamp_value.min(EXTENDED_TIMESTAMP_THRESHOLD);
        let payload_len = chunk.payload.len();

        state.initialized = true;
        state.timestamp = chunk.timestamp;
        state.timestamp_delta = timestamp_value;
        state.message_length = payload_len as u32;
        state.message_type = chunk.message_type;
        state.stream_id = chunk.stream_id;
        state.has_extended_timestamp = extended;

        let mut offset = 0;
        loop {
            let first = offset == 0;
            write_basic_header(chunk.csid, if first { fmt } else { 3 }, buf);

            if first {
                if fmt <= 2 {
                    write_u24(field, buf);
                }
                if fmt <= 1 {
                    write_u24(payload_len as u32, buf);
                    buf.put_u8(chunk.message_type);
                }
                if fmt == 0 {
                    buf.put_u32_le(chunk.stream_id);
                }
            }
            if extended {
                buf.put_u32(timestamp_value);
            }

            let len = (payload_len - offset).min(chunk_size);
            buf.put_slice(&chunk.payload[offset..offset + len]);
            offset += len;

            if offset >= payload_len {
                break;
            }
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick the most compact header the peer can still decode
fn select_format(chunk: &RtmpChunk, state: &ChunkStreamState) -> u8 {
    if !state.initialized
        || chunk.stream_id != state.stream_id
        || chunk.timestamp < state.timestamp
    {
        return 0;
    }

    if chunk.message_type != state.message_type
        || chunk.payload.len() as u32 != state.message_length
    {
        return 1;
    }

    if chunk.timestamp.wrapping_sub(state.timestamp) == state.timestamp_delta {
        3
    } else {
        2
    }
}

fn write_basic_header(csid: u32, fmt: u8, buf: &mut BytesMut) {
    if csid >= 64 + 256 {
        let id = csid - 64;
        buf.put_u8((fmt << 6) | 1);
        buf.put_u8((id & 0xFF) as u8);
        buf.put_u8(((id >> 8) & 0xFF) as u8);
    } else if csid >= 64 {
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        buf.put_u8((fmt << 6) | csid as u8);
    }
}

fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}
