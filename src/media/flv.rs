//! FLV byte stream muxing and demuxing
//!
//! A play session hands the caller an FLV file; a publish session takes one.
//! Each RTMP audio/video/data message is an FLV tag body, so the mapping is a
//! matter of adding or stripping the 11-byte tag header and the trailing
//! previous-tag-size field.
//!
//! FLV file layout:
//! ```text
//! +-----------------+--------------+-----+--------------+----------------+
//! | Header (9)      | PrevSize0(4) | Tag | PrevSize(4)  | Tag ...        |
//! +-----------------+--------------+-----+--------------+----------------+
//!
//! Tag:
//! +--------+-------------+-----------+-------------+---------+
//! | Type(1)| DataSize(3) | TS(3+1)   | StreamID(3) | Data(N) |
//! +--------+-------------+-----------+-------------+---------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::MediaError;

/// "FLV", version 1, audio+video, header length 9, PreviousTagSize0
pub const FLV_FILE_HEADER: [u8; 13] = [
    b'F', b'L', b'V', 0x01, 0x05, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00,
];

/// Tag header size
pub const FLV_TAG_HEADER_SIZE: usize = 11;

const PREV_TAG_SIZE_LEN: usize = 4;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    pub fn from_byte(b: u8) -> Option<Self> {
        // Upper bits carry the (unsupported) filter flag
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }

    /// Tag type byte, equal to the RTMP message type id
    pub fn as_byte(self) -> u8 {
        match self {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::Script => 18,
        }
    }
}

/// FLV tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Tag body (codec headers included)
    pub data: Bytes,
}

impl FlvTag {
    pub fn new(tag_type: FlvTagType, timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type,
            timestamp,
            data,
        }
    }

    /// Whether this is a video keyframe (frame type 1)
    pub fn is_keyframe(&self) -> bool {
        self.tag_type == FlvTagType::Video
            && self.data.first().map(|b| b >> 4 == 1).unwrap_or(false)
    }

    /// Bytes this tag occupies in a file, trailer included
    pub fn encoded_len(&self) -> usize {
        FLV_TAG_HEADER_SIZE + self.data.len() + PREV_TAG_SIZE_LEN
    }

    /// Append header, body and PreviousTagSize to `buf`
    pub fn write_to(&self, buf: &mut BytesMut) {
        let size = self.data.len() as u32;
        buf.reserve(self.encoded_len());
        buf.put_u8(self.tag_type.as_byte());
        put_u24(buf, size);
        put_u24(buf, self.timestamp & 0xFF_FFFF);
        buf.put_u8((self.timestamp >> 24) as u8);
        put_u24(buf, 0);
        buf.put_slice(&self.data);
        buf.put_u32(size + FLV_TAG_HEADER_SIZE as u32);
    }
}

/// Produces an FLV byte stream from RTMP media messages
#[derive(Debug, Default)]
pub struct FlvMuxer {
    header_written: bool,
}

impl FlvMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the file header to `out` once per stream
    pub fn write_header(&mut self, out: &mut BytesMut) {
        if !self.header_written {
            out.put_slice(&FLV_FILE_HEADER);
            self.header_written = true;
        }
    }

    pub fn write_tag(&mut self, tag: &FlvTag, out: &mut BytesMut) {
        self.write_header(out);
        tag.write_to(out);
    }

    /// Append the sub-tags of an aggregate message
    ///
    /// Returns the number of tags written.
    pub fn write_aggregate(
        &mut self,
        timestamp: u32,
        payload: &Bytes,
        out: &mut BytesMut,
    ) -> Result<usize, MediaError> {
        let tags = split_aggregate(timestamp, payload)?;
        for tag in &tags {
            self.write_tag(tag, out);
        }
        Ok(tags.len())
    }
}

/// Splits an aggregate message body into its FLV tags
///
/// Sub-tag timestamps are rebased so the first one lands on the message
/// timestamp.
pub fn split_aggregate(timestamp: u32, payload: &Bytes) -> Result<Vec<FlvTag>, MediaError> {
    let mut tags = Vec::new();
    let mut rest = payload.clone();
    let mut base: Option<u32> = None;

    while rest.len() >= FLV_TAG_HEADER_SIZE {
        let (type_byte, size, tag_ts) = parse_tag_header(&rest);
        let tag_type =
            FlvTagType::from_byte(type_byte).ok_or(MediaError::UnsupportedTagType(type_byte))?;
        let total = FLV_TAG_HEADER_SIZE + size;
        if rest.len() < total {
            return Err(MediaError::InvalidFlvTag);
        }

        let first_ts = *base.get_or_insert(tag_ts);
        let data = rest.slice(FLV_TAG_HEADER_SIZE..total);
        tags.push(FlvTag::new(
            tag_type,
            timestamp.wrapping_add(tag_ts.wrapping_sub(first_ts)),
            data,
        ));

        // The back pointer may be missing after the last tag
        rest.advance(total.saturating_add(PREV_TAG_SIZE_LEN).min(rest.len()));
    }

    Ok(tags)
}

/// Reassembles FLV tags from arbitrarily sliced input
#[derive(Debug, Default)]
pub struct FlvDemuxer {
    buffer: BytesMut,
    header_checked: bool,
}

impl FlvDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for the rest of a tag
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed bytes and collect every tag that is now complete
    ///
    /// Tags of a type RTMP cannot carry are skipped whole. A malformed file
    /// header discards everything buffered so the next call starts clean.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<FlvTag>, MediaError> {
        self.buffer.extend_from_slice(data);

        if !self.header_checked {
            if self.buffer.len() < 3 {
                return Ok(Vec::new());
            }
            if &self.buffer[..3] == b"FLV" {
                if self.buffer.len() < FLV_FILE_HEADER.len() {
                    return Ok(Vec::new());
                }
                let header_len = u32::from_be_bytes([
                    self.buffer[5],
                    self.buffer[6],
                    self.buffer[7],
                    self.buffer[8],
                ]) as usize;
                if header_len < 9 {
                    self.buffer.clear();
                    return Err(MediaError::InvalidFlvHeader);
                }
                let skip = header_len + PREV_TAG_SIZE_LEN;
                if self.buffer.len() < skip {
                    return Ok(Vec::new());
                }
                self.buffer.advance(skip);
            }
            self.header_checked = true;
        }

        let mut tags = Vec::new();
        while self.buffer.len() >= FLV_TAG_HEADER_SIZE {
            let (type_byte, size, timestamp) = parse_tag_header(&self.buffer);
            let total = FLV_TAG_HEADER_SIZE + size + PREV_TAG_SIZE_LEN;
            if self.buffer.len() < total {
                break;
            }

            let mut raw = self.buffer.split_to(total);
            let Some(tag_type) = FlvTagType::from_byte(type_byte) else {
                tracing::warn!(tag_type = type_byte, size = size, "Skipping unsupported FLV tag");
                continue;
            };
            raw.advance(FLV_TAG_HEADER_SIZE);
            raw.truncate(size);
            tags.push(FlvTag::new(tag_type, timestamp, raw.freeze()));
        }

        Ok(tags)
    }
}

/// Returns (type byte, data size, timestamp) of the tag at the start of `buf`
fn parse_tag_header(buf: &[u8]) -> (u8, usize, u32) {
    let size = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]) as usize;
    let timestamp = u32::from_be_bytes([buf[7], buf[4], buf[5], buf[6]]);
    (buf[0], size, timestamp)
}

fn put_u24(buf: &mut BytesMut, value: u32) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}
