//! RTMP message types and parsing
//!
//! RTMP messages are classified into:
//! - Protocol Control Messages (types 1-6): Chunk/flow control
//! - Command Messages (types 17, 20): AMF-encoded commands
//! - Data Messages (types 15, 18): Metadata
//! - Audio/Video Messages (types 8, 9): Media data
//! - Aggregate Messages (type 22): back-to-back FLV tags
//!
//! Reference: RTMP Specification Section 5.4

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{Amf0Decoder, Amf0Encoder, AmfValue};
use crate::error::{AmfError, ProtocolError, Result};
use crate::protocol::chunk::RtmpChunk;
use crate::protocol::constants::*;

/// Parsed RTMP message
#[derive(Debug, Clone)]
pub enum RtmpMessage {
    SetChunkSize(u32),
    Abort { csid: u32 },
    Acknowledgement { sequence: u32 },
    UserControl(UserControlEvent),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
    Audio { timestamp: u32, data: Bytes },
    Video { timestamp: u32, data: Bytes },
    /// AMF0 command (type 20), or AMF3 command (type 17) with AMF0 body
    Command(Command),
    /// AMF0 data (type 18), or AMF3 data (type 15) with AMF0 body
    Data(DataMessage),
    Aggregate { timestamp: u32, data: Bytes },
    Unknown { type_id: u8, data: Bytes },
}

/// User Control Event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16, data: Bytes },
}

/// RTMP command (connect, play, publish, _result, onStatus, ...)
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Command object (often null)
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
    /// Message stream ID (from chunk)
    pub stream_id: u32,
}

/// Data message (@setDataFrame, onMetaData, ...)
#[derive(Debug, Clone)]
pub struct DataMessage {
    pub name: String,
    pub values: Vec<AmfValue>,
    pub stream_id: u32,
}

impl RtmpMessage {
    /// Parse a message from a reassembled chunk
    pub fn from_chunk(chunk: &RtmpChunk) -> Result<Self> {
        let mut payload = chunk.payload.clone();

        let need = |payload: &Bytes, n: usize| -> Result<()> {
            if payload.len() < n {
                Err(ProtocolError::InvalidChunkHeader.into())
            } else {
                Ok(())
            }
        };

        match chunk.message_type {
            MSG_SET_CHUNK_SIZE => {
                need(&payload, 4)?;
                Ok(RtmpMessage::SetChunkSize(payload.get_u32() & 0x7FFF_FFFF))
            }
            MSG_ABORT => {
                need(&payload, 4)?;
                Ok(RtmpMessage::Abort { csid: payload.get_u32() })
            }
            MSG_ACKNOWLEDGEMENT => {
                need(&payload, 4)?;
                Ok(RtmpMessage::Acknowledgement { sequence: payload.get_u32() })
            }
            MSG_USER_CONTROL => Self::parse_user_control(&mut payload),
            MSG_WINDOW_ACK_SIZE => {
                need(&payload, 4)?;
                Ok(RtmpMessage::WindowAckSize(payload.get_u32()))
            }
            MSG_SET_PEER_BANDWIDTH => {
                need(&payload, 5)?;
                let size = payload.get_u32();
                let limit_type = payload.get_u8();
                Ok(RtmpMessage::SetPeerBandwidth { size, limit_type })
            }
            MSG_AUDIO => Ok(RtmpMessage::Audio {
                timestamp: chunk.timestamp,
                data: payload,
            }),
            MSG_VIDEO => Ok(RtmpMessage::Video {
                timestamp: chunk.timestamp,
                data: payload,
            }),
            MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3 => {
                if chunk.message_type == MSG_COMMAND_AMF3 && payload.first() == Some(&0) {
                    payload.advance(1);
                }
                Ok(RtmpMessage::Command(Self::parse_command(&mut payload, chunk.stream_id)?))
            }
            MSG_DATA_AMF0 | MSG_DATA_AMF3 => {
                if chunk.message_type == MSG_DATA_AMF3 && payload.first() == Some(&0) {
                    payload.advance(1);
                }
                Ok(RtmpMessage::Data(Self::parse_data(&mut payload, chunk.stream_id)?))
            }
            MSG_AGGREGATE => Ok(RtmpMessage::Aggregate {
                timestamp: chunk.timestamp,
                data: payload,
            }),
            type_id => Ok(RtmpMessage::Unknown { type_id, data: payload }),
        }
    }

    fn parse_user_control(payload: &mut Bytes) -> Result<Self> {
        if payload.len() < 6 {
            return Err(ProtocolError::InvalidChunkHeader.into());
        }

        let event_type = payload.get_u16();
        let event = match event_type {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(payload.get_u32()),
            UC_STREAM_EOF => UserControlEvent::StreamEof(payload.get_u32()),
            UC_STREAM_DRY => UserControlEvent::StreamDry(payload.get_u32()),
            UC_SET_BUFFER_LENGTH => {
                if payload.len() < 8 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let stream_id = payload.get_u32();
                let buffer_ms = payload.get_u32();
                UserControlEvent::SetBufferLength { stream_id, buffer_ms }
            }
            UC_STREAM_IS_RECORDED => UserControlEvent::StreamIsRecorded(payload.get_u32()),
            UC_PING_REQUEST => UserControlEvent::PingRequest(payload.get_u32()),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(payload.get_u32()),
            _ => UserControlEvent::Unknown {
                event_type,
                data: payload.clone(),
            },
        };

        Ok(RtmpMessage::UserControl(event))
    }

    fn parse_command(payload: &mut Bytes, stream_id: u32) -> Result<Command> {
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(payload)? {
            AmfValue::String(s) => s,
            _ => return Err(ProtocolError::InvalidCommand("Expected command name".into()).into()),
        };

        let transaction_id = if payload.has_remaining() {
            decoder.decode(payload)?.as_number().unwrap_or(0.0)
        } else {
            0.0
        };

        let command_object = if payload.has_remaining() {
            decoder.decode(payload)?
        } else {
            AmfValue::Null
        };

        let arguments = decode_rest(&mut decoder, payload)?;

        Ok(Command {
            name,
            transaction_id,
            command_object,
            arguments,
            stream_id,
        })
    }

    fn parse_data(payload: &mut Bytes, stream_id: u32) -> Result<DataMessage> {
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(payload)? {
            AmfValue::String(s) => s,
            _ => String::new(),
        };
        let values = decode_rest(&mut decoder, payload)?;

        Ok(DataMessage { name, values, stream_id })
    }

    /// Encode to (message type, payload)
    pub fn encode(&self) -> (u8, Bytes) {
        match self {
            RtmpMessage::SetChunkSize(size) => (MSG_SET_CHUNK_SIZE, u32_payload(*size)),
            RtmpMessage::Abort { csid } => (MSG_ABORT, u32_payload(*csid)),
            RtmpMessage::Acknowledgement { sequence } => {
                (MSG_ACKNOWLEDGEMENT, u32_payload(*sequence))
            }
            RtmpMessage::WindowAckSize(size) => (MSG_WINDOW_ACK_SIZE, u32_payload(*size)),
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (MSG_SET_PEER_BANDWIDTH, buf.freeze())
            }
            RtmpMessage::UserControl(event) => (MSG_USER_CONTROL, encode_user_control(event)),
            RtmpMessage::Audio { data, .. } => (MSG_AUDIO, data.clone()),
            RtmpMessage::Video { data, .. } => (MSG_VIDEO, data.clone()),
            RtmpMessage::Command(cmd) => {
                let mut encoder = Amf0Encoder::new();
                encoder.encode(&AmfValue::String(cmd.name.clone()));
                encoder.encode(&AmfValue::Number(cmd.transaction_id));
                encoder.encode(&cmd.command_object);
                encoder.encode_all(&cmd.arguments);
                (MSG_COMMAND_AMF0, encoder.finish())
            }
            RtmpMessage::Data(data) => {
                let mut encoder = Amf0Encoder::new();
                encoder.encode(&AmfValue::String(data.name.clone()));
                encoder.encode_all(&data.values);
                (MSG_DATA_AMF0, encoder.finish())
            }
            RtmpMessage::Aggregate { data, .. } => (MSG_AGGREGATE, data.clone()),
            RtmpMessage::Unknown { type_id, data } => (*type_id, data.clone()),
        }
    }

    /// Chunk stream the client sends this message on
    pub fn default_csid(&self) -> u32 {
        match self {
            RtmpMessage::SetChunkSize(_)
            | RtmpMessage::Abort { .. }
            | RtmpMessage::Acknowledgement { .. }
            | RtmpMessage::UserControl(_)
            | RtmpMessage::WindowAckSize(_)
            | RtmpMessage::SetPeerBandwidth { .. } => CSID_PROTOCOL_CONTROL,
            RtmpMessage::Audio { .. } => CSID_AUDIO,
            RtmpMessage::Video { .. } | RtmpMessage::Aggregate { .. } => CSID_VIDEO,
            RtmpMessage::Data(_) => CSID_DATA,
            RtmpMessage::Command(cmd) if cmd.stream_id != 0 => CSID_STREAM_COMMAND,
            RtmpMessage::Command(_) | RtmpMessage::Unknown { .. } => CSID_COMMAND,
        }
    }
}

/// Decode trailing values, stopping quietly at a truncated tail
fn decode_rest(decoder: &mut Amf0Decoder, payload: &mut Bytes) -> Result<Vec<AmfValue>> {
    let mut values = Vec::new();
    while payload.has_remaining() {
        match decoder.decode(payload) {
            Ok(v) => values.push(v),
            Err(AmfError::UnexpectedEof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(values)
}

fn u32_payload(value: u32) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

fn encode_user_control(event: &UserControlEvent) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    let (event_type, id) = match event {
        UserControlEvent::StreamBegin(id) => (UC_STREAM_BEGIN, *id),
        UserControlEvent::StreamEof(id) => (UC_STREAM_EOF, *id),
        UserControlEvent::StreamDry(id) => (UC_STREAM_DRY, *id),
        UserControlEvent::StreamIsRecorded(id) => (UC_STREAM_IS_RECORDED, *id),
        UserControlEvent::PingRequest(ts) => (UC_PING_REQUEST, *ts),
        UserControlEvent::PingResponse(ts) => (UC_PING_RESPONSE, *ts),
        UserControlEvent::SetBufferLength { stream_id, buffer_ms } => {
            buf.put_u16(UC_SET_BUFFER_LENGTH);
            buf.put_u32(*stream_id);
            buf.put_u32(*buffer_ms);
            return buf.freeze();
        }
        UserControlEvent::Unknown { event_type, data } => {
            buf.put_u16(*event_type);
            buf.put_slice(data);
            return buf.freeze();
        }
    };
    buf.put_u16(event_type);
    buf.put_u32(id);
    buf.freeze()
}

/// Client-side command builders
impl Command {
    /// NetConnection command on message stream 0
    pub fn call(name: &str, transaction_id: f64, arguments: Vec<AmfValue>) -> Self {
        Command {
            name: name.to_string(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments,
            stream_id: 0,
        }
    }

    /// NetStream command addressed to `stream_id`
    pub fn stream(name: &str, stream_id: u32, arguments: Vec<AmfValue>) -> Self {
        Command {
            name: name.to_string(),
            transaction_id: 0.0,
            command_object: AmfValue::Null,
            arguments,
            stream_id,
        }
    }

    /// `code` of the info object carried by onStatus/_result/_error
    pub fn status_code(&self) -> Option<&str> {
        self.arguments
            .iter()
            .chain(std::iter::once(&self.command_object))
            .find_map(|v| v.get_str("code"))
    }

    /// Whether a status code reports a refused request
    pub fn is_failure_code(code: &str) -> bool {
        STATUS_FAILURE_MARKERS.iter().any(|m| code.contains(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_for(msg: &RtmpMessage, stream_id: u32) -> RtmpChunk {
        let (message_type, payload) = msg.encode();
        RtmpChunk {
            csid: msg.default_csid(),
            timestamp: 0,
            message_type,
            stream_id,
            payload,
        }
    }

    #[test]
    fn test_command_roundtrip() {
        let cmd = Command::stream(CMD_PLAY, 1, vec!["cam".into(), AmfValue::Number(-2.0)]);
        let msg = RtmpMessage::Command(cmd);
        assert_eq!(msg.default_csid(), CSID_STREAM_COMMAND);

        match RtmpMessage::from_chunk(&chunk_for(&msg, 1)).unwrap() {
            RtmpMessage::Command(parsed) => {
                assert_eq!(parsed.name, CMD_PLAY);
                assert_eq!(parsed.stream_id, 1);
                assert_eq!(parsed.arguments[0].as_str(), Some("cam"));
                assert_eq!(parsed.arguments[1].as_number(), Some(-2.0));
            }
            other => panic!("Expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_status_code() {
        let info = AmfValue::object([
            ("level", "error"),
            ("code", "NetStream.Play.StreamNotFound"),
        ]);
        let cmd = Command::stream(CMD_ON_STATUS, 1, vec![info]);
        let code = cmd.status_code().unwrap();
        assert_eq!(code, "NetStream.Play.StreamNotFound");
        assert!(Command::is_failure_code(code));
        assert!(!Command::is_failure_code(NS_PLAY_START));

        // _error carries the info object as the argument after a null
        let err = Command::call(CMD_ERROR, 1.0, vec![AmfValue::object([("code", NC_CODE)])]);
        assert_eq!(err.status_code(), Some(NC_CODE));
    }

    const NC_CODE: &str = "NetConnection.Connect.Rejected";

    #[test]
    fn test_amf3_command_marker_skipped() {
        let (_, body) = RtmpMessage::Command(Command::call(CMD_RESULT, 2.0, vec![1.0.into()])).encode();
        let mut payload = BytesMut::new();
        payload.put_u8(0);
        payload.put_slice(&body);

        let chunk = RtmpChunk {
            csid: CSID_COMMAND,
            timestamp: 0,
            message_type: MSG_COMMAND_AMF3,
            stream_id: 0,
            payload: payload.freeze(),
        };
        match RtmpMessage::from_chunk(&chunk).unwrap() {
            RtmpMessage::Command(cmd) => {
                assert_eq!(cmd.name, CMD_RESULT);
                assert_eq!(cmd.transaction_id, 2.0);
            }
            other => panic!("Expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_user_control_roundtrip() {
        for event in [
            UserControlEvent::StreamEof(1),
            UserControlEvent::PingRequest(1234),
            UserControlEvent::SetBufferLength { stream_id: 1, buffer_ms: 3000 },
        ] {
            let msg = RtmpMessage::UserControl(event.clone());
            match RtmpMessage::from_chunk(&chunk_for(&msg, 0)).unwrap() {
                RtmpMessage::UserControl(parsed) => assert_eq!(parsed, event),
                other => panic!("Expected user control, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_protocol_control_parsing() {
        let chunk = RtmpChunk {
            csid: CSID_PROTOCOL_CONTROL,
            timestamp: 0,
            message_type: MSG_SET_CHUNK_SIZE,
            stream_id: 0,
            payload: Bytes::from_static(&[0x80, 0x00, 0x10, 0x00]),
        };
        assert!(matches!(
            RtmpMessage::from_chunk(&chunk).unwrap(),
            RtmpMessage::SetChunkSize(4096)
        ));

        let short = RtmpChunk {
            message_type: MSG_WINDOW_ACK_SIZE,
            payload: Bytes::from_static(&[0x00]),
            ..chunk
        };
        assert!(RtmpMessage::from_chunk(&short).is_err());
    }
}
