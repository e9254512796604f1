//! AMF (Action Message Format) implementation
//!
//! AMF0 is the serialization RTMP uses for command parameters and
//! metadata. AMF3 payloads (the avmplus marker) are skipped, not decoded.

pub mod amf0;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use value::{AmfProperties, AmfValue};
