//! Media container handling
//!
//! Play sessions deliver an FLV byte stream and publish sessions consume one.
//! Codec payloads pass through untouched.

pub mod flv;

pub use flv::{FlvDemuxer, FlvMuxer, FlvTag, FlvTagType};
