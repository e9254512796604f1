//! RTMP client implementation
//!
//! - [`RtmpEngine`]: the operation set a session drives
//! - [`RtmpConnector`]: the TCP implementation of it
//! - [`RtmpClient`]: blocking wrapper reporting integer status codes

pub mod blocking;
pub mod config;
pub mod connector;
pub mod engine;

pub use blocking::RtmpClient;
pub use config::{ClientConfig, ParsedUrl};
pub use connector::RtmpConnector;
pub use engine::{EngineFactory, RtmpEngine};
