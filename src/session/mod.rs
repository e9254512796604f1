//! RTMP session lifecycle
//!
//! This module holds the caller-facing side of a connection:
//! - Lifecycle mode (not connected, connecting, playing, publishing)
//! - The session handle that owns the engine connection

pub mod handle;
#[cfg(test)]
pub(crate) mod mock;
pub mod state;

pub use handle::RtmpSession;
pub use state::SessionMode;
