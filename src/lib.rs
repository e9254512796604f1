//! rtmp-session: single-session RTMP client
//!
//! This library opens one RTMP connection per session and moves media
//! through it in plain read/write calls:
//! - Play sessions hand out the stream as an FLV byte stream
//! - Publish sessions take an FLV byte stream and send its tags
//! - Every operation checks the session state first, so misuse yields a
//!   typed error instead of touching a released connection
//! - A blocking wrapper reports outcomes as integer status codes for
//!   foreign-call boundaries
//!
//! # Example: Record a live stream
//!
//! ```no_run
//! use rtmp_session::{ClientConfig, RtmpSession};
//! use rtmp_session::error::ReadError;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = RtmpSession::new(ClientConfig::default());
//!     session.open("rtmp://localhost/live/cam", false, true).await?;
//!
//!     let mut flv = Vec::new();
//!     let mut buf = [0u8; 64 * 1024];
//!     loop {
//!         match session.read(&mut buf, 0, 64 * 1024).await {
//!             Ok(n) => flv.extend_from_slice(&buf[..n]),
//!             Err(ReadError::Engine(_)) => break,
//!             Err(e) => return Err(e.into()),
//!         }
//!     }
//!
//!     session.close().await;
//!     std::fs::write("cam.flv", flv)?;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod session;
pub mod stats;

// Re-export main types for convenience
pub use client::{ClientConfig, EngineFactory, RtmpClient, RtmpConnector, RtmpEngine};
pub use error::{Error, OpenError, PauseError, ReadError, Result, SeekError, WriteError};
pub use session::{RtmpSession, SessionMode};
pub use stats::SessionStats;
