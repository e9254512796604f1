//! Engine seam between the session and the RTMP wire protocol
//!
//! The session drives a connection through this narrow operation set and
//! never touches protocol details itself. [`RtmpConnector`] is the default
//! implementation; tests substitute their own.

use async_trait::async_trait;

use crate::error::Result;

use super::config::ClientConfig;
use super::connector::RtmpConnector;

/// One RTMP connection as seen by a session
///
/// The setup methods are called in order: `setup_url`, then optionally
/// `set_live` and `enable_write`, then `connect` and `connect_stream`.
#[async_trait]
pub trait RtmpEngine: Send {
    /// Apply the stream URL
    fn setup_url(&mut self, url: &str) -> Result<()>;

    /// Mark the stream as live (not seekable, not resumable)
    fn set_live(&mut self);

    /// Configure the connection for publishing instead of playing
    fn enable_write(&mut self);

    /// Open the transport and complete the application-level connect
    async fn connect(&mut self) -> Result<()>;

    /// Create the media stream and start play or publish
    async fn connect_stream(&mut self) -> Result<()>;

    /// Read FLV bytes into `buf`
    ///
    /// `Ok(0)` means nothing arrived before the read timeout.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write FLV bytes, returning how many were accepted
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Pause (`true`) or resume (`false`) delivery at `stamp_ms`
    async fn pause(&mut self, pause: bool, stamp_ms: u32) -> Result<()>;

    /// Tear the connection down; never fails
    async fn close(&mut self);

    /// Whether the transport is still usable
    fn is_connected(&self) -> bool;
}

/// Allocates fresh engine connections for a session
pub trait EngineFactory: Send + Sync {
    type Engine: RtmpEngine;

    fn allocate(&self) -> Result<Self::Engine>;
}

impl EngineFactory for ClientConfig {
    type Engine = RtmpConnector;

    fn allocate(&self) -> Result<RtmpConnector> {
        Ok(RtmpConnector::new(self.clone()))
    }
}

impl<E, F> EngineFactory for F
where
    E: RtmpEngine,
    F: Fn() -> Result<E> + Send + Sync,
{
    type Engine = E;

    fn allocate(&self) -> Result<E> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_config_factory() {
        let config = ClientConfig::default();
        let mut engine = config.allocate().unwrap();
        assert!(!engine.is_connected());
        engine.setup_url("rtmp://localhost/live/cam").unwrap();
        assert!(engine.setup_url("not a url").is_err());
    }

    #[test]
    fn test_closure_factory() {
        let factory = || -> Result<RtmpConnector> { Ok(RtmpConnector::new(ClientConfig::default())) };
        assert!(!factory.allocate().unwrap().is_connected());

        let failing = || -> Result<RtmpConnector> { Err(Error::Config("no engine".into())) };
        assert!(matches!(failing.allocate(), Err(Error::Config(_))));
    }
}
