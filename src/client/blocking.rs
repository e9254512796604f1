//! Blocking client with integer status codes
//!
//! [`RtmpClient`] is the shape a foreign-call boundary wants: plain methods
//! that block until the protocol exchange finishes and report outcomes as
//! integers.
//!
//! | Operation      | Result                                                        |
//! |----------------|---------------------------------------------------------------|
//! | `open`         | 1; -1 allocation, -2 URL, -3 connect, -4 stream, -5 already open |
//! | `read`         | bytes read; -1 not connected, -2 wrong mode, -3 bad range, -4 out of memory, -5 engine |
//! | `write`        | bytes accepted; -1 not connected, -2 wrong mode, -3 bad size, -5 engine |
//! | `seek`         | always 0                                                      |
//! | `pause`        | 1; 0 refused; -1 not connected                                |
//! | `close`        | always 0                                                      |
//! | `is_connected` | 1 or 0                                                        |
//!
//! Methods take `&self`, so `close` may be called from another thread while a
//! `read` is blocked; it waits for that read (bounded by the read timeout)
//! and then tears the connection down.

use tokio::runtime::{Builder, Runtime};

use crate::session::RtmpSession;
use crate::stats::SessionStats;

use super::config::ClientConfig;
use super::engine::EngineFactory;

/// Status code for a negative or oversized length argument
const BAD_SIZE: i32 = -3;

/// Blocking wrapper around an [`RtmpSession`]
pub struct RtmpClient<F: EngineFactory = ClientConfig> {
    runtime: Runtime,
    session: RtmpSession<F>,
}

impl RtmpClient<ClientConfig> {
    pub fn new(config: ClientConfig) -> std::io::Result<Self> {
        Self::with_factory(config)
    }
}

impl<F: EngineFactory> RtmpClient<F> {
    /// Create a client whose connections come from `factory`
    pub fn with_factory(factory: F) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("rtmp-session")
            .enable_all()
            .build()?;

        Ok(Self {
            runtime,
            session: RtmpSession::new(factory),
        })
    }

    pub fn open(&self, url: &str, publish_mode: bool, is_live: bool) -> i32 {
        match self.runtime.block_on(self.session.open(url, publish_mode, is_live)) {
            Ok(()) => 1,
            Err(e) => e.code(),
        }
    }

    /// Read up to `size` bytes into `dest[offset..]`
    pub fn read(&self, dest: &mut [u8], offset: i32, size: i32) -> i32 {
        // Negative arguments surface as an out-of-range offset once the
        // session has checked its mode
        let offset = match (usize::try_from(offset), usize::try_from(size)) {
            (Ok(offset), Ok(_)) => offset,
            _ => usize::MAX,
        };
        let size = usize::try_from(size).unwrap_or(0);

        match self.runtime.block_on(self.session.read(dest, offset, size)) {
            Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
            Err(e) => e.code(),
        }
    }

    /// Write the first `size` bytes of `data`
    pub fn write(&self, data: &[u8], size: i32) -> i32 {
        let Some(data) = usize::try_from(size).ok().and_then(|n| data.get(..n)) else {
            return BAD_SIZE;
        };

        match self.runtime.block_on(self.session.write(data)) {
            Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
            Err(e) => e.code(),
        }
    }

    /// No-op; see [`RtmpSession::seek`]
    pub fn seek(&self, target_time: i32) -> i32 {
        match self.session.seek(target_time.into()) {
            Ok(()) => 0,
            Err(e) => match e {},
        }
    }

    pub fn pause(&self, target_time: i32) -> i32 {
        match self.runtime.block_on(self.session.pause(target_time.into())) {
            Ok(()) => 1,
            Err(e) => {
                tracing::debug!(error = %e, "Pause refused");
                e.code()
            }
        }
    }

    pub fn close(&self) -> i32 {
        self.runtime.block_on(self.session.close());
        0
    }

    pub fn is_connected(&self) -> i32 {
        i32::from(self.runtime.block_on(self.session.is_connected()))
    }

    /// Traffic counters of the current connection
    pub fn stats(&self) -> SessionStats {
        self.runtime.block_on(self.session.stats())
    }

    /// The async session this client drives
    pub fn session(&self) -> &RtmpSession<F> {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::{Behavior, MockFactory};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const URL: &str = "rtmp://host/app/stream";

    fn client(behavior: Behavior) -> RtmpClient<MockFactory> {
        RtmpClient::with_factory(MockFactory::new(behavior)).unwrap()
    }

    #[test]
    fn test_open_codes() {
        assert_eq!(client(Behavior::Ok).open(URL, false, false), 1);
        assert_eq!(client(Behavior::FailAllocate).open(URL, false, false), -1);
        assert_eq!(client(Behavior::FailUrl).open(URL, false, false), -2);
        assert_eq!(client(Behavior::Ok).open("", false, false), -2);
        assert_eq!(client(Behavior::FailConnect).open(URL, false, false), -3);
        assert_eq!(client(Behavior::FailStream).open(URL, false, false), -4);

        let client = client(Behavior::Ok);
        assert_eq!(client.open(URL, false, false), 1);
        assert_eq!(client.open(URL, false, false), -5);
        assert_eq!(client.is_connected(), 1);
    }

    #[test]
    fn test_not_connected_codes() {
        let client = client(Behavior::Ok);
        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf, 0, 16), -1);
        assert_eq!(client.write(&buf, 16), -1);
        assert_eq!(client.pause(100), -1);
        assert_eq!(client.seek(100), 0);
        assert_eq!(client.close(), 0);
        assert_eq!(client.is_connected(), 0);
    }

    #[test]
    fn test_play_codes() {
        let client = client(Behavior::Ok);
        assert_eq!(client.open(URL, false, false), 1);

        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf, 2, 4), 4);
        assert_eq!(&buf[..8], &[0, 0, 0xAB, 0xAB, 0xAB, 0xAB, 0, 0]);
        assert_eq!(client.read(&mut buf, -1, 4), -3);
        assert_eq!(client.read(&mut buf, 0, -4), -3);
        assert_eq!(client.read(&mut buf, 17, 4), -3);
        assert_eq!(client.write(&buf, 4), -2);

        assert_eq!(client.pause(500), 1);
        assert_eq!(client.pause(0), 1);
        assert_eq!(client.pause(-5), 0);

        assert_eq!(client.close(), 0);
        assert_eq!(client.close(), 0);
        assert_eq!(client.is_connected(), 0);
        assert_eq!(client.read(&mut buf, 0, 4), -1);
    }

    #[test]
    fn test_publish_codes() {
        let client = client(Behavior::Ok);
        assert_eq!(client.open(URL, true, true), 1);

        let data = [1u8; 32];
        assert_eq!(client.write(&data, 32), 32);
        assert_eq!(client.write(&data, 8), 8);
        assert_eq!(client.write(&data, 33), -3);
        assert_eq!(client.write(&data, -1), -3);
        assert_eq!(client.stats().bytes_written, 40);
        assert_eq!(client.pause(500), 0);

        let mut buf = [0u8; 4];
        assert_eq!(client.read(&mut buf, 0, 4), -2);

        client.close();
        assert_eq!(client.write(&data, 32), -1);
    }

    #[test]
    fn test_engine_error_code() {
        let client = client(Behavior::FailRead);
        assert_eq!(client.open(URL, false, false), 1);
        let mut buf = [0u8; 4];
        assert_eq!(client.read(&mut buf, 0, 4), -5);
    }

    #[test]
    fn test_close_from_other_thread() {
        let mut factory = MockFactory::new(Behavior::Ok);
        factory.read_delay = Duration::from_millis(5);
        let counters = factory.counters.clone();
        let client = Arc::new(RtmpClient::with_factory(factory).unwrap());
        assert_eq!(client.open(URL, false, false), 1);

        let reader = {
            let client = client.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 8];
                (0..50)
                    .map(|_| client.read(&mut buf, 0, 8))
                    .collect::<Vec<_>>()
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(client.close(), 0);

        let codes = reader.join().unwrap();
        assert!(codes.iter().all(|c| *c == 8 || *c == -1));
        assert_eq!(codes.last(), Some(&-1));
        assert_eq!(counters.live(), 0);
    }
}
