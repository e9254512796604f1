//! Session handle
//!
//! [`RtmpSession`] owns at most one engine connection and guards it together
//! with the lifecycle mode behind a single async mutex. Every operation
//! checks the mode before touching the engine, so a closed or never-opened
//! session answers with a typed error instead of reaching a released
//! connection.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::client::config::ClientConfig;
use crate::client::engine::{EngineFactory, RtmpEngine};
use crate::error::{Error, OpenError, PauseError, ReadError, SeekError, WriteError};
use crate::stats::SessionStats;

use super::state::SessionMode;

struct Inner<E> {
    mode: SessionMode,
    /// Some iff mode != NotConnected
    engine: Option<E>,
    live: bool,
    /// Media time of the last pause, used on resume
    paused_at: u32,
    stats: SessionStats,
}

impl<E> Default for Inner<E> {
    fn default() -> Self {
        Self {
            mode: SessionMode::NotConnected,
            engine: None,
            live: false,
            paused_at: 0,
            stats: SessionStats::default(),
        }
    }
}

/// A single RTMP play or publish session
///
/// Sessions are independent values; several can be open at once.
///
/// ```no_run
/// use rtmp_session::{ClientConfig, RtmpSession};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let session = RtmpSession::new(ClientConfig::default());
/// session.open("rtmp://localhost/live/cam", false, true).await?;
///
/// let mut buf = vec![0u8; 4096];
/// let n = session.read(&mut buf, 0, 4096).await?;
/// println!("read {} bytes of FLV", n);
///
/// session.close().await;
/// # Ok(())
/// # }
/// ```
pub struct RtmpSession<F: EngineFactory = ClientConfig> {
    factory: F,
    inner: Mutex<Inner<F::Engine>>,
    /// Mirrors `inner.mode.is_connected()` for callers that must not wait
    connected: AtomicBool,
}

impl<F: EngineFactory> RtmpSession<F> {
    /// Create a session that allocates connections with `factory`
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            inner: Mutex::new(Inner::default()),
            connected: AtomicBool::new(false),
        }
    }

    /// Open a connection and start playing (or publishing) the stream at `url`
    ///
    /// Fails with [`OpenError::AlreadyOpen`] if a connection is already held.
    /// Any other failure releases the partial connection and leaves the
    /// session not connected.
    pub async fn open(&self, url: &str, publish_mode: bool, is_live: bool) -> Result<(), OpenError> {
        let mut inner = self.inner.lock().await;
        if inner.mode != SessionMode::NotConnected || inner.engine.is_some() {
            return Err(OpenError::AlreadyOpen);
        }
        if url.is_empty() {
            return Err(OpenError::InvalidUrl(Error::Config("empty URL".into())));
        }

        let mut engine = self
            .factory
            .allocate()
            .map_err(OpenError::AllocationFailed)?;

        if let Err(e) = engine.setup_url(url) {
            tracing::debug!(url = url, error = %e, "URL setup failed");
            return Err(OpenError::InvalidUrl(e));
        }
        if is_live {
            engine.set_live();
        }
        if publish_mode {
            engine.enable_write();
        }

        // From here on a dropped future leaves the engine for close() to reap
        inner.mode = SessionMode::Connecting;
        let engine = inner.engine.insert(engine);

        let result = match engine.connect().await {
            Ok(()) => engine
                .connect_stream()
                .await
                .map_err(OpenError::StreamSetupFailed),
            Err(e) => Err(OpenError::ConnectFailed(e)),
        };

        if let Err(e) = result {
            tracing::warn!(url = url, error = %e, "Open failed");
            if let Some(mut engine) = inner.engine.take() {
                engine.close().await;
            }
            inner.mode = SessionMode::NotConnected;
            return Err(e);
        }

        inner.mode = SessionMode::connected(publish_mode);
        inner.live = is_live;
        inner.paused_at = 0;
        inner.stats.reset();
        self.connected.store(true, Ordering::Release);

        tracing::info!(url = url, publish = publish_mode, live = is_live, "Session opened");
        Ok(())
    }

    /// Read up to `max_size` bytes of FLV into `buffer[offset..]`
    ///
    /// Returns 0 when nothing arrived within the engine's read timeout.
    /// Nothing outside `buffer[offset..offset + n]` is touched.
    pub async fn read(
        &self,
        buffer: &mut [u8],
        offset: usize,
        max_size: usize,
    ) -> Result<usize, ReadError> {
        let mut inner = self.inner.lock().await;
        let Inner {
            mode,
            engine,
            stats,
            ..
        } = &mut *inner;

        let engine = match (*mode, engine.as_mut()) {
            (SessionMode::ConnectedRead, Some(engine)) => engine,
            (SessionMode::ConnectedWrite, Some(_)) => return Err(ReadError::WrongMode),
            _ => return Err(ReadError::NotConnected),
        };

        if offset > buffer.len() {
            return Err(ReadError::InvalidRange {
                offset,
                len: buffer.len(),
            });
        }
        let size = max_size.min(buffer.len() - offset);

        let mut transient = Vec::new();
        transient
            .try_reserve_exact(size)
            .map_err(ReadError::OutOfMemory)?;
        transient.resize(size, 0u8);

        let n = engine
            .read(&mut transient)
            .await
            .map_err(ReadError::Engine)?
            .min(size);
        buffer[offset..offset + n].copy_from_slice(&transient[..n]);

        stats.record_read(n);
        Ok(n)
    }

    /// Send FLV bytes on a publish session
    pub async fn write(&self, data: &[u8]) -> Result<usize, WriteError> {
        let mut inner = self.inner.lock().await;
        let Inner {
            mode,
            engine,
            stats,
            ..
        } = &mut *inner;

        let engine = match (*mode, engine.as_mut()) {
            (SessionMode::ConnectedWrite, Some(engine)) => engine,
            (SessionMode::ConnectedRead, Some(_)) => return Err(WriteError::WrongMode),
            _ => return Err(WriteError::NotConnected),
        };

        let n = engine.write(data).await.map_err(WriteError::Engine)?;
        stats.record_write(n);
        Ok(n)
    }

    /// Pause delivery at `at_time_millis`, or resume when it is 0
    pub async fn pause(&self, at_time_millis: i64) -> Result<(), PauseError> {
        let mut inner = self.inner.lock().await;
        let Inner {
            mode,
            engine,
            live,
            paused_at,
            ..
        } = &mut *inner;

        let engine = match (*mode, engine.as_mut()) {
            (SessionMode::ConnectedRead, Some(engine)) => engine,
            (SessionMode::ConnectedWrite, Some(_)) => return Err(PauseError::WrongMode),
            _ => return Err(PauseError::NotConnected),
        };
        if *live {
            return Err(PauseError::LiveStream);
        }
        let stamp =
            u32::try_from(at_time_millis).map_err(|_| PauseError::InvalidTime(at_time_millis))?;

        if stamp > 0 {
            engine.pause(true, stamp).await.map_err(PauseError::Engine)?;
            *paused_at = stamp;
        } else {
            engine
                .pause(false, *paused_at)
                .await
                .map_err(PauseError::Engine)?;
        }
        Ok(())
    }

    /// Seeking is not supported at this layer
    ///
    /// Always succeeds and does nothing, in every state.
    pub fn seek(&self, target_time_millis: i64) -> Result<(), SeekError> {
        tracing::debug!(target = target_time_millis, "Seek ignored");
        Ok(())
    }

    /// Release the connection, if any
    ///
    /// Idempotent. Waits for an in-flight operation to finish first.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::Release);
        let mut inner = self.inner.lock().await;
        let previous = inner.mode;

        if let Some(mut engine) = inner.engine.take() {
            engine.close().await;
            tracing::info!(mode = ?previous, "Session closed");
        }
        inner.mode = SessionMode::NotConnected;
        inner.live = false;
        inner.paused_at = 0;
        // An open that finished while we waited may have set it again
        self.connected.store(false, Ordering::Release);
    }

    /// Whether a connection is open and its transport is alive
    ///
    /// Never waits for an in-flight operation: while one holds the session,
    /// the answer comes from the last completed open or close.
    pub async fn is_connected(&self) -> bool {
        let Ok(inner) = self.inner.try_lock() else {
            return self.connected.load(Ordering::Acquire);
        };
        inner.mode.is_connected()
            && inner
                .engine
                .as_ref()
                .map(|engine| engine.is_connected())
                .unwrap_or(false)
    }

    pub async fn mode(&self) -> SessionMode {
        self.inner.lock().await.mode
    }

    /// Snapshot of the counters for the current connection
    pub async fn stats(&self) -> SessionStats {
        self.inner.lock().await.stats.clone()
    }
}
