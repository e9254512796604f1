//! Scripted engine for session and client tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::engine::{EngineFactory, RtmpEngine};
use crate::error::{Error, Result};

/// How the mock engine misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    #[default]
    Ok,
    FailAllocate,
    FailUrl,
    FailConnect,
    FailStream,
    /// `connect` never completes
    HangConnect,
    FailRead,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub allocated: AtomicUsize,
    pub dropped: AtomicUsize,
    pub closed: AtomicUsize,
    pub written: AtomicUsize,
}

impl Counters {
    /// Engines currently alive
    pub fn live(&self) -> usize {
        self.allocated.load(Ordering::SeqCst) - self.dropped.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockFactory {
    pub behavior: Behavior,
    /// Bytes each read produces at most
    pub read_chunk: usize,
    pub read_delay: Duration,
    pub counters: Arc<Counters>,
    pub pauses: Arc<Mutex<Vec<(bool, u32)>>>,
}

impl MockFactory {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            read_chunk: 10,
            read_delay: Duration::ZERO,
            counters: Arc::default(),
            pauses: Arc::default(),
        }
    }
}

impl EngineFactory for MockFactory {
    type Engine = MockEngine;

    fn allocate(&self) -> Result<MockEngine> {
        if self.behavior == Behavior::FailAllocate {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "no engine",
            )));
        }
        self.counters.allocated.fetch_add(1, Ordering::SeqCst);
        Ok(MockEngine {
            behavior: self.behavior,
            read_chunk: self.read_chunk,
            read_delay: self.read_delay,
            counters: self.counters.clone(),
            pauses: self.pauses.clone(),
            connected: false,
        })
    }
}

pub struct MockEngine {
    behavior: Behavior,
    read_chunk: usize,
    read_delay: Duration,
    counters: Arc<Counters>,
    pauses: Arc<Mutex<Vec<(bool, u32)>>>,
    connected: bool,
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.counters.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RtmpEngine for MockEngine {
    fn setup_url(&mut self, url: &str) -> Result<()> {
        if self.behavior == Behavior::FailUrl || !url.starts_with("rtmp://") {
            return Err(Error::Config(format!("bad url: {}", url)));
        }
        Ok(())
    }

    fn set_live(&mut self) {}

    fn enable_write(&mut self) {}

    async fn connect(&mut self) -> Result<()> {
        match self.behavior {
            Behavior::FailConnect => Err(Error::ConnectionClosed),
            Behavior::HangConnect => std::future::pending().await,
            _ => {
                self.connected = true;
                Ok(())
            }
        }
    }

    async fn connect_stream(&mut self) -> Result<()> {
        if self.behavior == Behavior::FailStream {
            return Err(Error::Rejected("NetStream.Play.StreamNotFound".into()));
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        if self.behavior == Behavior::FailRead {
            return Err(Error::EndOfStream);
        }
        let n = buf.len().min(self.read_chunk);
        buf[..n].fill(0xAB);
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.counters.written.fetch_add(data.len(), Ordering::SeqCst);
        Ok(data.len())
    }

    async fn pause(&mut self, pause: bool, stamp_ms: u32) -> Result<()> {
        if let Ok(mut pauses) = self.pauses.lock() {
            pauses.push((pause, stamp_ms));
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
