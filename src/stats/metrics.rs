//! Statistics for RTMP sessions

use std::time::{Duration, Instant};

/// Per-connection transfer statistics
///
/// Reset by every successful `open`; counts bytes that crossed the session
/// boundary, not bytes on the wire.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Bytes handed to the caller by `read`
    pub bytes_read: u64,
    /// Bytes accepted by `write`
    pub bytes_written: u64,
    /// Successful `read` calls (including those that returned 0)
    pub reads: u64,
    /// Successful `write` calls
    pub writes: u64,
    /// When the current connection was opened
    pub opened_at: Option<Instant>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting for a freshly opened connection
    pub fn reset(&mut self) {
        *self = Self {
            opened_at: Some(Instant::now()),
            ..Self::default()
        };
    }

    pub fn record_read(&mut self, bytes: usize) {
        self.reads += 1;
        self.bytes_read += bytes as u64;
    }

    pub fn record_write(&mut self, bytes: usize) {
        self.writes += 1;
        self.bytes_written += bytes as u64;
    }

    /// Time since the connection was opened
    pub fn duration(&self) -> Duration {
        self.opened_at
            .map(|opened| opened.elapsed())
            .unwrap_or_default()
    }

    /// Average transfer rate in bits per second, either direction
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            ((self.bytes_read + self.bytes_written) * 8) / secs
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        let mut stats = SessionStats::new();
        assert_eq!(stats.duration(), Duration::ZERO);

        stats.record_read(100);
        stats.record_read(0);
        stats.record_write(7);
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.bytes_read, 100);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.bytes_written, 7);

        stats.reset();
        assert_eq!(stats.reads, 0);
        assert_eq!(stats.bytes_read, 0);
        assert!(stats.opened_at.is_some());
        assert_eq!(stats.bitrate(), 0);
    }
}
