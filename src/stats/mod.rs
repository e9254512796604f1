//! Statistics and metrics
//!
//! Provides observability into RTMP sessions.

pub mod metrics;

pub use metrics::SessionStats;
