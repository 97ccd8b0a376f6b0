//! Loop configuration.

use evio_core::constants::{DEFAULT_MAX_SOURCES, DEFAULT_READ_BUF_SIZE};
use evio_core::env::env_get;

/// Configuration for an event loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum number of registered sources.
    pub max_sources: usize,
    /// Default poll timeout (milliseconds) for `run_once(None)`.
    pub poll_timeout_ms: u16,
    /// Suggested capacity passed to read allocation callbacks.
    pub read_buf_size: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_sources: DEFAULT_MAX_SOURCES,
            poll_timeout_ms: 100,
            read_buf_size: DEFAULT_READ_BUF_SIZE,
        }
    }
}

impl LoopConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults:
    ///
    /// - `EVIO_MAX_SOURCES`
    /// - `EVIO_POLL_TIMEOUT_MS`
    /// - `EVIO_READ_BUF_SIZE`
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_sources: env_get("EVIO_MAX_SOURCES", d.max_sources),
            poll_timeout_ms: env_get("EVIO_POLL_TIMEOUT_MS", d.poll_timeout_ms),
            read_buf_size: env_get("EVIO_READ_BUF_SIZE", d.read_buf_size),
        }
    }
}
