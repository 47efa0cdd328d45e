//! Log monitor - live log streaming sessions.
//!
//! ```text
//! LogSource ──► producer ──► FrameBuffer ──► relay ──► caller connection
//!                                 ▲                         │
//!                                 └──── cancel ◄── close detector
//! ```
//!
//! - [`LogSource`] - where log lines come from (external collaborator)
//! - [`FrameBuffer`] - batches lines into size/time-bounded frames
//! - [`StreamPipeline`] - one session: producer, relay and close detector
//!   sharing a single cancellation token

mod frame_buffer;
mod log_hub;
mod pipeline;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{AgentwireError, Result};

pub use frame_buffer::{FrameBuffer, FrameBufferConfig};
pub use log_hub::LogHub;
pub use pipeline::{SessionReport, SessionState, StreamPipeline};

/// Default number of log lines buffered per session before the source drops.
pub const DEFAULT_LOG_BUFFER: usize = 512;

/// Log severity understood by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// Parse a requested level. Empty means `Info`.
    ///
    /// # Errors
    ///
    /// `InvalidLogLevel` for anything that is not a known severity.
    pub fn from_request(level: &str) -> Result<Self> {
        if level.is_empty() {
            return Ok(Self::Info);
        }
        level.parse()
    }

    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Off => "off",
        }
    }

    /// Whether a line at `line_level` passes a session filtering at `self`.
    #[inline]
    pub fn admits(&self, line_level: LogLevel) -> bool {
        *self != Self::Off && line_level != Self::Off && line_level >= *self
    }
}

impl FromStr for LogLevel {
    type Err = AgentwireError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "off" => Ok(Self::Off),
            _ => Err(AgentwireError::InvalidLogLevel),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a monitor session asks of its log source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub level: LogLevel,
    /// JSON-formatted lines instead of plain text.
    pub json: bool,
    /// Lines buffered before the source starts dropping.
    pub buffer: usize,
}

/// A live log feed.
///
/// Dropping the returned receiver stops the subscription.
pub trait LogSource: Send + Sync {
    fn subscribe(&self, options: MonitorOptions) -> mpsc::Receiver<Bytes>;
}

/// Monitor session configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Per-session log buffer.
    pub log_buffer: usize,
    /// Frame batching.
    pub frames: FrameBufferConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_buffer: DEFAULT_LOG_BUFFER,
            frames: FrameBufferConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_level_is_info() {
        assert_eq!(LogLevel::from_request("").unwrap(), LogLevel::Info);
        assert_eq!(
            LogLevel::from_request("").unwrap(),
            LogLevel::from_request("INFO").unwrap()
        );
    }

    #[test]
    fn test_level_is_case_insensitive() {
        assert_eq!(LogLevel::from_request("DEBUG").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_request("Warn").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_request("trace").unwrap(), LogLevel::Trace);
    }

    #[test]
    fn test_unknown_level_rejected() {
        let err = LogLevel::from_request("BOGUS").unwrap_err();
        assert!(matches!(err, AgentwireError::InvalidLogLevel));
        assert_eq!(err.code(), Some(400));
    }

    #[test]
    fn test_admits() {
        assert!(LogLevel::Info.admits(LogLevel::Error));
        assert!(LogLevel::Info.admits(LogLevel::Info));
        assert!(!LogLevel::Info.admits(LogLevel::Debug));
        assert!(!LogLevel::Off.admits(LogLevel::Error));
    }
}
