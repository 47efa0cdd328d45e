//! In-process log fan-out.
//!
//! [`LogHub`] is the agent's own [`LogSource`]: every emitted record is
//! broadcast to all live monitor sessions, each of which filters by its
//! requested level and formats as plain text or JSON. A session that falls
//! behind loses entries instead of stalling the emitter.

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use super::{LogLevel, LogSource, MonitorOptions};

/// Default number of records retained for slow subscribers.
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct LogRecord {
    level: LogLevel,
    target: String,
    message: String,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    #[serde(rename = "@level")]
    level: &'a str,
    #[serde(rename = "@module", skip_serializing_if = "str::is_empty")]
    module: &'a str,
    #[serde(rename = "@message")]
    message: &'a str,
}

impl LogRecord {
    fn format(&self, json: bool) -> Bytes {
        if json {
            let line = JsonLine {
                level: self.level.as_str(),
                module: &self.target,
                message: &self.message,
            };
            let mut out = serde_json::to_vec(&line).unwrap_or_default();
            out.push(b'\n');
            return Bytes::from(out);
        }

        let level = self.level.as_str().to_ascii_uppercase();
        let line = if self.target.is_empty() {
            format!("[{level}]  {}\n", self.message)
        } else {
            format!("[{level}]  {}: {}\n", self.target, self.message)
        };
        Bytes::from(line)
    }
}

/// Broadcast log source.
#[derive(Debug, Clone)]
pub struct LogHub {
    tx: broadcast::Sender<LogRecord>,
}

impl LogHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HUB_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit a record to every live session.
    pub fn emit(&self, level: LogLevel, target: &str, message: impl Into<String>) {
        let record = LogRecord {
            level,
            target: target.to_string(),
            message: message.into(),
        };
        // No subscribers is fine.
        let _ = self.tx.send(record);
    }

    /// Number of sessions currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSource for LogHub {
    fn subscribe(&self, options: MonitorOptions) -> mpsc::Receiver<Bytes> {
        let mut records = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(options.buffer.max(1));

        tokio::spawn(async move {
            let mut dropped: u64 = 0;
            loop {
                let record = tokio::select! {
                    _ = tx.closed() => break,
                    record = records.recv() => record,
                };

                match record {
                    Ok(record) => {
                        if !options.level.admits(record.level) {
                            continue;
                        }
                        match tx.try_send(record.format(options.json)) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => dropped += n,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            if dropped > 0 {
                tracing::debug!(dropped, "monitor subscription dropped log entries");
            }
        });

        rx
    }
}
