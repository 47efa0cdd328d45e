//! Batches log entries into stream frames.
//!
//! Entries accumulate until one of these triggers a flush:
//! - `max_batch_entries` entries are pending
//! - `max_frame_bytes` bytes are pending
//! - `batch_window` elapses with data pending
//!
//! A flush emits every pending entry in push order. Entries never share a
//! frame; an entry longer than `max_frame_bytes` is cut into several. Each
//! frame is stamped with the cumulative byte offset. When nothing has been
//! emitted for `heartbeat_interval`, an empty heartbeat frame goes out
//! instead.
//!
//! Closing the buffer (dropping the handle) flushes what is pending and then
//! closes the frame channel. Cancellation stops it without a final flush.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{AgentwireError, Result};
use crate::protocol::StreamFrame;

/// Default flush window.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(200);

/// Default pending-entry limit.
pub const DEFAULT_MAX_BATCH_ENTRIES: usize = 64;

/// Default frame size limit in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024;

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Default capacity of the entry and frame channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Configuration for a [`FrameBuffer`].
#[derive(Debug, Clone)]
pub struct FrameBufferConfig {
    /// Time bound on how long data may sit unflushed.
    pub batch_window: Duration,
    /// Count bound on pending entries.
    pub max_batch_entries: usize,
    /// Size bound on pending data and on a single frame.
    pub max_frame_bytes: usize,
    /// Idle heartbeat, `None` to disable.
    pub heartbeat_interval: Option<Duration>,
    /// Capacity of the entry and frame channels.
    pub channel_capacity: usize,
}

impl Default for FrameBufferConfig {
    fn default() -> Self {
        Self {
            batch_window: DEFAULT_BATCH_WINDOW,
            max_batch_entries: DEFAULT_MAX_BATCH_ENTRIES,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl FrameBufferConfig {
    /// Set the flush window.
    pub fn batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    /// Set the pending-entry limit.
    pub fn max_batch_entries(mut self, entries: usize) -> Self {
        self.max_batch_entries = entries.max(1);
        self
    }

    /// Set the frame size limit.
    pub fn max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes.max(1);
        self
    }

    /// Set or disable the heartbeat.
    pub fn heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

/// Handle for pushing entries into a running frame buffer.
pub struct FrameBuffer {
    tx: mpsc::Sender<Bytes>,
}

impl FrameBuffer {
    /// Start a frame buffer task.
    ///
    /// Frames tagged with `source_tag` arrive on the returned receiver, in
    /// push order.
    pub fn spawn(
        config: FrameBufferConfig,
        source_tag: &str,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<StreamFrame>) {
        let capacity = config.channel_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);

        let batcher = Batcher {
            pending: VecDeque::new(),
            pending_bytes: 0,
            offset: 0,
            source_tag: source_tag.to_string(),
            out: out_tx,
            cancel,
            config,
        };
        tokio::spawn(batcher.run(rx));

        (Self { tx }, out_rx)
    }

    /// Queue one entry.
    ///
    /// # Errors
    ///
    /// `FramerClosed` once the buffer has stopped (cancelled, or the frame
    /// receiver was dropped).
    pub async fn push(&self, entry: Bytes) -> Result<()> {
        self.tx
            .send(entry)
            .await
            .map_err(|_| AgentwireError::FramerClosed)
    }
}

struct Batcher {
    pending: VecDeque<Bytes>,
    pending_bytes: usize,
    offset: i64,
    source_tag: String,
    out: mpsc::Sender<StreamFrame>,
    cancel: CancellationToken,
    config: FrameBufferConfig,
}

impl Batcher {
    async fn run(mut self, mut rx: mpsc::Receiver<Bytes>) {
        let window = self.config.batch_window;
        let mut batch_timer = interval_at(Instant::now() + window, window);
        batch_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut heartbeat = self.config.heartbeat_interval.map(|every| {
            let mut timer = interval_at(Instant::now() + every, every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        let mut last_emit = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                entry = rx.recv() => match entry {
                    Some(entry) => {
                        self.pending_bytes += entry.len();
                        self.pending.push_back(entry);
                        if self.pending.len() >= self.config.max_batch_entries
                            || self.pending_bytes >= self.config.max_frame_bytes
                        {
                            if !self.flush().await {
                                return;
                            }
                            last_emit = Instant::now();
                        }
                    }
                    None => {
                        self.flush().await;
                        return;
                    }
                },
                _ = batch_timer.tick() => {
                    if !self.pending.is_empty() {
                        if !self.flush().await {
                            return;
                        }
                        last_emit = Instant::now();
                    }
                }
                _ = tick(&mut heartbeat) => {
                    let idle = self.config.heartbeat_interval.unwrap_or_default();
                    if self.pending.is_empty() && last_emit.elapsed() >= idle {
                        if !self.emit(StreamFrame::heartbeat()).await {
                            return;
                        }
                        last_emit = Instant::now();
                    }
                }
            }
        }
    }

    /// Emit all pending entries. Returns false once frames can no longer be
    /// delivered.
    async fn flush(&mut self) -> bool {
        self.pending_bytes = 0;
        while let Some(mut entry) = self.pending.pop_front() {
            while !entry.is_empty() {
                let take = entry.len().min(self.config.max_frame_bytes.max(1));
                let frame = StreamFrame {
                    offset: self.offset,
                    data: entry.split_to(take),
                    file: String::new(),
                    file_event: self.source_tag.clone(),
                };
                self.offset += take as i64;
                if !self.emit(frame).await {
                    return false;
                }
            }
        }
        true
    }

    async fn emit(&self, frame: StreamFrame) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.out.send(frame) => sent.is_ok(),
        }
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
