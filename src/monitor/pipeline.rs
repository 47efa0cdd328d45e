//! One local monitor session.
//!
//! Three activities share a single [`CancellationToken`]:
//!
//! - **close detector** - reads the inbound side; end-of-stream or a read
//!   error cancels the session
//! - **producer** - moves log lines from the source into the frame buffer
//! - **relay** - the only writer on the connection; encodes each frame into
//!   a [`StreamEnvelope`]
//!
//! When the frame stream ends, the session waits for the producer to report
//! and a producer error (if any) is sent as a final error envelope before the
//! connection closes. Heartbeat frames are relayed only in JSON mode.

use bytes::Bytes;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{FrameBuffer, LogSource, MonitorConfig, MonitorOptions};
use crate::codec::JsonCodec;
use crate::error::{AgentwireError, RpcError, Result, CODE_INTERNAL};
use crate::protocol::{StreamEnvelope, StreamFrame, LOG_FRAME_EVENT};
use crate::transport::{write_message, Conn};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Request not yet validated.
    Handshaking,
    /// Frames are being relayed.
    Streaming,
    /// Frame stream ended; checking for a pending producer error.
    Draining,
    /// Connection closed, all activities stopped.
    Closed,
}

/// Outcome of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub state: SessionState,
    /// Envelopes written, excluding the final error envelope.
    pub envelopes_sent: u64,
    /// Error delivered as the final envelope, if any.
    pub error: Option<RpcError>,
    /// The caller went away before the stream ended.
    pub cancelled: bool,
}

/// Drives a local log monitor session over one connection.
pub struct StreamPipeline {
    config: MonitorConfig,
    options: MonitorOptions,
    plain_text: bool,
    state: SessionState,
}

impl StreamPipeline {
    pub fn new(config: MonitorConfig, options: MonitorOptions, plain_text: bool) -> Self {
        Self {
            config,
            options,
            plain_text,
            state: SessionState::Handshaking,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Stream logs from `source` until the caller disconnects, the source
    /// ends, or writing fails.
    pub async fn run<C: Conn>(self, conn: C, source: &dyn LogSource) -> SessionReport {
        let cancel = CancellationToken::new();
        let feed = source.subscribe(MonitorOptions {
            buffer: self.config.log_buffer,
            ..self.options
        });
        let (framer, frames) =
            FrameBuffer::spawn(self.config.frames.clone(), LOG_FRAME_EVENT, cancel.clone());

        self.stream(conn, feed, framer, frames, cancel).await
    }

    async fn stream<C: Conn>(
        mut self,
        conn: C,
        mut feed: mpsc::Receiver<Bytes>,
        framer: FrameBuffer,
        mut frames: mpsc::Receiver<StreamFrame>,
        cancel: CancellationToken,
    ) -> SessionReport {
        let _guard = cancel.clone().drop_guard();
        let (mut reader, mut writer) = split(conn);

        let detector = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let mut scratch = [0u8; 64];
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        res = reader.read(&mut scratch) => match res {
                            Ok(0) | Err(_) => break,
                            // Stray inbound bytes are discarded.
                            Ok(_) => {}
                        }
                    }
                }
                cancel.cancel();
            }
        });

        let (err_tx, mut err_rx) = mpsc::channel::<AgentwireError>(1);

        let producer = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                loop {
                    let line: Bytes = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        line = feed.recv() => match line {
                            Some(line) => line,
                            None => break,
                        },
                    };
                    if let Err(e) = framer.push(line).await {
                        tokio::select! {
                            _ = err_tx.send(e) => {}
                            _ = cancel.cancelled() => {}
                        }
                        break;
                    }
                }
            }
        });

        self.state = SessionState::Streaming;
        tracing::debug!(level = %self.options.level, plain_text = self.plain_text, "monitor session streaming");

        let mut envelopes_sent = 0u64;
        let mut cancelled = false;
        let mut stream_err: Option<AgentwireError> = None;

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                frame = frames.recv() => frame,
            };

            match frame {
                Some(frame) => match self.relay(&mut writer, frame).await {
                    Ok(true) => envelopes_sent += 1,
                    Ok(false) => {}
                    Err(e) => {
                        stream_err = Some(e);
                        break;
                    }
                },
                None => {
                    self.state = SessionState::Draining;
                    // The producer reports its error, if any, before it exits.
                    stream_err = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        err = err_rx.recv() => err,
                    };
                    break;
                }
            }
        }

        let error = match stream_err {
            Some(e) => {
                tracing::debug!(error = %e, "monitor session failed");
                let error = e.to_rpc_coded(CODE_INTERNAL);
                match write_message(&mut writer, &StreamEnvelope::error(error.clone())).await {
                    Ok(()) => Some(error),
                    Err(write_err) => {
                        tracing::debug!(error = %write_err, "final error envelope not delivered");
                        None
                    }
                }
            }
            None => None,
        };

        let _ = writer.shutdown().await;
        cancel.cancel();
        let _ = producer.await;
        let _ = detector.await;

        self.state = SessionState::Closed;
        SessionReport {
            state: self.state,
            envelopes_sent,
            error,
            cancelled,
        }
    }

    /// Write one frame. Returns whether an envelope went out; plain-text
    /// sessions skip heartbeats.
    async fn relay<C: Conn>(&self, writer: &mut WriteHalf<C>, frame: StreamFrame) -> Result<bool> {
        let payload = if self.plain_text {
            if frame.is_heartbeat() {
                return Ok(false);
            }
            frame.data
        } else {
            JsonCodec::encode(&frame)?
        };
        write_message(writer, &StreamEnvelope::data(payload)).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{FrameBufferConfig, LogLevel};
    use crate::protocol::DEFAULT_MAX_MESSAGE_SIZE;
    use crate::transport::read_message;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::duplex;

    /// Hands out a pre-made receiver once.
    struct ChannelSource(Mutex<Option<mpsc::Receiver<Bytes>>>);

    impl ChannelSource {
        fn new() -> (Self, mpsc::Sender<Bytes>) {
            let (tx, rx) = mpsc::channel(16);
            (Self(Mutex::new(Some(rx))), tx)
        }
    }

    impl LogSource for ChannelSource {
        fn subscribe(&self, _options: MonitorOptions) -> mpsc::Receiver<Bytes> {
            match self.0.lock().unwrap().take() {
                Some(rx) => rx,
                None => mpsc::channel(1).1,
            }
        }
    }

    fn eager_frames() -> FrameBufferConfig {
        FrameBufferConfig::default()
            .heartbeat_interval(None)
            .max_batch_entries(1)
    }

    fn pipeline_with(frames: FrameBufferConfig, plain_text: bool) -> StreamPipeline {
        let config = MonitorConfig {
            frames,
            ..Default::default()
        };
        let options = MonitorOptions {
            level: LogLevel::Info,
            json: false,
            buffer: 16,
        };
        StreamPipeline::new(config, options, plain_text)
    }

    fn pipeline(plain_text: bool) -> StreamPipeline {
        pipeline_with(eager_frames(), plain_text)
    }

    #[test]
    fn test_new_pipeline_is_handshaking() {
        assert_eq!(pipeline(true).state(), SessionState::Handshaking);
    }

    #[tokio::test]
    async fn test_plain_text_envelopes_carry_raw_lines() {
        let (source, lines) = ChannelSource::new();
        let (mut caller, server) = duplex(4096);

        let session = tokio::spawn(async move { pipeline(true).run(server, &source).await });

        lines.send(Bytes::from_static(b"hello\n")).await.unwrap();
        let env: StreamEnvelope = read_message(&mut caller, DEFAULT_MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        assert_eq!(&env.payload[..], b"hello\n");
        assert!(!env.is_error());

        drop(lines);
        let report = session.await.unwrap();
        assert_eq!(report.state, SessionState::Closed);
        assert_eq!(report.envelopes_sent, 1);
        assert!(report.error.is_none());
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_json_envelopes_carry_frames() {
        let (source, lines) = ChannelSource::new();
        let (mut caller, server) = duplex(4096);

        let session = tokio::spawn(async move { pipeline(false).run(server, &source).await });

        lines.send(Bytes::from_static(b"line\n")).await.unwrap();
        let env: StreamEnvelope = read_message(&mut caller, DEFAULT_MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        let frame: StreamFrame = JsonCodec::decode(&env.payload[..]).unwrap();
        assert_eq!(&frame.data[..], b"line\n");
        assert_eq!(frame.file_event, LOG_FRAME_EVENT);

        drop(lines);
        session.await.unwrap();
    }

    #[tokio::test]
    async fn test_caller_close_stops_session() {
        let (source, lines) = ChannelSource::new();
        let (caller, server) = duplex(4096);

        let session = tokio::spawn(async move { pipeline(true).run(server, &source).await });

        drop(caller);
        let report = session.await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.state, SessionState::Closed);
        assert!(lines.is_closed());
    }

    #[tokio::test]
    async fn test_stray_input_then_close_stops_session() {
        let (source, lines) = ChannelSource::new();
        let (mut caller, server) = duplex(4096);

        let session = tokio::spawn(async move { pipeline(true).run(server, &source).await });

        caller.write_all(b"\n").await.unwrap();
        caller.write_all(b"more noise").await.unwrap();
        tokio::task::yield_now().await;
        drop(caller);

        let report = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("session kept running after the caller closed")
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.envelopes_sent, 0);
        assert!(lines.is_closed());
    }

    #[tokio::test]
    async fn test_producer_error_sent_after_drain() {
        let (feed_tx, feed_rx) = mpsc::channel(16);
        let framer_cancel = CancellationToken::new();
        let (framer, frames) = FrameBuffer::spawn(eager_frames(), LOG_FRAME_EVENT, framer_cancel.clone());
        let (mut caller, server) = duplex(4096);

        let session = tokio::spawn(pipeline(true).stream(
            server,
            feed_rx,
            framer,
            frames,
            CancellationToken::new(),
        ));

        feed_tx.send(Bytes::from_static(b"one\n")).await.unwrap();
        feed_tx.send(Bytes::from_static(b"two\n")).await.unwrap();
        for expected in [&b"one\n"[..], &b"two\n"[..]] {
            let env: StreamEnvelope = read_message(&mut caller, DEFAULT_MAX_MESSAGE_SIZE)
                .await
                .unwrap();
            assert_eq!(&env.payload[..], expected);
        }

        // Stop the frame buffer underneath the producer; its next push fails.
        framer_cancel.cancel();
        while feed_tx.send(Bytes::from_static(b"lost\n")).await.is_ok() {
            tokio::task::yield_now().await;
        }

        let env: StreamEnvelope = read_message(&mut caller, DEFAULT_MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        assert!(env.payload.is_empty());
        assert_eq!(env.error.as_ref().unwrap().code, Some(500));

        let eof: Result<StreamEnvelope> = read_message(&mut caller, DEFAULT_MAX_MESSAGE_SIZE).await;
        assert!(matches!(eof, Err(AgentwireError::ConnectionClosed)));

        let report = session.await.unwrap();
        assert_eq!(report.state, SessionState::Closed);
        assert_eq!(report.envelopes_sent, 2);
        assert_eq!(report.error.unwrap().code, Some(500));
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_plain_text_skips_heartbeats() {
        let frames = FrameBufferConfig::default()
            .max_batch_entries(1)
            .heartbeat_interval(Some(Duration::from_millis(20)));
        let (source, lines) = ChannelSource::new();
        let (mut caller, server) = duplex(4096);

        tokio::spawn(async move { pipeline_with(frames, true).run(server, &source).await });

        let idle = tokio::time::timeout(
            Duration::from_millis(200),
            read_message::<_, StreamEnvelope>(&mut caller, DEFAULT_MAX_MESSAGE_SIZE),
        )
        .await;
        assert!(idle.is_err());

        lines.send(Bytes::from_static(b"real\n")).await.unwrap();
        let env: StreamEnvelope = read_message(&mut caller, DEFAULT_MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        assert_eq!(&env.payload[..], b"real\n");
    }

    #[tokio::test]
    async fn test_json_mode_relays_heartbeats() {
        let frames = FrameBufferConfig::default()
            .heartbeat_interval(Some(Duration::from_millis(20)));
        let (source, _lines) = ChannelSource::new();
        let (mut caller, server) = duplex(4096);

        tokio::spawn(async move { pipeline_with(frames, false).run(server, &source).await });

        let env: StreamEnvelope = read_message(&mut caller, DEFAULT_MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        let frame: StreamFrame = JsonCodec::decode(&env.payload[..]).unwrap();
        assert!(frame.is_heartbeat());
    }
}
