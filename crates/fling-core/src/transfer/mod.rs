//! Chunked file transfer over an open peer channel.
//!
//! ## Wire envelope
//!
//! Two message shapes share one channel. Control messages are UTF-8 text
//! frames carrying tagged JSON; payload travels as raw binary frames:
//!
//! | Frame                                      | Cardinality         |
//! |--------------------------------------------|---------------------|
//! | `{"type":"meta","name":..,"size":..,"mime":..}` | exactly one, first |
//! | binary chunk (at most 256 KiB)             | zero or more        |
//! | `{"type":"done"}`                          | exactly one, last   |
//! | `{"type":"error","message":..}`            | replaces `done`     |
//!
//! Delivery order is the transport's problem; this layer carries no
//! sequence numbers and never reorders. A binary frame outside the
//! `meta`/`done` envelope is a protocol violation, not noise.
//!
//! ## Flow control
//!
//! The sender pauses whenever the channel's buffered amount climbs past
//! [`HIGH_WATERMARK`] and resumes once it drains to [`LOW_WATERMARK`].
//! Draining is observed through the channel's buffered-low event, with a
//! watchdog that falls back to polling the counter for transports whose
//! event delivery is unreliable.

pub mod sink;

pub use sink::{DirectorySinkFactory, FileSink, SinkFactory, StreamingSink};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::transport::{ChannelMessage, DataChannel};

/// Largest binary frame the sender will emit (256 KiB).
pub const MAX_CHUNK_SIZE: usize = 256 * 1024;

/// Buffered amount above which the sender pauses (16 MiB).
pub const HIGH_WATERMARK: u64 = 16 * 1024 * 1024;

/// Buffered amount at or below which the sender resumes (4 MiB).
pub const LOW_WATERMARK: u64 = 4 * 1024 * 1024;

/// How long to wait for the buffered-low event before polling instead.
pub const DRAIN_EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll cadence once the drain watchdog has lapsed.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Frames sent between yields back to the host event loop.
pub const YIELD_EVERY_FRAMES: u32 = 8;

/// Announced size at which in-memory accumulation draws a warning (500 MiB).
pub const LARGE_BUFFER_WARN_BYTES: u64 = 500 * 1024 * 1024;

/// Descriptive header for the single file a session carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Suggested file name.
    pub name: String,
    /// Total payload size in bytes.
    pub size: u64,
    /// MIME type of the payload.
    pub mime: String,
}

impl FileMeta {
    /// Build metadata for a file on disk, guessing the MIME type from the
    /// path's extension.
    #[must_use]
    pub fn for_path(path: &Path, size: u64) -> Self {
        let name = path.file_name().map_or_else(
            || "file".to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self { name, size, mime }
    }
}

/// Control frames exchanged as text alongside the binary payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Announces the file; sent exactly once, before any payload.
    Meta(FileMeta),
    /// Marks the end of the payload.
    Done,
    /// Sent in place of `done` when the sender fails mid-transfer.
    Error {
        /// Human-readable description of the sender-side failure.
        message: String,
    },
}

impl ControlMessage {
    /// Serialize for the wire.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }

    /// Parse a received text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on anything that is not a well-formed
    /// control message; a peer speaking another dialect is fatal.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| Error::Protocol(format!("unable to parse control frame: {err}")))
    }
}

/// Point-in-time view of a running transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferProgress {
    /// Name of the file being moved.
    pub file_name: String,
    /// Bytes sent or received so far.
    pub bytes_transferred: u64,
    /// Announced total size.
    pub bytes_total: u64,
}

impl TransferProgress {
    /// Completion as a percentage. An empty file counts as complete.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            100.0
        } else {
            (self.bytes_transferred as f64 / self.bytes_total as f64) * 100.0
        }
    }
}

/// Format a byte count for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Tunables for the sending side.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Slice size for binary frames.
    pub chunk_size: usize,
    /// Pause threshold for the outbound queue.
    pub high_watermark: u64,
    /// Resume threshold for the outbound queue.
    pub low_watermark: u64,
    /// Watchdog on the buffered-low event.
    pub drain_event_timeout: Duration,
    /// Cadence of the polling fallback.
    pub drain_poll_interval: Duration,
    /// Frames between cooperative yields.
    pub yield_every: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_SIZE,
            high_watermark: HIGH_WATERMARK,
            low_watermark: LOW_WATERMARK,
            drain_event_timeout: DRAIN_EVENT_TIMEOUT,
            drain_poll_interval: DRAIN_POLL_INTERVAL,
            yield_every: YIELD_EVERY_FRAMES,
        }
    }
}

/// Sends one file over an open data channel.
#[derive(Debug)]
pub struct FileSender {
    config: TransferConfig,
    progress: watch::Sender<TransferProgress>,
    cancel: CancellationToken,
}

impl FileSender {
    /// Create a sender with its own cancellation token.
    #[must_use]
    pub fn new(config: TransferConfig) -> Self {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// Create a sender wired to an external cancellation token.
    #[must_use]
    pub fn with_cancellation(config: TransferConfig, cancel: CancellationToken) -> Self {
        let (progress, _) = watch::channel(TransferProgress::default());
        Self {
            config,
            progress,
            cancel,
        }
    }

    /// Subscribe to progress updates.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress.subscribe()
    }

    /// Send the file at `path`.
    pub async fn send_path<C: DataChannel>(&self, channel: &C, path: &Path) -> Result<()> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let meta = FileMeta::for_path(path, size);
        self.send_reader(channel, file, meta).await
    }

    /// Send `meta` followed by the reader's bytes in fixed-size slices,
    /// then `done`, then close the channel.
    ///
    /// A read failure mid-stream sends an `error` control frame in place
    /// of `done` so the receiver does not mistake the close for success.
    pub async fn send_reader<C, R>(&self, channel: &C, mut reader: R, meta: FileMeta) -> Result<()>
    where
        C: DataChannel,
        R: AsyncRead + Unpin + Send,
    {
        channel.set_buffered_low_threshold(self.config.low_watermark);
        channel.send_text(&ControlMessage::Meta(meta.clone()).encode()?).await?;
        tracing::info!(name = %meta.name, size = meta.size, mime = %meta.mime, "transfer started");

        self.progress.send_replace(TransferProgress {
            file_name: meta.name.clone(),
            bytes_transferred: 0,
            bytes_total: meta.size,
        });

        let mut sent: u64 = 0;
        let mut frames: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut buffer = vec![0u8; self.config.chunk_size];
            let bytes_read = match reader.read(&mut buffer).await {
                Ok(n) => n,
                Err(err) => {
                    let notice = ControlMessage::Error {
                        message: err.to_string(),
                    };
                    // Best effort; the channel may already be broken.
                    if let Ok(frame) = notice.encode() {
                        let _ = channel.send_text(&frame).await;
                    }
                    return Err(err.into());
                }
            };
            if bytes_read == 0 {
                break;
            }
            buffer.truncate(bytes_read);

            self.wait_for_drain(channel).await?;
            channel.send_binary(&buffer).await?;

            sent += bytes_read as u64;
            self.progress.send_modify(|progress| {
                progress.bytes_transferred = sent;
            });

            frames += 1;
            if self.config.yield_every > 0 && frames % self.config.yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }

        channel.send_text(&ControlMessage::Done.encode()?).await?;
        channel.close().await;
        tracing::info!(name = %meta.name, bytes = sent, "transfer complete");
        Ok(())
    }

    /// Block until the outbound queue is below the high watermark.
    ///
    /// Primary path is the channel's buffered-low event; if it stays
    /// silent past the watchdog, the counter is polled instead.
    async fn wait_for_drain<C: DataChannel>(&self, channel: &C) -> Result<()> {
        let buffered = channel.buffered_amount();
        if buffered <= self.config.high_watermark {
            return Ok(());
        }
        tracing::debug!(buffered, "outbound queue above high watermark, pausing");

        tokio::select! {
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            () = channel.buffered_low() => return Ok(()),
            () = tokio::time::sleep(self.config.drain_event_timeout) => {}
        }

        tracing::debug!("buffered-low event overdue, polling the counter");
        loop {
            if channel.buffered_amount() <= self.config.low_watermark {
                return Ok(());
            }
            tokio::select! {
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(self.config.drain_poll_interval) => {}
            }
        }
    }
}

/// Where incoming bytes land, chosen once when `meta` arrives.
enum SinkState {
    Streaming(Box<dyn StreamingSink>),
    Buffering(Vec<Vec<u8>>),
}

impl std::fmt::Debug for SinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Streaming(_) => f.write_str("Streaming"),
            Self::Buffering(chunks) => write!(f, "Buffering({} chunks)", chunks.len()),
        }
    }
}

#[derive(Debug)]
struct Incoming {
    meta: FileMeta,
    received: u64,
    sink: SinkState,
}

#[derive(Debug)]
enum Phase {
    AwaitingMeta,
    Receiving(Incoming),
    Finished,
}

/// A completed receive.
#[derive(Debug)]
pub struct ReceivedFile {
    /// The announced file metadata.
    pub meta: FileMeta,
    /// The whole payload when the receiver buffered in memory; `None`
    /// when the bytes went through a streaming sink.
    pub contents: Option<Vec<u8>>,
}

/// Receives one file from a data channel, one frame at a time.
///
/// The receiver is an explicit state machine: every channel event goes
/// through [`FileReceiver::accept`], which performs exactly one
/// transition. [`FileReceiver::run`] drives it from a channel until
/// `done` arrives.
pub struct FileReceiver {
    phase: Phase,
    sink_factory: Option<Box<dyn SinkFactory>>,
    received_total: u64,
    progress: watch::Sender<TransferProgress>,
}

impl std::fmt::Debug for FileReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReceiver")
            .field("phase", &self.phase)
            .field("received_total", &self.received_total)
            .finish_non_exhaustive()
    }
}

impl FileReceiver {
    /// Create a receiver that accumulates in memory.
    #[must_use]
    pub fn new() -> Self {
        let (progress, _) = watch::channel(TransferProgress::default());
        Self {
            phase: Phase::AwaitingMeta,
            sink_factory: None,
            received_total: 0,
            progress,
        }
    }

    /// Create a receiver that asks `factory` for a streaming sink.
    #[must_use]
    pub fn with_sink_factory(factory: Box<dyn SinkFactory>) -> Self {
        let mut receiver = Self::new();
        receiver.sink_factory = Some(factory);
        receiver
    }

    /// Install a sink factory. Takes effect if called before `meta` arrives.
    pub fn set_sink_factory(&mut self, factory: Box<dyn SinkFactory>) {
        self.sink_factory = Some(factory);
    }

    /// Subscribe to progress updates.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress.subscribe()
    }

    /// Total payload bytes accepted so far.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.received_total
    }

    /// Feed one channel event through the state machine.
    ///
    /// Returns `Ok(Some(_))` when `done` completes the transfer.
    pub async fn accept(&mut self, message: ChannelMessage) -> Result<Option<ReceivedFile>> {
        match message {
            ChannelMessage::Text(text) => self.on_control(ControlMessage::decode(&text)?).await,
            ChannelMessage::Binary(data) => {
                self.on_chunk(data).await?;
                Ok(None)
            }
        }
    }

    /// Drive the state machine from `channel` until the transfer completes.
    pub async fn run<C: DataChannel>(&mut self, channel: &C) -> Result<ReceivedFile> {
        loop {
            match channel.recv().await? {
                Some(message) => {
                    if let Some(file) = self.accept(message).await? {
                        return Ok(file);
                    }
                }
                None => {
                    return Err(Error::Transport(
                        "channel closed before the transfer finished".to_string(),
                    ));
                }
            }
        }
    }

    async fn on_control(&mut self, control: ControlMessage) -> Result<Option<ReceivedFile>> {
        match control {
            ControlMessage::Meta(meta) => {
                self.on_meta(meta).await?;
                Ok(None)
            }
            ControlMessage::Done => self.on_done().await.map(Some),
            ControlMessage::Error { message } => Err(Error::Peer(message)),
        }
    }

    async fn on_meta(&mut self, meta: FileMeta) -> Result<()> {
        if !matches!(self.phase, Phase::AwaitingMeta) {
            return Err(Error::Protocol("unexpected meta control frame".to_string()));
        }

        let sink = match self.sink_factory.as_mut() {
            Some(factory) => match factory.create(&meta).await {
                Ok(sink) => sink,
                Err(err) => {
                    tracing::warn!(%err, "streaming sink unavailable, buffering in memory");
                    None
                }
            },
            None => None,
        };
        let sink = match sink {
            Some(sink) => SinkState::Streaming(sink),
            None => {
                if meta.size >= LARGE_BUFFER_WARN_BYTES {
                    tracing::warn!(
                        size = %format_size(meta.size),
                        "no streaming sink for a large file, accumulating in memory"
                    );
                }
                SinkState::Buffering(Vec::new())
            }
        };

        tracing::info!(name = %meta.name, size = meta.size, mime = %meta.mime, "incoming transfer");
        self.progress.send_replace(TransferProgress {
            file_name: meta.name.clone(),
            bytes_transferred: 0,
            bytes_total: meta.size,
        });
        self.phase = Phase::Receiving(Incoming {
            meta,
            received: 0,
            sink,
        });
        Ok(())
    }

    async fn on_chunk(&mut self, data: Vec<u8>) -> Result<()> {
        let Phase::Receiving(incoming) = &mut self.phase else {
            return Err(Error::Protocol(
                "binary frame outside the meta/done envelope".to_string(),
            ));
        };

        let len = data.len() as u64;
        match &mut incoming.sink {
            SinkState::Streaming(sink) => sink.write(&data).await?,
            SinkState::Buffering(chunks) => chunks.push(data),
        }
        incoming.received += len;
        self.received_total += len;
        self.progress.send_modify(|progress| {
            progress.bytes_transferred += len;
        });
        Ok(())
    }

    async fn on_done(&mut self) -> Result<ReceivedFile> {
        match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Receiving(mut incoming) => {
                let contents = match &mut incoming.sink {
                    SinkState::Streaming(sink) => {
                        sink.finish().await?;
                        None
                    }
                    SinkState::Buffering(chunks) => Some(chunks.concat()),
                };
                tracing::info!(
                    name = %incoming.meta.name,
                    bytes = incoming.received,
                    "transfer received"
                );
                Ok(ReceivedFile {
                    meta: incoming.meta,
                    contents,
                })
            }
            other => {
                self.phase = other;
                Err(Error::Protocol(
                    "done received outside an active transfer".to_string(),
                ))
            }
        }
    }
}

impl Default for FileReceiver {
    fn default() -> Self {
        Self::new()
    }
}
