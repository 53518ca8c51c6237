//! In-process loopback transport.
//!
//! [`memory_pair`] returns two connected endpoints backed by unbounded
//! queues. Buffered-amount accounting is exact: a frame counts against the
//! sender until the peer consumes it, and the drain event fires on every
//! consumption so watermark logic can be tested deterministically. The
//! integration tests and same-process transfers run on this engine.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex, Notify};

use crate::error::{Error, Result};

use super::{ChannelMessage, DataChannel, PeerConnection};

/// Create a connected pair of loopback endpoints.
#[must_use]
pub fn memory_pair() -> (MemoryConnection, MemoryConnection) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();

    let left = MemoryConnection::new("left", left_tx, right_rx);
    let right = MemoryConnection::new("right", right_tx, left_rx);
    (left, right)
}

/// One endpoint of a loopback connection.
#[derive(Debug)]
pub struct MemoryConnection {
    side: &'static str,
    local: Mutex<Option<String>>,
    remote: Mutex<Option<String>>,
    outgoing: mpsc::UnboundedSender<MemoryChannel>,
    incoming: Mutex<mpsc::UnboundedReceiver<MemoryChannel>>,
    closed: AtomicBool,
    ice_stalled: AtomicBool,
}

impl MemoryConnection {
    fn new(
        side: &'static str,
        outgoing: mpsc::UnboundedSender<MemoryChannel>,
        incoming: mpsc::UnboundedReceiver<MemoryChannel>,
    ) -> Self {
        Self {
            side,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            outgoing,
            incoming: Mutex::new(incoming),
            closed: AtomicBool::new(false),
            ice_stalled: AtomicBool::new(false),
        }
    }

    /// Make [`PeerConnection::ice_complete`] never resolve, simulating an
    /// engine that keeps trickling candidates.
    pub fn set_ice_stalled(&self, stalled: bool) {
        self.ice_stalled.store(stalled, Ordering::Release);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Transport("connection is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for MemoryConnection {
    type Channel = MemoryChannel;

    async fn create_channel(&self, label: &str) -> Result<Self::Channel> {
        self.ensure_open()?;
        let (mine, theirs) = MemoryChannel::pair(label);
        self.outgoing
            .send(theirs)
            .map_err(|_| Error::Transport("peer endpoint dropped".to_string()))?;
        Ok(mine)
    }

    async fn incoming_channel(&self) -> Result<Self::Channel> {
        self.ensure_open()?;
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(channel) => {
                channel.mark_open();
                Ok(channel)
            }
            None => Err(Error::Transport("peer endpoint dropped".to_string())),
        }
    }

    async fn create_offer(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(format!("v=0 memory/{} offer", self.side))
    }

    async fn create_answer(&self) -> Result<String> {
        self.ensure_open()?;
        if self.remote.lock().await.is_none() {
            return Err(Error::Transport(
                "cannot answer before a remote offer is applied".to_string(),
            ));
        }
        Ok(format!("v=0 memory/{} answer", self.side))
    }

    async fn set_local_description(&self, description: &str) -> Result<()> {
        self.ensure_open()?;
        *self.local.lock().await = Some(description.to_string());
        Ok(())
    }

    async fn set_remote_description(&self, description: &str) -> Result<()> {
        self.ensure_open()?;
        *self.remote.lock().await = Some(description.to_string());
        Ok(())
    }

    async fn ice_complete(&self) {
        if self.ice_stalled.load(Ordering::Acquire) {
            std::future::pending::<()>().await;
        }
    }

    async fn local_description(&self) -> Result<Option<String>> {
        Ok(self.local.lock().await.clone())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// One half of a loopback data channel.
#[derive(Debug)]
pub struct MemoryChannel {
    label: String,
    tx: Mutex<Option<mpsc::UnboundedSender<ChannelMessage>>>,
    rx: Mutex<mpsc::UnboundedReceiver<ChannelMessage>>,
    /// Bytes this half has queued that the peer has not consumed.
    outbound: Arc<AtomicU64>,
    drain: Arc<Notify>,
    low_threshold: AtomicU64,
    /// Peer's counter, decremented as this half consumes frames.
    peer_outbound: Arc<AtomicU64>,
    peer_drain: Arc<Notify>,
    open: Arc<watch::Sender<bool>>,
}

impl MemoryChannel {
    fn pair(label: &str) -> (Self, Self) {
        let (ab_tx, ab_rx) = mpsc::unbounded_channel();
        let (ba_tx, ba_rx) = mpsc::unbounded_channel();
        let a_out = Arc::new(AtomicU64::new(0));
        let b_out = Arc::new(AtomicU64::new(0));
        let a_drain = Arc::new(Notify::new());
        let b_drain = Arc::new(Notify::new());
        let (open, _) = watch::channel(false);
        let open = Arc::new(open);

        let a = Self {
            label: label.to_string(),
            tx: Mutex::new(Some(ab_tx)),
            rx: Mutex::new(ba_rx),
            outbound: a_out.clone(),
            drain: a_drain.clone(),
            low_threshold: AtomicU64::new(0),
            peer_outbound: b_out.clone(),
            peer_drain: b_drain.clone(),
            open: open.clone(),
        };
        let b = Self {
            label: label.to_string(),
            tx: Mutex::new(Some(ba_tx)),
            rx: Mutex::new(ab_rx),
            outbound: b_out,
            drain: b_drain,
            low_threshold: AtomicU64::new(0),
            peer_outbound: a_out,
            peer_drain: a_drain,
            open,
        };
        (a, b)
    }

    fn mark_open(&self) {
        self.open.send_replace(true);
    }

    /// The label the channel was created with.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, message: ChannelMessage) -> Result<()> {
        let len = message.len() as u64;
        let tx = self.tx.lock().await;
        let Some(tx) = tx.as_ref() else {
            return Err(Error::Transport("channel is closed".to_string()));
        };

        self.outbound.fetch_add(len, Ordering::AcqRel);
        if tx.send(message).is_err() {
            self.outbound.fetch_sub(len, Ordering::AcqRel);
            return Err(Error::Transport("channel closed by peer".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DataChannel for MemoryChannel {
    async fn ready(&self) -> Result<()> {
        let mut open = self.open.subscribe();
        open.wait_for(|is_open| *is_open)
            .await
            .map(|_| ())
            .map_err(|_| Error::Transport("channel abandoned before opening".to_string()))
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.send(ChannelMessage::Text(text.to_string())).await
    }

    async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send(ChannelMessage::Binary(data.to_vec())).await
    }

    async fn recv(&self) -> Result<Option<ChannelMessage>> {
        let message = self.rx.lock().await.recv().await;
        if let Some(message) = &message {
            self.peer_outbound
                .fetch_sub(message.len() as u64, Ordering::AcqRel);
            self.peer_drain.notify_waiters();
        }
        Ok(message)
    }

    fn buffered_amount(&self) -> u64 {
        self.outbound.load(Ordering::Acquire)
    }

    fn set_buffered_low_threshold(&self, threshold: u64) {
        self.low_threshold.store(threshold, Ordering::Release);
    }

    async fn buffered_low(&self) {
        loop {
            let notified = self.drain.notified();
            if self.buffered_amount() <= self.low_threshold.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    async fn close(&self) {
        self.tx.lock().await.take();
    }
}
