//! Peer transport capability traits.
//!
//! Fling does not ship a connectivity engine. The host environment brings
//! one (a WebRTC stack, or the in-process [`memory`] loopback used by
//! tests) and exposes it through [`PeerConnection`] and [`DataChannel`].
//! Session bootstrap and the transfer protocol are written purely against
//! these traits.
//!
//! The shape mirrors the browser data-channel model: connections are
//! negotiated by exchanging opaque description strings, channels surface
//! an open event, and outbound frames queue locally with a readable
//! buffered amount plus a low-watermark event for backpressure.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;

/// A single frame received from a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl ChannelMessage {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An ordered, reliable message channel between two peers.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Resolves once the channel is open end to end.
    async fn ready(&self) -> Result<()>;

    /// Queue a UTF-8 text frame.
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Queue a binary frame.
    async fn send_binary(&self, data: &[u8]) -> Result<()>;

    /// Receive the next frame. Returns `Ok(None)` once the remote side
    /// has closed the channel and all queued frames are drained.
    async fn recv(&self) -> Result<Option<ChannelMessage>>;

    /// Bytes queued locally that the peer has not consumed yet.
    fn buffered_amount(&self) -> u64;

    /// Set the level at which [`DataChannel::buffered_low`] fires.
    fn set_buffered_low_threshold(&self, threshold: u64);

    /// Resolves when the buffered amount has drained to the configured
    /// threshold or below. Resolves immediately if already there.
    async fn buffered_low(&self);

    /// Close the channel. Calling this more than once is harmless.
    async fn close(&self);
}

/// One endpoint of a peer connection under negotiation.
///
/// Descriptions are opaque strings produced by one engine and fed to its
/// counterpart; Fling relays them without inspection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// The channel type this engine produces.
    type Channel: DataChannel + 'static;

    /// Open the outgoing data channel. Creating it is what starts
    /// connectivity negotiation, and the same channel later carries the
    /// transfer.
    async fn create_channel(&self, label: &str) -> Result<Self::Channel>;

    /// Wait for the channel announced by the remote side.
    async fn incoming_channel(&self) -> Result<Self::Channel>;

    /// Produce an offer description for this endpoint.
    async fn create_offer(&self) -> Result<String>;

    /// Produce an answer description. Requires a remote offer to have
    /// been applied first.
    async fn create_answer(&self) -> Result<String>;

    /// Install a description produced by this endpoint.
    async fn set_local_description(&self, description: &str) -> Result<()>;

    /// Install the description received from the peer.
    async fn set_remote_description(&self, description: &str) -> Result<()>;

    /// Resolves when candidate gathering has finished. Callers bound this
    /// wait; an engine that trickles forever is not an error.
    async fn ice_complete(&self);

    /// The current local description including all candidates gathered
    /// so far, or `None` before one is installed.
    async fn local_description(&self) -> Result<Option<String>>;

    /// Tear down the connection. Calling this more than once is harmless.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_len() {
        assert_eq!(ChannelMessage::Text("hello".into()).len(), 5);
        assert_eq!(ChannelMessage::Binary(vec![0u8; 42]).len(), 42);
        assert!(ChannelMessage::Binary(Vec::new()).is_empty());
        assert!(!ChannelMessage::Text("x".into()).is_empty());
    }
}
