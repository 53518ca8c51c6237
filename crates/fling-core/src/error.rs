//! Error types for Fling.
//!
//! This module provides a unified error type for all Fling operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Fling operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Fling.
#[derive(Error, Debug)]
pub enum Error {
    /// Room code is malformed (wrong length or characters outside the alphabet)
    #[error("invalid room code: {0}")]
    InvalidRoom(String),

    /// Room does not exist or its relay record has expired
    #[error("room '{0}' not found or expired")]
    RoomNotFound(String),

    /// Relay request failed (unreachable host, unexpected status, bad body)
    #[error("relay request failed: {0}")]
    Network(String),

    /// Peer sent something the transfer envelope does not allow
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Peer connection or data channel failed
    #[error("transport failure: {0}")]
    Transport(String),

    /// Remote side reported an error frame
    #[error("peer reported error: {0}")]
    Peer(String),

    /// Operation was cancelled locally
    #[error("operation cancelled")]
    Cancelled,

    /// Operation timed out
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// Key-value store backend failure
    #[error("store error: {0}")]
    Store(String),

    /// Configuration load or parse failure
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns a stable machine-readable code for this error.
    ///
    /// The relay's HTTP surface and log lines use these codes so that
    /// clients can branch without parsing display strings.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRoom(_) => "INVALID_ROOM",
            Self::RoomNotFound(_) => "ROOM_NOT_FOUND",
            Self::Network(_) => "NETWORK_FAILURE",
            Self::Protocol(_) => "PROTOCOL_VIOLATION",
            Self::Transport(_) => "TRANSPORT_FAILURE",
            Self::Peer(_) => "PEER_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Store(_) => "STORE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns whether this error means the room lapsed rather than broke.
    ///
    /// Sessions map expiry onto their `Expired` state instead of `Failed`.
    #[must_use]
    pub const fn is_expiry(&self) -> bool {
        matches!(self, Self::RoomNotFound(_))
    }

    /// Returns whether this error is a local cancellation.
    ///
    /// Cancellation is an expected outcome and is never shown as a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns whether this error is recoverable (can be retried).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidRoom("AB".to_string());
        assert_eq!(err.to_string(), "invalid room code: AB");

        let err = Error::RoomNotFound("7XK2QF".to_string());
        assert_eq!(err.to_string(), "room '7XK2QF' not found or expired");

        let err = Error::Timeout(60);
        assert_eq!(err.to_string(), "operation timed out after 60 seconds");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidRoom(String::new()).code(), "INVALID_ROOM");
        assert_eq!(Error::RoomNotFound(String::new()).code(), "ROOM_NOT_FOUND");
        assert_eq!(Error::Cancelled.code(), "CANCELLED");
        assert_eq!(Error::Protocol(String::new()).code(), "PROTOCOL_VIOLATION");
    }

    #[test]
    fn test_expiry_predicate() {
        assert!(Error::RoomNotFound("X".into()).is_expiry());
        assert!(!Error::Network("down".into()).is_expiry());
        assert!(!Error::Cancelled.is_expiry());
    }

    #[test]
    fn test_cancelled_predicate() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Timeout(5).is_cancelled());
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::Network("503".into()).is_recoverable());
        assert!(Error::Timeout(60).is_recoverable());
        assert!(!Error::Protocol("bad frame".into()).is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
