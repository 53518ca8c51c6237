//! # Fling Core Library
//!
//! `fling-core` provides the core functionality for Fling, a room-code
//! based peer-to-peer single file transfer tool.
//!
//! ## Features
//!
//! - **Room codes**: Six-character codes from an unambiguous alphabet
//! - **Thin signaling**: A relay that parks session descriptions and
//!   nothing else; the file itself flows peer to peer
//! - **Chunked transfers**: Bounded frames with backpressure so large
//!   files move without flooding the channel
//! - **Streaming receive**: Incoming bytes can go straight to disk
//!   instead of accumulating in memory
//!
//! ## Modules
//!
//! - [`config`] - Relay server configuration
//! - [`mod@error`] - Error taxonomy shared across the crate
//! - [`relay`] - Signaling over a key-value store, plus the HTTP client
//! - [`room`] - Room code generation and validation
//! - [`session`] - Connection bootstrap state machines
//! - [`store`] - Key-value store abstraction with TTL
//! - [`transfer`] - Chunked file transfer over a data channel
//! - [`transport`] - Peer connection and data channel abstractions
//! - [`web`] - HTTP surface of the bundled relay
//!
//! ## Example
//!
//! ```rust,ignore
//! use fling_core::session::{AnswerSession, OfferSession};
//!
//! // On the sending device
//! let mut offer = OfferSession::new(relay, connection);
//! let room = offer.open().await?;
//! println!("Share this code: {room}");
//! offer.connect().await?;
//! offer.send_path(Path::new("notes.txt")).await?;
//!
//! // On the receiving device
//! let mut answer = AnswerSession::new("AB12CD", relay, connection)?;
//! answer.connect().await?;
//! let file = answer.receive().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::unused_self)]

pub mod config;
pub mod error;
pub mod relay;
pub mod room;
pub mod session;
pub mod store;
pub mod transfer;
pub mod transport;

#[cfg(feature = "web")]
pub mod web;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default lifetime of a room in seconds
pub const DEFAULT_ROOM_TTL_SECS: u64 = 300;

/// Default port for the bundled relay server
pub const DEFAULT_RELAY_PORT: u16 = 8080;
