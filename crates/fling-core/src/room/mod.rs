//! Room code generation and validation.
//!
//! This module handles the generation and validation of 6-character room
//! codes used to pair two peers through the bootstrap relay.
//!
//! ## Code Format
//!
//! Codes use a 34-character alphabet that excludes ambiguous characters:
//! - Valid characters: `0-9`, `A-H`, `J-N`, `P-Z`
//! - Excluded: `I`, `O` (easily confused with `1` and `0`)
//!
//! This gives 34^6 ≈ 1.5 billion unique codes.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fling_core::room::RoomCode;
//!
//! let code = RoomCode::generate();
//! println!("Room code: {code}");
//!
//! let code = RoomCode::parse("7xk2qf")?;
//! assert_eq!(code.as_str(), "7XK2QF");
//! ```

use crate::error::{Error, Result};

/// The character set used for room code generation.
/// Excludes ambiguous characters: I, O
pub const CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Length of a room code
pub const CODE_LENGTH: usize = 6;

/// A validated room code.
///
/// Parsing is the only way to obtain one from user input, so a malformed
/// identifier is rejected locally before any relay request is made.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode {
    code: String,
}

impl RoomCode {
    /// Parse and validate a room code from a string.
    ///
    /// Leading and trailing whitespace is ignored and lowercase input is
    /// accepted; the stored form is always uppercase.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRoom`] if the code has the wrong length or
    /// contains characters outside the alphabet.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_uppercase();

        if normalized.len() != CODE_LENGTH {
            return Err(Error::InvalidRoom(format!(
                "code must be {} characters, got {}",
                CODE_LENGTH,
                normalized.len()
            )));
        }

        for c in normalized.chars() {
            if !c.is_ascii() || !CODE_ALPHABET.contains(&(c as u8)) {
                return Err(Error::InvalidRoom(format!(
                    "invalid character '{c}' in code"
                )));
            }
        }

        Ok(Self { code: normalized })
    }

    /// Generate a new random room code.
    ///
    /// Each position is drawn independently and uniformly from the alphabet
    /// using the operating system seeded generator.
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LENGTH)
            .map(|_| {
                let idx = rng.gen_range(0..CODE_ALPHABET.len());
                CODE_ALPHABET[idx] as char
            })
            .collect();

        Self { code }
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.code
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)
    }
}

impl std::str::FromStr for RoomCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
