//! Room code generation and parsing
//!
//! A room code is the shared string respondents type in to reach a
//! presenter's room. Presenters may pick their own code (for example a name
//! based one such as `ada_room`) or have one generated. Generated codes are
//! five octal digits so they are easy to read out loud.

use std::{fmt::Display, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

use crate::constants::room::MAX_CODE_LENGTH;

/// Minimum value for generated codes (in octal: 10000)
const MIN_GENERATED: u16 = 0o10_000;
/// Maximum value for generated codes (in octal: 100000)
const MAX_GENERATED: u16 = 0o100_000;

/// The code identifying a room
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct RoomCode(String);

/// Errors produced while parsing a room code
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The code is empty
    #[error("room code cannot be empty")]
    Empty,
    /// The code is longer than the allowed maximum
    #[error("room code is too long")]
    TooLong,
    /// The code contains a character outside `[A-Za-z0-9_-]`
    #[error("room code contains an invalid character")]
    InvalidCharacter,
}

impl RoomCode {
    /// Creates a random five digit octal room code
    pub fn generate() -> Self {
        Self(format!("{:05o}", fastrand::u16(MIN_GENERATED..MAX_GENERATED)))
    }

    /// Returns the code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RoomCode {
    type Err = Error;

    /// Parses a room code, trimming surrounding whitespace
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the trimmed code is empty, longer than
    /// [`MAX_CODE_LENGTH`] characters, or contains characters other than
    /// ASCII letters, digits, `_` and `-`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Empty);
        }
        if s.chars().count() > MAX_CODE_LENGTH {
            return Err(Error::TooLong);
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::InvalidCharacter);
        }
        Ok(Self(s.to_owned()))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_is_octal() {
        for _ in 0..100 {
            let code = RoomCode::generate();
            assert_eq!(code.as_str().len(), 5);
            assert!(code.as_str().chars().all(|c| ('0'..='7').contains(&c)));
            assert!(code.as_str().starts_with(|c: char| c != '0'));
        }
    }

    #[test]
    fn test_parse_named_code() {
        let code = RoomCode::from_str("  ada_room ").unwrap();
        assert_eq!(code.as_str(), "ada_room");
        assert_eq!(code.to_string(), "ada_room");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(RoomCode::from_str(""), Err(Error::Empty));
        assert_eq!(RoomCode::from_str("   "), Err(Error::Empty));
        assert_eq!(RoomCode::from_str("room 1"), Err(Error::InvalidCharacter));
        assert_eq!(RoomCode::from_str("räum"), Err(Error::InvalidCharacter));
        assert_eq!(
            RoomCode::from_str(&"a".repeat(MAX_CODE_LENGTH + 1)),
            Err(Error::TooLong)
        );
        assert!(RoomCode::from_str(&"a".repeat(MAX_CODE_LENGTH)).is_ok());
    }

    #[test]
    fn test_serialization() {
        let code = RoomCode::from_str("room_x7k2p1").unwrap();
        let serialized = serde_json::to_string(&code).unwrap();
        assert_eq!(serialized, "\"room_x7k2p1\"");

        let invalid: Result<RoomCode, _> = serde_json::from_str("\"no spaces\"");
        assert!(invalid.is_err());
    }
}
