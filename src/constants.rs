//! Configuration constants for the live poll system
//!
//! This module contains the limits and constraints used throughout the
//! protocol to keep payloads bounded and give every component the same
//! boundaries.

/// Room-wide limits
pub mod room {
    /// Maximum number of respondents allowed in a single room
    pub const MAX_RESPONDENT_COUNT: usize = 1000;
    /// Maximum length of a room code in characters
    pub const MAX_CODE_LENGTH: usize = 64;
    /// Maximum number of names listed in a roster update
    pub const ROSTER_LIMIT: usize = 50;
}

/// Question configuration constants
pub mod question {
    /// Maximum length of the question text in bytes
    pub const MAX_TEXT_LENGTH: usize = 200;
    /// Maximum length of a single option's text in bytes
    pub const MAX_OPTION_LENGTH: usize = 200;
    /// Minimum number of options a question must offer
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of options a question may offer
    pub const MAX_OPTION_COUNT: usize = 8;
    /// Minimum countdown duration in seconds
    pub const MIN_DURATION: u64 = 10;
    /// Maximum countdown duration in seconds
    pub const MAX_DURATION: u64 = 60;
}

/// Countdown timing constants
pub mod timer {
    use std::time::Duration;

    /// Interval between two authoritative ticks
    pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
}

/// Respondent name constants
pub mod names {
    /// Maximum length of a respondent display name in bytes
    pub const MAX_LENGTH: usize = 30;
    /// Number of words in a generated pet name
    pub const DEFAULT_PET_WORDS: u8 = 2;
}
