//! The per-room poll: question, countdown, votes and the state machine
//! tying them together

use serde::{Deserialize, Serialize};

pub mod question;
pub mod session;
pub mod tally;
pub mod timer;

pub use session::{Phase, Results, Session, Snapshot, SyncMessage, UpdateMessage};

/// Content that is only shown to some participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PossiblyHidden<T> {
    /// Content is visible to the recipient
    Visible(T),
    /// Content is hidden from the recipient
    Hidden,
}

impl<T> PossiblyHidden<T> {
    /// Wraps `value` as visible when `visible` holds
    pub fn reveal_if(visible: bool, value: T) -> Self {
        if visible {
            Self::Visible(value)
        } else {
            Self::Hidden
        }
    }

    /// The content, if visible
    pub fn visible(&self) -> Option<&T> {
        match self {
            Self::Visible(value) => Some(value),
            Self::Hidden => None,
        }
    }
}
