//! Authoritative poll countdown
//!
//! The countdown lives inside the room and advances only when the runtime
//! delivers a scheduled [`AlarmMessage`]. Every alarm names the poll it was
//! scheduled for and the value the countdown should drop to, so alarms from a
//! superseded poll or a duplicated delivery fall through without effect.

use std::{fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};

use crate::constants::timer::TICK_INTERVAL;

/// Sequence number of a poll within its room
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PollId(pub u64);

impl PollId {
    /// The id following this one
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for PollId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Alarms scheduled by a running countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// One second has passed for `poll`
    Tick {
        /// The poll the alarm belongs to
        poll: PollId,
        /// The remaining seconds once the tick is applied
        remaining: u64,
    },
}

/// Remaining time of one poll, in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    duration: u64,
    remaining: u64,
}

impl Countdown {
    /// Starts a countdown at `duration` seconds
    pub fn start(duration: u64) -> Self {
        Self {
            duration,
            remaining: duration,
        }
    }

    /// The configured length
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Seconds left
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Whether the countdown reached zero
    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }

    /// Applies a tick that expects the countdown to drop to `expected`
    ///
    /// Returns the new remaining value, or `None` when the tick is not the
    /// next one in sequence.
    pub fn advance(&mut self, expected: u64) -> Option<u64> {
        if self.remaining.checked_sub(1) == Some(expected) {
            self.remaining = expected;
            Some(expected)
        } else {
            None
        }
    }

    /// The alarm that moves this countdown one second forward, with its delay
    pub fn next_alarm(&self, poll: PollId) -> Option<(AlarmMessage, Duration)> {
        (self.remaining > 0).then(|| {
            (
                AlarmMessage::Tick {
                    poll,
                    remaining: self.remaining - 1,
                },
                TICK_INTERVAL,
            )
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_full_sequence() {
        let mut countdown = Countdown::start(3);
        let mut seen = vec![countdown.remaining()];

        while let Some((AlarmMessage::Tick { poll, remaining }, delay)) =
            countdown.next_alarm(PollId(7))
        {
            assert_eq!(poll, PollId(7));
            assert_eq!(delay, TICK_INTERVAL);
            seen.push(countdown.advance(remaining).unwrap());
        }

        assert_eq!(seen, vec![3, 2, 1, 0]);
        assert!(countdown.is_expired());
        assert_eq!(countdown.duration(), 3);
    }

    #[test]
    fn test_out_of_order_ticks_ignored() {
        let mut countdown = Countdown::start(10);

        assert_eq!(countdown.advance(8), None);
        assert_eq!(countdown.advance(10), None);
        assert_eq!(countdown.advance(9), Some(9));
        assert_eq!(countdown.advance(9), None);
        assert_eq!(countdown.remaining(), 9);
    }

    #[test]
    fn test_never_negative() {
        let mut countdown = Countdown::start(1);
        assert_eq!(countdown.advance(0), Some(0));
        assert_eq!(countdown.next_alarm(PollId(1)), None);
        assert_eq!(countdown.advance(0), None);
        assert_eq!(countdown.remaining(), 0);
    }

    #[test]
    fn test_poll_id_sequence() {
        assert_eq!(PollId::default().next(), PollId(1));
        assert_eq!(PollId(4).to_string(), "4");
    }
}
