//! # Live Poll Library
//!
//! This library provides the synchronization protocol for live
//! multiple-choice polls. One presenter posts a question to a room, many
//! respondents answer it against a shared countdown, and everyone sees the
//! same tally. It covers the room registry and per-room sequencing, the poll
//! state machine, the countdown, the vote tally, presence tracking, and the
//! client-side view that mirrors the room's broadcasts.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]
use derive_where::derive_where;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod constants;
pub mod names;
pub mod poll;
pub mod reflector;
pub mod registry;
pub mod room;
pub mod room_code;
pub mod tunnel;
pub mod watcher;

/// Messages that replace a participant's view of the room
///
/// A participant receives these when it joins or reconnects, so it can
/// rebuild its whole view without any history.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, derive_more::From)]
pub enum SyncMessage {
    /// Room-level state
    Room(room::SyncMessage),
    /// Poll state
    Poll(poll::SyncMessage),
}

impl SyncMessage {
    /// Converts the sync message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }

    /// Parses a sync message received as JSON
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the text is not a sync message.
    pub fn from_message(message: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(message)
    }
}

/// Messages that change part of a participant's view
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, derive_more::From)]
pub enum UpdateMessage {
    /// Room-level updates
    Room(room::UpdateMessage),
    /// Poll updates
    Poll(poll::UpdateMessage),
}

impl UpdateMessage {
    /// Converts the update message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }

    /// Parses an update message received as JSON
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the text is not an update message.
    pub fn from_message(message: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(message)
    }
}

/// Alarm messages for timed room events
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::From, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Poll countdown alarms
    Poll(poll::timer::AlarmMessage),
}

/// A truncated vector that maintains the exact count while limiting the
/// listed items
///
/// Used for rosters: the presenter sees "120 respondents" while only the
/// first names are listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[derive_where(Default)]
pub struct TruncatedVec<T> {
    /// The exact total count of items
    exact_count: usize,
    /// The truncated list of items (up to the limit)
    items: Vec<T>,
}

impl<T: Clone> TruncatedVec<T> {
    /// Creates a truncated vector holding at most `limit` items of `list`
    pub fn new<I: Iterator<Item = T>>(list: I, limit: usize, exact_count: usize) -> Self {
        let items = list.take(limit).collect_vec();
        Self { exact_count, items }
    }

    /// Returns the exact count of items
    pub fn exact_count(&self) -> usize {
        self.exact_count
    }

    /// Returns the truncated items
    pub fn items(&self) -> &[T] {
        &self.items
    }
}
