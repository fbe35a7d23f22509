//! Vote ledger for a single poll
//!
//! The tally records at most one vote per respondent and derives counts,
//! percentages and presenter statistics on read. Nothing derived is stored, so the
//! numbers can never drift from the recorded votes.

use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::SystemTime;

use super::question::{OptionId, QuestionConfig};
use crate::watcher::Id;

/// A single accepted vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteRecord {
    /// The chosen option
    pub option: OptionId,
    /// When the room accepted the vote
    pub at: SystemTime,
}

/// Reasons a vote is refused
///
/// None of these are reported back to the voter.
#[derive(Error, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The respondent already voted in this poll
    #[error("respondent has already voted")]
    Duplicate,
    /// No poll is accepting votes
    #[error("poll is not accepting votes")]
    Stale,
    /// The option does not belong to the current question
    #[error("option does not exist")]
    UnknownOption,
}

/// Per-option result line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionTally {
    /// The option
    pub id: OptionId,
    /// Number of votes for the option
    pub votes: usize,
    /// Share of all votes, rounded to a whole percent
    pub percentage: u8,
}

/// Aggregated votes of a poll in option display order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// One entry per option
    pub options: Vec<OptionTally>,
    /// Number of respondents who voted
    pub total: usize,
}

impl Tally {
    /// Looks up the line of one option
    pub fn get(&self, option: OptionId) -> Option<&OptionTally> {
        self.options.iter().find(|o| o.id == option)
    }
}

/// Participation summary shown to the presenter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Respondents who voted
    pub participated: usize,
    /// Votes on the correct option
    pub passed: usize,
    /// Votes on any other option
    pub failed: usize,
}

/// Rounds `votes / total` to a whole percentage, 0 when nobody voted
pub fn percentage(votes: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    u8::try_from((votes * 200 + total) / (total * 2)).unwrap_or(100)
}

/// The vote ledger of one poll
#[derive(Debug, Clone)]
pub struct VoteTally {
    options: Vec<OptionId>,
    correct: OptionId,
    votes: HashMap<Id, VoteRecord>,
}

impl VoteTally {
    /// Creates an empty ledger for a question
    pub fn new(question: &QuestionConfig) -> Self {
        Self {
            options: question.options().iter().map(|o| o.id).collect_vec(),
            correct: question.correct(),
            votes: HashMap::new(),
        }
    }

    /// Records a vote
    ///
    /// # Errors
    ///
    /// * `Error::UnknownOption` if the option is not part of the question
    /// * `Error::Duplicate` if the respondent already voted; the first vote
    ///   stays as it was
    pub fn submit(&mut self, voter: Id, option: OptionId, at: SystemTime) -> Result<(), Error> {
        if !self.options.contains(&option) {
            return Err(Error::UnknownOption);
        }
        if self.votes.contains_key(&voter) {
            return Err(Error::Duplicate);
        }
        self.votes.insert(voter, VoteRecord { option, at });
        Ok(())
    }

    /// The vote of a respondent, if any
    pub fn vote_of(&self, voter: Id) -> Option<VoteRecord> {
        self.votes.get(&voter).copied()
    }

    /// Number of respondents who voted
    pub fn total(&self) -> usize {
        self.votes.len()
    }

    /// Number of votes for one option
    pub fn count(&self, option: OptionId) -> usize {
        self.votes.values().filter(|v| v.option == option).count()
    }

    /// Aggregates the ledger into per-option lines
    pub fn snapshot(&self) -> Tally {
        let counts = self.votes.values().counts_by(|v| v.option);
        let total = self.total();

        Tally {
            options: self
                .options
                .iter()
                .map(|id| {
                    let votes = counts.get(id).copied().unwrap_or_default();
                    OptionTally {
                        id: *id,
                        votes,
                        percentage: percentage(votes, total),
                    }
                })
                .collect_vec(),
            total,
        }
    }

    /// Participation, correct and incorrect vote counts
    pub fn stats(&self) -> Stats {
        let participated = self.total();
        let passed = self.count(self.correct);
        Stats {
            participated,
            passed,
            failed: participated - passed,
        }
    }
}
