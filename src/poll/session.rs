//! Poll session state machine
//!
//! A room runs at most one poll at a time. The session is `Idle` until the
//! presenter posts the first question, `Active` while the countdown runs and
//! votes are accepted, and `Ended` once the countdown expires or the
//! presenter ends the poll. Posting a new question always replaces the
//! session wholesale, whichever state it was in.

use std::time::Duration;

use once_cell_serde::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use web_time::SystemTime;

use super::{
    PossiblyHidden,
    question::{OptionConfig, OptionId, QuestionConfig},
    tally::{self, Stats, Tally, VoteTally},
    timer::{AlarmMessage, Countdown, PollId},
};
use crate::{
    room::Options,
    tunnel::Tunnel,
    watcher::{Id, ValueKind, Watchers},
};

/// Phase of a poll as seen by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Votes are accepted
    Active,
    /// Voting is closed
    Ended,
}

/// Full description of a poll for one participant
///
/// What a participant may see depends on its role and the room options:
/// the correct option and the counts stay hidden from respondents while the
/// poll is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The poll this snapshot describes
    pub poll: PollId,
    /// Current phase
    pub phase: Phase,
    /// The prompt
    pub text: String,
    /// Options in display order
    pub options: Vec<OptionConfig>,
    /// Configured answer window in seconds
    pub duration: u64,
    /// Seconds left on the countdown
    pub remaining: u64,
    /// The correct option
    pub correct: PossiblyHidden<OptionId>,
    /// Votes so far
    pub tally: PossiblyHidden<Tally>,
}

/// Closing numbers of a poll
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Results {
    /// The poll that ended
    pub poll: PollId,
    /// Final counts and percentages
    pub tally: Tally,
    /// The correct option
    pub correct: PossiblyHidden<OptionId>,
    /// (PRESENTER ONLY) participation summary
    pub stats: Option<Stats>,
}

/// Update messages sent while a poll runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMessage {
    /// A poll started or ended; carries the full snapshot
    QuestionBroadcast(Snapshot),
    /// The authoritative countdown value
    Tick {
        /// Seconds left
        remaining: u64,
    },
    /// Aggregated votes after an accepted vote
    LiveTally(Tally),
    /// (PRESENTER ONLY) participation summary after an accepted vote
    Stats(Stats),
    /// (VOTER ONLY) the vote was recorded
    AnswerLocked(OptionId),
    /// The poll closed
    PollResults(Results),
}

/// Synchronization messages for participants that (re)connect
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// No question has been posted yet
    Idle,
    /// A poll is running
    Active {
        /// The poll with the live remaining time
        snapshot: Snapshot,
        /// The participant's own vote
        voted: Option<OptionId>,
        /// (PRESENTER ONLY) participation so far
        stats: Option<Stats>,
    },
    /// The most recent poll is over
    Ended {
        /// The closed poll
        snapshot: Snapshot,
        /// The participant's own vote
        voted: Option<OptionId>,
        /// Closing numbers
        results: Results,
    },
}

/// One posted question with its countdown and votes
#[derive(Debug)]
pub struct Poll {
    id: PollId,
    question: QuestionConfig,
    tally: VoteTally,
    countdown: Countdown,
    /// Frozen tally, filled when the poll ends
    closing: OnceCell<Tally>,
}

impl Poll {
    fn new(id: PollId, question: QuestionConfig) -> Self {
        Self {
            id,
            tally: VoteTally::new(&question),
            countdown: Countdown::start(question.duration_secs()),
            question,
            closing: OnceCell::new(),
        }
    }

    /// The poll's sequence number
    pub fn id(&self) -> PollId {
        self.id
    }

    /// The posted question
    pub fn question(&self) -> &QuestionConfig {
        &self.question
    }

    /// The vote ledger
    pub fn tally(&self) -> &VoteTally {
        &self.tally
    }

    /// The countdown
    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    fn closing_tally(&self) -> Tally {
        self.closing.get_or_init(|| self.tally.snapshot()).clone()
    }

    fn current_tally(&self, phase: Phase) -> Tally {
        match phase {
            Phase::Active => self.tally.snapshot(),
            Phase::Ended => self.closing_tally(),
        }
    }

    fn snapshot(&self, phase: Phase, kind: ValueKind, options: &Options) -> Snapshot {
        let presenter = matches!(kind, ValueKind::Presenter);
        let ended = matches!(phase, Phase::Ended);

        Snapshot {
            poll: self.id,
            phase,
            text: self.question.text().to_owned(),
            options: self.question.options().to_vec(),
            duration: self.countdown.duration(),
            remaining: self.countdown.remaining(),
            correct: PossiblyHidden::reveal_if(
                presenter || (ended && options.reveal_correct),
                self.question.correct(),
            ),
            tally: if presenter || ended || options.live_results {
                PossiblyHidden::Visible(self.current_tally(phase))
            } else {
                PossiblyHidden::Hidden
            },
        }
    }

    fn results(&self, kind: ValueKind, options: &Options) -> Results {
        let presenter = matches!(kind, ValueKind::Presenter);

        Results {
            poll: self.id,
            tally: self.closing_tally(),
            correct: PossiblyHidden::reveal_if(
                presenter || options.reveal_correct,
                self.question.correct(),
            ),
            stats: presenter.then(|| self.tally.stats()),
        }
    }
}

/// The question lifecycle of one room
#[derive(Debug, Default)]
pub enum Session {
    /// No question posted yet
    #[default]
    Idle,
    /// Countdown running, votes accepted
    Active(Box<Poll>),
    /// Voting closed, final tally visible
    Ended(Box<Poll>),
}

impl Session {
    /// The current or most recent poll
    pub fn poll(&self) -> Option<&Poll> {
        match self {
            Session::Idle => None,
            Session::Active(poll) | Session::Ended(poll) => Some(poll),
        }
    }

    /// Whether votes are currently accepted
    pub fn is_active(&self) -> bool {
        matches!(self, Session::Active(_))
    }

    /// Starts a poll for an already checked question
    ///
    /// Any running poll is superseded: its pending ticks stop matching and it
    /// never publishes results. Every participant receives the snapshot of
    /// the new poll followed by the first tick carrying the full duration.
    pub fn post<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        poll_id: PollId,
        question: QuestionConfig,
        options: &Options,
        watchers: &Watchers,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        if let Session::Active(previous) = self {
            tracing::info!(poll = %previous.id, "poll superseded by a new question");
        }

        let poll = Poll::new(poll_id, question);

        tracing::info!(
            poll = %poll.id,
            options = poll.question.options().len(),
            duration = poll.countdown.duration(),
            "poll started"
        );

        announce_snapshot(&poll, Phase::Active, options, watchers, &tunnel_finder);
        watchers.announce(
            &UpdateMessage::Tick {
                remaining: poll.countdown.remaining(),
            }
            .into(),
            &tunnel_finder,
        );

        if let Some((alarm, delay)) = poll.countdown.next_alarm(poll.id) {
            schedule_message(alarm.into(), delay);
        }

        *self = Session::Active(Box::new(poll));
    }

    /// Closes the active poll and publishes its results
    ///
    /// Returns `false` without any effect if no poll is active.
    pub fn end<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        options: &Options,
        watchers: &Watchers,
        tunnel_finder: F,
    ) -> bool {
        let poll = match std::mem::take(self) {
            Session::Active(poll) => poll,
            other => {
                *self = other;
                return false;
            }
        };

        let results = poll.closing_tally();
        tracing::info!(
            poll = %poll.id,
            total = results.total,
            remaining = poll.countdown.remaining(),
            "poll ended"
        );

        announce_snapshot(&poll, Phase::Ended, options, watchers, &tunnel_finder);
        watchers.announce_with(
            |_, kind| Some(UpdateMessage::PollResults(poll.results(kind, options)).into()),
            &tunnel_finder,
        );

        *self = Session::Ended(poll);
        true
    }

    /// Records a vote from a respondent
    ///
    /// On success the voter gets `AnswerLocked`, the presenter gets the new
    /// tally and stats, and respondents get the tally too when the room shows
    /// live results.
    ///
    /// # Errors
    ///
    /// * `tally::Error::Stale` if no poll is active
    /// * `tally::Error::UnknownOption` if the option is not part of the poll
    /// * `tally::Error::Duplicate` if the respondent already voted
    pub fn submit_vote<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        voter: Id,
        option: OptionId,
        at: SystemTime,
        options: &Options,
        watchers: &Watchers,
        tunnel_finder: F,
    ) -> Result<(), tally::Error> {
        let Session::Active(poll) = self else {
            return Err(tally::Error::Stale);
        };

        poll.tally.submit(voter, option, at)?;

        watchers.send_message(
            &UpdateMessage::AnswerLocked(option).into(),
            voter,
            &tunnel_finder,
        );

        let tally = poll.tally.snapshot();
        watchers.announce_specific(
            ValueKind::Presenter,
            &UpdateMessage::LiveTally(tally.clone()).into(),
            &tunnel_finder,
        );
        watchers.announce_specific(
            ValueKind::Presenter,
            &UpdateMessage::Stats(poll.tally.stats()).into(),
            &tunnel_finder,
        );
        if options.live_results {
            watchers.announce_specific(
                ValueKind::Respondent,
                &UpdateMessage::LiveTally(tally).into(),
                &tunnel_finder,
            );
        }

        Ok(())
    }

    /// Applies a countdown alarm
    ///
    /// Ticks for another poll, or out of sequence, are dropped. A matching
    /// tick is broadcast; at zero the poll ends.
    pub fn receive_alarm<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(crate::AlarmMessage, Duration),
    >(
        &mut self,
        alarm: AlarmMessage,
        options: &Options,
        watchers: &Watchers,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        let AlarmMessage::Tick {
            poll: poll_id,
            remaining,
        } = alarm;

        let Session::Active(poll) = self else {
            tracing::debug!(poll = %poll_id, "tick for an inactive session dropped");
            return;
        };

        if poll.id != poll_id {
            tracing::debug!(poll = %poll_id, current = %poll.id, "tick for a superseded poll dropped");
            return;
        }

        let Some(remaining) = poll.countdown.advance(remaining) else {
            tracing::debug!(poll = %poll_id, remaining, "out of sequence tick dropped");
            return;
        };

        watchers.announce(&UpdateMessage::Tick { remaining }.into(), &tunnel_finder);

        let next = poll.countdown.next_alarm(poll.id);
        match next {
            Some((alarm, delay)) => schedule_message(alarm.into(), delay),
            None => {
                self.end(options, watchers, tunnel_finder);
            }
        }
    }

    /// The state a (re)connecting participant needs
    pub fn state_message(
        &self,
        watcher_id: Id,
        watcher_kind: ValueKind,
        options: &Options,
    ) -> SyncMessage {
        let voted = |poll: &Poll| match watcher_kind {
            ValueKind::Respondent => poll.tally.vote_of(watcher_id).map(|v| v.option),
            ValueKind::Presenter => None,
        };

        match self {
            Session::Idle => SyncMessage::Idle,
            Session::Active(poll) => SyncMessage::Active {
                snapshot: poll.snapshot(Phase::Active, watcher_kind, options),
                voted: voted(poll),
                stats: matches!(watcher_kind, ValueKind::Presenter).then(|| poll.tally.stats()),
            },
            Session::Ended(poll) => SyncMessage::Ended {
                snapshot: poll.snapshot(Phase::Ended, watcher_kind, options),
                voted: voted(poll),
                results: poll.results(watcher_kind, options),
            },
        }
    }
}

fn announce_snapshot<T: Tunnel, F: Fn(Id) -> Option<T>>(
    poll: &Poll,
    phase: Phase,
    options: &Options,
    watchers: &Watchers,
    tunnel_finder: F,
) {
    watchers.announce_with(
        |_, kind| {
            Some(UpdateMessage::QuestionBroadcast(poll.snapshot(phase, kind, options)).into())
        },
        tunnel_finder,
    );
}
