//! Client-side mirror of a room
//!
//! [`ClientView`] folds the messages a client receives into the state it
//! renders, and builds the messages the client sends. It never decides
//! anything on its own: the local countdown only fills the gap between two
//! authoritative ticks, and a locked answer only becomes final once the
//! room confirms it.

use super::{
    SyncMessage, TruncatedVec, UpdateMessage,
    poll::{
        self, Phase, Results, Snapshot,
        question::{self, OptionId, QuestionConfig},
        tally::{Stats, Tally},
    },
    room::{self, IncomingMessage, IncomingPresenterMessage, IncomingRespondentMessage, Options},
    room_code::RoomCode,
    watcher::{Id, ValueKind},
};

/// Everything a client displays about its room
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientView {
    role: Option<ValueKind>,
    id: Option<Id>,
    name: Option<String>,
    code: Option<RoomCode>,
    options: Option<Options>,
    presenter_present: bool,
    presenter_left: bool,
    roster: TruncatedVec<String>,
    snapshot: Option<Snapshot>,
    remaining: u64,
    locked: Option<OptionId>,
    tally: Option<Tally>,
    stats: Option<Stats>,
    results: Option<Results>,
    rejected: Option<question::Error>,
}

impl ClientView {
    /// Applies a JSON message received from the room
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the text is neither an update nor a
    /// sync message.
    pub fn apply_message(&mut self, message: &str) -> Result<(), serde_json::Error> {
        if let Ok(update) = UpdateMessage::from_message(message) {
            self.apply_update(update);
            return Ok(());
        }
        self.apply_sync(SyncMessage::from_message(message)?);
        Ok(())
    }

    /// Applies an incremental update
    pub fn apply_update(&mut self, message: UpdateMessage) {
        match message {
            UpdateMessage::Room(message) => match message {
                room::UpdateMessage::IdAssign(id) => self.id = Some(id),
                room::UpdateMessage::NameAssign(name) => self.name = Some(name),
                room::UpdateMessage::Roster(roster) => self.roster = roster,
                room::UpdateMessage::PresenterLeft => {
                    self.presenter_present = false;
                    self.presenter_left = true;
                }
                room::UpdateMessage::QuestionRejected(e) => self.rejected = Some(e),
            },
            UpdateMessage::Poll(message) => match message {
                poll::UpdateMessage::QuestionBroadcast(snapshot) => {
                    if self.snapshot.as_ref().map(|s| s.poll) != Some(snapshot.poll) {
                        self.clear_poll();
                    }
                    self.rejected = None;
                    self.remaining = snapshot.remaining;
                    if let Some(tally) = snapshot.tally.visible() {
                        self.tally = Some(tally.clone());
                    }
                    self.snapshot = Some(snapshot);
                }
                poll::UpdateMessage::Tick { remaining } => self.remaining = remaining,
                poll::UpdateMessage::LiveTally(tally) => self.tally = Some(tally),
                poll::UpdateMessage::Stats(stats) => self.stats = Some(stats),
                poll::UpdateMessage::AnswerLocked(option) => self.locked = Some(option),
                poll::UpdateMessage::PollResults(results) => {
                    self.remaining = 0;
                    self.tally = Some(results.tally.clone());
                    if results.stats.is_some() {
                        self.stats = results.stats;
                    }
                    self.results = Some(results);
                }
            },
        }
    }

    /// Replaces the view with the state the room sent on (re)connect
    pub fn apply_sync(&mut self, message: SyncMessage) {
        match message {
            SyncMessage::Room(room::SyncMessage::Presenter {
                code,
                options,
                roster,
            }) => {
                self.role = Some(ValueKind::Presenter);
                self.code = Some(code);
                self.options = Some(options);
                self.roster = roster;
                self.presenter_present = true;
                self.presenter_left = false;
            }
            SyncMessage::Room(room::SyncMessage::Respondent {
                code,
                name,
                presenter_present,
            }) => {
                self.role = Some(ValueKind::Respondent);
                self.code = Some(code);
                self.name = Some(name);
                self.presenter_present = presenter_present;
                self.presenter_left = false;
            }
            SyncMessage::Poll(state) => {
                self.clear_poll();
                match state {
                    poll::SyncMessage::Idle => {}
                    poll::SyncMessage::Active {
                        snapshot,
                        voted,
                        stats,
                    } => {
                        self.locked = voted;
                        self.stats = stats;
                        self.show(snapshot);
                    }
                    poll::SyncMessage::Ended {
                        snapshot,
                        voted,
                        results,
                    } => {
                        self.locked = voted;
                        self.stats = results.stats;
                        self.show(snapshot);
                        self.tally = Some(results.tally.clone());
                        self.results = Some(results);
                    }
                }
            }
        }
    }

    fn show(&mut self, snapshot: Snapshot) {
        self.remaining = snapshot.remaining;
        self.tally = snapshot.tally.visible().cloned();
        self.snapshot = Some(snapshot);
    }

    fn clear_poll(&mut self) {
        self.snapshot = None;
        self.remaining = 0;
        self.locked = None;
        self.tally = None;
        self.stats = None;
        self.results = None;
    }

    /// Advances the displayed countdown by one second
    ///
    /// Only for display between ticks; the next tick from the room replaces
    /// the value.
    pub fn local_tick(&mut self) {
        if self.phase() == Some(Phase::Active) {
            self.remaining = self.remaining.saturating_sub(1);
        }
    }

    /// Locks an answer and returns the message to send
    ///
    /// Returns `None` if this client is not a respondent, no poll is
    /// running, an answer is already locked, or the option does not exist.
    pub fn choose(&mut self, option: OptionId) -> Option<IncomingMessage> {
        if self.role != Some(ValueKind::Respondent) || self.locked.is_some() {
            return None;
        }
        let snapshot = self.snapshot.as_ref()?;
        if snapshot.phase != Phase::Active || !snapshot.options.iter().any(|o| o.id == option) {
            return None;
        }

        self.locked = Some(option);
        Some(IncomingMessage::Respondent(
            IncomingRespondentMessage::SubmitAnswer(option),
        ))
    }

    /// Checks a question locally and returns the message posting it
    ///
    /// # Errors
    ///
    /// Returns the validation error, in which case nothing should be sent.
    pub fn post_question(&mut self, question: QuestionConfig) -> Result<IncomingMessage, question::Error> {
        if let Err(e) = question.check() {
            self.rejected = Some(e.clone());
            return Err(e);
        }
        self.rejected = None;
        Ok(IncomingMessage::Presenter(
            IncomingPresenterMessage::PostQuestion(question),
        ))
    }

    /// Message ending the running poll
    pub fn end_poll() -> IncomingMessage {
        IncomingMessage::Presenter(IncomingPresenterMessage::EndPoll)
    }

    /// Message closing the room
    pub fn close_room() -> IncomingMessage {
        IncomingMessage::Presenter(IncomingPresenterMessage::CloseRoom)
    }

    /// The role this client joined as
    pub fn role(&self) -> Option<ValueKind> {
        self.role
    }

    /// The identity to claim when reconnecting
    pub fn id(&self) -> Option<Id> {
        self.id
    }

    /// The display name (respondents)
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The joined room
    pub fn code(&self) -> Option<&RoomCode> {
        self.code.as_ref()
    }

    /// The room settings (presenter)
    pub fn options(&self) -> Option<&Options> {
        self.options.as_ref()
    }

    /// Whether a presenter is connected
    pub fn presenter_present(&self) -> bool {
        self.presenter_present
    }

    /// Whether the room announced that its presenter left
    pub fn presenter_left(&self) -> bool {
        self.presenter_left
    }

    /// Connected respondents (presenter)
    pub fn roster(&self) -> &TruncatedVec<String> {
        &self.roster
    }

    /// The current or most recent poll
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Phase of the current poll
    pub fn phase(&self) -> Option<Phase> {
        self.snapshot.as_ref().map(|s| s.phase)
    }

    /// Seconds left as displayed
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// The locked answer
    pub fn locked(&self) -> Option<OptionId> {
        self.locked
    }

    /// Latest known vote counts
    pub fn tally(&self) -> Option<&Tally> {
        self.tally.as_ref()
    }

    /// Participation summary (presenter)
    pub fn stats(&self) -> Option<Stats> {
        self.stats
    }

    /// Closing numbers of the most recent poll
    pub fn results(&self) -> Option<&Results> {
        self.results.as_ref()
    }

    /// The last question refusal, cleared by the next posted question
    pub fn rejected(&self) -> Option<&question::Error> {
        self.rejected.as_ref()
    }

    /// Percentage shown for an option, 0 while nothing is known
    pub fn percentage(&self, option: OptionId) -> u8 {
        self.tally
            .as_ref()
            .and_then(|t| t.get(option))
            .map_or(0, |o| o.percentage)
    }

    /// The correct option, once the room revealed it
    pub fn correct_option(&self) -> Option<OptionId> {
        self.results
            .as_ref()
            .and_then(|r| r.correct.visible())
            .or_else(|| self.snapshot.as_ref().and_then(|s| s.correct.visible()))
            .copied()
    }

    /// Whether the locked answer was right, once that is known
    pub fn is_correct(&self) -> Option<bool> {
        if self.phase() != Some(Phase::Ended) {
            return None;
        }
        Some(self.locked? == self.correct_option()?)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::poll::{PossiblyHidden, question::tests::sample, tally::OptionTally, timer::PollId};

    fn snapshot(poll: u64, phase: Phase, remaining: u64) -> Snapshot {
        let question = sample(10);
        Snapshot {
            poll: PollId(poll),
            phase,
            text: question.text().to_owned(),
            options: question.options().to_vec(),
            duration: 10,
            remaining,
            correct: PossiblyHidden::reveal_if(phase == Phase::Ended, OptionId(2)),
            tally: PossiblyHidden::Hidden,
        }
    }

    fn tally(votes: [usize; 4]) -> Tally {
        let total = votes.iter().sum();
        Tally {
            options: votes
                .iter()
                .zip(1..)
                .map(|(&votes, id)| OptionTally {
                    id: OptionId(id),
                    votes,
                    percentage: poll::tally::percentage(votes, total),
                })
                .collect(),
            total,
        }
    }

    fn respondent() -> ClientView {
        let mut view = ClientView::default();
        view.apply_sync(
            room::SyncMessage::Respondent {
                code: "physics".parse().unwrap(),
                name: "Ada".to_owned(),
                presenter_present: true,
            }
            .into(),
        );
        view.apply_sync(poll::SyncMessage::Idle.into());
        view
    }

    fn broadcast(view: &mut ClientView, snapshot: Snapshot) {
        view.apply_update(poll::UpdateMessage::QuestionBroadcast(snapshot).into());
    }

    #[test]
    fn test_sync_sets_identity() {
        let view = respondent();

        assert_eq!(view.role(), Some(ValueKind::Respondent));
        assert_eq!(view.name(), Some("Ada"));
        assert_eq!(view.code().map(RoomCode::as_str), Some("physics"));
        assert!(view.presenter_present());
        assert_eq!(view.phase(), None);
    }

    #[test]
    fn test_authoritative_tick_overrides_local_countdown() {
        let mut view = respondent();
        broadcast(&mut view, snapshot(1, Phase::Active, 10));

        view.local_tick();
        view.local_tick();
        view.local_tick();
        assert_eq!(view.remaining(), 7);

        view.apply_update(poll::UpdateMessage::Tick { remaining: 9 }.into());
        assert_eq!(view.remaining(), 9);

        for _ in 0..20 {
            view.local_tick();
        }
        assert_eq!(view.remaining(), 0);
    }

    #[test]
    fn test_choose_locks_once() {
        let mut view = respondent();
        assert_eq!(view.choose(OptionId(1)), None);

        broadcast(&mut view, snapshot(1, Phase::Active, 10));
        assert_eq!(view.choose(OptionId(9)), None);
        assert_eq!(
            view.choose(OptionId(1)),
            Some(IncomingMessage::Respondent(
                IncomingRespondentMessage::SubmitAnswer(OptionId(1))
            ))
        );
        assert_eq!(view.choose(OptionId(2)), None);
        assert_eq!(view.locked(), Some(OptionId(1)));
    }

    #[test]
    fn test_results_and_highlighting() {
        let mut view = respondent();
        broadcast(&mut view, snapshot(1, Phase::Active, 10));
        view.choose(OptionId(1));
        view.apply_update(poll::UpdateMessage::AnswerLocked(OptionId(1)).into());
        assert_eq!(view.is_correct(), None);
        assert_eq!(view.correct_option(), None);

        broadcast(&mut view, snapshot(1, Phase::Ended, 0));
        view.apply_update(
            poll::UpdateMessage::PollResults(Results {
                poll: PollId(1),
                tally: tally([1, 2, 0, 0]),
                correct: PossiblyHidden::Visible(OptionId(2)),
                stats: None,
            })
            .into(),
        );

        assert_eq!(view.percentage(OptionId(1)), 33);
        assert_eq!(view.percentage(OptionId(2)), 67);
        assert_eq!(view.percentage(OptionId(3)), 0);
        assert_eq!(view.correct_option(), Some(OptionId(2)));
        assert_eq!(view.is_correct(), Some(false));
        assert_eq!(view.choose(OptionId(2)), None);
    }

    #[test]
    fn test_new_poll_clears_previous() {
        let mut view = respondent();
        broadcast(&mut view, snapshot(1, Phase::Active, 10));
        view.choose(OptionId(1));
        view.apply_update(poll::UpdateMessage::LiveTally(tally([1, 0, 0, 0])).into());

        broadcast(&mut view, snapshot(2, Phase::Active, 10));
        assert_eq!(view.locked(), None);
        assert_eq!(view.tally(), None);
        assert_eq!(view.percentage(OptionId(1)), 0);
        assert!(view.choose(OptionId(3)).is_some());
    }

    #[test]
    fn test_sync_restores_vote_after_reconnect() {
        let mut view = respondent();
        view.apply_sync(
            poll::SyncMessage::Active {
                snapshot: snapshot(3, Phase::Active, 4),
                voted: Some(OptionId(4)),
                stats: None,
            }
            .into(),
        );

        assert_eq!(view.remaining(), 4);
        assert_eq!(view.locked(), Some(OptionId(4)));
        assert_eq!(view.choose(OptionId(1)), None);
    }

    #[test]
    fn test_presenter_left() {
        let mut view = respondent();
        view.apply_update(room::UpdateMessage::PresenterLeft.into());

        assert!(view.presenter_left());
        assert!(!view.presenter_present());
    }

    #[test]
    fn test_apply_message_json() {
        let mut view = ClientView::default();
        let id = Id::new();

        view.apply_message(&UpdateMessage::from(room::UpdateMessage::IdAssign(id)).to_message())
            .unwrap();
        view.apply_message(
            &SyncMessage::from(room::SyncMessage::Presenter {
                code: "physics".parse().unwrap(),
                options: Options::default(),
                roster: TruncatedVec::default(),
            })
            .to_message(),
        )
        .unwrap();
        view.apply_message(r#"{"Poll":{"Stats":{"participated":3,"passed":2,"failed":1}}}"#)
            .unwrap();

        assert_eq!(view.id(), Some(id));
        assert_eq!(view.role(), Some(ValueKind::Presenter));
        assert_eq!(view.options(), Some(&Options::default()));
        assert_eq!(view.stats().map(|s| s.passed), Some(2));
        assert!(view.apply_message("not json").is_err());
    }

    #[test]
    fn test_presenter_cannot_vote_and_validates_locally() {
        let mut view = ClientView::default();
        view.apply_sync(
            room::SyncMessage::Presenter {
                code: "physics".parse().unwrap(),
                options: Options::default(),
                roster: TruncatedVec::default(),
            }
            .into(),
        );
        broadcast(&mut view, snapshot(1, Phase::Active, 10));
        assert_eq!(view.choose(OptionId(1)), None);

        let short = QuestionConfig::new(
            "Which planet is red?",
            sample(10).options().to_vec(),
            OptionId(2),
            Duration::from_secs(5),
        );
        assert!(view.post_question(short).is_err());
        assert!(view.rejected().is_some());

        assert!(view.post_question(sample(10)).is_ok());
        assert_eq!(view.rejected(), None);
        assert_eq!(
            ClientView::end_poll(),
            IncomingMessage::Presenter(IncomingPresenterMessage::EndPoll)
        );
    }
}
