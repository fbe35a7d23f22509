//! Room management and message routing
//!
//! A room groups one presenter and any number of respondents under a
//! [`RoomCode`]. It owns the poll [`Session`], routes incoming messages by
//! the sender's role, and decides when the room has to be torn down. Like
//! the session, the room is a plain state machine: it reaches participants
//! through a `tunnel_finder` and asks the runtime to deliver timed alarms
//! through `schedule_message`.

use std::time::Duration;

use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;
use web_time::SystemTime;

use super::{
    AlarmMessage, TruncatedVec,
    config::Config,
    names::{self, NameStyle, Names},
    poll::{
        Session,
        question::{self, OptionId, QuestionConfig},
        timer::PollId,
    },
    room_code::RoomCode,
    tunnel::Tunnel,
    watcher::{self, Id, Value, ValueKind, Watchers},
};

/// Per-room settings chosen by the presenter when the room is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct Options {
    /// Whether respondents see the vote counts while the poll is active
    #[garde(skip)]
    pub live_results: bool,
    /// Whether respondents see the correct option once the poll ended
    #[garde(skip)]
    pub reveal_correct: bool,
    /// Style for generated names (None lets respondents choose their own)
    #[garde(dive)]
    pub random_names: Option<NameStyle>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            live_results: false,
            reveal_correct: true,
            random_names: None,
        }
    }
}

/// Messages received from participants, tagged by the sender's role
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    /// Messages from the presenter
    Presenter(IncomingPresenterMessage),
    /// Messages from a respondent
    Respondent(IncomingRespondentMessage),
}

impl IncomingMessage {
    /// Whether a participant of `sender_kind` may send this message
    fn follows(&self, sender_kind: ValueKind) -> bool {
        matches!(
            (self, sender_kind),
            (IncomingMessage::Presenter(_), ValueKind::Presenter)
                | (IncomingMessage::Respondent(_), ValueKind::Respondent)
        )
    }
}

/// Messages that can be sent by the presenter
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub enum IncomingPresenterMessage {
    /// Start a poll with this question
    PostQuestion(QuestionConfig),
    /// Close the active poll early
    EndPoll,
    /// Tear the room down
    CloseRoom,
}

/// Messages that can be sent by respondents
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum IncomingRespondentMessage {
    /// Vote for an option of the active poll
    SubmitAnswer(OptionId),
}

/// Update messages about the room itself
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum UpdateMessage {
    /// The participant's identity, to be presented again on reconnect
    IdAssign(Id),
    /// (RESPONDENT ONLY) the display name in use
    NameAssign(String),
    /// (PRESENTER ONLY) connected respondents
    Roster(TruncatedVec<String>),
    /// (RESPONDENT ONLY) the presenter is gone and the room is closing
    PresenterLeft,
    /// (PRESENTER ONLY) the posted question was refused
    QuestionRejected(question::Error),
}

/// Synchronization messages about the room itself
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Room view of the presenter
    Presenter {
        /// The room code to share with respondents
        code: RoomCode,
        /// The room settings
        options: Options,
        /// Connected respondents
        roster: TruncatedVec<String>,
    },
    /// Room view of a respondent
    Respondent {
        /// The joined room
        code: RoomCode,
        /// The respondent's display name
        name: String,
        /// Whether a presenter is connected
        presenter_present: bool,
    },
}

/// Errors that keep a participant out of a room
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The participant could not be registered
    #[error(transparent)]
    Presence(#[from] watcher::Error),
    /// The requested name was refused
    #[error(transparent)]
    Name(#[from] names::Error),
}

/// Whether a room survives the event it just handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// The room keeps running
    Retained,
    /// The room was closed and must be dropped
    Teardown,
}

/// A live poll room
#[derive(Debug)]
pub struct Room {
    code: RoomCode,
    options: Options,
    watchers: Watchers,
    names: Names,
    session: Session,
    last_poll: PollId,
    roster_limit: usize,
}

impl Room {
    /// Creates an empty room; the presenter joins through [`Room::add_presenter`]
    pub fn new(code: RoomCode, options: Options, config: &Config) -> Self {
        tracing::info!(room = %code, ?options, "room created");

        Self {
            code,
            options,
            watchers: Watchers::with_limit(config.max_respondents),
            names: Names::default(),
            session: Session::default(),
            last_poll: PollId::default(),
            roster_limit: config.roster_limit,
        }
    }

    /// The room code
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// The room settings
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The poll session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The registered participants
    pub fn watchers(&self) -> &Watchers {
        &self.watchers
    }

    /// The registered presenter
    pub fn presenter(&self) -> Option<Id> {
        self.watchers.presenter()
    }

    /// The identity a joining respondent continues under
    ///
    /// A claimed id is honoured only if it belongs to a respondent of this
    /// room; anything else gets a fresh id.
    pub fn claim(&self, claim: Option<Id>) -> Id {
        claim
            .filter(|id| {
                matches!(
                    self.watchers.get_watcher_value(*id),
                    Some(Value::Respondent { .. })
                )
            })
            .unwrap_or_default()
    }

    /// Registers the presenter and sends it the current state
    ///
    /// # Errors
    ///
    /// Returns `watcher::Error::PresenceConflict` if another presenter is
    /// connected.
    pub fn add_presenter<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        presenter: Id,
        tunnel_finder: F,
    ) -> Result<(), watcher::Error> {
        if let Err(e) = self
            .watchers
            .add_watcher(presenter, Value::Presenter, &tunnel_finder)
        {
            tracing::warn!(room = %self.code, error = %e, "presenter join rejected");
            return Err(e);
        }

        tracing::info!(room = %self.code, %presenter, "presenter joined");

        self.watchers.send_message(
            &UpdateMessage::IdAssign(presenter).into(),
            presenter,
            &tunnel_finder,
        );
        self.update_session(presenter, &tunnel_finder);
        Ok(())
    }

    /// Registers a respondent, or resumes one that reconnects, and sends it
    /// the current state
    ///
    /// Returns the respondent's display name.
    ///
    /// # Errors
    ///
    /// * `Error::Name` if the requested name is refused
    /// * `Error::Presence` if the room is full
    pub fn add_respondent<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        respondent: Id,
        requested_name: Option<&str>,
        tunnel_finder: F,
    ) -> Result<String, Error> {
        let name = match self.watchers.get_name(respondent) {
            Some(name) => {
                tracing::info!(room = %self.code, %respondent, "respondent reconnected");
                name
            }
            None => {
                let name = self
                    .names
                    .resolve(respondent, requested_name, self.options.random_names)
                    .inspect_err(|e| {
                        tracing::warn!(room = %self.code, error = %e, "respondent name rejected");
                    })?;

                if let Err(e) = self.watchers.add_watcher(
                    respondent,
                    Value::Respondent { name: name.clone() },
                    &tunnel_finder,
                ) {
                    self.names.release(&respondent);
                    tracing::warn!(room = %self.code, error = %e, "respondent join rejected");
                    return Err(e.into());
                }

                tracing::info!(room = %self.code, %respondent, %name, "respondent joined");
                name
            }
        };

        self.watchers.send_message(
            &UpdateMessage::IdAssign(respondent).into(),
            respondent,
            &tunnel_finder,
        );
        self.watchers.send_message(
            &UpdateMessage::NameAssign(name.clone()).into(),
            respondent,
            &tunnel_finder,
        );
        self.update_session(respondent, &tunnel_finder);
        self.announce_roster(&tunnel_finder);

        Ok(name)
    }

    /// Handles a message from a participant
    pub fn receive_message<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        watcher_id: Id,
        message: IncomingMessage,
        schedule_message: S,
        tunnel_finder: F,
    ) -> Presence {
        let Some(watcher_value) = self.watchers.get_watcher_value(watcher_id) else {
            return Presence::Retained;
        };

        if !message.follows(watcher_value.kind()) {
            tracing::debug!(room = %self.code, %watcher_id, "message does not match sender role");
            return Presence::Retained;
        }

        match message {
            IncomingMessage::Presenter(IncomingPresenterMessage::PostQuestion(question)) => {
                match question.into_checked() {
                    Ok(question) => {
                        self.last_poll = self.last_poll.next();
                        self.session.post(
                            self.last_poll,
                            question,
                            &self.options,
                            &self.watchers,
                            schedule_message,
                            &tunnel_finder,
                        );
                    }
                    Err(e) => {
                        tracing::warn!(room = %self.code, error = %e, "question rejected");
                        self.watchers.send_message(
                            &UpdateMessage::QuestionRejected(e).into(),
                            watcher_id,
                            &tunnel_finder,
                        );
                    }
                }
            }
            IncomingMessage::Presenter(IncomingPresenterMessage::EndPoll) => {
                self.session
                    .end(&self.options, &self.watchers, &tunnel_finder);
            }
            IncomingMessage::Presenter(IncomingPresenterMessage::CloseRoom) => {
                self.close(&tunnel_finder);
                return Presence::Teardown;
            }
            IncomingMessage::Respondent(IncomingRespondentMessage::SubmitAnswer(option)) => {
                if let Err(e) = self.session.submit_vote(
                    watcher_id,
                    option,
                    SystemTime::now(),
                    &self.options,
                    &self.watchers,
                    &tunnel_finder,
                ) {
                    tracing::debug!(
                        room = %self.code,
                        respondent = %watcher_id,
                        %option,
                        error = %e,
                        "vote rejected"
                    );
                }
            }
        }

        Presence::Retained
    }

    /// Handles a scheduled alarm
    pub fn receive_alarm<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    >(
        &mut self,
        message: AlarmMessage,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        match message {
            AlarmMessage::Poll(alarm) => self.session.receive_alarm(
                alarm,
                &self.options,
                &self.watchers,
                schedule_message,
                tunnel_finder,
            ),
        }
    }

    /// Handles the loss of a participant's connection
    ///
    /// `tunnel_finder` must no longer return a tunnel for `watcher_id`.
    /// Losing the presenter closes the room; losing a respondent only
    /// updates the roster, its identity and vote stay.
    pub fn disconnect<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        tunnel_finder: F,
    ) -> Presence {
        match self.watchers.get_watcher_value(watcher_id) {
            Some(Value::Presenter) => {
                tracing::info!(room = %self.code, presenter = %watcher_id, "presenter disconnected");
                if self.watchers.heal_presenters(&tunnel_finder).is_some() {
                    return Presence::Retained;
                }
                self.close(&tunnel_finder);
                Presence::Teardown
            }
            Some(Value::Respondent { .. }) => {
                tracing::info!(room = %self.code, respondent = %watcher_id, "respondent disconnected");
                self.announce_roster(&tunnel_finder);
                Presence::Retained
            }
            None => {
                if self.presenter().is_none() {
                    Presence::Teardown
                } else {
                    Presence::Retained
                }
            }
        }
    }

    /// Notifies respondents that the presenter left and closes every tunnel
    fn close<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: F) {
        if let Some(poll) = self.session.poll() {
            tracing::info!(room = %self.code, poll = %poll.id(), active = self.session.is_active(), "poll abandoned");
        }

        self.watchers.announce_specific(
            ValueKind::Respondent,
            &UpdateMessage::PresenterLeft.into(),
            &tunnel_finder,
        );

        for (id, _, _) in self.watchers.vec(&tunnel_finder) {
            self.watchers.remove_watcher_session(&id, &tunnel_finder);
        }

        self.session = Session::Idle;
        tracing::info!(room = %self.code, "room closed");
    }

    /// Names of the connected respondents, truncated to the roster limit
    fn roster<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) -> TruncatedVec<String> {
        let names = self
            .watchers
            .specific_vec(ValueKind::Respondent, tunnel_finder)
            .into_iter()
            .filter_map(|(id, _, _)| self.watchers.get_name(id))
            .sorted()
            .collect_vec();
        let exact_count = names.len();

        TruncatedVec::new(names.into_iter(), self.roster_limit, exact_count)
    }

    fn announce_roster<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) {
        self.watchers.announce_specific(
            ValueKind::Presenter,
            &UpdateMessage::Roster(self.roster(&tunnel_finder)).into(),
            &tunnel_finder,
        );
    }

    /// The room-level state a participant needs
    pub fn state_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        watcher_id: Id,
        watcher_kind: ValueKind,
        tunnel_finder: F,
    ) -> super::SyncMessage {
        match watcher_kind {
            ValueKind::Presenter => SyncMessage::Presenter {
                code: self.code.clone(),
                options: self.options,
                roster: self.roster(tunnel_finder),
            },
            ValueKind::Respondent => SyncMessage::Respondent {
                code: self.code.clone(),
                name: self.watchers.get_name(watcher_id).unwrap_or_default(),
                presenter_present: self
                    .presenter()
                    .is_some_and(|p| Watchers::is_alive(p, &tunnel_finder)),
            },
        }
        .into()
    }

    /// Sends a participant the full room and poll state
    pub fn update_session<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(watcher_value) = self.watchers.get_watcher_value(watcher_id) else {
            return;
        };
        let kind = watcher_value.kind();

        self.watchers.send_state(
            &self.state_message(watcher_id, kind, &tunnel_finder),
            watcher_id,
            &tunnel_finder,
        );
        self.watchers.send_state(
            &self
                .session
                .state_message(watcher_id, kind, &self.options)
                .into(),
            watcher_id,
            &tunnel_finder,
        );
    }
}
