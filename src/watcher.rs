//! Presenter and respondent presence management
//!
//! This module tracks every participant of a room, their role, and whether
//! they are currently connected. A participant keeps its [`Id`] for the whole
//! life of the room, so a respondent who drops and reconnects is still the
//! same voter. Liveness is not stored here: a participant is connected when
//! the `tunnel_finder` supplied by the runtime returns a tunnel for it.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    str::FromStr,
};

use enum_map::{Enum, EnumMap};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use uuid::Uuid;

use super::{SyncMessage, UpdateMessage, tunnel::Tunnel};

/// A stable identifier for a participant
///
/// The room hands this out on first join. Clients present it again when
/// they reconnect to resume their identity, which is what keeps a
/// respondent from voting twice in one poll.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random participant ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    /// Parses an ID from a UUID string
    ///
    /// # Errors
    ///
    /// Returns a `uuid::Error` if the string is not a valid UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// The role of a participant together with its role-specific data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// The single participant who posts questions
    Presenter,
    /// A participant answering questions
    Respondent {
        /// The respondent's display name
        name: String,
    },
}

/// The role of a participant without associated data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum ValueKind {
    /// The presenter
    Presenter,
    /// A respondent
    Respondent,
}

impl Value {
    /// Returns the kind of this value without the associated data
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Presenter => ValueKind::Presenter,
            Value::Respondent { .. } => ValueKind::Respondent,
        }
    }
}

/// Errors that can occur when registering participants
#[derive(Error, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The room already has the maximum number of respondents
    #[error("maximum number of respondents reached")]
    MaximumRespondents,
    /// The room already has a connected presenter
    #[error("room already has an active presenter")]
    PresenceConflict,
}

/// All participants of one room
#[derive(Debug)]
pub struct Watchers {
    /// Primary mapping from participant ID to role
    mapping: HashMap<Id, Value>,
    /// Reverse mapping organized by role for efficient filtering
    reverse_mapping: EnumMap<ValueKind, HashSet<Id>>,
    /// Maximum number of respondents accepted
    max_respondents: usize,
}

impl Default for Watchers {
    fn default() -> Self {
        Self::with_limit(crate::constants::room::MAX_RESPONDENT_COUNT)
    }
}

impl Watchers {
    /// Creates an empty set of participants accepting at most
    /// `max_respondents` respondents
    pub fn with_limit(max_respondents: usize) -> Self {
        Self {
            mapping: HashMap::new(),
            reverse_mapping: EnumMap::default(),
            max_respondents,
        }
    }

    /// Gets all connected participants with their tunnels and roles
    pub fn vec<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) -> Vec<(Id, T, Value)> {
        self.reverse_mapping
            .values()
            .flat_map(|v| v.iter())
            .filter_map(|x| match (tunnel_finder(*x), self.mapping.get(x)) {
                (Some(t), Some(v)) => Some((*x, t, v.to_owned())),
                _ => None,
            })
            .collect_vec()
    }

    /// Gets all connected participants of one role with their tunnels
    pub fn specific_vec<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        filter: ValueKind,
        tunnel_finder: F,
    ) -> Vec<(Id, T, Value)> {
        self.reverse_mapping[filter]
            .iter()
            .filter_map(|x| match (tunnel_finder(*x), self.mapping.get(x)) {
                (Some(t), Some(v)) => Some((*x, t, v.to_owned())),
                _ => None,
            })
            .collect_vec()
    }

    /// Counts the registered participants of one role, connected or not
    pub fn specific_count(&self, filter: ValueKind) -> usize {
        self.reverse_mapping[filter].len()
    }

    /// Returns the registered presenter, if any
    ///
    /// When more than one presenter is registered this returns the smallest
    /// ID; [`Watchers::heal_presenters`] resolves the conflict.
    pub fn presenter(&self) -> Option<Id> {
        self.reverse_mapping[ValueKind::Presenter].iter().min().copied()
    }

    /// Registers a participant
    ///
    /// # Errors
    ///
    /// * `Error::PresenceConflict` if a presenter is added while another
    ///   presenter is still connected
    /// * `Error::MaximumRespondents` if as many respondents as allowed are
    ///   connected
    pub fn add_watcher<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        watcher_value: Value,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        let kind = watcher_value.kind();

        match kind {
            ValueKind::Presenter => {
                let live_presenter = self.reverse_mapping[ValueKind::Presenter]
                    .iter()
                    .any(|id| *id != watcher_id && tunnel_finder(*id).is_some());
                if live_presenter {
                    return Err(Error::PresenceConflict);
                }
                // a presenter whose connection is gone is replaced
                for stale in std::mem::take(&mut self.reverse_mapping[ValueKind::Presenter]) {
                    self.mapping.remove(&stale);
                }
            }
            ValueKind::Respondent => {
                let connected = self.reverse_mapping[ValueKind::Respondent]
                    .iter()
                    .filter(|id| **id != watcher_id && tunnel_finder(**id).is_some())
                    .count();
                if connected >= self.max_respondents {
                    return Err(Error::MaximumRespondents);
                }
            }
        }

        if let Some(old) = self.mapping.insert(watcher_id, watcher_value) {
            self.reverse_mapping[old.kind()].remove(&watcher_id);
        }
        self.reverse_mapping[kind].insert(watcher_id);

        Ok(())
    }

    /// Removes a participant entirely
    pub fn remove_watcher(&mut self, watcher_id: Id) -> Option<Value> {
        let value = self.mapping.remove(&watcher_id)?;
        self.reverse_mapping[value.kind()].remove(&watcher_id);
        Some(value)
    }

    /// Gets the role of a participant
    pub fn get_watcher_value(&self, watcher_id: Id) -> Option<Value> {
        self.mapping.get(&watcher_id).map(|v| v.to_owned())
    }

    /// Checks if a participant is registered
    pub fn has_watcher(&self, watcher_id: Id) -> bool {
        self.mapping.contains_key(&watcher_id)
    }

    /// Checks if a participant has an active connection
    pub fn is_alive<T: Tunnel, F: Fn(Id) -> Option<T>>(watcher_id: Id, tunnel_finder: F) -> bool {
        tunnel_finder(watcher_id).is_some()
    }

    /// Closes the tunnel of a participant, if it has one
    pub fn remove_watcher_session<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        watcher_id: &Id,
        tunnel_finder: F,
    ) {
        if let Some(x) = tunnel_finder(*watcher_id) {
            x.close();
        }
    }

    /// Gets the display name of a respondent
    pub fn get_name(&self, watcher_id: Id) -> Option<String> {
        self.get_watcher_value(watcher_id).and_then(|v| match v {
            Value::Respondent { name } => Some(name),
            Value::Presenter => None,
        })
    }

    /// Collapses a room with several registered presenters down to one
    ///
    /// Two presenters must never coexist; if they do, the state is rebuilt
    /// from the current connections: the first connected presenter (by ID)
    /// is kept, every other presenter is dropped. Returns the surviving
    /// presenter, or `None` when no presenter is connected.
    pub fn heal_presenters<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        tunnel_finder: F,
    ) -> Option<Id> {
        let presenters = self.reverse_mapping[ValueKind::Presenter]
            .iter()
            .copied()
            .sorted()
            .collect_vec();

        if presenters.len() > 1 {
            tracing::error!(
                count = presenters.len(),
                "multiple presenters registered, rebuilding from live connections"
            );
        }

        let survivor = presenters
            .iter()
            .copied()
            .find(|id| tunnel_finder(*id).is_some());

        for id in presenters {
            if Some(id) != survivor {
                self.remove_watcher(id);
            }
        }

        survivor
    }

    /// Sends an update message to a specific participant
    pub fn send_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(watcher_id) else {
            return;
        };

        session.send_message(message);
    }

    /// Sends a state synchronization message to a specific participant
    pub fn send_state<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &SyncMessage,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(watcher_id) else {
            return;
        };

        session.send_state(message);
    }

    /// Sends personalized messages to all connected participants
    ///
    /// The sender function is called for each participant and may return
    /// `None` to skip it.
    pub fn announce_with<S, T: Tunnel, F: Fn(Id) -> Option<T>>(&self, sender: S, tunnel_finder: F)
    where
        S: Fn(Id, ValueKind) -> Option<UpdateMessage>,
    {
        for (watcher, session, v) in self.vec(tunnel_finder) {
            let Some(message) = sender(watcher, v.kind()) else {
                continue;
            };

            session.send_message(&message);
        }
    }

    /// Broadcasts an update message to every connected participant
    pub fn announce<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        tunnel_finder: F,
    ) {
        for (_, session, _) in self.vec(tunnel_finder) {
            session.send_message(message);
        }
    }

    /// Sends an update message to all connected participants of one role
    pub fn announce_specific<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        filter: ValueKind,
        message: &UpdateMessage,
        tunnel_finder: F,
    ) {
        for (_, session, _) in self.specific_vec(filter, tunnel_finder) {
            session.send_message(message);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod tests {
    use std::{
        cell::RefCell,
        collections::{HashSet, VecDeque},
        rc::Rc,
    };

    use super::*;

    /// Records everything a room pushes into it
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockTunnel {
        pub(crate) messages: Rc<RefCell<VecDeque<UpdateMessage>>>,
        pub(crate) states: Rc<RefCell<VecDeque<SyncMessage>>>,
        pub(crate) closed: Rc<RefCell<bool>>,
    }

    impl MockTunnel {
        pub(crate) fn drain_messages(&self) -> Vec<UpdateMessage> {
            self.messages.borrow_mut().drain(..).collect()
        }

        pub(crate) fn drain_states(&self) -> Vec<SyncMessage> {
            self.states.borrow_mut().drain(..).collect()
        }
    }

    impl Tunnel for MockTunnel {
        fn send_message(&self, message: &UpdateMessage) {
            self.messages.borrow_mut().push_back(message.clone());
        }

        fn send_state(&self, state: &SyncMessage) {
            self.states.borrow_mut().push_back(state.clone());
        }

        fn close(self) {
            *self.closed.borrow_mut() = true;
        }
    }

    /// A set of tunnels keyed by participant, with a switch to drop them
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockNetwork {
        tunnels: Rc<RefCell<HashMap<Id, MockTunnel>>>,
        offline: Rc<RefCell<HashSet<Id>>>,
    }

    impl MockNetwork {
        pub(crate) fn connect(&self, id: Id) -> MockTunnel {
            self.offline.borrow_mut().remove(&id);
            self.tunnels.borrow_mut().entry(id).or_default().clone()
        }

        pub(crate) fn disconnect(&self, id: Id) {
            self.offline.borrow_mut().insert(id);
        }

        pub(crate) fn finder(&self) -> impl Fn(Id) -> Option<MockTunnel> + '_ {
            move |id| {
                if self.offline.borrow().contains(&id) {
                    None
                } else {
                    self.tunnels.borrow().get(&id).cloned()
                }
            }
        }
    }

    fn respondent(name: &str) -> Value {
        Value::Respondent {
            name: name.to_owned(),
        }
    }

    #[test]
    fn test_id_roundtrip_display() {
        let id = Id::new();
        assert_eq!(Id::from_str(&id.to_string()).unwrap(), id);
        assert!(Id::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(Value::Presenter.kind(), ValueKind::Presenter);
        assert_eq!(respondent("a").kind(), ValueKind::Respondent);
    }

    #[test]
    fn test_add_presenter_and_respondents() {
        let network = MockNetwork::default();
        let mut watchers = Watchers::default();
        let presenter = Id::new();
        let student = Id::new();
        network.connect(presenter);
        network.connect(student);

        watchers
            .add_watcher(presenter, Value::Presenter, network.finder())
            .unwrap();
        watchers
            .add_watcher(student, respondent("Ada"), network.finder())
            .unwrap();

        assert_eq!(watchers.presenter(), Some(presenter));
        assert_eq!(watchers.specific_count(ValueKind::Respondent), 1);
        assert_eq!(watchers.get_name(student), Some("Ada".to_owned()));
        assert_eq!(watchers.get_name(presenter), None);
        assert_eq!(watchers.vec(network.finder()).len(), 2);
    }

    #[test]
    fn test_second_live_presenter_conflicts() {
        let network = MockNetwork::default();
        let mut watchers = Watchers::default();
        let first = Id::new();
        let second = Id::new();
        network.connect(first);
        network.connect(second);

        watchers
            .add_watcher(first, Value::Presenter, network.finder())
            .unwrap();
        assert_eq!(
            watchers.add_watcher(second, Value::Presenter, network.finder()),
            Err(Error::PresenceConflict)
        );
        assert_eq!(watchers.presenter(), Some(first));
        assert!(!watchers.has_watcher(second));
    }

    #[test]
    fn test_disconnected_presenter_is_replaced() {
        let network = MockNetwork::default();
        let mut watchers = Watchers::default();
        let first = Id::new();
        let second = Id::new();
        network.connect(first);
        network.connect(second);

        watchers
            .add_watcher(first, Value::Presenter, network.finder())
            .unwrap();
        network.disconnect(first);

        watchers
            .add_watcher(second, Value::Presenter, network.finder())
            .unwrap();
        assert_eq!(watchers.presenter(), Some(second));
        assert!(!watchers.has_watcher(first));
        assert_eq!(watchers.specific_count(ValueKind::Presenter), 1);
    }

    #[test]
    fn test_respondent_limit() {
        let network = MockNetwork::default();
        let mut watchers = Watchers::with_limit(1);
        let first = Id::new();
        let second = Id::new();
        network.connect(first);
        network.connect(second);

        watchers
            .add_watcher(first, respondent("a"), network.finder())
            .unwrap();
        assert_eq!(
            watchers.add_watcher(second, respondent("b"), network.finder()),
            Err(Error::MaximumRespondents)
        );
    }

    #[test]
    fn test_respondent_limit_counts_connected_only() {
        let network = MockNetwork::default();
        let mut watchers = Watchers::with_limit(1);
        let first = Id::new();
        let second = Id::new();
        network.connect(first);
        network.connect(second);

        watchers
            .add_watcher(first, respondent("a"), network.finder())
            .unwrap();
        network.disconnect(first);

        watchers
            .add_watcher(second, respondent("b"), network.finder())
            .unwrap();
        assert_eq!(watchers.specific_count(ValueKind::Respondent), 2);
        assert!(watchers.has_watcher(first));
    }

    #[test]
    fn test_remove_watcher() {
        let network = MockNetwork::default();
        let mut watchers = Watchers::default();
        let id = Id::new();
        watchers
            .add_watcher(id, respondent("a"), network.finder())
            .unwrap();

        assert_eq!(watchers.remove_watcher(id), Some(respondent("a")));
        assert_eq!(watchers.remove_watcher(id), None);
        assert_eq!(watchers.specific_count(ValueKind::Respondent), 0);
    }

    #[test]
    fn test_liveness_follows_tunnels() {
        let network = MockNetwork::default();
        let mut watchers = Watchers::default();
        let id = Id::new();
        network.connect(id);
        watchers
            .add_watcher(id, respondent("a"), network.finder())
            .unwrap();

        assert!(Watchers::is_alive(id, network.finder()));
        network.disconnect(id);
        assert!(!Watchers::is_alive(id, network.finder()));
        assert!(watchers.has_watcher(id));
        assert!(watchers.specific_vec(ValueKind::Respondent, network.finder()).is_empty());
    }

    #[test]
    fn test_heal_presenters_keeps_live_one() {
        let network = MockNetwork::default();
        let mut watchers = Watchers::default();
        let a = Id::new();
        let b = Id::new();

        // corrupt the state directly to simulate a broken invariant
        watchers.mapping.insert(a, Value::Presenter);
        watchers.mapping.insert(b, Value::Presenter);
        watchers.reverse_mapping[ValueKind::Presenter].insert(a);
        watchers.reverse_mapping[ValueKind::Presenter].insert(b);
        network.connect(b);

        assert_eq!(watchers.heal_presenters(network.finder()), Some(b));
        assert_eq!(watchers.presenter(), Some(b));
        assert!(!watchers.has_watcher(a));
    }

    #[test]
    fn test_heal_presenters_without_connection() {
        let network = MockNetwork::default();
        let mut watchers = Watchers::default();
        let a = Id::new();
        watchers
            .add_watcher(a, Value::Presenter, network.finder())
            .unwrap();

        assert_eq!(watchers.heal_presenters(network.finder()), None);
        assert_eq!(watchers.presenter(), None);
    }

    #[test]
    fn test_announce_specific_reaches_only_role() {
        let network = MockNetwork::default();
        let mut watchers = Watchers::default();
        let presenter = Id::new();
        let student = Id::new();
        let presenter_tunnel = network.connect(presenter);
        let student_tunnel = network.connect(student);
        watchers
            .add_watcher(presenter, Value::Presenter, network.finder())
            .unwrap();
        watchers
            .add_watcher(student, respondent("a"), network.finder())
            .unwrap();

        watchers.announce_specific(
            ValueKind::Presenter,
            &crate::room::UpdateMessage::PresenterLeft.into(),
            network.finder(),
        );

        assert_eq!(presenter_tunnel.drain_messages().len(), 1);
        assert!(student_tunnel.drain_messages().is_empty());
    }
}
