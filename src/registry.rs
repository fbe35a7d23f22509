//! Room registry and per-room sequencers
//!
//! Every room runs as its own tokio task that exclusively owns the [`Room`]
//! and handles one command at a time from an unbounded inbox. Countdown
//! alarms are sleeping tasks in a `JoinSet` owned by the same task, and the
//! inbox is always drained before a due alarm is applied. The registry
//! itself only maps room codes to inboxes; its lock is never held across an
//! `.await`.
//!
//! A transport integrates by calling [`Registry::join`] for every new
//! connection and then pumping the returned [`Connection`]: incoming frames
//! go to [`Connection::send`], outgoing ones come from [`Connection::recv`].
//! Dropping the connection is the disconnect.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use garde::Validate;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinSet,
};

use super::{
    AlarmMessage, SyncMessage, UpdateMessage,
    config::Config,
    room::{self, IncomingMessage, Options, Presence, Room},
    room_code::RoomCode,
    tunnel::Tunnel,
    watcher::{Id, ValueKind},
};

/// What a client asks for when it connects to a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// The role to join as
    pub role: ValueKind,
    /// Requested display name (respondents only)
    pub name: Option<String>,
    /// Identity from an earlier connection (respondents only)
    pub claim: Option<Id>,
    /// Settings for a room the presenter creates
    pub options: Options,
}

impl JoinRequest {
    /// A presenter join creating a room with `options`
    pub fn presenter(options: Options) -> Self {
        Self {
            role: ValueKind::Presenter,
            name: None,
            claim: None,
            options,
        }
    }

    /// A respondent join with an optional display name
    pub fn respondent(name: Option<&str>) -> Self {
        Self {
            role: ValueKind::Respondent,
            name: name.map(ToOwned::to_owned),
            claim: None,
            options: Options::default(),
        }
    }

    /// Resumes the identity of an earlier connection
    #[must_use]
    pub fn with_claim(mut self, claim: Id) -> Self {
        self.claim = Some(claim);
        self
    }
}

/// Reasons a join is refused
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JoinError {
    /// No open room uses the code
    #[error("room not found")]
    RoomNotFound,
    /// The registry is at its room limit
    #[error("too many open rooms")]
    TooManyRooms,
    /// The presenter's room options failed validation
    #[error("invalid room options: {0}")]
    InvalidOptions(String),
    /// The room refused the participant
    #[error(transparent)]
    Room(#[from] room::Error),
}

/// A message for one connected client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Apply on top of the current view
    Update(UpdateMessage),
    /// Replace the current view
    Sync(SyncMessage),
}

impl Outgoing {
    /// Converts the message to JSON for transmission
    pub fn to_message(&self) -> String {
        match self {
            Outgoing::Update(message) => message.to_message(),
            Outgoing::Sync(message) => message.to_message(),
        }
    }
}

#[derive(Debug)]
enum Frame {
    Outgoing(Outgoing),
    Close,
}

/// Tunnel feeding one [`Connection`]
#[derive(Debug, Clone)]
struct ChannelTunnel {
    serial: u64,
    sender: mpsc::UnboundedSender<Frame>,
}

impl Tunnel for ChannelTunnel {
    fn send_message(&self, message: &UpdateMessage) {
        self.sender
            .send(Frame::Outgoing(Outgoing::Update(message.clone())))
            .ok();
    }

    fn send_state(&self, state: &SyncMessage) {
        self.sender
            .send(Frame::Outgoing(Outgoing::Sync(state.clone())))
            .ok();
    }

    fn close(self) {
        self.sender.send(Frame::Close).ok();
    }
}

#[derive(Debug)]
enum Command {
    Join {
        request: JoinRequest,
        tunnel: ChannelTunnel,
        reply: oneshot::Sender<Result<Id, room::Error>>,
    },
    Message {
        from: Id,
        serial: u64,
        message: IncomingMessage,
    },
    Disconnect {
        id: Id,
        serial: u64,
    },
}

#[derive(Debug)]
struct RoomEntry {
    inbox: mpsc::UnboundedSender<Command>,
    generation: u64,
}

#[derive(Debug, Default)]
struct Rooms {
    entries: HashMap<RoomCode, RoomEntry>,
    next_generation: u64,
}

fn lock(rooms: &Mutex<Rooms>) -> MutexGuard<'_, Rooms> {
    rooms.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Maps room codes to running rooms
#[derive(Debug, Clone)]
pub struct Registry {
    rooms: Arc<Mutex<Rooms>>,
    config: Config,
    next_serial: Arc<AtomicU64>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Registry {
    /// Creates an empty registry
    pub fn new(config: Config) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(Rooms::default())),
            config,
            next_serial: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a registry configured from the environment
    pub fn from_env() -> Self {
        Self::new(Config::from_env())
    }

    /// The settings in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of open rooms
    pub fn room_count(&self) -> usize {
        lock(&self.rooms)
            .entries
            .values()
            .filter(|entry| !entry.inbox.is_closed())
            .count()
    }

    /// Connects a client to the room under `code`
    ///
    /// A presenter opens the room when none is running under the code. A
    /// respondent can only join a room that is open.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// * `JoinError::RoomNotFound` if a respondent names a code without a
    ///   room, or the room closed while the respondent joined. A presenter
    ///   racing a closing room gets a new room instead.
    /// * `JoinError::TooManyRooms` if a new room would exceed the limit
    /// * `JoinError::InvalidOptions` if a presenter's options are invalid
    /// * `JoinError::Room` if the room refused the participant, for example
    ///   a second presenter or a taken name
    pub async fn join(&self, code: RoomCode, request: JoinRequest) -> Result<Connection, JoinError> {
        let role = request.role;
        if matches!(role, ValueKind::Presenter) {
            request
                .options
                .validate()
                .map_err(|report| JoinError::InvalidOptions(report.to_string()))?;
        }

        match self.enter(&code, request.clone()).await {
            // the room was tearing down while the join sat in its inbox
            Err(JoinError::RoomNotFound) if matches!(role, ValueKind::Presenter) => {
                tracing::debug!(room = %code, "room closed during presenter join, reopening");
                self.enter(&code, request).await
            }
            result => result,
        }
    }

    async fn enter(&self, code: &RoomCode, request: JoinRequest) -> Result<Connection, JoinError> {
        let role = request.role;
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (reply, response) = oneshot::channel();

        let inbox = {
            let mut rooms = lock(&self.rooms);

            let running = rooms
                .entries
                .get(code)
                .filter(|entry| !entry.inbox.is_closed())
                .map(|entry| entry.inbox.clone());

            let inbox = match running {
                Some(inbox) => inbox,
                None => match role {
                    ValueKind::Presenter => self.open(&mut rooms, code, request.options)?,
                    ValueKind::Respondent => {
                        tracing::warn!(room = %code, "join for an unknown room");
                        return Err(JoinError::RoomNotFound);
                    }
                },
            };

            inbox
                .send(Command::Join {
                    request,
                    tunnel: ChannelTunnel { serial, sender },
                    reply,
                })
                .map_err(|_| JoinError::RoomNotFound)?;

            inbox
        };

        let id = response.await.map_err(|_| JoinError::RoomNotFound)??;

        Ok(Connection {
            id,
            serial,
            code: code.clone(),
            inbox,
            receiver,
            closed: false,
        })
    }

    fn open(
        &self,
        rooms: &mut Rooms,
        code: &RoomCode,
        options: Options,
    ) -> Result<mpsc::UnboundedSender<Command>, JoinError> {
        let open = rooms
            .entries
            .values()
            .filter(|entry| !entry.inbox.is_closed())
            .count();
        if open >= self.config.max_rooms {
            tracing::warn!(room = %code, open, "room limit reached");
            return Err(JoinError::TooManyRooms);
        }

        let generation = rooms.next_generation;
        rooms.next_generation += 1;

        let (inbox, commands) = mpsc::unbounded_channel();
        let room = Room::new(code.clone(), options, &self.config);
        tokio::spawn(run_room(room, commands, Arc::clone(&self.rooms), generation));

        rooms.entries.insert(
            code.clone(),
            RoomEntry {
                inbox: inbox.clone(),
                generation,
            },
        );

        Ok(inbox)
    }
}

fn finder(tunnels: &HashMap<Id, ChannelTunnel>) -> impl Fn(Id) -> Option<ChannelTunnel> + '_ {
    move |id| tunnels.get(&id).cloned()
}

fn scheduler(alarms: &mut JoinSet<AlarmMessage>) -> impl FnMut(AlarmMessage, Duration) + '_ {
    move |alarm, delay| {
        alarms.spawn(async move {
            tokio::time::sleep(delay).await;
            alarm
        });
    }
}

/// The sequencer task of one room
async fn run_room(
    mut room: Room,
    mut commands: mpsc::UnboundedReceiver<Command>,
    rooms: Arc<Mutex<Rooms>>,
    generation: u64,
) {
    let mut tunnels: HashMap<Id, ChannelTunnel> = HashMap::new();
    let mut alarms: JoinSet<AlarmMessage> = JoinSet::new();

    loop {
        let presence = tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(command) => handle_command(&mut room, &mut tunnels, &mut alarms, command),
                None => Presence::Teardown,
            },
            Some(fired) = alarms.join_next(), if !alarms.is_empty() => {
                match fired {
                    Ok(alarm) => room.receive_alarm(alarm, scheduler(&mut alarms), finder(&tunnels)),
                    Err(e) => tracing::error!(room = %room.code(), error = %e, "alarm task failed"),
                }
                Presence::Retained
            }
        };

        if presence == Presence::Teardown {
            break;
        }
    }

    commands.close();
    alarms.abort_all();

    {
        let mut rooms = lock(&rooms);
        if rooms
            .entries
            .get(room.code())
            .is_some_and(|entry| entry.generation == generation)
        {
            rooms.entries.remove(room.code());
        }
    }

    tracing::info!(room = %room.code(), "room destroyed");
}

fn handle_command(
    room: &mut Room,
    tunnels: &mut HashMap<Id, ChannelTunnel>,
    alarms: &mut JoinSet<AlarmMessage>,
    command: Command,
) -> Presence {
    match command {
        Command::Join {
            request,
            tunnel,
            reply,
        } => {
            let id = match request.role {
                ValueKind::Presenter => Id::new(),
                ValueKind::Respondent => room.claim(request.claim),
            };

            let previous = tunnels.insert(id, tunnel);
            let result = match request.role {
                ValueKind::Presenter => room
                    .add_presenter(id, finder(tunnels))
                    .map_err(room::Error::from),
                ValueKind::Respondent => room
                    .add_respondent(id, request.name.as_deref(), finder(tunnels))
                    .map(|_| ()),
            };

            match result {
                Ok(()) => {
                    if let Some(previous) = previous {
                        tracing::debug!(room = %room.code(), %id, "connection replaced by a reconnect");
                        previous.close();
                    }
                    if reply.send(Ok(id)).is_err() {
                        tunnels.remove(&id);
                        return room.disconnect(id, finder(tunnels));
                    }
                    Presence::Retained
                }
                Err(e) => {
                    match previous {
                        Some(previous) => tunnels.insert(id, previous),
                        None => tunnels.remove(&id),
                    };
                    reply.send(Err(e)).ok();
                    if room.presenter().is_none() {
                        Presence::Teardown
                    } else {
                        Presence::Retained
                    }
                }
            }
        }
        Command::Message {
            from,
            serial,
            message,
        } => {
            if tunnels.get(&from).is_some_and(|t| t.serial == serial) {
                room.receive_message(from, message, scheduler(alarms), finder(tunnels))
            } else {
                Presence::Retained
            }
        }
        Command::Disconnect { id, serial } => {
            if tunnels.get(&id).is_some_and(|t| t.serial == serial) {
                tunnels.remove(&id);
                room.disconnect(id, finder(tunnels))
            } else {
                Presence::Retained
            }
        }
    }
}

/// One client's link to a room
///
/// Dropping the connection tells the room the client is gone.
#[derive(Debug)]
pub struct Connection {
    id: Id,
    serial: u64,
    code: RoomCode,
    inbox: mpsc::UnboundedSender<Command>,
    receiver: mpsc::UnboundedReceiver<Frame>,
    closed: bool,
}

impl Connection {
    /// The identity the room assigned
    pub fn id(&self) -> Id {
        self.id
    }

    /// The joined room
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Forwards a client message to the room
    ///
    /// Returns `false` if the room is gone.
    pub fn send(&self, message: IncomingMessage) -> bool {
        self.inbox
            .send(Command::Message {
                from: self.id,
                serial: self.serial,
                message,
            })
            .is_ok()
    }

    /// Waits for the next message from the room
    ///
    /// Returns `None` once the room closed this connection.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        if self.closed {
            return None;
        }
        match self.receiver.recv().await {
            Some(Frame::Outgoing(message)) => Some(message),
            Some(Frame::Close) | None => {
                self.closed = true;
                None
            }
        }
    }

    /// Returns the next queued message without waiting
    pub fn try_recv(&mut self) -> Option<Outgoing> {
        if self.closed {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(Frame::Outgoing(message)) => Some(message),
            Ok(Frame::Close) | Err(mpsc::error::TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
            Err(mpsc::error::TryRecvError::Empty) => None,
        }
    }

    /// Whether the room closed this connection
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Leaves the room
    pub fn close(self) {}
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inbox
            .send(Command::Disconnect {
                id: self.id,
                serial: self.serial,
            })
            .ok();
    }
}
