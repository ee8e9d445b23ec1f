//! Directory actor implementation
//!
//! The single owner of all cross-session state: the online set, the rooms and
//! the session → room mapping. Handlers talk to it through [`Directory`], a
//! cloneable handle that turns every call into one [`DirectoryCommand`] with a
//! oneshot reply. The actor processes commands one at a time, so every
//! operation is atomic and all of them observe a single total order.
//!
//! Broadcast delivery deliberately happens in the caller: the actor only
//! answers with a snapshot of the recipients, and the handle pushes the
//! message into each recipient's channel after the actor has moved on.

use std::collections::HashMap;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::{AppError, SendError};
use crate::message::ServerMessage;
use crate::room::Room;
use crate::types::{RoomName, SessionId};

/// Commands sent from handles to the directory actor
#[derive(Debug)]
pub enum DirectoryCommand {
    /// New session connected
    RegisterOnline {
        client: Client,
        reply: oneshot::Sender<()>,
    },
    /// Session finished its handshake
    Identify {
        session_id: SessionId,
        username: String,
        reply: oneshot::Sender<()>,
    },
    /// Session disconnected; `reply` is None when sent from a drop guard
    RemoveOnline {
        session_id: SessionId,
        reply: Option<oneshot::Sender<()>>,
    },
    /// Add a session to a room, creating the room if needed
    Join {
        room: RoomName,
        session_id: SessionId,
        reply: oneshot::Sender<()>,
    },
    /// Remove a session from a room, deleting the room if it empties
    Leave {
        room: RoomName,
        session_id: SessionId,
        reply: oneshot::Sender<()>,
    },
    /// Snapshot the recipients of a broadcast
    Recipients {
        room: RoomName,
        exclude: SessionId,
        reply: oneshot::Sender<Vec<Client>>,
    },
    /// Snapshot the online set
    ListOnline { reply: oneshot::Sender<Vec<Client>> },
    /// Snapshot one room's member IDs
    Members {
        room: RoomName,
        reply: oneshot::Sender<Vec<SessionId>>,
    },
}

/// Outcome of a single broadcast
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose channel accepted the message
    pub delivered: usize,
    /// Recipients that were skipped, with the reason
    pub failed: Vec<(SessionId, SendError)>,
}

/// Online set entry; `seq` preserves connection order for listings
#[derive(Debug)]
struct OnlineEntry {
    seq: u64,
    client: Client,
}

/// The directory actor
///
/// Uses HashMap for O(1) lookups on sessions, rooms, and session-room mappings.
pub struct DirectoryActor {
    /// All connected sessions: SessionId -> entry
    online: HashMap<SessionId, OnlineEntry>,
    /// All non-empty rooms: RoomName -> Room
    rooms: HashMap<RoomName, Room>,
    /// Session to room mapping for fast lookup: SessionId -> RoomName
    memberships: HashMap<SessionId, RoomName>,
    /// Next connection sequence number
    next_seq: u64,
    /// Command receiver channel
    receiver: mpsc::Receiver<DirectoryCommand>,
}

impl DirectoryActor {
    /// Create a new actor with the given command receiver
    pub fn new(receiver: mpsc::Receiver<DirectoryCommand>) -> Self {
        Self {
            online: HashMap::new(),
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            next_seq: 0,
            receiver,
        }
    }

    /// Run the actor loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        info!("Directory started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Directory shutting down");
    }

    /// Process a single command
    ///
    /// Never awaits: nothing a recipient does can stall the actor.
    fn handle_command(&mut self, cmd: DirectoryCommand) {
        match cmd {
            DirectoryCommand::RegisterOnline { client, reply } => {
                self.handle_register(client);
                let _ = reply.send(());
            }
            DirectoryCommand::Identify {
                session_id,
                username,
                reply,
            } => {
                self.handle_identify(session_id, username);
                let _ = reply.send(());
            }
            DirectoryCommand::RemoveOnline { session_id, reply } => {
                self.handle_remove_online(session_id);
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            DirectoryCommand::Join {
                room,
                session_id,
                reply,
            } => {
                self.handle_join(room, session_id);
                let _ = reply.send(());
            }
            DirectoryCommand::Leave {
                room,
                session_id,
                reply,
            } => {
                self.handle_leave(&room, session_id);
                let _ = reply.send(());
            }
            DirectoryCommand::Recipients {
                room,
                exclude,
                reply,
            } => {
                let _ = reply.send(self.recipients(&room, exclude));
            }
            DirectoryCommand::ListOnline { reply } => {
                let _ = reply.send(self.online_snapshot());
            }
            DirectoryCommand::Members { room, reply } => {
                let members = self
                    .rooms
                    .get(&room)
                    .map(Room::member_ids)
                    .unwrap_or_default();
                let _ = reply.send(members);
            }
        }
    }

    fn handle_register(&mut self, client: Client) {
        let session_id = client.id;
        if self.online.contains_key(&session_id) {
            warn!(%session_id, "Session registered twice; keeping first entry");
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.online.insert(session_id, OnlineEntry { seq, client });

        debug!(
            "Total sessions: {}, Total rooms: {}",
            self.online.len(),
            self.rooms.len()
        );
    }

    fn handle_identify(&mut self, session_id: SessionId, username: String) {
        let Some(entry) = self.online.get_mut(&session_id) else {
            return;
        };

        if entry.client.has_username() {
            debug!(%session_id, "Username already set; ignoring");
            return;
        }

        info!(%session_id, username = %username, "Session identified");
        entry.client.set_username(username);
    }

    fn handle_remove_online(&mut self, session_id: SessionId) {
        // Membership goes first so no room ever names an offline session
        if let Some(room) = self.memberships.get(&session_id).cloned() {
            self.handle_leave(&room, session_id);
        }

        if self.online.remove(&session_id).is_some() {
            info!(%session_id, "Session went offline");
        }

        debug!(
            "Total sessions: {}, Total rooms: {}",
            self.online.len(),
            self.rooms.len()
        );
    }

    fn handle_join(&mut self, room_name: RoomName, session_id: SessionId) {
        if !self.online.contains_key(&session_id) {
            debug!(%session_id, room = %room_name, "Join from offline session ignored");
            return;
        }

        // At most one room per session
        if let Some(current) = self.memberships.get(&session_id).cloned() {
            if current == room_name {
                return;
            }
            self.handle_leave(&current, session_id);
        }

        let room = self.rooms.entry(room_name.clone()).or_insert_with(|| {
            debug!(room = %room_name, "Room created");
            Room::new(room_name.clone())
        });
        room.add_member(session_id);
        self.memberships.insert(session_id, room_name.clone());

        info!(%session_id, room = %room_name, members = room.member_count(), "Session joined room");
    }

    fn handle_leave(&mut self, room_name: &RoomName, session_id: SessionId) {
        let Some(room) = self.rooms.get_mut(room_name) else {
            return;
        };

        if !room.contains(session_id) {
            return;
        }

        let should_delete = room.remove_member(session_id);
        self.memberships.remove(&session_id);
        info!(%session_id, room = %room_name, "Session left room");

        if should_delete {
            self.rooms.remove(room_name);
            debug!(room = %room_name, "Room deleted (empty)");
        }
    }

    fn recipients(&self, room_name: &RoomName, exclude: SessionId) -> Vec<Client> {
        let Some(room) = self.rooms.get(room_name) else {
            return Vec::new();
        };

        room.members_except(exclude)
            .filter_map(|id| self.online.get(&id))
            .map(|entry| entry.client.clone())
            .collect()
    }

    fn online_snapshot(&self) -> Vec<Client> {
        let mut entries: Vec<&OnlineEntry> = self.online.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.client.clone()).collect()
    }
}

/// Handle to the directory actor
///
/// Cheap to clone; every clone talks to the same actor. The actor stops once
/// the last handle is dropped.
#[derive(Debug, Clone)]
pub struct Directory {
    sender: mpsc::Sender<DirectoryCommand>,
}

impl Directory {
    /// Spawn a directory actor on the current runtime and return its handle
    pub fn spawn(buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer);
        tokio::spawn(DirectoryActor::new(receiver).run());
        Self { sender }
    }

    /// Wrap an existing command channel (the caller runs the actor)
    pub fn from_sender(sender: mpsc::Sender<DirectoryCommand>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> DirectoryCommand,
    ) -> Result<T, AppError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(make(reply))
            .await
            .map_err(|_| AppError::DirectoryClosed)?;
        response.await.map_err(|_| AppError::DirectoryClosed)
    }

    /// Add a session to the online set
    pub async fn register_online(&self, client: Client) -> Result<(), AppError> {
        self.request(|reply| DirectoryCommand::RegisterOnline { client, reply })
            .await
    }

    /// Record the username chosen during handshake; set once, later calls are ignored
    pub async fn identify(&self, session_id: SessionId, username: String) -> Result<(), AppError> {
        self.request(|reply| DirectoryCommand::Identify {
            session_id,
            username,
            reply,
        })
        .await
    }

    /// Remove a session from the online set and from whatever room it is in
    ///
    /// Idempotent.
    pub async fn remove_online(&self, session_id: SessionId) -> Result<(), AppError> {
        self.request(|reply| DirectoryCommand::RemoveOnline {
            session_id,
            reply: Some(reply),
        })
        .await
    }

    /// Fire-and-forget removal for drop paths that cannot await
    pub fn evict(&self, session_id: SessionId) {
        let cmd = DirectoryCommand::RemoveOnline {
            session_id,
            reply: None,
        };

        match self.sender.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(cmd)) => {
                let sender = self.sender.clone();
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            let _ = sender.send(cmd).await;
                        });
                    }
                    Err(_) => warn!(%session_id, "No runtime to evict session"),
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%session_id, "Directory closed before eviction");
            }
        }
    }

    pub async fn join(&self, room: &RoomName, session_id: SessionId) -> Result<(), AppError> {
        self.request(|reply| DirectoryCommand::Join {
            room: room.clone(),
            session_id,
            reply,
        })
        .await
    }

    pub async fn leave(&self, room: &RoomName, session_id: SessionId) -> Result<(), AppError> {
        self.request(|reply| DirectoryCommand::Leave {
            room: room.clone(),
            session_id,
            reply,
        })
        .await
    }

    /// Deliver `message` to every member of `room` except `exclude`
    ///
    /// Recipients are snapshotted by the actor; delivery happens here, after
    /// the actor has been released. Each recipient is tried once without
    /// waiting, and a failure only affects that recipient.
    pub async fn broadcast(
        &self,
        room: &RoomName,
        message: ServerMessage,
        exclude: SessionId,
    ) -> Result<BroadcastReport, AppError> {
        let recipients = self
            .request(|reply| DirectoryCommand::Recipients {
                room: room.clone(),
                exclude,
                reply,
            })
            .await?;

        let mut report = BroadcastReport::default();
        for client in recipients {
            match client.try_deliver(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(session_id = %client.id, room = %room, error = %e, "Skipped broadcast recipient");
                    report.failed.push((client.id, e));
                }
            }
        }

        debug!(
            room = %room,
            delivered = report.delivered,
            failed = report.failed.len(),
            "Broadcast finished"
        );
        Ok(report)
    }

    /// Point-in-time copy of the online set, in connection order
    pub async fn list_online(&self) -> Result<Vec<Client>, AppError> {
        self.request(|reply| DirectoryCommand::ListOnline { reply })
            .await
    }

    /// Point-in-time copy of one room's members (empty if the room does not exist)
    pub async fn members(&self, room: &RoomName) -> Result<Vec<SessionId>, AppError> {
        self.request(|reply| DirectoryCommand::Members {
            room: room.clone(),
            reply,
        })
        .await
    }
}
