//! Per-connection protocol state machine
//!
//! A `Session` interprets one received line at a time and calls into the
//! shared [`Directory`]. It knows nothing about sockets: replies go to its
//! output channel, which the connection handler drains onto the wire.

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client::Client;
use crate::directory::Directory;
use crate::error::{AppError, SendError};
use crate::message::{ClientCommand, ServerMessage};
use crate::types::{RoomName, SessionId};

/// Protocol states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the username line
    Handshaking,
    /// Named, not in any room
    Idle,
    /// Named and a member of exactly this room
    InRoom(RoomName),
    /// Cleanup done; further input is ignored
    Closed,
}

/// Server-side state for one client connection
///
/// Registered in the directory's online set from construction until
/// [`Session::close`]. Dropping a session that was never closed (task
/// cancelled, panic) evicts it from the directory instead.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    username: Option<String>,
    state: SessionState,
    outbound: mpsc::Sender<ServerMessage>,
    directory: Directory,
}

impl Session {
    /// Create a session and add it to the online set
    ///
    /// Returns the receiving end of the session's output channel, to be
    /// drained by the connection writer.
    pub async fn register(
        directory: Directory,
        outbound_buffer: usize,
    ) -> Result<(Self, mpsc::Receiver<ServerMessage>), AppError> {
        let (outbound, receiver) = mpsc::channel(outbound_buffer);
        let session = Self {
            id: SessionId::new(),
            username: None,
            state: SessionState::Handshaking,
            outbound,
            directory,
        };

        session
            .directory
            .register_online(Client::new(session.id, session.outbound.clone()))
            .await?;
        debug!(session_id = %session.id, "Session registered");

        Ok((session, receiver))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Resolves once the connection writer has stopped reading replies
    pub async fn outbound_closed(&self) {
        self.outbound.closed().await
    }

    /// Send the handshake prompt
    pub async fn greet(&self) -> Result<(), AppError> {
        self.reply(ServerMessage::UsernamePrompt).await
    }

    /// Drive the state machine with one line (terminator already stripped)
    pub async fn handle_line(&mut self, line: &str) -> Result<(), AppError> {
        match self.state {
            SessionState::Handshaking => self.handle_username(line).await,
            SessionState::Closed => Ok(()),
            SessionState::Idle | SessionState::InRoom(_) => match ClientCommand::parse(line) {
                ClientCommand::Join { room } => self.handle_join(room).await,
                ClientCommand::Online => self.handle_online().await,
                ClientCommand::Text(text) => self.handle_text(text).await,
            },
        }
    }

    /// Leave the current room, go offline and mark the session closed
    ///
    /// Directory failures are logged and otherwise ignored: there is nobody
    /// left to report them to.
    pub async fn close(mut self) {
        if let SessionState::InRoom(room) = &self.state {
            if let Err(e) = self.directory.leave(room, self.id).await {
                debug!(session_id = %self.id, error = %e, "Leave during close failed");
            }
        }

        if let Err(e) = self.directory.remove_online(self.id).await {
            debug!(session_id = %self.id, error = %e, "Remove during close failed");
        }

        self.state = SessionState::Closed;
        info!(session_id = %self.id, username = ?self.username, "Session closed");
    }

    async fn reply(&self, msg: ServerMessage) -> Result<(), AppError> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| AppError::Send(SendError::ChannelClosed))
    }

    async fn handle_username(&mut self, line: &str) -> Result<(), AppError> {
        let username = line.to_string();
        self.directory.identify(self.id, username.clone()).await?;

        info!(session_id = %self.id, username = %username, "Handshake complete");
        self.username = Some(username.clone());
        self.state = SessionState::Idle;

        self.reply(ServerMessage::Welcome { username }).await
    }

    async fn handle_join(&mut self, room: String) -> Result<(), AppError> {
        let Some(room) = RoomName::parse(room) else {
            return self.reply(ServerMessage::JoinUsage).await;
        };

        if let SessionState::InRoom(current) = &self.state {
            self.directory.leave(current, self.id).await?;
            self.state = SessionState::Idle;
        }

        self.directory.join(&room, self.id).await?;
        self.state = SessionState::InRoom(room.clone());

        self.reply(ServerMessage::RoomJoined {
            room: room.to_string(),
        })
        .await
    }

    async fn handle_online(&self) -> Result<(), AppError> {
        let users: Vec<String> = self
            .directory
            .list_online()
            .await?
            .iter()
            .map(Client::display_name)
            .collect();

        self.reply(ServerMessage::OnlineUsers { users }).await
    }

    /// Unknown `/commands` land here too and are relayed as chat.
    async fn handle_text(&self, text: String) -> Result<(), AppError> {
        let SessionState::InRoom(room) = &self.state else {
            return self.reply(ServerMessage::NotInRoom).await;
        };

        let message = ServerMessage::Chat {
            from: self.username.clone().unwrap_or_default(),
            content: text,
        };
        self.directory.broadcast(room, message, self.id).await?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            debug!(session_id = %self.id, "Session dropped without close; evicting");
            self.directory.evict(self.id);
        }
    }
}
