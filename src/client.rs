//! Client struct definition
//!
//! The directory's record of a connected session: identity, username and the
//! channel that feeds the session's socket writer.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::SessionId;

/// Connected client information
///
/// Cloning shares the same output channel, which is how the directory hands
/// recipients to a broadcast without holding its own state locked.
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique identifier for this session
    pub id: SessionId,
    /// Username (None before handshake)
    pub username: Option<String>,
    /// Server → Client message channel
    pub sender: mpsc::Sender<ServerMessage>,
}

impl Client {
    /// Create a new client with the given ID and sender channel
    pub fn new(id: SessionId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            username: None,
            sender,
        }
    }

    /// Queue a message without waiting
    ///
    /// A full channel is reported as `SendError::Full` instead of blocking,
    /// so one slow reader cannot hold up a broadcast.
    pub fn try_deliver(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Get the display name for this client
    ///
    /// Sessions still handshaking have no username and are shown by ID.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(name) => name.clone(),
            None => format!("anonymous ({})", self.id),
        }
    }

    /// Check if this client has set their username
    pub fn has_username(&self) -> bool {
        self.username.is_some()
    }

    /// Set the client's username
    pub fn set_username(&mut self, username: String) {
        self.username = Some(username);
    }
}
