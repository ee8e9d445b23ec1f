//! Error types for the chat server
//!
//! Defines application-level errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use std::net::SocketAddr;

use thiserror::Error;

/// Application-level errors
///
/// Every variant is fatal for the connection that hit it. Protocol misuse
/// (unknown commands, chatting outside a room) is not an error: the session
/// answers it with an ordinary reply line.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error on a client socket (fatal for that connection)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The listener could not be bound (fatal for the process)
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The directory actor has stopped and no longer answers requests
    #[error("directory closed")]
    DirectoryClosed,

    /// The session's own output channel is gone (writer task ended)
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Message send errors
///
/// Occurs when a message cannot be placed on a session's output channel.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The channel is at capacity; the recipient is not keeping up
    #[error("Channel full")]
    Full,
}
