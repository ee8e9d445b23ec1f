//! Multi-room TCP Chat Server Library
//!
//! A line-oriented chat server: clients pick a username, join a named room
//! and exchange messages with the other members of that room.
//!
//! # Features
//! - Username handshake
//! - Rooms created on first join, removed when the last member leaves
//! - `/join <room>` to switch rooms, `/online` to list connected users
//! - Best-effort broadcast that skips recipients who cannot keep up
//! - Cleanup on every disconnect path
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `DirectoryActor` owns every room and the online set
//! - `Directory` is the cloneable handle each session uses to reach it
//! - Each connection runs a `Session` state machine in its own task
//!
//! # Example
//! ```ignore
//! use room_chat_server::{ChatServer, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config { listen: "127.0.0.1:12345".parse()?, outbound_buffer: 32, directory_buffer: 256 };
//!     let server = ChatServer::bind(&config).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod handler;
pub mod message;
pub mod room;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::Client;
pub use config::Config;
pub use directory::{BroadcastReport, Directory, DirectoryActor, DirectoryCommand};
pub use error::{AppError, SendError};
pub use handler::handle_connection;
pub use message::{ClientCommand, ServerMessage};
pub use room::Room;
pub use server::ChatServer;
pub use session::{Session, SessionState};
pub use types::{RoomName, SessionId};
