//! Line protocol definitions
//!
//! Newline-delimited text in both directions. `ClientCommand` classifies a
//! received line; `ServerMessage` renders the lines the server writes back.

use std::fmt;

/// Prefix that introduces a room switch
const JOIN_PREFIX: &str = "/join ";

/// Prefix that requests the online listing
const ONLINE_PREFIX: &str = "/online";

/// Client → Server line, classified
///
/// Matching is by prefix, so `/onlinefoo` still lists users and `/join`
/// without a trailing space is ordinary text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Switch to the named room (name may be empty; the session rejects it)
    Join { room: String },
    /// List connected users
    Online,
    /// Anything else, including unknown `/commands`
    Text(String),
}

impl ClientCommand {
    /// Classify one line (without its line terminator)
    pub fn parse(line: &str) -> Self {
        if let Some(room) = line.strip_prefix(JOIN_PREFIX) {
            ClientCommand::Join {
                room: room.to_string(),
            }
        } else if line.starts_with(ONLINE_PREFIX) {
            ClientCommand::Online
        } else {
            ClientCommand::Text(line.to_string())
        }
    }
}

/// Server → Client message
///
/// `Display` renders the exact wire text without the trailing newline; the
/// connection writer appends it. `OnlineUsers` spans several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Handshake prompt
    UsernamePrompt,
    /// Handshake accepted
    Welcome { username: String },
    /// Room switch confirmed
    RoomJoined { room: String },
    /// Snapshot of connected users
    OnlineUsers { users: Vec<String> },
    /// Chat line relayed from another room member
    Chat { from: String, content: String },
    /// Text sent before joining any room
    NotInRoom,
    /// `/join ` with nothing after it
    JoinUsage,
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::UsernamePrompt => write!(f, "Enter your username:"),
            ServerMessage::Welcome { username } => write!(
                f,
                "Welcome {}! You can join or create a room by typing: /join roomName",
                username
            ),
            ServerMessage::RoomJoined { room } => write!(f, "Joined room: {}", room),
            ServerMessage::OnlineUsers { users } => {
                write!(f, "Online users:")?;
                for user in users {
                    write!(f, "\n{}", user)?;
                }
                Ok(())
            }
            ServerMessage::Chat { from, content } => write!(f, "{}: {}", from, content),
            ServerMessage::NotInRoom => {
                write!(f, "You need to join a room first. Use: /join roomName")
            }
            ServerMessage::JoinUsage => write!(f, "Usage: /join roomName"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join() {
        assert_eq!(
            ClientCommand::parse("/join general"),
            ClientCommand::Join {
                room: "general".to_string()
            }
        );
        // Everything after the first space is the name, spaces included
        assert_eq!(
            ClientCommand::parse("/join  two words"),
            ClientCommand::Join {
                room: " two words".to_string()
            }
        );
    }

    #[test]
    fn test_parse_join_without_space_is_text() {
        assert_eq!(
            ClientCommand::parse("/join"),
            ClientCommand::Text("/join".to_string())
        );
    }

    #[test]
    fn test_parse_online_prefix() {
        assert_eq!(ClientCommand::parse("/online"), ClientCommand::Online);
        assert_eq!(ClientCommand::parse("/online please"), ClientCommand::Online);
    }

    #[test]
    fn test_parse_unknown_slash_command_is_text() {
        assert_eq!(
            ClientCommand::parse("/leave"),
            ClientCommand::Text("/leave".to_string())
        );
    }

    #[test]
    fn test_render_lines() {
        assert_eq!(ServerMessage::UsernamePrompt.to_string(), "Enter your username:");
        assert_eq!(
            ServerMessage::Welcome {
                username: "alice".to_string()
            }
            .to_string(),
            "Welcome alice! You can join or create a room by typing: /join roomName"
        );
        assert_eq!(
            ServerMessage::RoomJoined {
                room: "general".to_string()
            }
            .to_string(),
            "Joined room: general"
        );
        assert_eq!(
            ServerMessage::Chat {
                from: "alice".to_string(),
                content: "hi".to_string()
            }
            .to_string(),
            "alice: hi"
        );
    }

    #[test]
    fn test_render_online_users() {
        let msg = ServerMessage::OnlineUsers {
            users: vec!["alice".to_string(), "bob".to_string()],
        };
        assert_eq!(msg.to_string(), "Online users:\nalice\nbob");

        let empty = ServerMessage::OnlineUsers { users: Vec::new() };
        assert_eq!(empty.to_string(), "Online users:");
    }
}
