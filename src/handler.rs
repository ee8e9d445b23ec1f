//! TCP connection handler
//!
//! Wires a registered [`Session`] to its socket: a writer task drains the
//! session's output channel onto the stream, while this task reads lines and
//! feeds them to the state machine. Every exit path ends in `Session::close`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::AppError;
use crate::message::ServerMessage;
use crate::session::Session;

/// Handle one accepted connection until it ends
///
/// The session must already be registered online. Returns the error that
/// ended the connection, after cleanup has run.
pub async fn handle_connection(
    stream: TcpStream,
    mut session: Session,
    outbound: mpsc::Receiver<ServerMessage>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let session_id = session.id();

    info!(%session_id, peer = %peer_addr, "Client connected");

    let (reader, writer) = stream.into_split();

    // Spawn write task (ServerMessage -> socket)
    let write_task = tokio::spawn(write_lines(writer, outbound));

    let result = read_lines(&mut session, BufReader::new(reader)).await;

    session.close().await;

    // The writer ends once every sender is gone: ours went with the session,
    // the directory's went with remove_online
    if write_task.await.is_err() {
        debug!(%session_id, "Write task panicked");
    }

    match &result {
        Ok(()) => info!(%session_id, "Client disconnected"),
        Err(e) => info!(%session_id, error = %e, "Client disconnected with error"),
    }

    result
}

/// Feed received lines to the session until end-of-stream
///
/// Also stops when the writer gives up, so a dead socket on the write side
/// does not leave the session waiting on reads forever.
pub async fn read_lines<R>(session: &mut Session, mut reader: R) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
{
    session.greet().await?;

    let mut buf = Vec::new();
    loop {
        buf.clear();
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => {
                if read? == 0 {
                    debug!(session_id = %session.id(), "End of stream");
                    return Ok(());
                }
                for line in split_lines(&buf) {
                    session.handle_line(&line).await?;
                }
            }
            _ = session.outbound_closed() => {
                debug!(session_id = %session.id(), "Writer closed");
                return Ok(());
            }
        }
    }
}

/// Split one `\n`-terminated chunk into lines
///
/// `\n`, `\r\n` and a bare `\r` each end a line. Bytes that are not valid
/// UTF-8 become U+FFFD instead of failing the connection.
fn split_lines(chunk: &[u8]) -> Vec<String> {
    let chunk = chunk.strip_suffix(b"\n").unwrap_or(chunk);
    let chunk = chunk.strip_suffix(b"\r").unwrap_or(chunk);
    chunk
        .split(|b| *b == b'\r')
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}

/// Write each queued message as a newline-terminated line
pub async fn write_lines<W>(mut writer: W, mut outbound: mpsc::Receiver<ServerMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        let mut text = msg.to_string();
        text.push('\n');
        if let Err(e) = writer.write_all(text.as_bytes()).await {
            debug!(error = %e, "Socket write failed, ending write task");
            return;
        }
        if let Err(e) = writer.flush().await {
            debug!(error = %e, "Socket flush failed, ending write task");
            return;
        }
    }

    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::io::{duplex, AsyncRead, AsyncReadExt, ReadBuf};
    use tokio::time::timeout;

    use super::*;
    use crate::directory::Directory;
    use crate::error::SendError;
    use crate::types::RoomName;

    /// Reader whose every read fails, standing in for a reset connection
    struct ResetReader;

    impl AsyncRead for ResetReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset",
            )))
        }
    }

    fn room(name: &str) -> RoomName {
        RoomName::parse(name).unwrap()
    }

    #[test]
    fn test_split_lines_terminators() {
        assert_eq!(split_lines(b"alice\n"), vec!["alice"]);
        assert_eq!(split_lines(b"alice\r\n"), vec!["alice"]);
        assert_eq!(split_lines(b"alice\r/join g\n"), vec!["alice", "/join g"]);
        assert_eq!(split_lines(b"\n"), vec![""]);
        assert_eq!(split_lines(b"a\r\r\n"), vec!["a", ""]);
        // Unterminated tail at end of stream
        assert_eq!(split_lines(b"tail"), vec!["tail"]);
    }

    #[test]
    fn test_split_lines_invalid_utf8_replaced() {
        assert_eq!(split_lines(b"caf\xe9\n"), vec!["caf\u{FFFD}"]);
    }

    #[tokio::test]
    async fn test_bare_carriage_return_ends_line() {
        let directory = Directory::spawn(16);
        let (mut session, mut rx) = Session::register(directory.clone(), 16).await.unwrap();
        let input: &[u8] = b"alice\r/join g\n";

        read_lines(&mut session, input).await.unwrap();

        assert_eq!(rx.recv().await, Some(ServerMessage::UsernamePrompt));
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::Welcome {
                username: "alice".to_string()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::RoomJoined {
                room: "g".to_string()
            })
        );
        session.close().await;
    }

    #[tokio::test]
    async fn test_invalid_utf8_keeps_session_alive() {
        let directory = Directory::spawn(16);
        let (mut bob, mut bob_rx) = Session::register(directory.clone(), 16).await.unwrap();
        bob.handle_line("bob").await.unwrap();
        bob.handle_line("/join g").await.unwrap();
        bob_rx.recv().await.unwrap();
        bob_rx.recv().await.unwrap();

        let (mut alice, _alice_rx) = Session::register(directory.clone(), 16).await.unwrap();
        let input: &[u8] = b"alice\n/join g\ncaf\xe9\nstill here\n";

        read_lines(&mut alice, input).await.unwrap();

        assert_eq!(
            bob_rx.recv().await,
            Some(ServerMessage::Chat {
                from: "alice".to_string(),
                content: "caf\u{FFFD}".to_string()
            })
        );
        assert_eq!(
            bob_rx.recv().await,
            Some(ServerMessage::Chat {
                from: "alice".to_string(),
                content: "still here".to_string()
            })
        );
        assert_eq!(directory.members(&room("g")).await.unwrap().len(), 2);

        alice.close().await;
        bob.close().await;
    }

    #[tokio::test]
    async fn test_read_error_ends_loop_and_close_cleans_up() {
        let directory = Directory::spawn(16);
        let (mut session, _rx) = Session::register(directory.clone(), 16).await.unwrap();
        let input = BufReader::new((&b"alice\n/join r\n"[..]).chain(ResetReader));

        let result = read_lines(&mut session, input).await;

        match result {
            Err(AppError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected reset error, got {other:?}"),
        }
        assert_eq!(directory.members(&room("r")).await.unwrap(), vec![session.id()]);

        session.close().await;

        assert!(directory.members(&room("r")).await.unwrap().is_empty());
        assert!(directory.list_online().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_writer_gone_ends_loop_while_input_open() {
        let directory = Directory::spawn(16);
        let (mut session, mut rx) = Session::register(directory.clone(), 16).await.unwrap();
        // Client half stays open and silent for the whole test
        let (_client, server_io) = duplex(64);

        let reading = read_lines(&mut session, BufReader::new(server_io));
        let writer_stops = async move {
            assert_eq!(rx.recv().await, Some(ServerMessage::UsernamePrompt));
            drop(rx);
        };
        let (result, ()) = timeout(Duration::from_secs(3), async {
            tokio::join!(reading, writer_stops)
        })
        .await
        .expect("read loop kept waiting after the writer closed");

        assert!(result.is_ok());
        session.close().await;
        assert!(directory.list_online().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_greet_fails_when_writer_already_gone() {
        let directory = Directory::spawn(16);
        let (mut session, rx) = Session::register(directory.clone(), 16).await.unwrap();
        drop(rx);
        let input: &[u8] = b"alice\n";

        let result = read_lines(&mut session, input).await;

        assert!(matches!(
            result,
            Err(AppError::Send(SendError::ChannelClosed))
        ));
        session.close().await;
        assert!(directory.list_online().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_lines_strips_terminators_and_stops_at_eof() {
        let directory = Directory::spawn(16);
        let (mut session, mut rx) = Session::register(directory.clone(), 16).await.unwrap();
        let input: &[u8] = b"alice\r\n/join general\n";

        read_lines(&mut session, input).await.unwrap();

        assert_eq!(rx.recv().await, Some(ServerMessage::UsernamePrompt));
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::Welcome {
                username: "alice".to_string()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::RoomJoined {
                room: "general".to_string()
            })
        );
        let general = RoomName::parse("general").unwrap();
        assert_eq!(directory.members(&general).await.unwrap(), vec![session.id()]);

        session.close().await;
        assert!(directory.members(&general).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_lines_renders_and_shuts_down() {
        let (client, server) = duplex(1024);
        let (tx, rx) = mpsc::channel(4);
        tx.send(ServerMessage::UsernamePrompt).await.unwrap();
        tx.send(ServerMessage::OnlineUsers {
            users: vec!["alice".to_string()],
        })
        .await
        .unwrap();
        drop(tx);

        write_lines(server, rx).await;

        let mut received = String::new();
        let mut client = client;
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "Enter your username:\nOnline users:\nalice\n");
    }
}
