//! ChatServer acceptor
//!
//! Owns the TCP listener and the directory handle. Every accepted connection
//! becomes a registered [`Session`] with its own task.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::directory::Directory;
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::session::Session;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The accept loop
pub struct ChatServer {
    listener: TcpListener,
    directory: Directory,
    outbound_buffer: usize,
}

impl ChatServer {
    /// Bind the configured address and start a fresh directory
    pub async fn bind(config: &Config) -> Result<Self, AppError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| AppError::Bind {
                addr: config.listen,
                source,
            })?;
        let directory = Directory::spawn(config.directory_buffer);

        Ok(Self::new(listener, directory, config.outbound_buffer))
    }

    pub fn new(listener: TcpListener, directory: Directory, outbound_buffer: usize) -> Self {
        Self {
            listener,
            directory,
            outbound_buffer,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the shared directory, for inspection
    pub fn directory(&self) -> Directory {
        self.directory.clone()
    }

    /// Accept connections forever
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Sessions already running keep going; only the accept loop stops.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Accept loop shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            info!("New connection from {}", addr);
                            self.accept_connection(stream).await;
                        }
                        Err(e) => accept_failed(e).await,
                    }
                }
            }
        }
    }

    /// Register the session, then hand it to its own task
    async fn accept_connection(&self, stream: TcpStream) {
        let (session, outbound) =
            match Session::register(self.directory.clone(), self.outbound_buffer).await {
                Ok(registered) => registered,
                Err(e) => {
                    error!("Failed to register session: {}", e);
                    return;
                }
            };

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, session, outbound).await {
                warn!("Connection handler error: {}", e);
            }
        });
    }
}

/// Log a failed accept and wait before the next attempt
async fn accept_failed(e: std::io::Error) {
    warn!("Failed to accept connection: {}", e);
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}
