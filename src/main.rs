//! Multi-room TCP Chat Server - Entry Point
//!
//! Parses configuration, binds the listener and runs the accept loop until Ctrl-C.

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use room_chat_server::{ChatServer, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=room_chat_server=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("room_chat_server=info")),
        )
        .init();

    let config = Config::parse();

    let server = match ChatServer::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    info!("Chat server listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl-C handler: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    Ok(())
}
