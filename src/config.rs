//! Command line configuration

use std::net::SocketAddr;

use clap::Parser;

/// Multi-room TCP chat server
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Socket address to listen on. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:12345")]
    pub listen: SocketAddr,

    /// Messages buffered per client before broadcasts to it are dropped.
    #[arg(long, default_value_t = 32)]
    pub outbound_buffer: usize,

    /// Pending directory requests before callers wait.
    #[arg(long, default_value_t = 256)]
    pub directory_buffer: usize,
}
