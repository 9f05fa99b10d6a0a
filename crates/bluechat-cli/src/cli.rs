//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Wait for one peer to connect, then chat
    Listen,
    /// Connect to a peer and chat
    Connect {
        /// Peer address (host:port)
        address: String,
    },
    /// Run one discovery cycle and list known peers
    Peers,
}
