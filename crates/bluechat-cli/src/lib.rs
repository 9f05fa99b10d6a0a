//! BlueChat CLI library
//!
//! Components of the `bluechat` command-line client: argument parsing,
//! configuration, the TCP development transport and the chat loop.

pub mod app;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod transport;

pub use app::ChatApp;
pub use cli::{Cli, Commands};
pub use config::{CliAppConfig, PeerEntry, TcpConfig};
pub use error::{CliError, Result};
pub use transport::TcpTransport;
