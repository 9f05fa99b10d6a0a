//! BlueChat CLI configuration
//!
//! Configuration is read from a TOML file. Every section is optional and
//! falls back to its `Default`. Without `--config` the CLI looks for
//! `bluechat/config.toml` in the platform configuration directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bluechat_core::{Peer, SessionConfig};

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the BlueChat CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliAppConfig {
    /// Session controller settings
    pub session: SessionConfig,

    /// TCP development transport settings
    pub tcp: TcpConfig,

    /// Devices this host knows about
    pub peers: Vec<PeerEntry>,
}

/// Settings for the TCP stand-in radio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Name this host reports to peers it connects to, sent after the
    /// service UUID (at most 255 bytes)
    pub device_name: String,

    /// Address `listen` binds to
    pub bind_address: String,

    /// How long one discovery cycle lasts (in milliseconds)
    pub scan_window_ms: u64,
}

/// One configured peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub name: Option<String>,
    pub address: String,

    /// Reported as a paired (bonded) device
    #[serde(default)]
    pub paired: bool,

    /// Reported by discovery
    #[serde(default = "default_discoverable")]
    pub discoverable: bool,
}

fn default_discoverable() -> bool {
    true
}

impl PeerEntry {
    pub fn to_peer(&self) -> Peer {
        Peer::new(self.name.clone(), self.address.clone())
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            device_name: "bluechat".to_string(),
            bind_address: "127.0.0.1:7070".to_string(),
            scan_window_ms: 2_000,
        }
    }
}

impl TcpConfig {
    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }
}

// ----------------------------------------------------------------------------
// Loading
// ----------------------------------------------------------------------------

impl CliAppConfig {
    /// Load from the default location, or use defaults if no file exists
    pub fn load() -> Result<Self> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Load and validate a configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: CliAppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bluechat").join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate().map_err(CliError::Config)?;

        if self.tcp.bind_address.trim().is_empty() {
            return Err(CliError::Config("tcp.bind_address must not be empty".to_string()));
        }
        if let Some(entry) = self.peers.iter().find(|p| p.address.trim().is_empty()) {
            return Err(CliError::Config(format!(
                "peer {:?} has an empty address",
                entry.name
            )));
        }
        Ok(())
    }

    /// Peers reported as bonded devices
    pub fn paired_peers(&self) -> Vec<Peer> {
        self.peers
            .iter()
            .filter(|p| p.paired)
            .map(PeerEntry::to_peer)
            .collect()
    }

    /// Peers reported by discovery
    pub fn discoverable_peers(&self) -> Vec<Peer> {
        self.peers
            .iter()
            .filter(|p| p.discoverable)
            .map(PeerEntry::to_peer)
            .collect()
    }

    /// Configured display name for `address`, if any
    pub fn peer_name(&self, address: &str) -> Option<String> {
        self.peers
            .iter()
            .find(|p| p.address == address)
            .and_then(|p| p.name.clone())
    }

    /// Example configuration file contents
    pub fn example_config() -> String {
        r#"# BlueChat CLI configuration

[session]
service_name = "chat_service"
read_buffer_size = 1024
local_sender_label = "Me"
fallback_sender_label = "Unknown device"

[tcp]
device_name = "laptop"
bind_address = "127.0.0.1:7070"
scan_window_ms = 2000

[[peers]]
name = "phone"
address = "127.0.0.1:7071"
paired = true

[[peers]]
name = "kiosk"
address = "192.168.1.40:7070"
"#
        .to_string()
    }
}
