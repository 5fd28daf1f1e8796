//! Relay configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/p2pburger/relay.toml`
//! - Windows: `%APPDATA%/p2pburger/relay.toml`
//!
//! The `PORT` environment variable overrides the configured port.

use std::path::{Path, PathBuf};

use p2pburger_protocol::IceServer;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides [`Config::port`].
const PORT_ENV: &str = "PORT";

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket listen port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connectivity-assist servers pushed to every client on connect.
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,
}

fn default_port() -> u16 {
    8080
}

fn default_ice_servers() -> Vec<IceServer> {
    vec![
        IceServer::stun("stun:stun.l.google.com:19302"),
        IceServer::stun("stun:stun1.l.google.com:19302"),
        IceServer::turn(
            "turn:openrelay.metered.ca:80",
            "openrelayproject",
            "openrelayproject",
        ),
        IceServer::turn(
            "turn:openrelay.metered.ca:443",
            "openrelayproject",
            "openrelayproject",
        ),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            ice_servers: default_ice_servers(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    /// Applies the `PORT` override afterwards.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&config_path()?)?;
        config.apply_port_override(std::env::var(PORT_ENV).ok().as_deref());
        Ok(config)
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Writes the configuration to `path`.
    fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn apply_port_override(&mut self, value: Option<&str>) {
        let Some(value) = value else { return };
        match value.trim().parse::<u16>() {
            Ok(port) => {
                tracing::debug!(port, "port overridden by {PORT_ENV}");
                self.port = port;
            }
            Err(_) => tracing::warn!(value, "ignoring invalid {PORT_ENV}"),
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("p2pburger")
            .join("relay.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("p2pburger").join("relay.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/p2pburger/relay.toml"))
    }
}
