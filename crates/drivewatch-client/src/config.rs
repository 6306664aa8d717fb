//! Configuration for monitoring sessions.
//!
//! Settings are read from a TOML file and then overridden by environment
//! variables:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `DRIVEWATCH_SIGNALING_URL` | `signaling_url` |
//! | `DRIVEWATCH_SUMMARY_PATH` | `summary_path` |
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Signaling endpoint used when nothing is configured.
pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:8000/ws/driver-monitoring";

/// Environment variable overriding the signaling endpoint.
pub const SIGNALING_URL_ENV: &str = "DRIVEWATCH_SIGNALING_URL";

/// Environment variable overriding the summary store location.
pub const SUMMARY_PATH_ENV: &str = "DRIVEWATCH_SUMMARY_PATH";

// ============================================================================
// ICE Configuration
// ============================================================================

/// A STUN or TURN server used during ICE gathering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// A STUN server (no credentials).
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// A TURN server with static credentials.
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Peer connection configuration.
///
/// The default pairs a public STUN server with a public TURN relay whose
/// credentials are shared by every client. Anyone can relay through it, so
/// no per-session authorization should be assumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcConfiguration {
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,
}

fn default_ice_servers() -> Vec<IceServer> {
    vec![
        IceServer::stun("stun:stun.l.google.com:19302"),
        IceServer::turn(
            "turn:openrelay.metered.ca:80",
            "openrelayproject",
            "openrelayproject",
        ),
    ]
}

impl Default for RtcConfiguration {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
        }
    }
}

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for a monitoring session.
///
/// # Example
///
/// ```rust
/// use drivewatch_client::config::ClientConfig;
///
/// let config = ClientConfig {
///     signaling_url: "ws://10.0.0.5:8000/ws/driver-monitoring".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.rtc.ice_servers.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL of the signaling coordinator.
    pub signaling_url: String,

    /// Where session summaries are appended. Defaults to the user data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<PathBuf>,

    /// Peer connection settings.
    pub rtc: RtcConfiguration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            summary_path: None,
            rtc: RtcConfiguration::default(),
        }
    }
}

/// Returns `$XDG_CONFIG_HOME/drivewatch/config.toml` (or the platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("drivewatch").join("config.toml"))
}

/// Returns `$XDG_DATA_HOME/drivewatch/sessions.jsonl` (or the platform equivalent).
pub fn default_summary_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("drivewatch")
        .join("sessions.jsonl")
}

impl ClientConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Serializes the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Loads configuration from `path`, or from the default location.
    ///
    /// An explicitly given path must exist. A missing file at the default
    /// location yields the built-in defaults. Environment overrides are
    /// applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ClientError::Config(format!(
                        "config file not found: {}",
                        explicit.display()
                    )));
                }
                Self::from_file(explicit)?
            }
            None => match default_config_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration");
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Applies overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(SIGNALING_URL_ENV).filter(|v| !v.is_empty()) {
            self.signaling_url = url;
        }
        if let Some(path) = lookup(SUMMARY_PATH_ENV).filter(|v| !v.is_empty()) {
            self.summary_path = Some(PathBuf::from(path));
        }
    }

    /// Effective summary store path.
    pub fn summary_path(&self) -> PathBuf {
        self.summary_path
            .clone()
            .unwrap_or_else(default_summary_path)
    }
}
