//! Hub configuration.
//!
//! Loaded from a TOML file. Every field has a default, so an empty file (or
//! no file at all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::hub::MAX_CONNECTIONS;
use crate::server::{
    ConnectionLimits, DEFAULT_OUTBOX_CAPACITY, DEFAULT_SOCKET_PATH, MAX_MESSAGE_SIZE,
    READ_TIMEOUT, WRITE_TIMEOUT,
};

/// Environment variable that overrides `socket_path`.
pub const SOCKET_ENV_VAR: &str = "HUDDLE_SOCKET";

/// Default tracing filter directive.
pub const DEFAULT_LOG_FILTER: &str = "huddled=info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// Path of the Unix socket the server listens on
    pub socket_path: PathBuf,

    /// Live connections accepted before new ones are rejected
    pub max_connections: usize,

    /// Messages queued per connection before deliveries fail
    pub outbox_capacity: usize,

    /// Longest accepted inbound line, in bytes
    pub max_message_size: usize,

    /// Idle seconds before a connection is closed
    pub read_timeout_secs: u64,

    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            max_connections: MAX_CONNECTIONS,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_message_size: MAX_MESSAGE_SIZE,
            read_timeout_secs: READ_TIMEOUT.as_secs(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl HubConfig {
    /// Loads configuration from `path`.
    ///
    /// A missing file yields the defaults. The result is validated either way.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            info!(path = %path.display(), "Loading configuration");
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;
            Self::from_toml(&content).map_err(|e| match e {
                ConfigError::Parse { error, .. } => ConfigError::Parse {
                    path: path.to_path_buf(),
                    error,
                },
                other => other,
            })?
        } else {
            warn!(path = %path.display(), "Configuration file not found, using defaults");
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves the configuration the binary runs with.
    ///
    /// Reads `path` when given, otherwise starts from the defaults, then
    /// applies environment overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_socket_override(std::env::var(SOCKET_ENV_VAR).ok());
        Ok(config)
    }

    /// Replaces `socket_path` with a non-empty override.
    pub fn apply_socket_override(&mut self, socket: Option<String>) {
        if let Some(socket) = socket.filter(|s| !s.trim().is_empty()) {
            self.socket_path = PathBuf::from(socket);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("max_connections", self.max_connections as u64),
            ("outbox_capacity", self.outbox_capacity as u64),
            ("max_message_size", self.max_message_size as u64),
            ("read_timeout_secs", self.read_timeout_secs),
        ];

        if let Some((field, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid {
                field: *field,
                reason: "must be greater than 0",
            });
        }

        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "socket_path",
                reason: "must not be empty",
            });
        }

        Ok(())
    }

    /// Per-connection limits for the socket server.
    pub fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            max_message_size: self.max_message_size,
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config file {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
