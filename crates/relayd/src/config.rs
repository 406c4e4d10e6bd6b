//! Daemon configuration.
//!
//! Resolution order: built-in defaults, then the TOML file, then `RELAY_*`
//! environment overrides. CLI flags are applied last by the binary.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_core::{ChannelName, UserId, DEFAULT_CHANNELS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::{ConnectionSettings, DEFAULT_MAILBOX_CAPACITY};
use crate::registry::{RegistrySettings, DEFAULT_MAX_CONNECTIONS};

/// Environment variable naming the listen address.
pub const ENV_LISTEN: &str = "RELAY_LISTEN";
/// Environment variable holding the JWT signing secret.
pub const ENV_JWT_SECRET: &str = "RELAY_JWT_SECRET";
/// Environment variable holding the admin bearer token.
pub const ENV_ADMIN_TOKEN: &str = "RELAY_ADMIN_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Channel names advertised by the status endpoint
    pub channels: Vec<String>,
    pub server: ServerConfig,
    pub hub: HubConfig,
    pub connection: ConnectionConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// Frames a connection may have queued before events are dropped
    pub mailbox_capacity: usize,
    /// Registry command queue size; dispatches beyond it are dropped
    pub command_buffer: usize,
    pub max_connections: usize,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub auth_timeout_secs: u64,
    pub pong_wait_secs: u64,
    pub ping_period_secs: u64,
    pub write_wait_secs: u64,
    pub max_message_bytes: usize,
    pub max_transport_bytes: usize,
    pub max_subscriptions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// HS256 secret; JWT verification is disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    pub jwt_leeway_secs: u64,
    /// Bearer token guarding the admin broadcast endpoint; open when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
    /// Static token -> user id table
    pub tokens: BTreeMap<String, u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS.iter().map(|c| c.to_string()).collect(),
            server: ServerConfig::default(),
            hub: HubConfig::default(),
            connection: ConnectionConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        let registry = RegistrySettings::default();
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            command_buffer: registry.command_buffer,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sweep_interval_secs: registry.sweep_interval.as_secs(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let settings = ConnectionSettings::default();
        Self {
            auth_timeout_secs: settings.auth_timeout.as_secs(),
            pong_wait_secs: settings.pong_wait.as_secs(),
            ping_period_secs: settings.ping_period.as_secs(),
            write_wait_secs: settings.write_wait.as_secs(),
            max_message_bytes: settings.max_message_bytes,
            max_transport_bytes: settings.max_transport_bytes,
            max_subscriptions: settings.max_subscriptions,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_leeway_secs: 60,
            admin_token: None,
            tokens: BTreeMap::new(),
        }
    }
}

impl RelayConfig {
    /// Loads defaults, the optional file, and process environment
    /// overrides, then validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Applies `RELAY_*` overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup(ENV_LISTEN) {
            self.server.listen = listen
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("{ENV_LISTEN}={listen}: {e}")))?;
        }
        if let Some(secret) = lookup(ENV_JWT_SECRET) {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(token) = lookup(ENV_ADMIN_TOKEN) {
            self.auth.admin_token = Some(token);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("hub.mailbox_capacity", self.hub.mailbox_capacity),
            ("hub.command_buffer", self.hub.command_buffer),
            ("hub.max_connections", self.hub.max_connections),
            ("connection.max_message_bytes", self.connection.max_message_bytes),
            ("connection.max_subscriptions", self.connection.max_subscriptions),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }

        let nonzero_secs = [
            ("hub.sweep_interval_secs", self.hub.sweep_interval_secs),
            ("connection.auth_timeout_secs", self.connection.auth_timeout_secs),
            ("connection.ping_period_secs", self.connection.ping_period_secs),
            ("connection.write_wait_secs", self.connection.write_wait_secs),
        ];
        for (name, value) in nonzero_secs {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }

        if self.connection.ping_period_secs >= self.connection.pong_wait_secs {
            return Err(ConfigError::Invalid(format!(
                "connection.ping_period_secs ({}) must be less than connection.pong_wait_secs ({})",
                self.connection.ping_period_secs, self.connection.pong_wait_secs
            )));
        }

        if self.connection.max_transport_bytes < self.connection.max_message_bytes {
            return Err(ConfigError::Invalid(format!(
                "connection.max_transport_bytes ({}) must be at least connection.max_message_bytes ({})",
                self.connection.max_transport_bytes, self.connection.max_message_bytes
            )));
        }

        self.channel_names()?;

        for (token, id) in &self.auth.tokens {
            if token.is_empty() {
                return Err(ConfigError::Invalid("auth.tokens contains an empty token".into()));
            }
            UserId::new(*id)
                .map_err(|e| ConfigError::Invalid(format!("auth.tokens: {e}")))?;
        }

        Ok(())
    }

    /// The configured channels as validated names.
    pub fn channel_names(&self) -> Result<Vec<ChannelName>, ConfigError> {
        self.channels
            .iter()
            .map(|name| {
                ChannelName::new(name.as_str())
                    .map_err(|e| ConfigError::Invalid(format!("channels: {e}")))
            })
            .collect()
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            auth_timeout: Duration::from_secs(self.connection.auth_timeout_secs),
            pong_wait: Duration::from_secs(self.connection.pong_wait_secs),
            ping_period: Duration::from_secs(self.connection.ping_period_secs),
            write_wait: Duration::from_secs(self.connection.write_wait_secs),
            max_message_bytes: self.connection.max_message_bytes,
            max_transport_bytes: self.connection.max_transport_bytes,
            max_subscriptions: self.connection.max_subscriptions,
            mailbox_capacity: self.hub.mailbox_capacity,
        }
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            command_buffer: self.hub.command_buffer,
            max_connections: self.hub.max_connections,
            sweep_interval: Duration::from_secs(self.hub.sweep_interval_secs),
            ..RegistrySettings::default()
        }
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
