//! Proxy Configuration
//!
//! How a channel proxy is built: which channel, which side of it, where its
//! endpoint gets constructed, and what the dedicated I/O thread is called.
//!
//! Configuration can come from defaults, environment variables, or a TOML
//! file:
//!
//! ```toml
//! channel_id = "renderer-7"
//! mode = "named-server"
//! create_immediately = true
//! io_thread_name = "renderer-io"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::ChannelMode;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was read
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this configuration
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Channel proxy configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Name of the channel
    pub channel_id: String,

    /// Which side of the channel this proxy plays
    pub mode: ChannelMode,

    /// Build the endpoint on the owner context during `init`
    ///
    /// Needed when a peer must be able to find the endpoint as soon as
    /// `init` returns.
    pub create_immediately: bool,

    /// Name of the dedicated I/O thread
    pub io_thread_name: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            channel_id: "conduit".to_string(),
            mode: ChannelMode::Server,
            create_immediately: false,
            io_thread_name: "conduit-io".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `CONDUIT_CHANNEL_ID`: Channel name
    /// - `CONDUIT_CHANNEL_MODE`: "server", "client", "named-server", "named-client"
    /// - `CONDUIT_CREATE_IMMEDIATELY`: "1" or "true" to build the endpoint in `init`
    /// - `CONDUIT_IO_THREAD`: I/O thread name
    ///
    /// Unset or unrecognized values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mode = match std::env::var("CONDUIT_CHANNEL_MODE")
            .as_deref()
            .map(str::to_lowercase)
        {
            Ok(ref s) if s == "server" => ChannelMode::Server,
            Ok(ref s) if s == "client" => ChannelMode::Client,
            Ok(ref s) if s == "named-server" => ChannelMode::NamedServer,
            Ok(ref s) if s == "named-client" => ChannelMode::NamedClient,
            Ok(other) => {
                tracing::warn!(value = %other, "Unknown CONDUIT_CHANNEL_MODE, using default");
                defaults.mode
            }
            Err(_) => defaults.mode,
        };

        Self {
            channel_id: std::env::var("CONDUIT_CHANNEL_ID").unwrap_or(defaults.channel_id),
            mode,
            create_immediately: std::env::var("CONDUIT_CREATE_IMMEDIATELY")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(defaults.create_immediately),
            io_thread_name: std::env::var("CONDUIT_IO_THREAD")
                .unwrap_or(defaults.io_thread_name),
        }
    }

    /// Parse configuration from TOML text
    ///
    /// Missing keys take their default values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed input and
    /// `ConfigError::Invalid` if validation fails.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`ProxyConfig::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check values that serde cannot
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for an empty channel id or thread name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_id.trim().is_empty() {
            return Err(ConfigError::Invalid("channel_id must not be empty".into()));
        }
        if self.io_thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "io_thread_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}
