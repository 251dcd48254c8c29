//! Server configuration
//!
//! Loads relay settings from a TOML file such as:
//!
//! ```toml
//! bind = "0.0.0.0"
//! port = 8080
//! allowed_origins = ["https://www.walletlink.org"]
//! read_deadline_secs = 60
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default bind address
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Origins allowed to open a socket. Empty or `"*"` accepts everything.
    pub allowed_origins: Vec<String>,
    /// Per-read deadline in seconds; 0 disables it
    pub read_deadline_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            allowed_origins: Vec::new(),
            read_deadline_secs: 0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    ///
    /// A path that does not exist yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Replace the allowed origins
    pub fn with_allowed_origins(mut self, origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Set the read deadline in seconds
    pub fn with_read_deadline_secs(mut self, secs: u64) -> Self {
        self.read_deadline_secs = secs;
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Read deadline, or `None` when enforcement is disabled
    pub fn read_deadline(&self) -> Option<Duration> {
        (self.read_deadline_secs > 0).then(|| Duration::from_secs(self.read_deadline_secs))
    }
}
