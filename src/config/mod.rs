//! Configuration module

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Idle read window applied when the configuration does not set one
pub const DEFAULT_TIMEOUT_SECS: u64 = 360;

/// Shared configuration for both endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SOCKS5 listen address (local endpoint only)
    pub local: String,

    /// Tunnel address: the local endpoint connects to it, the remote
    /// endpoint listens on it
    pub server: String,

    /// Shared passphrase for key derivation
    pub password: String,

    /// Cipher method name from the registry
    pub method: String,

    /// Idle read timeout in seconds
    pub timeout: u64,

    /// Decoy host (remote) / cover-traffic target (local)
    pub target_domain: String,

    /// Decoy / cover port
    pub target_port: u16,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("{}: {}", path, e)))?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.is_empty() {
            return Err(Error::config("server address is required"));
        }
        if self.method.is_empty() {
            return Err(Error::config("cipher method is required"));
        }
        Ok(())
    }

    /// The idle read window, falling back to the default when unset
    pub fn read_timeout(&self) -> Duration {
        let secs = if self.timeout == 0 {
            DEFAULT_TIMEOUT_SECS
        } else {
            self.timeout
        };
        Duration::from_secs(secs)
    }

    /// Decoy / cover destination as `host:port`
    pub fn target_addr(&self) -> String {
        format!("{}:{}", self.target_domain, self.target_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            local: "127.0.0.1:1080".to_string(),
            server: String::new(),
            password: String::new(),
            method: String::new(),
            timeout: 0,
            target_domain: String::new(),
            target_port: 80,
        }
    }
}
