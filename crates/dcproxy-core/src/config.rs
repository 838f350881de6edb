//! Configuration for the proxy's upstream set.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $DCPROXY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/dcproxy/config.toml
//!   3. ~/.config/dcproxy/config.toml

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::stamp::ServerStamp;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Seconds between two certificate refresh passes.
    pub cert_refresh_delay_secs: u64,
    /// Upper bound for one certificate negotiation, in seconds.
    pub negotiation_timeout_secs: u64,
    pub servers: Vec<ServerConfig>,
}

/// One `[[servers]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub address: String,
    /// Hex provider key, colon-separated groups allowed.
    pub public_key: String,
    pub provider_name: String,
}

/// Settings handed through the registry to every negotiation.
///
/// The registry never looks inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyContext {
    pub negotiation_timeout: Duration,
    pub cert_refresh_delay: Duration,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

const DEFAULT_CERT_REFRESH_DELAY_SECS: u64 = 30 * 60;
const DEFAULT_NEGOTIATION_TIMEOUT_SECS: u64 = 5;

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            cert_refresh_delay_secs: DEFAULT_CERT_REFRESH_DELAY_SECS,
            negotiation_timeout_secs: DEFAULT_NEGOTIATION_TIMEOUT_SECS,
            servers: Vec::new(),
        }
    }
}

impl Default for ProxyContext {
    fn default() -> Self {
        ProxyConfig::default().context()
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("dcproxy")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("duplicate server name {0:?}")]
    DuplicateServer(String),
    #[error("cert_refresh_delay_secs must be greater than zero")]
    ZeroRefreshDelay,
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ProxyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            ProxyConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a config file without applying env overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: ProxyConfig =
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config from an in-memory TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ProxyConfig =
            toml::from_str(text).map_err(|e| ConfigError::ParseFailed(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("DCPROXY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Server names are the registry's identity key and must be unique.
    /// The refresh delay must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cert_refresh_delay_secs == 0 {
            return Err(ConfigError::ZeroRefreshDelay);
        }
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateServer(server.name.clone()));
            }
        }
        Ok(())
    }

    /// Stamps for every configured server, in file order.
    pub fn stamps(&self) -> Vec<ServerStamp> {
        self.servers
            .iter()
            .map(|s| {
                ServerStamp::from_legacy(
                    s.name.as_str(),
                    s.address.as_str(),
                    s.public_key.as_str(),
                    s.provider_name.as_str(),
                )
            })
            .collect()
    }

    pub fn context(&self) -> ProxyContext {
        ProxyContext {
            negotiation_timeout: Duration::from_secs(self.negotiation_timeout_secs),
            cert_refresh_delay: Duration::from_secs(self.cert_refresh_delay_secs),
        }
    }

    /// Apply DCPROXY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DCPROXY_CERT_REFRESH_DELAY_SECS") {
            if let Ok(secs) = v.parse() {
                self.cert_refresh_delay_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("DCPROXY_NEGOTIATION_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.negotiation_timeout_secs = secs;
            }
        }
    }
}
