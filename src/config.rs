//! Configuration parsing and management

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::filter::FilterRuleSet;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Proxy settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Filtering settings
    #[serde(default)]
    pub filter: FilterConfig,
}

/// Proxy-specific configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Address to listen on for client connections
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// host:port of the real IMAP server
    #[serde(default = "default_remote_address")]
    pub remote_address: String,

    /// Wrap the outbound connection in TLS
    #[serde(default)]
    pub remote_tls: bool,

    /// Close a pair after this many seconds without server→client activity
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            remote_address: default_remote_address(),
            remote_tls: false,
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1:2143".to_string()
}

fn default_remote_address() -> String {
    "mail.example.com:143".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    120
}

/// Response filtering configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Mailbox-name patterns whose LIST/LSUB lines are omitted.
    /// Each entry is a regex fragment matched against the quoted name.
    #[serde(default)]
    pub omit: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Hex-dump every read and write at debug level
    #[serde(default)]
    pub hex_dump: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            hex_dump: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let remote = &self.proxy.remote_address;
        match remote.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                port.parse::<u16>().map_err(|_| {
                    Error::config(format!("Invalid port in remote_address '{}'", remote))
                })?;
            }
            _ => {
                return Err(Error::config(format!(
                    "remote_address '{}' must be host:port",
                    remote
                )));
            }
        }

        if self.proxy.idle_timeout_secs == 0 {
            return Err(Error::config("idle_timeout_secs must be non-zero"));
        }

        // Surface bad omit patterns at startup rather than on first use.
        FilterRuleSet::compile(&self.filter.omit)?;

        Ok(())
    }

    /// The host part of the remote address, used for TLS server-name checks.
    pub fn remote_host(&self) -> &str {
        match self.proxy.remote_address.rsplit_once(':') {
            Some((host, _)) => host,
            None => &self.proxy.remote_address,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy.idle_timeout_secs)
    }
}
