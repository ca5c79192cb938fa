//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub freeswitch: FreeSwitchConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Comma separated list of allowed browser origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_cors_origins() -> String {
    "http://localhost:3000,http://localhost:8080".to_string()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Without one, call records are kept in
    /// process memory only.
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Event encoding requested from the switch when subscribing
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventFormat {
    #[default]
    Plain,
    Json,
}

impl EventFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFormat::Plain => "plain",
            EventFormat::Json => "json",
        }
    }
}

/// FreeSWITCH event socket configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FreeSwitchConfig {
    /// Switch host, used directly when the tunnel is disabled
    #[serde(default = "default_fs_host")]
    pub host: String,

    /// Event socket port
    #[serde(default = "default_fs_port")]
    pub port: u16,

    /// Event socket password
    #[serde(default = "default_fs_password")]
    pub password: String,

    /// Subscription encoding
    #[serde(default)]
    pub event_format: EventFormat,

    /// Bound on each handshake step (banner, auth, subscribe)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Bound on waiting for a command reply
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_fs_host() -> String {
    "127.0.0.1".to_string()
}

fn default_fs_port() -> u16 {
    8021
}

fn default_fs_password() -> String {
    "ClueCon".to_string()
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    5
}

impl FreeSwitchConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for FreeSwitchConfig {
    fn default() -> Self {
        Self {
            host: default_fs_host(),
            port: default_fs_port(),
            password: default_fs_password(),
            event_format: EventFormat::default(),
            handshake_timeout_secs: default_handshake_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// SSH tunnel configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TunnelConfig {
    /// Reach the switch through an SSH gateway
    #[serde(default)]
    pub enabled: bool,

    /// Gateway host
    #[serde(default)]
    pub ssh_host: String,

    /// Gateway SSH port
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Login user on the gateway
    #[serde(default = "default_ssh_username")]
    pub username: String,

    /// Private key used for public key authentication
    #[serde(default)]
    pub private_key_path: PathBuf,

    /// Passphrase for an encrypted private key
    #[serde(default)]
    pub key_passphrase: Option<String>,

    /// Host the gateway forwards to (as seen from the gateway)
    #[serde(default = "default_remote_host")]
    pub remote_host: String,

    /// Expected SHA-256 fingerprint of the gateway host key.
    /// When unset any host key is accepted.
    #[serde(default)]
    pub host_key_fingerprint: Option<String>,

    /// Bound on tearing the tunnel down
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_username() -> String {
    "freeswitch".to_string()
}

fn default_remote_host() -> String {
    "localhost".to_string()
}

fn default_stop_timeout() -> u64 {
    5
}

impl TunnelConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ssh_host: String::new(),
            ssh_port: default_ssh_port(),
            username: default_ssh_username(),
            private_key_path: PathBuf::new(),
            key_passphrase: None,
            remote_host: default_remote_host(),
            host_key_fingerprint: None,
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

/// Initial connect retry policy
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_reconnect_delay")]
    pub delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_reconnect_delay() -> u64 {
    5
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_reconnect_delay(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("freeswitch.host", "127.0.0.1")?
            .set_default("freeswitch.port", 8021)?
            .set_default("freeswitch.password", "ClueCon")?
            .set_default("reconnect.max_attempts", 5)?
            .set_default("reconnect.delay_secs", 5)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with CTI_ prefix
            .add_source(
                Environment::with_prefix("CTI")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        tracing::debug!(run_mode = %run_mode, tunnel = config.tunnel.enabled, "Configuration loaded");
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CTI").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.delay_secs, 5);
    }

    #[test]
    fn test_default_freeswitch_config() {
        let config = FreeSwitchConfig::default();
        assert_eq!(config.port, 8021);
        assert_eq!(config.password, "ClueCon");
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.event_format, EventFormat::Plain);
    }

    #[test]
    fn test_tunnel_disabled_by_default() {
        let config = TunnelConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.ssh_port, 22);
        assert!(config.host_key_fingerprint.is_none());
    }

    #[test]
    fn test_event_format_deserialize() {
        let format: EventFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, EventFormat::Json);
        assert_eq!(format.as_str(), "json");
    }
}
