//! Gateway configuration
//!
//! TOML configuration with sensible defaults; any subset of keys may be
//! present. Loading is done by the process harness and the resulting
//! struct is handed to the session registry, connection pool, and front
//! ends at construction.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Front-end settings
    pub gateway: GatewayConfig,
    /// Admission-control and timeout settings
    pub limits: LimitsConfig,
}

/// Front-end configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address for both listeners
    pub host: String,
    /// FTP control-connection port
    pub ftp_port: u16,
    /// SFTP (SSH subsystem) port
    pub sftp_port: u16,
    /// Banner sent on FTP connect
    pub welcome_message: String,
    /// Relax the FTP `access` existence probe for paths deeper than one
    /// segment. Containers must still exist; see the filesystem adapter.
    pub allow_no_existing_path: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            ftp_port: 5021,
            sftp_port: 5022,
            welcome_message: "Welcome to skiff - an FTP/SFTP gateway for object storage"
                .to_string(),
            allow_no_existing_path: false,
        }
    }
}

/// Admission control and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max concurrent sessions per username across both protocols
    /// (0 = unlimited)
    pub sessions_per_user: u32,
    /// Backend connection ceiling across the whole process
    pub global_connections: usize,
    /// Backend connection ceiling per session
    pub connections_per_session: usize,
    /// Idle timeout for pooled backend connections, seconds
    pub connection_timeout_secs: u64,
    /// Idle timeout for client sessions, seconds
    pub session_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            sessions_per_user: 10,
            global_connections: 100,
            connections_per_session: 10,
            connection_timeout_secs: 240,
            session_timeout_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from a specific path, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        info!("loaded config from {:?}", path);
        Ok(config)
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.limits.sessions_per_user, 10);
        assert_eq!(config.limits.global_connections, 100);
        assert_eq!(config.limits.connections_per_session, 10);
        assert_eq!(config.gateway.ftp_port, 5021);
        assert!(!config.gateway.allow_no_existing_path);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
            [limits]
            sessions_per_user = 0

            [gateway]
            allow_no_existing_path = true
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.limits.sessions_per_user, 0);
        assert!(config.gateway.allow_no_existing_path);
        // Untouched values keep their defaults
        assert_eq!(config.limits.global_connections, 100);
        assert_eq!(config.gateway.sftp_port, 5022);
    }

    #[test]
    fn test_sample_config_roundtrip() {
        let sample = Config::sample();
        assert!(sample.contains("[gateway]"));
        assert!(sample.contains("[limits]"));
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.limits.session_timeout_secs, 60);
    }

    #[test]
    fn test_config_load_missing() {
        let config = Config::load_from(Path::new("/nonexistent/skiff.toml")).unwrap();
        assert_eq!(config.limits.connection_timeout_secs, 240);
    }
}
