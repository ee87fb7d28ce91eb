//! Configuration management for airstream
//!
//! Config is stored at ~/.config/airstream/config.toml. Every field is
//! optional; missing fields fall back to built-in defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::stream::SessionOptions;

/// Environment variable naming the default receiver
pub const DEVICE_ENV_VAR: &str = "AIRSTREAM_DEVICE";

const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 3;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_MAX_POLL_FAILURES: u32 = 5;
const DEFAULT_MAX_SESSION_SECS: u64 = 6 * 60 * 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Receiver used when none is given on the command line
    pub default_device: Option<String>,
    /// How long to wait for a receiver to appear
    pub discovery_timeout_secs: Option<u64>,
    /// Delay between playback position polls
    pub poll_interval_secs: Option<u64>,
    /// Consecutive failed polls before a session gives up
    pub max_poll_failures: Option<u32>,
    /// Upper bound on one file's playback time
    pub max_session_secs: Option<u64>,
    /// Timeout for each control request
    pub request_timeout_secs: Option<u64>,
    /// Interface for the media server (default: all)
    pub bind_address: Option<IpAddr>,
    /// Address advertised to receivers (default: detected per receiver)
    pub advertise_address: Option<IpAddr>,
}

impl Config {
    /// Get config file path (~/.config/airstream/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("airstream").join("config.toml"))
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Load config from an explicit path. Unlike [`Config::load`], a missing
    /// or invalid file is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Write config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Default device with fallback chain:
    /// 1. Environment variable AIRSTREAM_DEVICE
    /// 2. `default_device` from the config file
    pub fn default_device(&self) -> Option<String> {
        std::env::var(DEVICE_ENV_VAR)
            .ok()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| self.default_device.clone())
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(
            self.discovery_timeout_secs
                .unwrap_or(DEFAULT_DISCOVERY_TIMEOUT_SECS),
        )
    }

    /// Playback tunables derived from this config
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            poll_interval: Duration::from_secs(
                self.poll_interval_secs
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
                    .max(1),
            ),
            max_poll_failures: self
                .max_poll_failures
                .unwrap_or(DEFAULT_MAX_POLL_FAILURES)
                .max(1),
            max_duration: Duration::from_secs(
                self.max_session_secs.unwrap_or(DEFAULT_MAX_SESSION_SECS),
            ),
            request_timeout: Duration::from_secs(
                self.request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            bind_address: self
                .bind_address
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            advertise_address: self.advertise_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.default_device.is_none());
        assert_eq!(config.discovery_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_session_options_defaults() {
        let options = Config::default().session_options();
        assert_eq!(options.poll_interval, Duration::from_secs(2));
        assert_eq!(options.max_poll_failures, 5);
        assert_eq!(options.max_duration, Duration::from_secs(21600));
        assert_eq!(options.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(options.advertise_address.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            default_device = "Living Room"
            poll_interval_secs = 1
            max_poll_failures = 0
            advertise_address = "192.168.1.111"
            "#,
        )
        .unwrap();

        assert_eq!(config.default_device.as_deref(), Some("Living Room"));
        let options = config.session_options();
        assert_eq!(options.poll_interval, Duration::from_secs(1));
        assert_eq!(options.max_poll_failures, 1);
        assert_eq!(
            options.advertise_address,
            Some("192.168.1.111".parse().unwrap())
        );
    }

    #[test]
    fn test_save_and_load_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            default_device: Some("Den".into()),
            max_session_secs: Some(600),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
        assert!(Config::load_from(&dir.path().join("missing.toml")).is_err());
    }
}
