// common/src/config.rs
use config::{Config as ConfigFile, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::utils::generate_secure_token;

/// Central configuration for the live server and its viewer engine
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_addr: String,
    pub home_route: String,
    pub ws_route: String,
    /// Secret the identity sealing key is derived from
    pub seal_secret: String,
    pub title: String,
    pub extra_head: String,
    pub reset_on_disconnect: bool,
    pub cookie_max_age_days: i64,

    pub timeouts: TimeoutConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub handshake_ttl_secs: u64,
    pub reservation_ttl_secs: u64,
    pub receive_poll_secs: u64,
    pub handshake_attempts: u32,
    pub upload_stall_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_page_loads: usize,
    pub window_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:49000".to_string(),
            home_route: "/".to_string(),
            ws_route: "/ws".to_string(),
            // No secret configured means cookies do not survive a restart
            seal_secret: generate_secure_token(64),
            title: "Live".to_string(),
            extra_head: String::new(),
            reset_on_disconnect: true,
            cookie_max_age_days: 360,

            timeouts: TimeoutConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_ttl_secs: 20,
            reservation_ttl_secs: 60,
            receive_poll_secs: 5,
            handshake_attempts: 2,
            upload_stall_secs: 300,
            sweep_interval_secs: 10,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_page_loads: 30,
            window_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        // Get the run mode, defaulting to "development"
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        // Locate the config directory
        let config_dir = env::var("CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                // Check if we're in the project root or a subcrate
                let mut path = PathBuf::from("./config");
                if !path.exists() {
                    path = PathBuf::from("../config");
                }
                path
            });

        tracing::info!("Loading configuration from {}", config_dir.display());
        tracing::info!("Using run mode: {}", run_mode);

        let config = ConfigFile::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", run_mode))).required(false))
            // Local overrides are never committed
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load from files and environment, falling back to defaults
    pub fn from_env() -> Self {
        match Self::load() {
            Ok(config) => {
                tracing::info!("Configuration loaded from files and environment");
                config
            }
            Err(e) => {
                tracing::warn!("Failed to load configuration: {}", e);
                tracing::info!("Falling back to built-in defaults");
                Self::default()
            }
        }
    }

    /// Identity cookie lifetime in seconds
    pub fn cookie_max_age_secs(&self) -> i64 {
        self.cookie_max_age_days * 24 * 60 * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_timers() {
        let config = Config::default();
        assert_eq!(config.timeouts.handshake_ttl_secs, 20);
        assert_eq!(config.timeouts.reservation_ttl_secs, 60);
        assert_eq!(config.timeouts.receive_poll_secs, 5);
        assert_eq!(config.timeouts.handshake_attempts, 2);
        assert_eq!(config.ws_route, "/ws");
    }

    #[test]
    fn test_default_seal_secret_is_random() {
        assert_ne!(Config::default().seal_secret, Config::default().seal_secret);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{"title":"Demo","timeouts":{"handshake_ttl_secs":5}}"#)
            .expect("partial config should deserialize");
        assert_eq!(config.title, "Demo");
        assert_eq!(config.timeouts.handshake_ttl_secs, 5);
        assert_eq!(config.timeouts.reservation_ttl_secs, 60);
        assert_eq!(config.home_route, "/");
    }

    #[test]
    fn test_cookie_max_age_is_about_a_year() {
        let config = Config::default();
        assert_eq!(config.cookie_max_age_secs(), 360 * 86400);
    }
}
