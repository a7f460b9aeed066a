//! Configuration management for the outbox daemon.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default remote API URL (can be overridden at compile time via SOS_API_URL env var).
pub const DEFAULT_API_URL: &str = match option_env!("SOS_API_URL") {
    Some(url) => url,
    None => "https://api.rider-sos.app",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Seconds between scheduler ticks.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5;

/// Generic failures a record may accumulate before it becomes a dead letter.
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Ceiling for the retry counter of authorization failures.
pub const DEFAULT_AUTHORIZATION_RETRY_CAP: u32 = 2;

/// HTTP request timeout for the remote client.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the remote session service.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Bearer token for the remote service. `None` means not signed in.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Seconds between drain cycles while sync preconditions hold.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Generic failures allowed before a record is parked as failed.
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
    /// Cap applied to the retry counter on authorization failures.
    #[serde(default = "default_authorization_retry_cap")]
    pub authorization_retry_cap: u32,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

fn default_max_delivery_attempts() -> u32 {
    DEFAULT_MAX_DELIVERY_ATTEMPTS
}

fn default_authorization_retry_cap() -> u32 {
    DEFAULT_AUTHORIZATION_RETRY_CAP
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_url: default_api_url(),
            access_token: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            authorization_retry_cap: DEFAULT_AUTHORIZATION_RETRY_CAP,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file under `paths`, falling back to
    /// defaults, then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| CoreError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `SOS_LOG_LEVEL`, `SOS_API_URL` and `SOS_ACCESS_TOKEN` overrides.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(log_level) = non_empty("SOS_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(api_url) = non_empty("SOS_API_URL") {
            self.api_url = api_url;
        }
        if let Some(token) = non_empty("SOS_ACCESS_TOKEN") {
            self.access_token = Some(token);
        }
    }

    /// Reject settings that would stall or spin the scheduler.
    pub fn validate(&self) -> CoreResult<()> {
        if self.sync_interval_secs == 0 {
            return Err(CoreError::Config {
                key: "sync_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_delivery_attempts == 0 {
            return Err(CoreError::Config {
                key: "max_delivery_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.authorization_retry_cap >= self.max_delivery_attempts {
            return Err(CoreError::Config {
                key: "authorization_retry_cap",
                reason: format!(
                    "{} must stay below max_delivery_attempts ({})",
                    self.authorization_retry_cap, self.max_delivery_attempts
                ),
            });
        }
        self.api_url()?;
        Ok(())
    }

    /// Get the remote API URL as a parsed URL.
    pub fn api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_url).map_err(CoreError::from)
    }

    /// Interval between scheduler ticks.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Whether an identity is available for the remote service.
    pub fn is_authenticated(&self) -> bool {
        self.access_token
            .as_deref()
            .map(|token| !token.trim().is_empty())
            .unwrap_or(false)
    }
}
