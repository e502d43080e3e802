//! Configuration management with file persistence
//!
//! Settings are process-wide and read once at startup. The file is
//! optional; environment variables override whatever it contains.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::locking::RetryPolicy;
use crate::error::{Error, Result};

/// Grace period override, in seconds
pub const ENV_LOCK_TIMEOUT: &str = "ARSERVER_LOCK_TIMEOUT";
/// Retry count override
pub const ENV_LOCK_RETRIES: &str = "ARSERVER_LOCK_RETRIES";
/// Retry wait override, in seconds
pub const ENV_LOCK_RETRY_WAIT: &str = "ARSERVER_LOCK_RETRY_WAIT";

/// arserver configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub locking: LockingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// How long a disconnected user keeps their locks
    pub lock_timeout_seconds: f64,
    /// Retries after a failed acquisition attempt
    pub lock_retries: u32,
    pub lock_retry_wait_seconds: f64,
    /// Relative spread of the retry wait, 0.0 to 1.0
    pub retry_jitter: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when RUST_LOG is not set
    pub filter: String,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            lock_timeout_seconds: 300.0,
            lock_retries: 13,
            lock_retry_wait_seconds: 0.15,
            retry_jitter: 0.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl LockingConfig {
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.lock_timeout_seconds = seconds;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.lock_retries = retries;
        self
    }

    pub fn with_retry_wait(mut self, seconds: f64) -> Self {
        self.lock_retry_wait_seconds = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.retry_jitter = jitter;
        self
    }

    /// Grace period before a disconnected user's locks are released
    pub fn lock_timeout(&self) -> Duration {
        seconds(self.lock_timeout_seconds)
    }

    pub fn retry_wait(&self) -> Duration {
        seconds(self.lock_retry_wait_seconds)
    }

    /// Default retry policy for lock acquisition
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.lock_retries, self.retry_wait()).with_jitter(self.retry_jitter)
    }

    pub fn validate(&self) -> Result<()> {
        let seconds = [
            ("lock_timeout_seconds", self.lock_timeout_seconds),
            ("lock_retry_wait_seconds", self.lock_retry_wait_seconds),
        ];
        for (name, value) in seconds {
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(Error::ConfigError(format!(
                    "{} must be a non-negative number of seconds that fits a duration, got {}",
                    name, value
                )));
            }
        }
        if self.lock_retries < 1 {
            return Err(Error::ConfigError("lock_retries must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(Error::ConfigError(format!(
                "retry_jitter must be between 0.0 and 1.0, got {}",
                self.retry_jitter
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("ARSERVER_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| Error::ConfigError("Could not determine config directory".to_string()))?
                .join("arserver")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load the configuration file, apply environment overrides and validate
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // Return default config without creating file
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Config = toml::from_str(&contents).map_err(|e| {
            Error::ConfigError(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }

        fs::write(path, self.to_toml()?).map_err(|e| Error::io(path, e))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))
    }

    /// Override settings from the environment
    ///
    /// `lookup` is usually `std::env::var`; an unparseable value is an error
    /// rather than silently ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(ENV_LOCK_TIMEOUT) {
            self.locking.lock_timeout_seconds = parse_env(ENV_LOCK_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_LOCK_RETRIES) {
            self.locking.lock_retries = parse_env(ENV_LOCK_RETRIES, &value)?;
        }
        if let Some(value) = lookup(ENV_LOCK_RETRY_WAIT) {
            self.locking.lock_retry_wait_seconds = parse_env(ENV_LOCK_RETRY_WAIT, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.locking.validate()?;
        if self.logging.filter.trim().is_empty() {
            return Err(Error::ConfigError("logging.filter must not be empty".to_string()));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> Result<String> {
        match key {
            "locking.lock_timeout_seconds" => Ok(self.locking.lock_timeout_seconds.to_string()),
            "locking.lock_retries" => Ok(self.locking.lock_retries.to_string()),
            "locking.lock_retry_wait_seconds" => Ok(self.locking.lock_retry_wait_seconds.to_string()),
            "locking.retry_jitter" => Ok(self.locking.retry_jitter.to_string()),
            "logging.filter" => Ok(self.logging.filter.clone()),
            _ => Err(Error::ConfigError(format!(
                "Unknown configuration key: {}. Use `arserver config show` to see available keys.",
                key
            ))),
        }
    }
}

/// Unvalidated values saturate instead of wrapping to zero
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(if value > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::ConfigError(format!("Invalid value for {}: '{}'", name, value)))
}
