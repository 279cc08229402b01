use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::constants::DEFAULT_ARCHIVE_BASE;
use crate::wayback::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Local storage
    pub data_root: PathBuf,
    pub inventory_path: PathBuf,
    pub sites_file: PathBuf,

    // Archive
    pub archive_base_url: String,
    pub request_timeout: Duration,
    pub politeness_delay: Duration,
    pub max_redirects: usize,

    // Retry
    pub rate_limit_retries: u32,
    pub backoff_base: Duration,
    pub transport_retries: u32,
    pub transport_retry_delay: Duration,

    // Concurrency
    pub batch_size: usize,
    pub asset_concurrency: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_root = PathBuf::from(env_or_default("DATA_ROOT", "./data"));
        let inventory_path = optional_env("INVENTORY_PATH")
            .map_or_else(|| data_root.join("inventory.json"), PathBuf::from);

        Ok(Self {
            data_root,
            inventory_path,
            sites_file: PathBuf::from(env_or_default("SITES_FILE", "./sites.toml")),

            archive_base_url: env_or_default("ARCHIVE_BASE_URL", DEFAULT_ARCHIVE_BASE),
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 30)?),
            politeness_delay: Duration::from_millis(parse_env_u64("POLITENESS_DELAY_MS", 1500)?),
            max_redirects: parse_env_usize("MAX_REDIRECTS", 3)?,

            rate_limit_retries: parse_env_u32("RATE_LIMIT_RETRIES", 5)?,
            backoff_base: Duration::from_millis(parse_env_u64("BACKOFF_BASE_MS", 2000)?),
            transport_retries: parse_env_u32("TRANSPORT_RETRIES", 3)?,
            transport_retry_delay: Duration::from_millis(parse_env_u64(
                "TRANSPORT_RETRY_DELAY_MS",
                2000,
            )?),

            batch_size: parse_env_usize("BATCH_SIZE", 5)?,
            asset_concurrency: parse_env_usize("ASSET_CONCURRENCY", 4)?,
        })
    }

    /// Configuration with no delays, for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            inventory_path: PathBuf::from("./data/inventory.json"),
            sites_file: PathBuf::from("./sites.toml"),
            archive_base_url: DEFAULT_ARCHIVE_BASE.to_string(),
            request_timeout: Duration::from_secs(10),
            politeness_delay: Duration::ZERO,
            max_redirects: 3,
            rate_limit_retries: 2,
            backoff_base: Duration::from_millis(1),
            transport_retries: 1,
            transport_retry_delay: Duration::from_millis(1),
            batch_size: 5,
            asset_concurrency: 4,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "BATCH_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.asset_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ASSET_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if url::Url::parse(&self.archive_base_url).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "ARCHIVE_BASE_URL".to_string(),
                message: format!("'{}' is not a URL", self.archive_base_url),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            rate_limit_retries: self.rate_limit_retries,
            backoff_base: self.backoff_base,
            transport_retries: self.transport_retries,
            transport_delay: self.transport_retry_delay,
        }
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    optional_env(name).unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults() {
        for var in ["DATA_ROOT", "INVENTORY_PATH", "BATCH_SIZE", "ARCHIVE_BASE_URL"] {
            std::env::remove_var(var);
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.max_redirects, 3);
        assert_eq!(config.archive_base_url, "https://web.archive.org");
        assert_eq!(config.inventory_path, PathBuf::from("./data/inventory.json"));
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_inventory_follows_data_root() {
        std::env::remove_var("INVENTORY_PATH");
        std::env::set_var("DATA_ROOT", "/srv/site");
        let config = Config::from_env().unwrap();
        std::env::remove_var("DATA_ROOT");
        assert_eq!(config.inventory_path, PathBuf::from("/srv/site/inventory.json"));
    }

    #[test]
    #[serial]
    fn test_bad_integer() {
        std::env::set_var("BATCH_SIZE", "many");
        let result = Config::from_env();
        std::env::remove_var("BATCH_SIZE");
        assert!(matches!(result, Err(ConfigError::ParseInt { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = Config {
            batch_size: 0,
            ..Config::for_testing()
        };
        assert!(config.validate().is_err());
    }
}
