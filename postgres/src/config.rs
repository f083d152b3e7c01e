//! Database configuration.
//!
//! # Example
//!
//! ```no_run
//! use unleash_cr_postgres::config::DatabaseConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Reads DATABASE_URL, DATABASE_MAX_CONNECTIONS, DATABASE_ACQUIRE_TIMEOUT_SECS
//! let config = DatabaseConfig::from_env()?;
//!
//! // Or build it explicitly
//! let config = DatabaseConfig::new("postgres://localhost/unleash")
//!     .with_max_connections(20);
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the connection string.
pub const DATABASE_URL: &str = "DATABASE_URL";

/// Environment variable overriding [`DatabaseConfig::max_connections`].
pub const DATABASE_MAX_CONNECTIONS: &str = "DATABASE_MAX_CONNECTIONS";

/// Environment variable overriding [`DatabaseConfig::acquire_timeout_secs`].
pub const DATABASE_ACQUIRE_TIMEOUT_SECS: &str = "DATABASE_ACQUIRE_TIMEOUT_SECS";

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),

    /// A value could not be parsed
    #[error("Failed to parse {name}: {value}")]
    Parse {
        /// Variable name
        name: String,
        /// Offending value
        value: String,
    },
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection string
    pub url: String,
    /// Maximum pool size
    ///
    /// Default: 10
    pub max_connections: u32,
    /// Seconds to wait for a free connection
    ///
    /// Default: 30
    pub acquire_timeout_secs: u64,
    /// Seconds an idle connection is kept
    ///
    /// Default: 600
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Configuration for `url` with default pool settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the maximum pool size.
    #[must_use]
    pub const fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the acquire timeout in seconds.
    #[must_use]
    pub const fn with_acquire_timeout_secs(mut self, secs: u64) -> Self {
        self.acquire_timeout_secs = secs;
        self
    }

    /// Set the idle timeout in seconds.
    #[must_use]
    pub const fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvVarNotSet`] without `DATABASE_URL`,
    /// [`ConfigError::Parse`] for a malformed number, or
    /// [`ConfigError::Validation`] if the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`DatabaseConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(DATABASE_URL).ok_or_else(|| ConfigError::EnvVarNotSet(DATABASE_URL.to_string()))?;
        let mut config = Self::new(url);

        if let Some(value) = lookup(DATABASE_MAX_CONNECTIONS) {
            config.max_connections = parse_var(DATABASE_MAX_CONNECTIONS, &value)?;
        }
        if let Some(value) = lookup(DATABASE_ACQUIRE_TIMEOUT_SECS) {
            config.acquire_timeout_secs = parse_var(DATABASE_ACQUIRE_TIMEOUT_SECS, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Validation("url cannot be empty".to_string()));
        }
        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(ConfigError::Validation(
                "url must start with postgres:// or postgresql://".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Validation("max_connections must be > 0".to_string()));
        }
        if self.acquire_timeout_secs == 0 {
            return Err(ConfigError::Validation("acquire_timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }

    /// Acquire timeout as a `Duration`.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/unleash".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Parse {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        assert!(DatabaseConfig::default().validate().is_ok());
    }

    #[test]
    fn reads_overrides_from_environment() {
        let config = DatabaseConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://db:5432/unleash"),
            (DATABASE_MAX_CONNECTIONS, "25"),
            (DATABASE_ACQUIRE_TIMEOUT_SECS, " 5 "),
        ]))
        .unwrap();

        assert_eq!(config.url, "postgres://db:5432/unleash");
        assert_eq!(config.max_connections, 25);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(5));
        assert_eq!(config.idle_timeout_secs, 600);
    }

    #[test]
    fn missing_url_is_reported() {
        assert_eq!(
            DatabaseConfig::from_lookup(lookup(&[])),
            Err(ConfigError::EnvVarNotSet(DATABASE_URL.to_string()))
        );
    }

    #[test]
    fn malformed_numbers_are_reported() {
        let err = DatabaseConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://db/unleash"),
            (DATABASE_MAX_CONNECTIONS, "many"),
        ]))
        .unwrap_err();

        assert_eq!(err.to_string(), "Failed to parse DATABASE_MAX_CONNECTIONS: many");
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(DatabaseConfig::new("mysql://db").validate().is_err());
        assert!(DatabaseConfig::default().with_max_connections(0).validate().is_err());
        assert!(DatabaseConfig::default().with_acquire_timeout_secs(0).validate().is_err());
    }
}
