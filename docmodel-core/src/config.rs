//! Connection settings for a store client.
//!
//! Settings can be built in code, read from a TOML file, or read from the
//! environment (a `.env` file is honoured):
//!
//! ```toml
//! endpoint = "https://localhost:8081"
//! key = "secret"
//! database = "app"
//! default_partition_key = "/id"
//! ```
//!
//! | Variable | Field |
//! |---|---|
//! | `DOCMODEL_ENDPOINT` | `endpoint` |
//! | `DOCMODEL_KEY` | `key` |
//! | `DOCMODEL_DATABASE` | `database` |
//! | `DOCMODEL_PARTITION_KEY` | `default_partition_key` |

use serde::{Deserialize, Serialize};
use std::{env, fmt, path::Path};
use thiserror::Error;

use crate::{backend::DEFAULT_PARTITION_KEY_PATH, error::ModelError};

pub const ENDPOINT_VAR: &str = "DOCMODEL_ENDPOINT";
pub const KEY_VAR: &str = "DOCMODEL_KEY";
pub const DATABASE_VAR: &str = "DOCMODEL_DATABASE";
pub const PARTITION_KEY_VAR: &str = "DOCMODEL_PARTITION_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Dotenvy error: {0}")]
    Dotenvy(#[from] dotenvy::Error),
    #[error("Missing environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for ModelError {
    fn from(err: ConfigError) -> Self {
        ModelError::InvalidConfig(err.to_string())
    }
}

fn default_partition_key() -> String {
    DEFAULT_PARTITION_KEY_PATH.to_string()
}

/// Store client settings.
///
/// The credentials are opaque to this crate; they are only checked for presence.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub key: String,
    /// Database used when a caller does not name one.
    #[serde(default)]
    pub database: Option<String>,
    /// Partition key path used when a collection is resolved without one.
    #[serde(default = "default_partition_key")]
    pub default_partition_key: String,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("key", &"<redacted>")
            .field("database", &self.database)
            .field("default_partition_key", &self.default_partition_key)
            .finish()
    }
}

impl ConnectionConfig {
    /// Creates settings for `endpoint` and `key`, both of which must be non-empty.
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            endpoint: endpoint.into(),
            key: key.into(),
            database: None,
            default_partition_key: default_partition_key(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_default_partition_key(mut self, path: impl Into<String>) -> Self {
        self.default_partition_key = path.into();
        self
    }

    /// Parses settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Loads settings from the environment, reading a `.env` file first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err.into()),
        }

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = Self {
            endpoint: lookup(ENDPOINT_VAR).ok_or(ConfigError::MissingVar(ENDPOINT_VAR))?,
            key: lookup(KEY_VAR).ok_or(ConfigError::MissingVar(KEY_VAR))?,
            database: lookup(DATABASE_VAR),
            default_partition_key: lookup(PARTITION_KEY_VAR).unwrap_or_else(default_partition_key),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks that the credentials are present and the partition key path is well formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("Store endpoint cannot be empty".to_string()));
        }
        if self.key.trim().is_empty() {
            return Err(ConfigError::Invalid("Store key cannot be empty".to_string()));
        }
        if !self.default_partition_key.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "Partition key path must start with '/': {}",
                self.default_partition_key
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn requires_endpoint_and_key() {
        assert!(ConnectionConfig::new("https://localhost:8081", "secret").is_ok());
        assert!(matches!(ConnectionConfig::new("", "secret"), Err(ConfigError::Invalid(_))));
        assert!(matches!(ConnectionConfig::new("https://localhost", "  "), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn parses_toml_with_defaults() {
        let config = ConnectionConfig::from_toml_str(
            r#"
            endpoint = "https://localhost:8081"
            key = "secret"
            database = "app"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.as_deref(), Some("app"));
        assert_eq!(config.default_partition_key, "/id");
    }

    #[test]
    fn reads_variables_from_lookup() {
        let vars = HashMap::from([
            (ENDPOINT_VAR, "https://localhost:8081"),
            (KEY_VAR, "secret"),
            (PARTITION_KEY_VAR, "/tenantId"),
        ]);

        let config =
            ConnectionConfig::from_lookup(|name| vars.get(name).map(ToString::to_string)).unwrap();

        assert_eq!(config.default_partition_key, "/tenantId");
        assert!(config.database.is_none());

        let missing = ConnectionConfig::from_lookup(|_| None).unwrap_err();
        assert!(matches!(missing, ConfigError::MissingVar(ENDPOINT_VAR)));
    }

    #[test]
    fn debug_output_hides_key() {
        let config = ConnectionConfig::new("https://localhost:8081", "secret").unwrap();

        assert!(!format!("{config:?}").contains("secret"));
    }
}
