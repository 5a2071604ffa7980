//! Connection configuration.
//!
//! Configuration is plain JSON. Every field is optional:
//!
//! ```json
//! {
//!   "client_id": "billing-1",
//!   "user": "billing",
//!   "password": "secret",
//!   "delivery_mode": "non_persistent",
//!   "priority": 6,
//!   "time_to_live": 60000,
//!   "async_send_allowed": true
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sightwire_session::ClientSettings;

/// Errors from loading or validating a [`ConnectionConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything needed to open a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Generated when absent.
    pub client_id: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Defaults for the producers and sessions of this connection.
    #[serde(flatten)]
    pub client: ClientSettings,
}

impl ConnectionConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.priority > 9 {
            return Err(ConfigError::Invalid(format!(
                "priority {} is outside 0..=9",
                self.client.priority
            )));
        }
        if self.client_id.as_deref() == Some("") {
            return Err(ConfigError::Invalid("client_id is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sightwire_session::DeliveryMode;

    use super::*;

    #[test]
    fn test_from_json_str_empty_object_uses_defaults() {
        let config = ConnectionConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ConnectionConfig::default());
        assert_eq!(config.client.priority, 4);
        assert_eq!(config.client.delivery_mode, DeliveryMode::Persistent);
    }

    #[test]
    fn test_from_json_str_reads_flattened_settings() {
        let config = ConnectionConfig::from_json_str(
            r#"{"client_id": "c1", "delivery_mode": "non_persistent", "priority": 7, "disable_ack": true}"#,
        )
        .unwrap();
        assert_eq!(config.client_id.as_deref(), Some("c1"));
        assert_eq!(config.client.delivery_mode, DeliveryMode::NonPersistent);
        assert_eq!(config.client.priority, 7);
        assert!(config.client.disable_ack);
    }

    #[test]
    fn test_from_json_str_rejects_bad_priority() {
        let err = ConnectionConfig::from_json_str(r#"{"priority": 12}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_json_str_rejects_malformed_json() {
        let err = ConnectionConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_json_file_reads_file() {
        let path = std::env::temp_dir().join(format!("sightwire-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"user": "billing", "disable_timestamp": true}"#).unwrap();

        let config = ConnectionConfig::from_json_file(&path);
        let _ = std::fs::remove_file(&path);

        let config = config.unwrap();
        assert_eq!(config.user.as_deref(), Some("billing"));
        assert!(config.client.disable_timestamp);
    }

    #[test]
    fn test_from_json_file_missing_file() {
        let err = ConnectionConfig::from_json_file("/nonexistent/sightwire.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("sightwire.json"));
    }
}
