//! Editor configuration.
//!
//! # Responsibility
//! - Load screen-wide switches (locking, notifications, close confirmation,
//!   validation group, default fetch plan, logging) from JSON.
//!
//! # Invariants
//! - Every field has a default, so `{}` is a valid configuration.
//! - A loaded configuration has passed [`EditorConfig::validate`].

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_VALIDATION_GROUP: &str = "ui_cross_field";
pub const DEFAULT_FETCH_PLAN: &str = "_local";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read editor config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse editor config: {err}"),
            Self::Invalid(message) => write!(f, "invalid editor config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory for rotated log files; stderr when `None`.
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub pessimistic_locking: bool,
    pub lock_timeout_secs: Option<u64>,
    pub show_save_notification: bool,
    /// When false, closing a modified screen discards without asking.
    pub confirm_unsaved_close: bool,
    pub validation_group: String,
    pub default_fetch_plan: String,
    pub logging: LoggingConfig,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            pessimistic_locking: true,
            lock_timeout_secs: None,
            show_save_notification: true,
            confirm_unsaved_close: true,
            validation_group: DEFAULT_VALIDATION_GROUP.to_string(),
            default_fetch_plan: DEFAULT_FETCH_PLAN.to_string(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EditorConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.logging.level.trim().to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) && level != "warning" {
            return Err(ConfigError::Invalid(format!(
                "unsupported log level `{}`",
                self.logging.level
            )));
        }
        if self.validation_group.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "validation_group cannot be empty".to_string(),
            ));
        }
        if self.default_fetch_plan.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_fetch_plan cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EditorConfig, DEFAULT_VALIDATION_GROUP};
    use std::time::Duration;

    #[test]
    fn empty_object_yields_defaults() {
        let config = EditorConfig::from_json_str("{}").expect("defaults");
        assert!(config.pessimistic_locking);
        assert!(config.confirm_unsaved_close);
        assert_eq!(config.validation_group, DEFAULT_VALIDATION_GROUP);
        assert_eq!(config.lock_timeout(), None);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = EditorConfig::from_json_str(
            r#"{"pessimistic_locking": false, "lock_timeout_secs": 90, "logging": {"level": "WARN"}}"#,
        )
        .expect("config");
        assert!(!config.pessimistic_locking);
        assert_eq!(config.lock_timeout(), Some(Duration::from_secs(90)));
        assert!(config.show_save_notification);
        assert_eq!(config.logging.directory, None);
    }

    #[test]
    fn rejects_unknown_level_and_blank_group() {
        assert!(matches!(
            EditorConfig::from_json_str(r#"{"logging": {"level": "loud"}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EditorConfig::from_json_str(r#"{"validation_group": " "}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EditorConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
