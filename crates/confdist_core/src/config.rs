//! Core runtime configuration.
//!
//! # Invariants
//! - `dispatch_workers` stays within `1..=MAX_DISPATCH_WORKERS`.
//! - A missing `db_path` selects an in-memory SQLite database.

use crate::logging::default_log_level;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const MAX_DISPATCH_WORKERS: usize = 64;

/// Invalid core configuration.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    InvalidWorkerCount(usize),
    InvalidLogDir(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid core configuration: {err}"),
            Self::InvalidWorkerCount(count) => write!(
                f,
                "dispatch_workers must be between 1 and {MAX_DISPATCH_WORKERS}, got {count}"
            ),
            Self::InvalidLogDir(value) => {
                write!(f, "log_dir must be an absolute path, got `{value}`")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::InvalidWorkerCount(_) | Self::InvalidLogDir(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Settings for one configuration service instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Number of dispatch worker threads.
    pub dispatch_workers: usize,
    /// SQLite database file; `None` keeps records in memory.
    pub db_path: Option<PathBuf>,
    pub log_level: String,
    /// Directory for rolling log files; `None` leaves logging to the host.
    pub log_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            dispatch_workers: 1,
            db_path: None,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl CoreConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_DISPATCH_WORKERS).contains(&self.dispatch_workers) {
            return Err(ConfigError::InvalidWorkerCount(self.dispatch_workers));
        }
        if let Some(log_dir) = &self.log_dir {
            if !log_dir.is_absolute() {
                return Err(ConfigError::InvalidLogDir(log_dir.display().to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};

    #[test]
    fn empty_document_uses_defaults() {
        let config = CoreConfig::from_json_str("{}").expect("defaults should be valid");
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.dispatch_workers, 1);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn rejects_out_of_range_worker_count() {
        let err = CoreConfig::from_json_str(r#"{"dispatch_workers": 0}"#)
            .expect_err("zero workers must be rejected");
        assert!(matches!(err, ConfigError::InvalidWorkerCount(0)));
    }

    #[test]
    fn rejects_relative_log_dir_and_unknown_fields() {
        let err = CoreConfig::from_json_str(r#"{"log_dir": "logs"}"#)
            .expect_err("relative log dir must be rejected");
        assert!(matches!(err, ConfigError::InvalidLogDir(_)));

        let err = CoreConfig::from_json_str(r#"{"workers": 2}"#)
            .expect_err("unknown fields must be rejected");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
