//! Runtime configuration.
//!
//! # Responsibility
//! - Deserialize the JSON configuration file with defaults for every field.
//! - Validate policy constants and scheduler intervals before use.
//!
//! # Invariants
//! - Unknown keys are rejected so typos do not silently fall back to
//!   defaults.

use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Loan and reservation policy constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CirculationPolicy {
    /// Due date offset from borrow time.
    pub loan_days: u32,
    /// Reservation lifetime from reserve time.
    pub reservation_days: u32,
    /// Days before the due date a `due_soon` event is raised.
    pub due_soon_lead_days: u32,
}

impl Default for CirculationPolicy {
    fn default() -> Self {
        Self {
            loan_days: 14,
            reservation_days: 7,
            due_soon_lead_days: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Interval of the overdue and due-soon sweeps.
    pub notification_interval_secs: u64,
    /// Interval of the reservation expiry and availability sweeps.
    pub reservation_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            notification_interval_secs: 60 * 60,
            reservation_interval_secs: 10 * 60,
        }
    }
}

impl SchedulerConfig {
    pub fn notification_interval(&self) -> Duration {
        Duration::from_secs(self.notification_interval_secs)
    }

    pub fn reservation_interval(&self) -> Duration {
        Duration::from_secs(self.reservation_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CirculationConfig {
    pub database_path: PathBuf,
    pub log_level: String,
    /// Absolute directory for rolling log files; logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    pub policy: CirculationPolicy,
    pub scheduler: SchedulerConfig,
}

impl Default for CirculationConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("circulation.sqlite3"),
            log_level: default_log_level().to_string(),
            log_dir: None,
            policy: CirculationPolicy::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl CirculationConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let policy = &self.policy;
        for (name, value) in [
            ("policy.loan_days", policy.loan_days),
            ("policy.reservation_days", policy.reservation_days),
            ("policy.due_soon_lead_days", policy.due_soon_lead_days),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }

        let scheduler = &self.scheduler;
        for (name, value) in [
            (
                "scheduler.notification_interval_secs",
                scheduler.notification_interval_secs,
            ),
            (
                "scheduler.reservation_interval_secs",
                scheduler.reservation_interval_secs,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database_path must not be empty".to_string()));
        }

        if let Some(log_dir) = &self.log_dir {
            if !log_dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log_dir must be an absolute path, got `{}`",
                    log_dir.display()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CirculationConfig, ConfigError};

    #[test]
    fn empty_document_yields_defaults() {
        let config = CirculationConfig::from_json("{}").unwrap();
        assert_eq!(config, CirculationConfig::default());
        assert_eq!(config.policy.loan_days, 14);
        assert_eq!(config.policy.reservation_days, 7);
        assert_eq!(config.policy.due_soon_lead_days, 3);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = CirculationConfig::from_json(r#"{"policy": {"loan_dayz": 3}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_interval_is_invalid() {
        let err = CirculationConfig::from_json(r#"{"scheduler": {"reservation_interval_secs": 0}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("reservation_interval_secs"));
    }

    #[test]
    fn relative_log_dir_is_invalid() {
        let err = CirculationConfig::from_json(r#"{"log_dir": "logs"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
