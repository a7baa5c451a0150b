//! Configuration read from the environment

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_INVALID_ANSWER_MESSAGE: &str = "Not a valid answer. Choose one of the following.";
pub const DEFAULT_SESSION_END_TRIGGER: &str = "end";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_RUNTIME_IDLE_SECONDS: u64 = 600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Options the session engine consults while handling messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Prefix of the reply listing valid answers
    pub invalid_answer_message: String,
    /// Queue tag notifications when tagged entries are recorded
    pub notifications_enabled: bool,
    /// Exact text that ends the current session, `None` to disable
    pub session_end_trigger: Option<String>,
    /// Idle time after which the sweeper injects a timeout
    pub timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            invalid_answer_message: DEFAULT_INVALID_ANSWER_MESSAGE.to_string(),
            notifications_enabled: false,
            session_end_trigger: Some(DEFAULT_SESSION_END_TRIGGER.to_string()),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. An empty end trigger disables it.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            invalid_answer_message: lookup("SURVEY_INVALID_ANSWER_MESSAGE")
                .unwrap_or(defaults.invalid_answer_message),
            notifications_enabled: match lookup("SURVEY_NOTIFICATIONS") {
                Some(value) => parse_bool("SURVEY_NOTIFICATIONS", &value)?,
                None => defaults.notifications_enabled,
            },
            session_end_trigger: match lookup("SURVEY_SESSION_END_TRIGGER") {
                Some(value) if value.is_empty() => None,
                Some(value) => Some(value),
                None => defaults.session_end_trigger,
            },
            timeout_seconds: match lookup("SURVEY_TIMEOUT_SECONDS") {
                Some(value) => parse_number("SURVEY_TIMEOUT_SECONDS", &value)?,
                None => defaults.timeout_seconds,
            },
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Process-level settings for the service binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub db_path: PathBuf,
    pub trees_path: PathBuf,
    pub port: u16,
    pub sweep_interval: Duration,
    /// How long a connection's actor lingers without traffic
    pub runtime_idle: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
        let base = PathBuf::from(home).join(".decision-survey");
        Ok(Self {
            db_path: lookup("SURVEY_DB_PATH").map_or_else(|| base.join("survey.db"), PathBuf::from),
            trees_path: lookup("SURVEY_TREES_PATH")
                .map_or_else(|| base.join("trees.json"), PathBuf::from),
            port: match lookup("SURVEY_PORT") {
                Some(value) => parse_number("SURVEY_PORT", &value)?,
                None => DEFAULT_PORT,
            },
            // tokio intervals cannot have a zero period
            sweep_interval: parse_positive_secs(
                "SURVEY_SWEEP_INTERVAL_SECONDS",
                lookup("SURVEY_SWEEP_INTERVAL_SECONDS"),
                DEFAULT_SWEEP_INTERVAL_SECONDS,
            )?,
            runtime_idle: parse_positive_secs(
                "SURVEY_RUNTIME_IDLE_SECONDS",
                lookup("SURVEY_RUNTIME_IDLE_SECONDS"),
                DEFAULT_RUNTIME_IDLE_SECONDS,
            )?,
        })
    }
}

fn parse_positive_secs(
    key: &'static str,
    value: Option<String>,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(Duration::from_secs(default));
    };
    match parse_number(key, &value)? {
        0 => Err(ConfigError::Invalid { key, value }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}
