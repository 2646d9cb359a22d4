use std::time::Duration;

use chrono::FixedOffset;
use shared::{InputZone, ValidationRules};
use thiserror::Error;

use crate::reminder::DEFAULT_GRACE;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:3000";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} must be a whole number of seconds, got {value:?}")]
    Grace { var: &'static str, value: String },
    #[error("{var} must be \"full\" or \"checklist\", got {value:?}")]
    Variant { var: &'static str, value: String },
    #[error("{var} must be true or false, got {value:?}")]
    Flag { var: &'static str, value: String },
    #[error("{var} must be \"local\", \"UTC\" or an offset like +02:00, got {value:?}")]
    Offset { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub backend_url: String,
    pub reminder_grace: Duration,
    pub rules: ValidationRules,
    pub input_zone: InputZone,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            reminder_grace: DEFAULT_GRACE,
            rules: ValidationRules::default(),
            input_zone: InputZone::System,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the config from `lookup`, falling back to defaults for unset
    /// or blank variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = get("TASKLIST_BACKEND_URL") {
            config.backend_url = url.trim_end_matches('/').to_string();
        }

        if let Some(value) = get("TASKLIST_REMINDER_GRACE_SECS") {
            let secs = value.parse::<u64>().map_err(|_| ConfigError::Grace {
                var: "TASKLIST_REMINDER_GRACE_SECS",
                value: value.clone(),
            })?;
            config.reminder_grace = Duration::from_secs(secs);
        }

        if let Some(value) = get("TASKLIST_VARIANT") {
            config.rules = match value.to_ascii_lowercase().as_str() {
                "full" => ValidationRules::default(),
                "checklist" => ValidationRules::checklist(),
                _ => {
                    return Err(ConfigError::Variant {
                        var: "TASKLIST_VARIANT",
                        value,
                    })
                }
            };
        }

        if let Some(value) = get("TASKLIST_REQUIRE_DUE_DATE") {
            config.rules.require_due_date = parse_flag(&value).ok_or(ConfigError::Flag {
                var: "TASKLIST_REQUIRE_DUE_DATE",
                value: value.clone(),
            })?;
        }

        if let Some(value) = get("TASKLIST_UTC_OFFSET") {
            config.input_zone = parse_zone(&value).ok_or(ConfigError::Offset {
                var: "TASKLIST_UTC_OFFSET",
                value: value.clone(),
            })?;
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_zone(value: &str) -> Option<InputZone> {
    match value.to_ascii_lowercase().as_str() {
        "local" => Some(InputZone::System),
        "utc" | "z" => Some(InputZone::utc()),
        _ => value.parse::<FixedOffset>().ok().map(InputZone::Fixed),
    }
}
