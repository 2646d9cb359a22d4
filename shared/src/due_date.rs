use std::fmt;

use chrono::{
    DateTime, FixedOffset, Local, LocalResult, NaiveDateTime, Offset, SecondsFormat, TimeZone,
    Timelike, Utc,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Format users type due dates in.
pub const INPUT_FORMAT: &str = "YYYY-MM-DD HH:mm";

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DueDateError {
    #[error("due date is empty")]
    Empty,
    #[error("invalid due date {input:?}, expected YYYY-MM-DD HH:mm (e.g. 2025-09-10 14:00)")]
    Invalid { input: String },
    #[error("due date {input:?} does not exist in the local time zone")]
    NonexistentLocalTime { input: String },
}

/// Zone in which user-entered wall-clock times are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputZone {
    #[default]
    System,
    Fixed(FixedOffset),
}

impl InputZone {
    pub fn utc() -> Self {
        InputZone::Fixed(Utc.fix())
    }

    fn resolve(&self, naive: &NaiveDateTime) -> LocalResult<DateTime<Utc>> {
        match self {
            InputZone::System => Local.from_local_datetime(naive).map(|dt| dt.with_timezone(&Utc)),
            InputZone::Fixed(offset) => offset
                .from_local_datetime(naive)
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// A canonical instant, always rendered as UTC with millisecond precision
/// (`2030-01-01T09:00:00.000Z`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DueDate(DateTime<Utc>);

impl DueDate {
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        DueDate(instant)
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }

    /// Parses a stored canonical value. Returns `None` for anything that is
    /// not an RFC 3339 instant, including the empty "no due date" marker.
    pub fn parse_canonical(raw: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|dt| DueDate(dt.with_timezone(&Utc)))
    }

    /// Renders the instant back into the `YYYY-MM-DD HH:mm` input form,
    /// used to prefill an edit form.
    pub fn to_input(&self, zone: InputZone) -> String {
        const OUT: &str = "%Y-%m-%d %H:%M";
        match zone {
            InputZone::System => self.0.with_timezone(&Local).format(OUT).to_string(),
            InputZone::Fixed(offset) => self.0.with_timezone(&offset).format(OUT).to_string(),
        }
    }
}

impl fmt::Display for DueDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl Serialize for DueDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DueDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DueDate::parse_canonical(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid canonical instant {raw:?}")))
    }
}

/// Converts user input into a canonical instant.
///
/// Accepts `YYYY-MM-DD HH:mm` (or with a literal `T`), optional seconds, and
/// full RFC 3339 strings that carry their own offset. Wall-clock input is
/// interpreted in `zone`; an ambiguous local time resolves to the earlier
/// instant.
pub fn normalize(raw: &str, zone: InputZone) -> Result<DueDate, DueDateError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DueDateError::Empty);
    }
    let candidate = trimmed.replacen(' ', "T", 1);
    let invalid = || DueDateError::Invalid {
        input: trimmed.to_string(),
    };

    // chrono parses second 60 as a leap second, which has no canonical
    // rendering; reject it like any other out-of-range time.
    if let Ok(dt) = DateTime::parse_from_rfc3339(&candidate) {
        if dt.nanosecond() >= 1_000_000_000 {
            return Err(invalid());
        }
        return Ok(DueDate(dt.with_timezone(&Utc)));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&candidate, fmt).ok())
        .filter(|naive| naive.nanosecond() < 1_000_000_000)
        .ok_or_else(invalid)?;

    match zone.resolve(&naive) {
        LocalResult::Single(dt) => Ok(DueDate(dt)),
        LocalResult::Ambiguous(earliest, _) => Ok(DueDate(earliest)),
        LocalResult::None => Err(DueDateError::NonexistentLocalTime {
            input: trimmed.to_string(),
        }),
    }
}

/// Like [`normalize`], but blank input means "no due date".
pub fn normalize_optional(raw: &str, zone: InputZone) -> Result<Option<DueDate>, DueDateError> {
    match normalize(raw, zone) {
        Ok(due) => Ok(Some(due)),
        Err(DueDateError::Empty) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Serde adapter for persisted `dueDate` fields, where `""` means none.
pub mod field {
    use super::DueDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<DueDate>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(due) => serializer.collect_str(due),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DueDate>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        if raw.trim().is_empty() {
            return Ok(None);
        }
        DueDate::parse_canonical(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid canonical instant {raw:?}")))
    }
}
