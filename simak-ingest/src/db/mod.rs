//! Database repositories for the ingestion tables
//!
//! Ids are stored as hyphenated UUID text and timestamps as RFC3339 UTC text
//! with microsecond precision, so lexical order matches chronological order.

pub mod academic_records;
pub mod credentials;
pub mod import_logs;
pub mod students;

use chrono::{DateTime, SecondsFormat, Utc};
use simak_common::{Error, Result};
use uuid::Uuid;

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_timestamp() -> String {
    timestamp(Utc::now())
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}
