//! Import log: the externally visible status of one uploaded file
//!
//! PENDING → PROCESSING → COMPLETED | FAILED

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "PENDING",
            ImportStatus::Processing => "PROCESSING",
            ImportStatus::Completed => "COMPLETED",
            ImportStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStatus::Completed | ImportStatus::Failed)
    }
}

impl FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ImportStatus::Pending),
            "PROCESSING" => Ok(ImportStatus::Processing),
            "COMPLETED" => Ok(ImportStatus::Completed),
            "FAILED" => Ok(ImportStatus::Failed),
            other => Err(format!("Unknown import status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportLog {
    pub id: String,
    pub file_name: String,
    pub status: ImportStatus,
    pub records_processed: u64,
    pub rows_skipped: u64,
    pub rows_failed: u64,
    pub failed_groups: u64,
    pub error_message: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Counters written alongside a COMPLETED status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub records_processed: u64,
    pub rows_skipped: u64,
    pub rows_failed: u64,
    pub failed_groups: u64,
}
