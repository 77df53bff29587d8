//! Mapped transcript records and per-row mapping issues

use crate::security::SealedIdentity;
use serde::Serialize;

/// Validated, security-compliant unit of work
///
/// Never carries the plaintext NIM. `identity_hash` and `course_code` are
/// always non-empty; rows that cannot satisfy that are dropped by the mapper.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    /// Blind index of the normalized NIM
    pub identity_hash: String,
    /// AES-256-GCM sealed NIM
    pub identity_ciphertext: SealedIdentity,
    pub student_name: String,
    pub course_code: String,
    pub course_name: Option<String>,
    /// SKS
    pub credits: u32,
    pub grade_letter: String,
    pub grade_point: f64,
    /// Semester column when the sheet carries one
    pub semester_taken: Option<u32>,
}

/// First 8 characters of a blind index, for traceable logs without leaking it
pub fn identity_prefix(identity_hash: &str) -> &str {
    identity_hash.get(..8).unwrap_or(identity_hash)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowIssueKind {
    /// A mandatory field is missing
    Skipped,
    /// Transformation failed
    Error,
}

/// Why one row did not produce a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    /// 1-based data row index
    pub row: usize,
    pub kind: RowIssueKind,
    pub reason: String,
}

/// Result of mapping one uploaded file
#[derive(Debug, Clone, Default)]
pub struct MappingOutcome {
    /// Surviving records, in input order
    pub records: Vec<MappedRecord>,
    pub skipped: Vec<RowIssue>,
    pub errors: Vec<RowIssue>,
}

impl MappingOutcome {
    pub fn rows_skipped(&self) -> usize {
        self.skipped.len()
    }

    pub fn rows_failed(&self) -> usize {
        self.errors.len()
    }
}
