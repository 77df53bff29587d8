//! Transcript mapper
//!
//! Converts parsed rows into `MappedRecord`s. The NIM is blind-indexed and
//! sealed here, so plaintext identifiers never leave this layer inside a record.
//!
//! Row problems never abort the batch: rows missing a mandatory field are
//! reported as skipped, rows whose transformation fails are reported as errors,
//! both with their 1-based data-row index.

pub mod columns;
pub mod grading;

pub use columns::{CanonicalField, ColumnTable};
pub use grading::grade_point;

use crate::error::CodecError;
use crate::models::{CellValue, MappedRecord, MappingOutcome, RawRow, RowIssue, RowIssueKind};
use crate::security::IdentityCodec;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const COURSE_CODE_MAX_LEN: usize = 50;
pub const COURSE_NAME_MAX_LEN: usize = 255;
pub const UNKNOWN_STUDENT_NAME: &str = "Unknown Student";

pub struct TranscriptMapper {
    codec: Arc<IdentityCodec>,
    columns: ColumnTable,
}

impl TranscriptMapper {
    pub fn new(codec: Arc<IdentityCodec>, columns: ColumnTable) -> Self {
        Self { codec, columns }
    }

    /// Map all rows, preserving the order of surviving rows.
    /// CPU-bound (AES-GCM + HMAC per row); run under `spawn_blocking`.
    pub fn map_rows(&self, rows: &[RawRow]) -> MappingOutcome {
        let mut outcome = MappingOutcome::default();

        for (idx, raw) in rows.iter().enumerate() {
            let row_number = idx + 1;
            let row = raw.with_normalized_headers();

            let nim = self.optional_text(&row, CanonicalField::Nim);
            let course_code = self.optional_text(&row, CanonicalField::CourseCode);

            let (nim, course_code) = match (nim, course_code) {
                (Some(nim), Some(code)) => (nim, code),
                (nim, code) => {
                    let missing: Vec<&str> = [
                        nim.is_none().then(|| CanonicalField::Nim.label()),
                        code.is_none().then(|| CanonicalField::CourseCode.label()),
                    ]
                    .into_iter()
                    .flatten()
                    .collect();

                    let reason = format!("Missing: {}", missing.join(", "));
                    debug!(row = row_number, reason = %reason, "Row skipped");
                    outcome.skipped.push(RowIssue {
                        row: row_number,
                        kind: RowIssueKind::Skipped,
                        reason,
                    });
                    continue;
                }
            };

            match self.map_row(&row, &nim, &course_code) {
                Ok(record) => outcome.records.push(record),
                Err(e) => {
                    warn!(row = row_number, error = %e, "Row transformation failed");
                    outcome.errors.push(RowIssue {
                        row: row_number,
                        kind: RowIssueKind::Error,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !outcome.errors.is_empty() {
            warn!(errors = outcome.errors.len(), "Mapping finished with row errors");
        }
        info!(
            rows = rows.len(),
            records = outcome.records.len(),
            skipped = outcome.rows_skipped(),
            errors = outcome.rows_failed(),
            "Mapped transcript rows"
        );

        outcome
    }

    fn map_row(
        &self,
        row: &RawRow,
        nim: &str,
        course_code: &str,
    ) -> Result<MappedRecord, CodecError> {
        let nim = nim.to_uppercase();
        let identity_hash = self.codec.blind_index(&nim);
        let identity_ciphertext = self.codec.encrypt(&nim)?;

        let student_name = self
            .optional_text(row, CanonicalField::StudentName)
            .unwrap_or_else(|| UNKNOWN_STUDENT_NAME.to_string());

        let course_name = self
            .optional_text(row, CanonicalField::CourseName)
            .map(|name| truncate_chars(&name, COURSE_NAME_MAX_LEN));

        let grade_letter = self
            .optional_text(row, CanonicalField::GradeLetter)
            .map(|g| grading::normalize_grade(&g))
            .unwrap_or_default();

        let credits = self
            .columns
            .resolve(row, CanonicalField::Credits)
            .map(parse_count)
            .unwrap_or(0);

        let semester_taken = self
            .columns
            .resolve(row, CanonicalField::Semester)
            .map(parse_count)
            .filter(|s| *s >= 1);

        Ok(MappedRecord {
            identity_hash,
            identity_ciphertext,
            student_name,
            course_code: truncate_chars(&course_code.to_uppercase(), COURSE_CODE_MAX_LEN),
            course_name,
            credits,
            grade_point: grade_point(&grade_letter),
            grade_letter,
            semester_taken,
        })
    }

    /// Trimmed text, `None` when not found or blank
    fn optional_text(&self, row: &RawRow, field: CanonicalField) -> Option<String> {
        self.columns
            .resolve(row, field)
            .filter(|cell| !cell.is_blank())
            .map(|cell| cell.as_text().trim().to_string())
    }
}

/// Non-negative whole count; fractions truncate, anything else is 0
fn parse_count(cell: &CellValue) -> u32 {
    match cell.as_number() {
        Some(n) if n.is_finite() && n >= 0.0 => n.trunc().min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
