//! Data models for the transcript ingestion pipeline

pub mod import_log;
pub mod job;
pub mod raw_row;
pub mod student;
pub mod transcript;

pub use import_log::{ImportLog, ImportStatus, ImportSummary};
pub use job::{JobEvent, TranscriptJobPayload};
pub use raw_row::{CellValue, RawRow};
pub use student::{AcademicRecord, Credential, RiskStatus, Student};
pub use transcript::{MappedRecord, MappingOutcome, RowIssue, RowIssueKind};
