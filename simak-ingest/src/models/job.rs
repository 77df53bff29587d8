//! Queue payloads and job lifecycle events

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue message for one uploaded transcript file
///
/// The file travels base64-encoded so the payload stays plain JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptJobPayload {
    pub file_buffer_base64: String,
    pub file_name: String,
    /// Uploading user, for audit attribution
    pub uploaded_by: String,
    #[serde(default)]
    pub log_id: Option<String>,
}

impl TranscriptJobPayload {
    pub fn new(
        file: &[u8],
        file_name: impl Into<String>,
        uploaded_by: impl Into<String>,
        log_id: Option<String>,
    ) -> Self {
        Self {
            file_buffer_base64: STANDARD.encode(file),
            file_name: file_name.into(),
            uploaded_by: uploaded_by.into(),
            log_id,
        }
    }

    pub fn decode_file(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.file_buffer_base64.as_bytes())
    }
}

/// Completion signal observable by schedulers outside the worker
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Started {
        job_id: Uuid,
        file_name: String,
    },
    Completed {
        job_id: Uuid,
        records_processed: u64,
        failed_groups: usize,
    },
    Failed {
        job_id: Uuid,
        error: String,
        will_retry: bool,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Started { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => *job_id,
        }
    }

    /// True for the last event a job emits on this delivery
    pub fn is_terminal(&self) -> bool {
        match self {
            JobEvent::Started { .. } => false,
            JobEvent::Completed { .. } => true,
            JobEvent::Failed { will_retry, .. } => !will_retry,
        }
    }
}
