//! One transcript job, start to finish
//!
//! decode payload → parse → map → persist → settle queue and import log.
//! Parsing and mapping are CPU-bound and run on the blocking pool.

use crate::db::import_logs;
use crate::error::JobError;
use crate::mapper::TranscriptMapper;
use crate::models::{ImportSummary, JobEvent, MappingOutcome, TranscriptJobPayload};
use crate::parser::parse_transcript;
use crate::queue::{ClaimedJob, FailDisposition};
use crate::services::{PersistOutcome, TranscriptService};
use crate::IngestContext;
use tracing::{error, info, warn};

/// Result of a job body that reached the persistence step
#[derive(Debug)]
struct JobReport {
    mapping: MappingOutcome,
    persisted: PersistOutcome,
}

impl JobReport {
    fn summary(&self) -> ImportSummary {
        ImportSummary {
            records_processed: self.persisted.records_inserted,
            rows_skipped: self.mapping.rows_skipped() as u64,
            rows_failed: self.mapping.rows_failed() as u64,
            failed_groups: self.persisted.failed_groups.len() as u64,
        }
    }
}

/// Process a claimed job and settle it
///
/// The import log receives exactly one terminal update when the job is
/// terminal. While a retry is pending it stays PROCESSING. Returns the final
/// event, which is also broadcast to subscribers.
pub async fn process_job(ctx: &IngestContext, job: ClaimedJob) -> JobEvent {
    let payload = match job.payload() {
        Ok(payload) => payload,
        Err(e) => return settle_failure(ctx, &job, None, e).await,
    };
    let log_id = payload.log_id.clone();

    if let Some(log_id) = log_id.as_deref() {
        if let Err(e) = import_logs::mark_processing(&ctx.db, log_id).await {
            warn!(job_id = %job.id, log_id, error = %e, "Failed to mark import log PROCESSING");
        }
    }

    ctx.emit(JobEvent::Started {
        job_id: job.id,
        file_name: payload.file_name.clone(),
    });

    info!(
        job_id = %job.id,
        file_name = %payload.file_name,
        attempt = job.attempts,
        "Processing transcript job"
    );

    match run_job(ctx, &payload).await {
        Ok(report) => settle_success(ctx, &job, log_id.as_deref(), report).await,
        Err(e) => settle_failure(ctx, &job, log_id.as_deref(), e).await,
    }
}

async fn run_job(ctx: &IngestContext, payload: &TranscriptJobPayload) -> Result<JobReport, JobError> {
    let file = payload
        .decode_file()
        .map_err(|e| JobError::Payload(format!("file buffer is not valid base64: {}", e)))?;

    let rows = tokio::task::spawn_blocking(move || parse_transcript(&file))
        .await
        .map_err(|e| JobError::Task(format!("parser task failed: {}", e)))??;

    let mapper = TranscriptMapper::new(ctx.codec.clone(), (*ctx.columns).clone());
    let mapping = tokio::task::spawn_blocking(move || mapper.map_rows(&rows))
        .await
        .map_err(|e| JobError::Task(format!("mapper task failed: {}", e)))?;

    let service = TranscriptService::new(ctx.db.clone(), ctx.codec.clone(), ctx.service_options);
    let persisted = service
        .save_transcript(&mapping.records, &payload.uploaded_by, payload.log_id.as_deref())
        .await;

    if let Some(err) = persisted.job_error() {
        return Err(err);
    }

    Ok(JobReport { mapping, persisted })
}

/// Settle a job whose task panicked before it could settle itself
pub(crate) async fn settle_panicked(ctx: &IngestContext, job: &ClaimedJob, panic: String) -> JobEvent {
    let log_id = job.payload().ok().and_then(|payload| payload.log_id);
    settle_failure(ctx, job, log_id.as_deref(), JobError::Task(panic)).await
}

async fn settle_success(
    ctx: &IngestContext,
    job: &ClaimedJob,
    log_id: Option<&str>,
    report: JobReport,
) -> JobEvent {
    let summary = report.summary();

    if let Err(e) = ctx.queue.complete(job.id).await {
        error!(job_id = %job.id, error = %e, "Failed to mark job DONE");
    }

    if let Some(log_id) = log_id {
        if let Err(e) = import_logs::mark_completed(&ctx.db, log_id, &summary).await {
            error!(job_id = %job.id, log_id, error = %e, "Failed to mark import log COMPLETED");
        }
    }

    info!(
        job_id = %job.id,
        records_processed = summary.records_processed,
        rows_skipped = summary.rows_skipped,
        rows_failed = summary.rows_failed,
        failed_groups = summary.failed_groups,
        "Transcript job completed"
    );

    let event = JobEvent::Completed {
        job_id: job.id,
        records_processed: summary.records_processed,
        failed_groups: report.persisted.failed_groups.len(),
    };
    ctx.emit(event.clone());
    event
}

async fn settle_failure(
    ctx: &IngestContext,
    job: &ClaimedJob,
    log_id: Option<&str>,
    err: JobError,
) -> JobEvent {
    let message = err.to_string();

    let disposition = match ctx.queue.fail(job.id, &message, err.is_retryable()).await {
        Ok(disposition) => disposition,
        Err(e) => {
            error!(job_id = %job.id, error = %e, "Failed to record job failure");
            FailDisposition::Failed
        }
    };
    let will_retry = disposition == FailDisposition::Requeued;

    if !will_retry {
        if let Some(log_id) = log_id {
            if let Err(e) = import_logs::mark_failed(&ctx.db, log_id, &message).await {
                error!(job_id = %job.id, log_id, error = %e, "Failed to mark import log FAILED");
            }
        }
        error!(job_id = %job.id, error = %message, "Transcript job failed");
    }

    let event = JobEvent::Failed {
        job_id: job.id,
        error: message,
        will_retry,
    };
    ctx.emit(event.clone());
    event
}
