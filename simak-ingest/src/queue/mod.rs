//! Durable transcript job queue
//!
//! Jobs live in the `transcript_jobs` table, so they survive a restart.
//! Delivery is at-least-once: a job that was ACTIVE when the process died is
//! put back to QUEUED by `recover_abandoned` and processed again.

pub mod pipeline;
pub mod worker;

pub use pipeline::process_job;
pub use worker::{WorkerHandle, WorkerOptions, WorkerPool};

use crate::db::now_timestamp;
use crate::error::JobError;
use crate::models::TranscriptJobPayload;
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use serde::Serialize;
use simak_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A job taken off the queue by one worker
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    /// Delivery number, starting at 1
    pub attempts: u32,
    pub max_attempts: u32,
    payload_json: String,
}

impl ClaimedJob {
    pub fn payload(&self) -> std::result::Result<TranscriptJobPayload, JobError> {
        serde_json::from_str(&self.payload_json).map_err(|e| JobError::Payload(e.to_string()))
    }
}

/// What `fail` did with the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// Back in QUEUED for another delivery
    Requeued,
    /// Terminal
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub queued: u64,
    pub active: u64,
    pub done: u64,
    pub failed: u64,
}

#[derive(Clone)]
pub struct JobQueue {
    db: SqlitePool,
    max_attempts: u32,
    notify: Arc<Notify>,
}

impl JobQueue {
    pub fn new(db: SqlitePool, max_attempts: u32) -> Self {
        Self {
            db,
            max_attempts: max_attempts.max(1),
            notify: Arc::new(Notify::new()),
        }
    }

    pub async fn enqueue(&self, payload: &TranscriptJobPayload) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| Error::Internal(format!("Failed to serialize job payload: {}", e)))?;
        let id_str = id.to_string();
        let now = now_timestamp();

        retry_on_lock("enqueue_job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            sqlx::query(
                r#"
                INSERT INTO transcript_jobs (id, payload, state, attempts, max_attempts, enqueued_at)
                VALUES (?, ?, 'QUEUED', 0, ?, ?)
                "#,
            )
            .bind(&id_str)
            .bind(&payload_json)
            .bind(self.max_attempts as i64)
            .bind(&now)
            .execute(&self.db)
            .await?;
            Ok(())
        })
        .await?;

        info!(job_id = %id, file_name = %payload.file_name, "Job enqueued");
        self.notify.notify_one();
        Ok(id)
    }

    /// Atomically move the oldest QUEUED job to ACTIVE
    pub async fn claim_next(&self) -> Result<Option<ClaimedJob>> {
        let row = retry_on_lock("claim_job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let row = sqlx::query(
                r#"
                UPDATE transcript_jobs
                SET state = 'ACTIVE', attempts = attempts + 1, started_at = ?, finished_at = NULL
                WHERE id = (
                    SELECT id FROM transcript_jobs
                    WHERE state = 'QUEUED'
                    ORDER BY enqueued_at, rowid
                    LIMIT 1
                )
                RETURNING id, payload, attempts, max_attempts
                "#,
            )
            .bind(now_timestamp())
            .fetch_optional(&self.db)
            .await?;
            Ok(row)
        })
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row.get("id");
        let job = ClaimedJob {
            id: crate::db::parse_uuid(&id, "transcript_jobs.id")?,
            attempts: row.get::<i64, _>("attempts") as u32,
            max_attempts: row.get::<i64, _>("max_attempts") as u32,
            payload_json: row.get("payload"),
        };

        debug!(job_id = %job.id, attempt = job.attempts, "Job claimed");
        Ok(Some(job))
    }

    pub async fn complete(&self, id: Uuid) -> Result<()> {
        let id_str = id.to_string();
        let affected = retry_on_lock("complete_job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let result = sqlx::query(
                r#"
                UPDATE transcript_jobs
                SET state = 'DONE', finished_at = ?, last_error = NULL
                WHERE id = ? AND state = 'ACTIVE'
                "#,
            )
            .bind(now_timestamp())
            .bind(&id_str)
            .execute(&self.db)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if affected == 0 {
            return Err(Error::NotFound(format!("active job {}", id)));
        }
        Ok(())
    }

    /// Requeue while `retryable` and attempts remain, otherwise FAILED
    pub async fn fail(&self, id: Uuid, error: &str, retryable: bool) -> Result<FailDisposition> {
        let id_str = id.to_string();
        let state: Option<String> = retry_on_lock("fail_job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let state: Option<String> = sqlx::query_scalar(
                r#"
                UPDATE transcript_jobs
                SET state = CASE WHEN ? AND attempts < max_attempts THEN 'QUEUED' ELSE 'FAILED' END,
                    last_error = ?,
                    finished_at = CASE WHEN ? AND attempts < max_attempts THEN NULL ELSE ? END
                WHERE id = ? AND state = 'ACTIVE'
                RETURNING state
                "#,
            )
            .bind(retryable)
            .bind(error)
            .bind(retryable)
            .bind(now_timestamp())
            .bind(&id_str)
            .fetch_optional(&self.db)
            .await?;
            Ok(state)
        })
        .await?;

        match state.as_deref() {
            Some("QUEUED") => {
                warn!(job_id = %id, error, "Job failed, requeued for another attempt");
                self.notify.notify_one();
                Ok(FailDisposition::Requeued)
            }
            Some(_) => {
                warn!(job_id = %id, error, "Job failed permanently");
                Ok(FailDisposition::Failed)
            }
            None => Err(Error::NotFound(format!("active job {}", id))),
        }
    }

    /// ACTIVE jobs left behind by a dead worker go back to QUEUED
    pub async fn recover_abandoned(&self) -> Result<u64> {
        let recovered = retry_on_lock("recover_jobs", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let result = sqlx::query(
                "UPDATE transcript_jobs SET state = 'QUEUED', started_at = NULL WHERE state = 'ACTIVE'",
            )
            .execute(&self.db)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if recovered > 0 {
            warn!(recovered, "Requeued jobs abandoned by a previous worker");
            self.notify.notify_one();
        }
        Ok(recovered)
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM transcript_jobs GROUP BY state")
            .fetch_all(&self.db)
            .await?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let n = row.get::<i64, _>("n") as u64;
            match row.get::<String, _>("state").as_str() {
                "QUEUED" => counts.queued = n,
                "ACTIVE" => counts.active = n,
                "DONE" => counts.done = n,
                "FAILED" => counts.failed = n,
                other => warn!(state = other, "Unknown job state in queue table"),
            }
        }
        Ok(counts)
    }

    /// Last error recorded for a job
    pub async fn last_error(&self, id: Uuid) -> Result<Option<String>> {
        let row = sqlx::query("SELECT last_error FROM transcript_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        Ok(row.get("last_error"))
    }

    /// Resolves on the next enqueue or requeue
    pub(crate) async fn notified(&self) {
        self.notify.notified().await
    }
}
