//! Import log repository
//!
//! Status transitions are guarded in SQL: terminal updates only touch rows
//! that are not yet COMPLETED or FAILED, so a log gets at most one outcome.

use crate::models::{ImportLog, ImportStatus, ImportSummary};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use simak_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{now_timestamp, parse_timestamp};

pub const RECENT_IMPORTS_LIMIT: u32 = 20;

const LOG_COLUMNS: &str = "id, file_name, status, records_processed, rows_skipped, rows_failed, \
     failed_groups, error_message, created_by, created_at, updated_at";

fn log_from_row(row: &SqliteRow) -> Result<ImportLog> {
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(ImportLog {
        id: row.get("id"),
        file_name: row.get("file_name"),
        status: status.parse::<ImportStatus>().map_err(Error::Internal)?,
        records_processed: row.get::<i64, _>("records_processed") as u64,
        rows_skipped: row.get::<i64, _>("rows_skipped") as u64,
        rows_failed: row.get::<i64, _>("rows_failed") as u64,
        failed_groups: row.get::<i64, _>("failed_groups") as u64,
        error_message: row.get("error_message"),
        created_by: row.get("created_by"),
        created_at: parse_timestamp(&created_at, "import_logs.created_at")?,
        updated_at: parse_timestamp(&updated_at, "import_logs.updated_at")?,
    })
}

/// New PENDING log for an uploaded file
pub async fn create_import_log(pool: &SqlitePool, file_name: &str, created_by: &str) -> Result<ImportLog> {
    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();

    retry_on_lock("create_import_log", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO import_logs (id, file_name, status, created_by, created_at, updated_at)
            VALUES (?, ?, 'PENDING', ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(file_name)
        .bind(created_by)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await?;

    load_import_log(pool, &id).await
}

/// PENDING → PROCESSING. Also accepts PROCESSING so a redelivered job can re-mark.
pub async fn mark_processing(pool: &SqlitePool, id: &str) -> Result<bool> {
    let applied = retry_on_lock("mark_processing", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE import_logs SET status = 'PROCESSING', updated_at = ?
            WHERE id = ? AND status IN ('PENDING', 'PROCESSING')
            "#,
        )
        .bind(now_timestamp())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    })
    .await?;

    Ok(report_transition(applied, id, "mark_processing"))
}

pub async fn mark_completed(pool: &SqlitePool, id: &str, summary: &ImportSummary) -> Result<bool> {
    let applied = retry_on_lock("mark_completed", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE import_logs
            SET status = 'COMPLETED', updated_at = ?, error_message = NULL,
                records_processed = ?, rows_skipped = ?, rows_failed = ?, failed_groups = ?
            WHERE id = ? AND status NOT IN ('COMPLETED', 'FAILED')
            "#,
        )
        .bind(now_timestamp())
        .bind(summary.records_processed as i64)
        .bind(summary.rows_skipped as i64)
        .bind(summary.rows_failed as i64)
        .bind(summary.failed_groups as i64)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    })
    .await?;

    Ok(report_transition(applied, id, "mark_completed"))
}

pub async fn mark_failed(pool: &SqlitePool, id: &str, message: &str) -> Result<bool> {
    let applied = retry_on_lock("mark_failed", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE import_logs
            SET status = 'FAILED', updated_at = ?, error_message = ?
            WHERE id = ? AND status NOT IN ('COMPLETED', 'FAILED')
            "#,
        )
        .bind(now_timestamp())
        .bind(message)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    })
    .await?;

    Ok(report_transition(applied, id, "mark_failed"))
}

fn report_transition(applied: bool, id: &str, operation: &str) -> bool {
    if !applied {
        tracing::warn!(log_id = %id, operation, "Import log transition rejected (missing or already terminal)");
    }
    applied
}

pub async fn load_import_log(pool: &SqlitePool, id: &str) -> Result<ImportLog> {
    let row = sqlx::query(&format!("SELECT {} FROM import_logs WHERE id = ?", LOG_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("import log {}", id)))?;

    log_from_row(&row)
}

/// Most recent logs first
pub async fn recent_import_logs(pool: &SqlitePool, limit: u32) -> Result<Vec<ImportLog>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM import_logs ORDER BY created_at DESC, rowid DESC LIMIT ?",
        LOG_COLUMNS
    ))
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(log_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use simak_common::db::init_memory_database;

    #[tokio::test]
    async fn test_lifecycle_to_completed() {
        let pool = init_memory_database().await.unwrap();
        let log = create_import_log(&pool, "nilai.xlsx", "upm-1").await.unwrap();
        assert_eq!(log.status, ImportStatus::Pending);

        assert!(mark_processing(&pool, &log.id).await.unwrap());
        let summary = ImportSummary {
            records_processed: 2,
            rows_skipped: 1,
            rows_failed: 0,
            failed_groups: 0,
        };
        assert!(mark_completed(&pool, &log.id, &summary).await.unwrap());

        let loaded = load_import_log(&pool, &log.id).await.unwrap();
        assert_eq!(loaded.status, ImportStatus::Completed);
        assert_eq!(loaded.records_processed, 2);
        assert_eq!(loaded.rows_skipped, 1);
        assert_eq!(loaded.created_by, "upm-1");
    }

    #[tokio::test]
    async fn test_single_terminal_outcome() {
        let pool = init_memory_database().await.unwrap();
        let log = create_import_log(&pool, "nilai.xlsx", "upm-1").await.unwrap();

        assert!(mark_failed(&pool, &log.id, "Parsed sheet is empty").await.unwrap());
        assert!(!mark_completed(&pool, &log.id, &ImportSummary::default()).await.unwrap());
        assert!(!mark_failed(&pool, &log.id, "again").await.unwrap());
        assert!(!mark_processing(&pool, &log.id).await.unwrap());

        let loaded = load_import_log(&pool, &log.id).await.unwrap();
        assert_eq!(loaded.status, ImportStatus::Failed);
        assert_eq!(loaded.error_message.as_deref(), Some("Parsed sheet is empty"));
    }

    #[tokio::test]
    async fn test_missing_log_is_not_found() {
        let pool = init_memory_database().await.unwrap();
        let err = load_import_log(&pool, "nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!mark_processing(&pool, "nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_logs_newest_first() {
        let pool = init_memory_database().await.unwrap();
        for i in 0..25 {
            create_import_log(&pool, &format!("file-{}.csv", i), "upm-1").await.unwrap();
        }

        let recent = recent_import_logs(&pool, RECENT_IMPORTS_LIMIT).await.unwrap();
        assert_eq!(recent.len(), 20);
        assert_eq!(recent[0].file_name, "file-24.csv");
        assert_eq!(recent[19].file_name, "file-5.csv");
    }
}
