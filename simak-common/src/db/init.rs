//! Database initialization
//!
//! Opens the SQLite pool and creates the ingestion schema. Every statement is
//! idempotent, so this runs on every start.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// SQLite busy timeout. Lock errors past this are retried by callers with backoff.
const BUSY_TIMEOUT_MS: u64 = 250;

/// Initialize a file-backed database and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    // Shared by concurrent jobs; the per-student transaction is the unit of isolation
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database on a single connection (tests and dry runs)
///
/// Each SQLite memory connection is its own database, so the pool is pinned
/// to exactly one connection that never expires.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all ingestion tables
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_users_table(pool).await?;
    create_students_table(pool).await?;
    create_academic_records_table(pool).await?;
    create_import_logs_table(pool).await?;
    create_transcript_jobs_table(pool).await?;
    Ok(())
}

/// Login credentials. Student logins are bootstrapped by the ingestion pipeline.
async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            login TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'MAHASISWA',
            must_reset_password INTEGER NOT NULL DEFAULT 1,
            created_by TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Students, keyed by the blind index of their NIM
async fn create_students_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS students (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE REFERENCES users(id),
            identity_hash TEXT NOT NULL UNIQUE,
            identity_ciphertext TEXT NOT NULL,
            name TEXT NOT NULL,
            batch_year INTEGER NOT NULL,
            current_semester INTEGER NOT NULL DEFAULT 1 CHECK (current_semester >= 1),
            ipk REAL NOT NULL DEFAULT 0 CHECK (ipk >= 0.0 AND ipk <= 4.0),
            total_credits INTEGER NOT NULL DEFAULT 0 CHECK (total_credits >= 0),
            created_by TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One row per course attempt. Appended on every import, never deduplicated.
async fn create_academic_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS academic_records (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
            course_code TEXT NOT NULL CHECK (length(course_code) BETWEEN 1 AND 50),
            course_name TEXT NOT NULL DEFAULT '',
            credits INTEGER NOT NULL CHECK (credits >= 0),
            semester INTEGER NOT NULL CHECK (semester >= 1),
            grade_letter TEXT NOT NULL DEFAULT '',
            grade_point REAL NOT NULL CHECK (grade_point >= 0.0 AND grade_point <= 4.0),
            import_log_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_academic_records_student ON academic_records(student_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Import history, one row per uploaded file
async fn create_import_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_logs (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            records_processed INTEGER NOT NULL DEFAULT 0,
            rows_skipped INTEGER NOT NULL DEFAULT 0,
            rows_failed INTEGER NOT NULL DEFAULT 0,
            failed_groups INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Durable transcript job queue
async fn create_transcript_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transcript_jobs (
            id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'QUEUED',
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            last_error TEXT,
            enqueued_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transcript_jobs_state ON transcript_jobs(state, enqueued_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
