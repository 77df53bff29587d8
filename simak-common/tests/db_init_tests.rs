//! Database initialization tests
//!
//! Covers automatic creation, idempotent re-open, and the schema constraints
//! the ingestion pipeline relies on.

use simak_common::db::init::{create_schema, init_database, init_memory_database};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("simak.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("simak.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_schema_creation_is_idempotent() {
    let pool = init_memory_database().await.unwrap();

    create_schema(&pool).await.unwrap();
    create_schema(&pool).await.unwrap();

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    for expected in ["academic_records", "import_logs", "students", "transcript_jobs", "users"] {
        assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_identity_hash_is_unique() {
    let pool = init_memory_database().await.unwrap();

    for (user_id, login) in [("u1", "21051201"), ("u2", "21051202")] {
        sqlx::query("INSERT INTO users (id, login, password_hash, created_by) VALUES (?, ?, 'x', 'admin')")
            .bind(user_id)
            .bind(login)
            .execute(&pool)
            .await
            .unwrap();
    }

    sqlx::query(
        r#"
        INSERT INTO students (id, user_id, identity_hash, identity_ciphertext, name, batch_year, created_by)
        VALUES ('s1', 'u1', 'hash-a', 'ct', 'Ahmad', 2021, 'admin')
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let duplicate = sqlx::query(
        r#"
        INSERT INTO students (id, user_id, identity_hash, identity_ciphertext, name, batch_year, created_by)
        VALUES ('s2', 'u2', 'hash-a', 'ct', 'Siti', 2021, 'admin')
        "#,
    )
    .execute(&pool)
    .await;

    assert!(duplicate.is_err(), "identity_hash must be unique");
}

#[tokio::test]
async fn test_grade_point_range_enforced() {
    let pool = init_memory_database().await.unwrap();

    sqlx::query("INSERT INTO users (id, login, password_hash, created_by) VALUES ('u1', '21051201', 'x', 'admin')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        r#"
        INSERT INTO students (id, user_id, identity_hash, identity_ciphertext, name, batch_year, created_by)
        VALUES ('s1', 'u1', 'hash-a', 'ct', 'Ahmad', 2021, 'admin')
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let out_of_range = sqlx::query(
        r#"
        INSERT INTO academic_records (id, student_id, course_code, credits, semester, grade_point)
        VALUES ('r1', 's1', 'TI001', 3, 1, 4.5)
        "#,
    )
    .execute(&pool)
    .await;

    assert!(out_of_range.is_err(), "grade_point above 4.0 must be rejected");
}
