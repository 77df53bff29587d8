//! Academic records: one row per course attempt, append-only

use crate::models::AcademicRecord;
use simak_common::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{now_timestamp, parse_timestamp, parse_uuid};

#[derive(Debug, Clone)]
pub struct NewAcademicRecord<'a> {
    pub student_id: Uuid,
    pub course_code: &'a str,
    pub course_name: &'a str,
    pub credits: u32,
    pub semester: u32,
    pub grade_letter: &'a str,
    pub grade_point: f64,
    pub import_log_id: Option<&'a str>,
}

pub async fn insert_record(conn: &mut SqliteConnection, record: &NewAcademicRecord<'_>) -> Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO academic_records (
            id, student_id, course_code, course_name, credits, semester,
            grade_letter, grade_point, import_log_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(record.student_id.to_string())
    .bind(record.course_code)
    .bind(record.course_name)
    .bind(record.credits as i64)
    .bind(record.semester as i64)
    .bind(record.grade_letter)
    .bind(record.grade_point)
    .bind(record.import_log_id)
    .bind(now_timestamp())
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// (grade_point, credits) for every record of a student
pub async fn grade_weights(conn: &mut SqliteConnection, student_id: Uuid) -> Result<Vec<(f64, u32)>> {
    let rows = sqlx::query("SELECT grade_point, credits FROM academic_records WHERE student_id = ?")
        .bind(student_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get::<f64, _>("grade_point"), row.get::<i64, _>("credits") as u32))
        .collect())
}

/// All records of a student in insertion order
pub async fn list_for_student(pool: &SqlitePool, student_id: Uuid) -> Result<Vec<AcademicRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, student_id, course_code, course_name, credits, semester,
               grade_letter, grade_point, import_log_id, created_at
        FROM academic_records
        WHERE student_id = ?
        ORDER BY created_at, rowid
        "#,
    )
    .bind(student_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            let created_at: String = row.get("created_at");
            Ok(AcademicRecord {
                id: parse_uuid(&id, "academic_records.id")?,
                student_id,
                course_code: row.get("course_code"),
                course_name: row.get("course_name"),
                credits: row.get::<i64, _>("credits") as u32,
                semester: row.get::<i64, _>("semester") as u32,
                grade_letter: row.get("grade_letter"),
                grade_point: row.get("grade_point"),
                import_log_id: row.get("import_log_id"),
                created_at: parse_timestamp(&created_at, "academic_records.created_at")?,
            })
        })
        .collect()
}
