//! Student rows, looked up by blind index

use crate::models::Student;
use simak_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{now_timestamp, parse_uuid};

const STUDENT_COLUMNS: &str = "id, user_id, identity_hash, identity_ciphertext, name, \
     batch_year, current_semester, ipk, total_credits";

/// Insert payload for a newly discovered student
#[derive(Debug, Clone)]
pub struct NewStudent<'a> {
    pub user_id: Uuid,
    pub identity_hash: &'a str,
    pub identity_ciphertext: &'a str,
    pub name: &'a str,
    pub batch_year: i32,
    pub current_semester: u32,
    pub created_by: &'a str,
}

fn student_from_row(row: &SqliteRow) -> Result<Student> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");

    Ok(Student {
        id: parse_uuid(&id, "students.id")?,
        user_id: parse_uuid(&user_id, "students.user_id")?,
        identity_hash: row.get("identity_hash"),
        identity_ciphertext: row.get("identity_ciphertext"),
        name: row.get("name"),
        batch_year: row.get::<i64, _>("batch_year") as i32,
        current_semester: row.get::<i64, _>("current_semester") as u32,
        cumulative_index: row.get("ipk"),
        total_credits: row.get::<i64, _>("total_credits") as u32,
    })
}

pub async fn find_by_identity_hash(
    conn: &mut SqliteConnection,
    identity_hash: &str,
) -> Result<Option<Student>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM students WHERE identity_hash = ?",
        STUDENT_COLUMNS
    ))
    .bind(identity_hash)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(student_from_row).transpose()
}

/// Insert unless a student with the same blind index (or user) already exists.
/// Returns true when this call created the row.
pub async fn insert_if_absent(conn: &mut SqliteConnection, student: &NewStudent<'_>) -> Result<bool> {
    let now = now_timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO students (
            id, user_id, identity_hash, identity_ciphertext, name,
            batch_year, current_semester, ipk, total_credits,
            created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(student.user_id.to_string())
    .bind(student.identity_hash)
    .bind(student.identity_ciphertext)
    .bind(student.name)
    .bind(student.batch_year as i64)
    .bind(student.current_semester as i64)
    .bind(student.created_by)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn load_student(pool: &SqlitePool, id: Uuid) -> Result<Student> {
    let row = sqlx::query(&format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("student {}", id)))?;

    student_from_row(&row)
}

pub async fn update_cumulative_index(
    conn: &mut SqliteConnection,
    id: Uuid,
    ipk: f64,
    total_credits: u32,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE students SET ipk = ?, total_credits = ?, updated_at = ? WHERE id = ?",
    )
    .bind(ipk)
    .bind(total_credits as i64)
    .bind(now_timestamp())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("student {}", id)));
    }
    Ok(())
}
