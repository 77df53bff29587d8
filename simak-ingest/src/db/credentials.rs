//! Student login credentials (`users` table)

use crate::models::Credential;
use crate::security::BootstrapCredential;
use simak_common::{Error, Result};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{now_timestamp, parse_uuid};

pub const STUDENT_ROLE: &str = "MAHASISWA";

pub async fn find_by_login(conn: &mut SqliteConnection, login: &str) -> Result<Option<Credential>> {
    let row = sqlx::query(
        r#"
        SELECT id, login, password_hash, role, must_reset_password
        FROM users
        WHERE login = ?
        "#,
    )
    .bind(login)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| {
        let id: String = row.get("id");
        Ok(Credential {
            id: parse_uuid(&id, "users.id")?,
            login: row.get("login"),
            password_hash: row.get("password_hash"),
            role: row.get("role"),
            must_reset_password: row.get::<i64, _>("must_reset_password") != 0,
        })
    })
    .transpose()
}

/// Look up the credential for `bootstrap.login`, creating it when absent
///
/// A credential created by some other path is reused as is; its password is
/// never overwritten. Returns the credential and whether it was created here.
pub async fn find_or_create(
    conn: &mut SqliteConnection,
    bootstrap: &BootstrapCredential,
    created_by: &str,
) -> Result<(Credential, bool)> {
    let now = now_timestamp();

    let inserted = sqlx::query(
        r#"
        INSERT INTO users (id, login, password_hash, role, must_reset_password, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(login) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&bootstrap.login)
    .bind(&bootstrap.password_hash)
    .bind(STUDENT_ROLE)
    .bind(bootstrap.must_reset_password as i64)
    .bind(created_by)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        > 0;

    let credential = find_by_login(conn, &bootstrap.login)
        .await?
        .ok_or_else(|| Error::Internal("credential missing after insert".to_string()))?;

    Ok((credential, inserted))
}
