//! Student resolution and transcript persistence
//!
//! Records are grouped by blind index; each group is one student's unit of
//! work. A group either lands completely (records plus recomputed IPK, in one
//! transaction) or not at all, and a failed group never affects the others.
//!
//! Re-importing a file appends its records again. Students and credentials are
//! resolved idempotently, academic records are not.

use crate::db::{academic_records, credentials, students};
use crate::error::{GroupError, JobError};
use crate::models::{transcript::identity_prefix, MappedRecord, Student};
use crate::security::{derive_credential, IdentityCodec};
use crate::services::academic_calendar::infer_enrollment;
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::utils::pool_monitor::begin_monitored;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use simak_common::config::{CredentialPolicy, IngestConfig};
use simak_common::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Student groups persisted at once
    pub group_concurrency: usize,
    pub credential_policy: CredentialPolicy,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for ServiceOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            group_concurrency: config.group_concurrency.max(1),
            credential_policy: config.credential_policy,
        }
    }
}

/// What one `save_transcript` call did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    pub students_created: usize,
    pub students_reused: usize,
    pub records_inserted: u64,
    pub groups_total: usize,
    /// Identity-hash prefixes of failed groups, in first-appearance order
    pub failed_groups: Vec<String>,
    /// Failed groups whose cause was the database being unavailable
    pub transient_failures: usize,
}

impl PersistOutcome {
    pub fn groups_succeeded(&self) -> usize {
        self.groups_total - self.failed_groups.len()
    }

    /// True when there was work and none of it landed
    pub fn all_groups_failed(&self) -> bool {
        self.groups_total > 0 && self.failed_groups.len() == self.groups_total
    }

    /// Job-level error for an outcome where nothing landed: retryable
    /// `Database` when every group failed on the database itself,
    /// `NoGroupPersisted` otherwise
    pub fn job_error(&self) -> Option<JobError> {
        if !self.all_groups_failed() {
            return None;
        }

        let failed = self.failed_groups.len();
        if self.transient_failures == failed {
            Some(JobError::Database(Error::Internal(format!(
                "all {} student groups failed on database errors",
                failed
            ))))
        } else {
            Some(JobError::NoGroupPersisted { failed })
        }
    }
}

struct GroupSaved {
    created: bool,
    records_inserted: u64,
}

#[derive(Clone)]
pub struct TranscriptService {
    db: SqlitePool,
    codec: Arc<IdentityCodec>,
    options: ServiceOptions,
}

impl TranscriptService {
    pub fn new(db: SqlitePool, codec: Arc<IdentityCodec>, options: ServiceOptions) -> Self {
        Self { db, codec, options }
    }

    /// Persist mapped records, one student group at a time
    ///
    /// Group failures are logged with an identity prefix and collected in the
    /// outcome; they are never returned as an error.
    pub async fn save_transcript(
        &self,
        records: &[MappedRecord],
        uploaded_by: &str,
        import_log_id: Option<&str>,
    ) -> PersistOutcome {
        let groups = group_by_identity(records);
        let mut outcome = PersistOutcome {
            groups_total: groups.len(),
            ..Default::default()
        };

        if groups.is_empty() {
            debug!("No records to save");
            return outcome;
        }

        info!(
            records = records.len(),
            students = groups.len(),
            "Saving transcript records"
        );

        // Futures are built up front so the stream holds no higher-ranked closure
        let pending: Vec<_> = groups
            .iter()
            .enumerate()
            .map(|(order, (identity_hash, group))| {
                Box::pin(async move {
                    let result = self.persist_group(group, uploaded_by, import_log_id).await;
                    (order, identity_hash.as_str(), result)
                })
            })
            .collect();

        let mut results: Vec<(usize, &str, std::result::Result<GroupSaved, GroupError>)> =
            stream::iter(pending)
                .buffer_unordered(self.options.group_concurrency.max(1))
                .collect()
                .await;

        results.sort_by_key(|(order, _, _)| *order);

        for (_, identity_hash, result) in results {
            match result {
                Ok(saved) => {
                    if saved.created {
                        outcome.students_created += 1;
                    } else {
                        outcome.students_reused += 1;
                    }
                    outcome.records_inserted += saved.records_inserted;
                }
                Err(e) => {
                    let prefix = identity_prefix(identity_hash);
                    warn!(identity = %prefix, error = %e, "Student group failed, skipping");
                    if e.is_transient() {
                        outcome.transient_failures += 1;
                    }
                    outcome.failed_groups.push(prefix.to_string());
                }
            }
        }

        info!(
            records_inserted = outcome.records_inserted,
            students_created = outcome.students_created,
            students_reused = outcome.students_reused,
            failed_groups = outcome.failed_groups.len(),
            "Save complete"
        );

        outcome
    }

    async fn persist_group(
        &self,
        group: &[&MappedRecord],
        uploaded_by: &str,
        import_log_id: Option<&str>,
    ) -> std::result::Result<GroupSaved, GroupError> {
        let representative = group
            .first()
            .ok_or_else(|| GroupError::Persistence(Error::Internal("empty student group".to_string())))?;

        let (student, created) = self.resolve_student(representative, uploaded_by).await?;

        let records_inserted = retry_on_lock("insert_student_records", DEFAULT_MAX_LOCK_WAIT_MS, || {
            self.insert_group_records(&student, group, import_log_id)
        })
        .await?;

        debug!(
            identity = %identity_prefix(&student.identity_hash),
            records = records_inserted,
            created,
            "Student group saved"
        );

        Ok(GroupSaved {
            created,
            records_inserted,
        })
    }

    /// Find the student by blind index or create it with a bootstrapped login
    async fn resolve_student(
        &self,
        record: &MappedRecord,
        uploaded_by: &str,
    ) -> std::result::Result<(Student, bool), GroupError> {
        {
            let mut conn = self.db.acquire().await?;
            if let Some(student) = students::find_by_identity_hash(&mut conn, &record.identity_hash).await? {
                return Ok((student, false));
            }
        }

        // Plaintext only lives for credential derivation and batch inference
        let plain_nim = self.codec.decrypt(&record.identity_ciphertext)?;
        let (batch_year, current_semester) = infer_enrollment(&plain_nim, chrono::Local::now().date_naive());

        let policy = self.options.credential_policy;
        let bootstrap = tokio::task::spawn_blocking(move || derive_credential(&plain_nim, policy))
            .await
            .map_err(|e| GroupError::Credential(format!("credential task failed: {}", e)))??;

        let storage_ciphertext = record.identity_ciphertext.to_storage_string();

        let resolved = retry_on_lock("create_student", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut tx = begin_monitored(&self.db, "transcript_service::create_student").await?;

            let (credential, _) = credentials::find_or_create(tx.conn(), &bootstrap, uploaded_by).await?;

            let new_student = students::NewStudent {
                user_id: credential.id,
                identity_hash: &record.identity_hash,
                identity_ciphertext: &storage_ciphertext,
                name: &record.student_name,
                batch_year,
                current_semester,
                created_by: uploaded_by,
            };
            let inserted = students::insert_if_absent(tx.conn(), &new_student).await?;

            let student = students::find_by_identity_hash(tx.conn(), &record.identity_hash)
                .await?
                .ok_or_else(|| {
                    Error::Internal("student could not be created (login already linked)".to_string())
                })?;

            tx.commit().await?;
            Ok((student, inserted))
        })
        .await?;

        if resolved.1 {
            info!(identity = %identity_prefix(&record.identity_hash), batch_year, "Created student");
        }
        Ok(resolved)
    }

    /// All records of one group plus the IPK recompute, in one transaction
    async fn insert_group_records(
        &self,
        student: &Student,
        group: &[&MappedRecord],
        import_log_id: Option<&str>,
    ) -> Result<u64> {
        let mut tx = begin_monitored(&self.db, "transcript_service::insert_records").await?;

        for record in group {
            let new_record = academic_records::NewAcademicRecord {
                student_id: student.id,
                course_code: &record.course_code,
                course_name: record.course_name.as_deref().unwrap_or(""),
                credits: record.credits,
                semester: record
                    .semester_taken
                    .unwrap_or(student.current_semester)
                    .max(1),
                grade_letter: &record.grade_letter,
                grade_point: record.grade_point,
                import_log_id,
            };
            academic_records::insert_record(tx.conn(), &new_record).await?;
        }

        recompute_in(tx.conn(), student.id).await?;
        tx.commit().await?;

        Ok(group.len() as u64)
    }

    /// Recompute IPK and total credits from every stored record of a student
    pub async fn recompute_cumulative_index(&self, student_id: Uuid) -> Result<(f64, u32)> {
        let mut tx = begin_monitored(&self.db, "transcript_service::recompute").await?;
        let totals = recompute_in(tx.conn(), student_id).await?;
        tx.commit().await?;
        Ok(totals)
    }
}

async fn recompute_in(conn: &mut SqliteConnection, student_id: Uuid) -> Result<(f64, u32)> {
    let weights = academic_records::grade_weights(&mut *conn, student_id).await?;
    let (ipk, total_credits) = cumulative_index(&weights);
    students::update_cumulative_index(conn, student_id, ipk, total_credits).await?;
    Ok((ipk, total_credits))
}

/// IPK = Σ(grade_point × credits) / Σcredits, rounded to 2 decimals; 0 when
/// there are no credits
pub fn cumulative_index(weights: &[(f64, u32)]) -> (f64, u32) {
    let total_credits: u64 = weights.iter().map(|(_, credits)| u64::from(*credits)).sum();
    if total_credits == 0 {
        return (0.0, 0);
    }

    let points: f64 = weights
        .iter()
        .map(|(grade_point, credits)| grade_point * f64::from(*credits))
        .sum();

    let ipk = (points / total_credits as f64 * 100.0).round() / 100.0;
    (ipk, total_credits.min(u64::from(u32::MAX)) as u32)
}

/// Group records by blind index, keeping first-appearance order
fn group_by_identity(records: &[MappedRecord]) -> Vec<(String, Vec<&MappedRecord>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&MappedRecord>)> = Vec::new();

    for record in records {
        match index.get(record.identity_hash.as_str()) {
            Some(&slot) => groups[slot].1.push(record),
            None => {
                index.insert(&record.identity_hash, groups.len());
                groups.push((record.identity_hash.clone(), vec![record]));
            }
        }
    }

    groups
}
