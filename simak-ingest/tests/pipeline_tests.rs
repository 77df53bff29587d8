//! End-to-end job processing against an in-memory database
//!
//! Jobs are claimed and processed directly, without the worker pool, so each
//! test observes exactly one delivery.

use simak_common::config::IngestConfig;
use simak_common::db::init_memory_database;
use simak_common::EncryptionKey;
use simak_ingest::db::{academic_records, import_logs, students};
use simak_ingest::mapper::{columns::ColumnTable, TranscriptMapper};
use simak_ingest::models::{ImportStatus, JobEvent, RiskStatus, TranscriptJobPayload};
use simak_ingest::parser::parse_transcript;
use simak_ingest::queue::process_job;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use simak_ingest::error::JobError;
use simak_ingest::security::{verify_password, SealedIdentity};
use simak_ingest::services::TranscriptService;
use simak_ingest::IngestContext;
use sqlx::Row;

const TWO_COURSES: &str = "NIM,NAMA,KODE_MK,NAMA_MK,SKS,NILAI_HURUF\n\
21051201,Budi Santoso,TI001,Algoritma,3,A\n\
21051201,Budi Santoso,TI002,Basis Data,4,B+\n";

async fn setup() -> IngestContext {
    let pool = init_memory_database().await.unwrap();
    IngestContext::new(pool, &EncryptionKey::development(), &IngestConfig::default())
}

/// Create the import log and enqueue the file, as the upload handler does
async fn upload(ctx: &IngestContext, file: &[u8], file_name: &str) -> String {
    let log = import_logs::create_import_log(&ctx.db, file_name, "upm-1").await.unwrap();
    let payload = TranscriptJobPayload::new(file, file_name, "upm-1", Some(log.id.clone()));
    ctx.queue.enqueue(&payload).await.unwrap();
    log.id
}

async fn run_next(ctx: &IngestContext) -> JobEvent {
    let job = ctx.queue.claim_next().await.unwrap().expect("a queued job");
    process_job(ctx, job).await
}

async fn count(ctx: &IngestContext, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(&ctx.db)
        .await
        .unwrap()
}

async fn only_student(ctx: &IngestContext) -> simak_ingest::models::Student {
    let hash = ctx.codec.blind_index("21051201");
    let mut conn = ctx.db.acquire().await.unwrap();
    students::find_by_identity_hash(&mut conn, &hash)
        .await
        .unwrap()
        .expect("student created")
}

#[tokio::test]
async fn test_single_student_end_to_end() {
    let ctx = setup().await;
    let log_id = upload(&ctx, TWO_COURSES.as_bytes(), "nilai.csv").await;

    let event = run_next(&ctx).await;
    assert!(matches!(
        event,
        JobEvent::Completed { records_processed: 2, failed_groups: 0, .. }
    ));

    let log = import_logs::load_import_log(&ctx.db, &log_id).await.unwrap();
    assert_eq!(log.status, ImportStatus::Completed);
    assert_eq!(log.records_processed, 2);
    assert_eq!(log.rows_skipped, 0);
    assert!(log.error_message.is_none());

    assert_eq!(count(&ctx, "students").await, 1);
    assert_eq!(count(&ctx, "academic_records").await, 2);

    let student = only_student(&ctx).await;
    assert_eq!(student.name, "Budi Santoso");
    assert_eq!(student.batch_year, 2021);
    assert_eq!(student.cumulative_index, 3.6);
    assert_eq!(student.total_credits, 7);
    assert_eq!(student.risk_status(), RiskStatus::Safe);

    // Stored identity is sealed and opens back to the NIM
    assert!(!student.identity_ciphertext.contains("21051201"));
    assert_eq!(ctx.codec.open_stored(&student.identity_ciphertext).unwrap(), "21051201");

    let records = academic_records::list_for_student(&ctx.db, student.id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.import_log_id.as_deref() == Some(log_id.as_str())));
    let codes: Vec<&str> = records.iter().map(|r| r.course_code.as_str()).collect();
    assert!(codes.contains(&"TI001") && codes.contains(&"TI002"));
}

#[tokio::test]
async fn test_bootstrapped_credential() {
    let ctx = setup().await;
    upload(&ctx, TWO_COURSES.as_bytes(), "nilai.csv").await;
    run_next(&ctx).await;

    let row = sqlx::query("SELECT login, password_hash, role, must_reset_password FROM users")
        .fetch_one(&ctx.db)
        .await
        .unwrap();

    let login: String = row.get("login");
    let password_hash: String = row.get("password_hash");
    let role: String = row.get("role");
    let must_reset: i64 = row.get("must_reset_password");

    assert_eq!(login, "21051201");
    assert_eq!(role, "MAHASISWA");
    assert_eq!(must_reset, 1);
    assert_ne!(password_hash, "21051201");
    assert!(verify_password(&password_hash, "21051201"));
}

#[tokio::test]
async fn test_reimport_reuses_student_and_appends_records() {
    let ctx = setup().await;

    upload(&ctx, TWO_COURSES.as_bytes(), "nilai.csv").await;
    run_next(&ctx).await;
    upload(&ctx, TWO_COURSES.as_bytes(), "nilai-ulang.csv").await;
    let event = run_next(&ctx).await;
    assert!(matches!(event, JobEvent::Completed { records_processed: 2, .. }));

    assert_eq!(count(&ctx, "students").await, 1);
    assert_eq!(count(&ctx, "users").await, 1);
    assert_eq!(count(&ctx, "academic_records").await, 4);

    // Duplicated records keep the same weighted average
    let student = only_student(&ctx).await;
    assert_eq!(student.cumulative_index, 3.6);
    assert_eq!(student.total_credits, 14);
}

#[tokio::test]
async fn test_invalid_rows_are_skipped_and_counted() {
    let ctx = setup().await;
    let csv = "NIM,NAMA,KODE_MK,SKS,NILAI_HURUF\n\
21051201,Budi,TI001,3,A\n\
,Tanpa NIM,TI002,3,B\n\
21051202,Sari,,2,A\n\
21051202,Sari,TI003,2,C\n";
    let log_id = upload(&ctx, csv.as_bytes(), "campur.csv").await;

    let event = run_next(&ctx).await;
    assert!(matches!(event, JobEvent::Completed { records_processed: 2, .. }));

    let log = import_logs::load_import_log(&ctx.db, &log_id).await.unwrap();
    assert_eq!(log.status, ImportStatus::Completed);
    assert_eq!(log.records_processed, 2);
    assert_eq!(log.rows_skipped, 2);
    assert_eq!(count(&ctx, "students").await, 2);
}

#[tokio::test]
async fn test_header_only_file_fails_import() {
    let ctx = setup().await;
    let log_id = upload(&ctx, b"NIM,NAMA,KODE_MK,SKS,NILAI_HURUF\n", "kosong.csv").await;

    let event = run_next(&ctx).await;
    match event {
        JobEvent::Failed { will_retry, .. } => assert!(!will_retry),
        other => panic!("expected failure, got {:?}", other),
    }

    let log = import_logs::load_import_log(&ctx.db, &log_id).await.unwrap();
    assert_eq!(log.status, ImportStatus::Failed);
    assert!(log.error_message.unwrap().contains("empty"));
    assert_eq!(count(&ctx, "students").await, 0);
}

#[tokio::test]
async fn test_unsupported_file_fails_import() {
    let ctx = setup().await;
    let log_id = upload(&ctx, &[0xFF, 0xFE, 0x00, 0x81, 0x9C, 0xFF], "foto.bin").await;

    run_next(&ctx).await;

    let log = import_logs::load_import_log(&ctx.db, &log_id).await.unwrap();
    assert_eq!(log.status, ImportStatus::Failed);
    assert!(log.error_message.unwrap().contains("Unsupported file format"));
}

#[tokio::test]
async fn test_all_groups_failing_fails_import() {
    let ctx = setup().await;

    // Login 21051201 already belongs to a different student
    sqlx::query(
        "INSERT INTO users (id, login, password_hash, role, created_by) \
         VALUES ('00000000-0000-4000-8000-000000000001', '21051201', 'x', 'MAHASISWA', 'seed')",
    )
    .execute(&ctx.db)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO students (id, user_id, identity_hash, identity_ciphertext, name, batch_year, created_by) \
         VALUES ('00000000-0000-4000-8000-000000000002', '00000000-0000-4000-8000-000000000001', 'somebody-else', 'x', 'Lain', 2020, 'seed')",
    )
    .execute(&ctx.db)
    .await
    .unwrap();

    let log_id = upload(&ctx, TWO_COURSES.as_bytes(), "nilai.csv").await;
    let event = run_next(&ctx).await;
    assert!(matches!(event, JobEvent::Failed { will_retry: false, .. }));

    let log = import_logs::load_import_log(&ctx.db, &log_id).await.unwrap();
    assert_eq!(log.status, ImportStatus::Failed);
    assert!(log.error_message.unwrap().contains("No student records could be saved"));
    assert_eq!(count(&ctx, "academic_records").await, 0);
}

#[tokio::test]
async fn test_failed_group_does_not_affect_others() {
    let ctx = setup().await;
    let csv = "NIM,NAMA,KODE_MK,SKS,NILAI_HURUF\n\
21051201,Budi,TI001,3,A\n\
21051202,Sari,TI001,3,B\n\
21051202,Sari,TI002,2,A\n";

    let rows = parse_transcript(csv.as_bytes()).unwrap();
    let mut outcome = TranscriptMapper::new(ctx.codec.clone(), ColumnTable::v1()).map_rows(&rows);
    assert_eq!(outcome.records.len(), 3);

    // Out-of-range grade point trips the CHECK constraint for Sari's group
    let sari = ctx.codec.blind_index("21051202");
    outcome
        .records
        .iter_mut()
        .filter(|r| r.identity_hash == sari)
        .last()
        .unwrap()
        .grade_point = 5.0;

    let service = TranscriptService::new(ctx.db.clone(), ctx.codec.clone(), ctx.service_options);
    let persisted = service.save_transcript(&outcome.records, "upm-1", None).await;

    assert_eq!(persisted.groups_total, 2);
    assert_eq!(persisted.failed_groups, vec![sari[..8].to_string()]);
    assert_eq!(persisted.records_inserted, 1);
    assert!(!persisted.all_groups_failed());

    // Sari's first record was rolled back with the rest of her group
    assert_eq!(count(&ctx, "academic_records").await, 1);
    let budi = only_student(&ctx).await;
    assert_eq!(budi.cumulative_index, 4.0);
    assert_eq!(budi.total_credits, 3);
}

/// Same ciphertext with one bit of the authentication tag flipped
fn tamper_tag(sealed: &SealedIdentity) -> SealedIdentity {
    let stored = sealed.to_storage_string();
    let parts: Vec<&str> = stored.split(':').collect();
    let mut tag = STANDARD.decode(parts[1]).unwrap();
    tag[0] ^= 0x01;
    SealedIdentity::parse(&format!("{}:{}:{}", parts[0], STANDARD.encode(tag), parts[2])).unwrap()
}

#[tokio::test]
async fn test_undecryptable_identity_fails_only_its_group() {
    let ctx = setup().await;
    let csv = "NIM,NAMA,KODE_MK,SKS,NILAI_HURUF\n\
21051201,Budi,TI001,3,A\n\
21051202,Sari,TI001,3,B\n\
21051202,Sari,TI002,2,A\n";

    let rows = parse_transcript(csv.as_bytes()).unwrap();
    let mut outcome = TranscriptMapper::new(ctx.codec.clone(), ColumnTable::v1()).map_rows(&rows);

    let sari = ctx.codec.blind_index("21051202");
    for record in outcome.records.iter_mut().filter(|r| r.identity_hash == sari) {
        record.identity_ciphertext = tamper_tag(&record.identity_ciphertext);
    }

    let service = TranscriptService::new(ctx.db.clone(), ctx.codec.clone(), ctx.service_options);
    let persisted = service.save_transcript(&outcome.records, "upm-1", None).await;

    assert_eq!(persisted.groups_total, 2);
    assert_eq!(persisted.failed_groups, vec![sari[..8].to_string()]);
    assert_eq!(persisted.transient_failures, 0);
    assert_eq!(persisted.students_created, 1);
    assert_eq!(persisted.records_inserted, 1);
    assert!(persisted.job_error().is_none());

    // Nothing was written for Sari: no login, no student, no records
    let sari_logins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE login = '21051202'")
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(sari_logins, 0);
    let mut conn = ctx.db.acquire().await.unwrap();
    assert!(students::find_by_identity_hash(&mut conn, &sari).await.unwrap().is_none());
    drop(conn);

    assert_eq!(count(&ctx, "users").await, 1);
    assert_eq!(count(&ctx, "academic_records").await, 1);
    assert_eq!(only_student(&ctx).await.name, "Budi");
}

#[tokio::test]
async fn test_database_outage_is_retryable() {
    let ctx = setup().await;
    let rows = parse_transcript(TWO_COURSES.as_bytes()).unwrap();
    let outcome = TranscriptMapper::new(ctx.codec.clone(), ColumnTable::v1()).map_rows(&rows);

    ctx.db.close().await;

    let service = TranscriptService::new(ctx.db.clone(), ctx.codec.clone(), ctx.service_options);
    let persisted = service.save_transcript(&outcome.records, "upm-1", None).await;
    assert!(persisted.all_groups_failed());
    assert_eq!(persisted.transient_failures, 1);

    let err = persisted.job_error().expect("job fails");
    assert!(matches!(err, JobError::Database(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_missing_student_table_requeues_then_recovers() {
    let ctx = setup().await;
    let log_id = upload(&ctx, TWO_COURSES.as_bytes(), "nilai.csv").await;

    sqlx::query("ALTER TABLE students RENAME TO students_offline")
        .execute(&ctx.db)
        .await
        .unwrap();

    let event = run_next(&ctx).await;
    assert!(matches!(event, JobEvent::Failed { will_retry: true, .. }));

    // Not terminal yet: the log waits for the next delivery
    let log = import_logs::load_import_log(&ctx.db, &log_id).await.unwrap();
    assert_eq!(log.status, ImportStatus::Processing);
    assert_eq!(ctx.queue.counts().await.unwrap().queued, 1);

    sqlx::query("ALTER TABLE students_offline RENAME TO students")
        .execute(&ctx.db)
        .await
        .unwrap();

    let event = run_next(&ctx).await;
    assert!(matches!(event, JobEvent::Completed { records_processed: 2, .. }));
    let log = import_logs::load_import_log(&ctx.db, &log_id).await.unwrap();
    assert_eq!(log.status, ImportStatus::Completed);
}

#[tokio::test]
async fn test_xlsx_upload() {
    let ctx = setup().await;

    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, header) in ["No. Ind. Mhs.", "Nama Mahasiswa", "Kode MK", "Mata_Kuliah", "SKS", "Nilai"]
        .iter()
        .enumerate()
    {
        sheet.write_string(0, col as u16, *header).unwrap();
    }
    sheet.write_number(1, 0, 21051201.0).unwrap();
    sheet.write_string(1, 1, "Budi Santoso").unwrap();
    sheet.write_string(1, 2, "ti001").unwrap();
    sheet.write_string(1, 3, "Algoritma").unwrap();
    sheet.write_number(1, 4, 3.0).unwrap();
    sheet.write_string(1, 5, "a").unwrap();
    let buffer = workbook.save_to_buffer().unwrap();

    let log_id = upload(&ctx, &buffer, "nilai.xlsx").await;
    let event = run_next(&ctx).await;
    assert!(matches!(event, JobEvent::Completed { records_processed: 1, .. }));

    let log = import_logs::load_import_log(&ctx.db, &log_id).await.unwrap();
    assert_eq!(log.status, ImportStatus::Completed);

    let student = only_student(&ctx).await;
    let records = academic_records::list_for_student(&ctx.db, student.id).await.unwrap();
    assert_eq!(records[0].course_code, "TI001");
    assert_eq!(records[0].grade_letter, "A");
    assert_eq!(student.cumulative_index, 4.0);
}

#[tokio::test]
async fn test_extended_column_table() {
    let pool = init_memory_database().await.unwrap();
    let columns = ColumnTable::v1().with_alias(simak_ingest::mapper::CanonicalField::Nim, "Nomor Mahasiswa");
    assert_eq!(columns.version(), 2);
    let ctx = IngestContext::new(pool, &EncryptionKey::development(), &IngestConfig::default())
        .with_columns(columns);

    let csv = "Nomor Mahasiswa,NAMA,KODE_MK,SKS,NILAI_HURUF\n21051201,Budi,TI001,3,B\n";
    upload(&ctx, csv.as_bytes(), "alias.csv").await;

    let event = run_next(&ctx).await;
    assert!(matches!(event, JobEvent::Completed { records_processed: 1, .. }));
    assert_eq!(only_student(&ctx).await.cumulative_index, 3.0);
}

#[tokio::test]
async fn test_recompute_after_record_removal() {
    let ctx = setup().await;
    upload(&ctx, TWO_COURSES.as_bytes(), "nilai.csv").await;
    run_next(&ctx).await;

    let student = only_student(&ctx).await;
    sqlx::query("DELETE FROM academic_records WHERE course_code = 'TI002'")
        .execute(&ctx.db)
        .await
        .unwrap();

    let service = TranscriptService::new(ctx.db.clone(), ctx.codec.clone(), ctx.service_options);
    assert_eq!(service.recompute_cumulative_index(student.id).await.unwrap(), (4.0, 3));

    let reloaded = students::load_student(&ctx.db, student.id).await.unwrap();
    assert_eq!(reloaded.cumulative_index, 4.0);
    assert_eq!(reloaded.total_credits, 3);
}

#[tokio::test]
async fn test_queue_state_after_processing() {
    let ctx = setup().await;
    upload(&ctx, TWO_COURSES.as_bytes(), "ok.csv").await;
    upload(&ctx, b"NIM\n", "bad.csv").await;

    run_next(&ctx).await;
    run_next(&ctx).await;

    let counts = ctx.queue.counts().await.unwrap();
    assert_eq!(counts.done, 1);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.queued, 0);
    assert_eq!(counts.active, 0);
}
