//! CLI command tests
//!
//! This module contains all tests for the CLI commands.

use std::io::Write;

use chrono::NaiveDate;
use tally_core::db::Database;
use tally_core::models::{Category, JobStatus, NewTransaction};
use tally_core::{EngineConfig, RuleTable};

use crate::commands::{self, truncate, Engine};

fn setup_test_db() -> Database {
    Database::in_memory().unwrap()
}

/// Rules only; the AI tier stays off so results are deterministic
fn test_engine() -> Engine {
    Engine::new(EngineConfig::default(), RuleTable::embedded().unwrap(), None)
}

fn insert(db: &Database, user_id: i64, description: &str, amount: f64) -> i64 {
    let tx = NewTransaction {
        date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        description: description.to_string(),
        amount,
        merchant_name: None,
        external_id: None,
    };
    db.insert_transaction(user_id, &tx).unwrap().id()
}

fn write_csv(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

// ========== Helpers ==========

#[test]
fn test_truncate() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("a long description", 10), "a long ...");
    // Multi-byte characters are never split
    assert_eq!(truncate("CAFÉ ÉCLAIR ÉTOILE", 8), "CAFÉ ...");
}

#[test]
fn test_cmd_categories() {
    assert!(commands::cmd_categories().is_ok());
}

#[test]
fn test_cmd_init_creates_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");

    commands::cmd_init(&path, true).unwrap();
    assert!(path.exists());
}

// ========== Ingest ==========

#[tokio::test]
async fn test_cmd_ingest() {
    let db = setup_test_db();
    let engine = test_engine();
    let csv = write_csv(
        "date,description,amount,external_id\n\
         2024-03-01,GUSTO PAYROLL 0301,-8200.00,a1\n\
         2024-03-03,CHECKCARD 0303 SHELL OIL 57444,-48.10,a2\n\
         2024-03-04,QWERTY HOLDINGS,-99.00,a3\n",
    );

    commands::cmd_ingest(&db, &engine, 1, csv.path()).await.unwrap();
    assert_eq!(db.count_transactions(1).unwrap(), 3);
    // Unknown merchant with no AI tier lands in review
    assert_eq!(db.count_needs_review(1).unwrap(), 1);

    // Re-ingesting the same export adds nothing
    commands::cmd_ingest(&db, &engine, 1, csv.path()).await.unwrap();
    assert_eq!(db.count_transactions(1).unwrap(), 3);
}

#[tokio::test]
async fn test_cmd_ingest_missing_file() {
    let db = setup_test_db();
    let engine = test_engine();

    let result = commands::cmd_ingest(
        &db,
        &engine,
        1,
        std::path::Path::new("/nonexistent/sync.csv"),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cmd_ingest_bad_csv() {
    let db = setup_test_db();
    let engine = test_engine();
    let csv = write_csv("when,what\n2024-03-01,GUSTO\n");

    let result = commands::cmd_ingest(&db, &engine, 1, csv.path()).await;
    assert!(result.is_err());
    assert_eq!(db.count_transactions(1).unwrap(), 0);
}

#[tokio::test]
async fn test_cmd_categorize_pending() {
    let db = setup_test_db();
    let engine = test_engine();
    let id = insert(&db, 1, "GUSTO PAYROLL 0301", -8200.0);

    commands::cmd_categorize(&db, &engine, 1, 100).await.unwrap();

    let tx = db.get_transaction(1, id).unwrap().unwrap();
    assert_eq!(tx.category, Some(Category::Payroll));

    // Nothing left to do
    commands::cmd_categorize(&db, &engine, 1, 100).await.unwrap();
}

#[tokio::test]
async fn test_cmd_test_saves_nothing() {
    let db = setup_test_db();
    let engine = test_engine();

    commands::cmd_test(&db, &engine, 1, "STARBUCKS #4821 SEATTLE WA")
        .await
        .unwrap();
    assert_eq!(db.count_transactions(1).unwrap(), 0);
}

// ========== Review + corrections ==========

#[tokio::test]
async fn test_cmd_correct_learns_pattern() {
    let db = setup_test_db();
    let engine = test_engine();
    let id = insert(&db, 1, "STARBUCKS #4821 SEATTLE WA", -5.75);
    commands::cmd_categorize(&db, &engine, 1, 100).await.unwrap();

    commands::cmd_review(&db, 1, 20).unwrap();
    commands::cmd_correct(&db, 1, id, "meals_entertainment").unwrap();

    let tx = db.get_transaction(1, id).unwrap().unwrap();
    assert_eq!(tx.category, Some(Category::MealsEntertainment));
    assert!(!tx.needs_review);

    let patterns = db.list_learned_patterns(1).unwrap();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].merchant_token, "starbucks seattle wa");

    let audit = db.list_audit_log(10).unwrap();
    assert_eq!(audit[0].actor, "cli");
    assert_eq!(audit[0].action, "correct_category");
}

#[test]
fn test_cmd_correct_invalid_category() {
    let db = setup_test_db();
    let id = insert(&db, 1, "STARBUCKS #4821 SEATTLE WA", -5.75);

    assert!(commands::cmd_correct(&db, 1, id, "Snacks").is_err());
    assert!(db.list_learned_patterns(1).unwrap().is_empty());
}

#[test]
fn test_cmd_correct_other_users_transaction() {
    let db = setup_test_db();
    let id = insert(&db, 1, "STARBUCKS #4821 SEATTLE WA", -5.75);

    assert!(commands::cmd_correct(&db, 2, id, "Travel").is_err());
}

#[test]
fn test_cmd_review_empty() {
    let db = setup_test_db();
    assert!(commands::cmd_review(&db, 1, 20).is_ok());
}

#[test]
fn test_cmd_patterns_forget() {
    let db = setup_test_db();
    let id = insert(&db, 1, "STARBUCKS #4821 SEATTLE WA", -5.75);
    commands::cmd_correct(&db, 1, id, "Travel").unwrap();

    commands::cmd_patterns_list(&db, 1).unwrap();
    commands::cmd_patterns_forget(&db, 1, "starbucks seattle wa").unwrap();
    assert!(db.list_learned_patterns(1).unwrap().is_empty());

    // Already gone
    assert!(commands::cmd_patterns_forget(&db, 1, "starbucks seattle wa").is_err());
}

// ========== Rules ==========

#[test]
fn test_cmd_rules() {
    let rules = RuleTable::embedded().unwrap();
    assert!(commands::cmd_rules_list(&rules).is_ok());
    assert!(commands::cmd_rules_test(&rules, "CHECKCARD 0412 SHELL OIL 57444").is_ok());
    assert!(commands::cmd_rules_test(&rules, "QWERTY HOLDINGS").is_ok());
}

// ========== Jobs ==========

#[tokio::test]
async fn test_cmd_recategorize_applies_corrections() {
    let db = setup_test_db();
    let engine = test_engine();
    let first = insert(&db, 1, "QWERTY HOLDINGS 0301", -99.0);
    let second = insert(&db, 1, "QWERTY HOLDINGS 0402", -120.0);
    commands::cmd_categorize(&db, &engine, 1, 100).await.unwrap();

    commands::cmd_correct(&db, 1, first, "Contractors").unwrap();
    commands::cmd_recategorize(&db, &engine, 1, None, Some(1))
        .await
        .unwrap();

    let tx = db.get_transaction(1, second).unwrap().unwrap();
    assert_eq!(tx.category, Some(Category::Contractors));
    assert!(!tx.needs_review);

    let jobs = db.list_jobs(1, 10).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(jobs[0].processed, 2);

    commands::cmd_jobs_list(&db, 1).unwrap();
    commands::cmd_job_show(&db, jobs[0].id).unwrap();
    // Completed jobs can't be cancelled
    assert!(commands::cmd_job_cancel(&db, jobs[0].id).is_err());
}

#[tokio::test]
async fn test_cmd_recategorize_resume_checks_user() {
    let db = setup_test_db();
    let engine = test_engine();
    insert(&db, 1, "GUSTO PAYROLL 0301", -8200.0);

    let job = tally_core::recategorize::start_recategorize(&db, 1).unwrap();
    tally_core::recategorize::request_cancel(&db, job.id).unwrap();
    db.finish_job(job.id, JobStatus::Cancelled, None).unwrap();

    let result = commands::cmd_recategorize(&db, &engine, 2, Some(job.id), None).await;
    assert!(result.is_err());
    // The job was left alone
    let job = db.get_job(job.id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
}

#[test]
fn test_cmd_job_show_missing() {
    let db = setup_test_db();
    assert!(commands::cmd_job_show(&db, 99).is_err());
}
