//! Cursor-incremental bindings end to end, against the in-memory source.

mod common;

use async_trait::async_trait;
use batch_capture::commit::{CommitError, Committer};
use batch_capture::{BindingCheckpoint, BindingConfig, ErrorClass};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use sync_core::{Document, Value};
use tokio_util::sync::CancellationToken;

fn cursor_of(checkpoint: &BindingCheckpoint) -> Vec<Value> {
    checkpoint.cursor().unwrap().values.clone()
}

#[tokio::test(start_paused = true)]
async fn test_updated_at_scenario() {
    let h = Harness::new();
    h.source.create_table(users_table());
    h.source.insert("users", user(1, "2024-01-01"));
    h.source.insert("users", user(2, "2024-01-02"));
    let binding = users_binding();

    let report = h.run_once(&[binding.clone()]).await;
    assert_eq!(report.binding("users").unwrap().rows, 2);
    assert_eq!(h.emitted("users", "id"), vec![1, 2]);
    let checkpoint = h.checkpoint(&binding).await.unwrap();
    assert_eq!(cursor_of(&checkpoint), vec![date("2024-01-02")]);
    assert_eq!(checkpoint.last_polled, Some(t0()));

    h.source.insert("users", user(3, "2024-01-03"));
    h.run_once(&[binding.clone()]).await;

    let queries = h.source.queries_for("users");
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].sql, "SELECT * FROM \"users\" ORDER BY \"updated_at\"");
    assert_eq!(
        queries[1].inline(),
        "SELECT * FROM \"users\" WHERE \"updated_at\" > '2024-01-02' ORDER BY \"updated_at\""
    );
    assert_eq!(h.emitted("users", "id"), vec![1, 2, 3]);
    assert_eq!(
        cursor_of(&h.checkpoint(&binding).await.unwrap()),
        vec![date("2024-01-03")]
    );

    let docs = h.sink.documents("users");
    assert_eq!(docs[2].key.as_deref(), Some("[3]"));
    assert_eq!(docs[2].body["updated_at"], "2024-01-03");
    assert_eq!(docs[2].body["_meta"]["binding"], "users");
}

#[tokio::test(start_paused = true)]
async fn test_no_duplicates_without_crashes() {
    let h = Harness::new();
    h.source.create_table(users_table());
    h.source.insert("users", user(1, "2024-01-01"));
    h.source.insert("users", user(2, "2024-01-02"));
    let binding = users_binding();

    let report = h.run_for(&[binding], Duration::from_secs(12 * 60)).await;
    assert_eq!(report.binding("users").unwrap().polls, 3);
    assert_eq!(h.emitted("users", "id"), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_crash_between_append_and_checkpoint_redelivers() {
    let h = Harness::new();
    h.source.create_table(users_table());
    h.source.insert("users", user(1, "2024-01-01"));
    h.source.insert("users", user(2, "2024-01-02"));
    let binding = users_binding();

    h.store.fail_next_stores(1);
    let report = h.run_once(&[binding.clone()]).await;
    let error = report.binding("users").unwrap().error.as_ref().unwrap();
    assert_eq!(error.class(), ErrorClass::Transient);
    assert!(error.to_string().contains("checkpoint write failed"));
    assert!(h.checkpoint(&binding).await.is_none());
    assert_eq!(h.emitted("users", "id"), vec![1, 2]);

    // Restart: the documents are delivered again, never skipped.
    h.run_once(&[binding.clone()]).await;
    assert_eq!(h.emitted("users", "id"), vec![1, 2, 1, 2]);
    assert_eq!(
        cursor_of(&h.checkpoint(&binding).await.unwrap()),
        vec![date("2024-01-02")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cursor_never_moves_backwards() {
    let h = Harness::new();
    h.source.create_table(users_table());
    h.source.insert("users", user(1, "2024-01-02"));
    let binding = users_binding();
    h.run_once(&[binding.clone()]).await;

    // A backdated row is below the watermark and never re-read.
    h.source.insert("users", user(2, "2023-12-31"));
    let report = h.run_once(&[binding.clone()]).await;
    assert_eq!(report.binding("users").unwrap().rows, 0);
    let checkpoint = h.checkpoint(&binding).await.unwrap();
    assert_eq!(cursor_of(&checkpoint), vec![date("2024-01-02")]);
    assert!(checkpoint.last_polled.unwrap() > t0());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_then_recovery() {
    let h = Harness::new();
    h.source.create_table(users_table());
    h.source.insert("users", user(1, "2024-01-01"));
    let binding = users_binding();

    h.source.fail_next_queries(1);
    let report = h.run_for(&[binding.clone()], Duration::from_secs(6 * 60)).await;
    let users = report.binding("users").unwrap();
    assert_eq!(users.failures, 1);
    assert_eq!(users.polls, 1);
    assert!(users.error.is_none());
    assert_eq!(h.emitted("users", "id"), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_mid_stream_failure_discards_poll() {
    let h = Harness::new();
    h.source.create_table(users_table());
    for id in 1..=3 {
        h.source.insert("users", user(id, &format!("2024-01-0{id}")));
    }
    let binding = users_binding();

    h.source.fail_after_rows(2);
    let report = h.run_once(&[binding.clone()]).await;
    assert_eq!(
        report.binding("users").unwrap().error.as_ref().unwrap().class(),
        ErrorClass::Transient
    );
    assert!(h.sink.documents("users").is_empty());
    assert!(h.checkpoint(&binding).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_failures_become_fatal() {
    let h = Harness::new();
    h.source.create_table(users_table());
    let binding = users_binding();

    h.source.fail_next_queries(100);
    let report = h.run_for(&[binding], Duration::from_secs(3600)).await;
    let users = report.binding("users").unwrap();
    assert_eq!(users.failures, 5);
    let error = users.error.as_ref().unwrap();
    assert_eq!(error.class(), ErrorClass::Fatal);
    assert!(error.to_string().contains("5 consecutive failed polls"));
}

#[tokio::test(start_paused = true)]
async fn test_commit_every_rows_commits_at_cursor_boundaries() {
    let h = Harness::new();
    h.source.create_table(users_table());
    for (id, day) in [(1, "01"), (2, "01"), (3, "02"), (4, "02"), (5, "03")] {
        h.source.insert("users", user(id, &format!("2024-01-{day}")));
    }
    let mut binding = users_binding();
    binding.commit_every_rows = Some(2);

    // The stream drops after row 4: rows 1-2 were committed at cursor
    // 2024-01-01, rows 3-4 were pending.
    h.source.fail_after_rows(4);
    h.run_once(&[binding.clone()]).await;
    assert_eq!(h.emitted("users", "id"), vec![1, 2]);
    assert_eq!(
        cursor_of(&h.checkpoint(&binding).await.unwrap()),
        vec![date("2024-01-01")]
    );

    let report = h.run_once(&[binding.clone()]).await;
    assert!(report.binding("users").unwrap().error.is_none());
    assert_eq!(h.emitted("users", "id"), vec![1, 2, 3, 4, 5]);
    assert_eq!(
        cursor_of(&h.checkpoint(&binding).await.unwrap()),
        vec![date("2024-01-03")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_poll_timeout_aborts_fetch() {
    let h = Harness::new();
    h.source.create_table(users_table());
    h.source.insert("users", user(1, "2024-01-01"));
    let binding = users_binding();

    h.source.stall_next_queries(1);
    let mut settings = once();
    settings.poll_timeout = Duration::from_secs(60);
    let report = h
        .capture(&[binding.clone()], settings)
        .run(CancellationToken::new())
        .await
        .unwrap();

    let error = report.binding("users").unwrap().error.as_ref().unwrap();
    assert_eq!(error.class(), ErrorClass::Transient);
    assert!(error.to_string().contains("timeout of 60s"));
    assert!(h.checkpoint(&binding).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_query_is_not_retried() {
    let h = Harness::new();
    h.source.create_table(users_table());
    let binding = users_binding();

    h.source.reject_next_queries(1);
    let report = h.run_for(&[binding], Duration::from_secs(3600)).await;
    let users = report.binding("users").unwrap();
    assert_eq!(users.error.as_ref().unwrap().class(), ErrorClass::Configuration);
    assert_eq!(h.source.queries_for("users").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_binding_errors_do_not_stop_siblings() {
    let h = Harness::new();
    h.source.create_table(users_table());
    h.source.insert("users", user(1, "2024-01-01"));
    let missing = BindingConfig::new("ghost", "ghost").with_cursor(&["id"]);

    let report = h
        .run_for(&[missing, users_binding()], Duration::from_secs(60))
        .await;
    let ghost = report.binding("ghost").unwrap();
    assert_eq!(ghost.error.as_ref().unwrap().class(), ErrorClass::Configuration);
    assert!(ghost
        .error
        .as_ref()
        .unwrap()
        .to_string()
        .contains("table ghost does not exist"));
    assert_eq!(report.binding("users").unwrap().polls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_nullable_cursor_fails_sanity_check() {
    let h = Harness::new();
    let mut table = users_table();
    table.columns[2].nullable = true;
    h.source.create_table(table);
    let binding = users_binding();

    let report = h.run_once(&[binding.clone()]).await;
    let error = report.binding("users").unwrap().error.as_ref().unwrap();
    assert_eq!(error.class(), ErrorClass::Sanity);
    assert!(h.source.queries().is_empty());

    let mut settings = once();
    settings.skip_sanity_checks = true;
    let report = h
        .capture(&[binding], settings)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert!(report.binding("users").unwrap().error.is_none());
}

#[tokio::test]
async fn test_source_sanity_problem_halts_capture() {
    let h = Harness::new();
    h.source.create_table(users_table());
    h.source
        .set_sanity_problems(vec!["statement_timeout (1min) is shorter than poll_timeout".into()]);

    let err = h
        .capture(&[users_binding()], once())
        .run(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_capture_level());
    assert!(err.to_string().contains("statement_timeout"));
}

#[tokio::test]
async fn test_mismatched_state_requires_reset() {
    let h = Harness::new();
    h.source.create_table(users_table());
    let binding = users_binding();
    h.state
        .save(
            &binding.state_key(),
            &BindingCheckpoint::initial(&BindingConfig::new("users", "users")),
        )
        .await
        .unwrap();

    let report = h.run_once(&[binding]).await;
    let error = report.binding("users").unwrap().error.as_ref().unwrap();
    assert_eq!(error.class(), ErrorClass::Configuration);
    assert!(error.to_string().contains("state reset --binding users"));
}

struct FatalCommitter;

#[async_trait]
impl Committer for FatalCommitter {
    async fn check(&self) -> Result<(), CommitError> {
        Ok(())
    }

    async fn append(&self, _binding: &str, _documents: &[Document]) -> Result<(), CommitError> {
        Err(CommitError::Fatal("state store is corrupt".to_string()))
    }

    async fn commit(
        &self,
        _binding: &str,
        _state_key: &str,
        _documents: &[Document],
        _checkpoint: &BindingCheckpoint,
    ) -> Result<(), CommitError> {
        Err(CommitError::Fatal("state store is corrupt".to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_fatal_commit_halts_every_binding() {
    let h = Harness::new();
    h.source.create_table(users_table());
    h.source.create_table(countries_table());
    let slow = BindingConfig::new("countries", "countries").with_poll("24h".parse().unwrap());

    let err = h
        .capture_with(
            &[users_binding(), slow],
            Default::default(),
            Arc::new(FatalCommitter),
        )
        .run(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_capture_level());
    assert!(err.to_string().contains("state store is corrupt"));
}
