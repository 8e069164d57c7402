//! Full-refresh bindings and deletion inference.

mod common;

use batch_capture::{BindingConfig, ErrorClass, Progress};
use common::*;
use std::time::Duration;
use sync_core::{ColumnDefinition, ColumnType, Operation, TableDefinition, TableRef};

fn countries() -> BindingConfig {
    BindingConfig::new("countries", "countries")
        .with_key(&["code"])
        .with_deletions()
}

fn seed(h: &Harness, codes: &[&str]) {
    h.source
        .set_rows("countries", codes.iter().map(|c| country(c)).collect());
}

fn serialized(docs: &[sync_core::Document]) -> Vec<String> {
    let mut lines: Vec<String> = docs.iter().map(|d| d.body.to_string()).collect();
    lines.sort();
    lines
}

#[tokio::test(start_paused = true)]
async fn test_deleted_row_yields_one_tombstone() {
    let h = Harness::new();
    h.source.create_table(countries_table());
    seed(&h, &["A", "B", "C"]);
    let binding = countries();

    h.run_once(&[binding.clone()]).await;
    let first = h.sink.documents("countries");
    assert_eq!(first.len(), 3);
    assert!(first.iter().all(|d| d.op.is_none()));

    seed(&h, &["A", "C"]);
    let report = h.run_once(&[binding.clone()]).await;
    assert_eq!(report.binding("countries").unwrap().deletions, 1);

    let second: Vec<_> = h.sink.documents("countries").into_iter().skip(3).collect();
    assert_eq!(second.len(), 3);
    assert_eq!(second[0].op, None);
    assert_eq!(second[1].op, None);

    let tombstone = &second[2];
    assert!(tombstone.is_deletion());
    assert_eq!(tombstone.key.as_deref(), Some("[\"B\"]"));
    assert_eq!(tombstone.body["code"], "B");
    assert_eq!(tombstone.body["_meta"]["op"], "d");

    let checkpoint = h.checkpoint(&binding).await.unwrap();
    let snapshot = checkpoint.snapshot().unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(!snapshot.contains("[\"B\"]"));
}

#[tokio::test(start_paused = true)]
async fn test_new_row_is_a_create() {
    let h = Harness::new();
    h.source.create_table(countries_table());
    seed(&h, &["A"]);
    let binding = countries();
    h.run_once(&[binding.clone()]).await;

    seed(&h, &["A", "D"]);
    h.run_once(&[binding]).await;
    let ops: Vec<_> = h.sink.documents("countries").iter().map(|d| d.op).collect();
    assert_eq!(
        ops,
        vec![None, None, Some(Operation::Create)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_poll_yields_no_deletions() {
    let h = Harness::new();
    h.source.create_table(countries_table());
    seed(&h, &["A", "B", "C"]);
    let binding = countries();
    h.run_once(&[binding.clone()]).await;

    // The poll dies after one row; B and C must not be reported deleted.
    h.source.fail_after_rows(1);
    let report = h.run_once(&[binding.clone()]).await;
    assert_eq!(
        report.binding("countries").unwrap().error.as_ref().unwrap().class(),
        ErrorClass::Transient
    );
    assert_eq!(h.sink.documents("countries").len(), 3);
    assert!(h.sink.documents("countries").iter().all(|d| !d.is_deletion()));
    assert_eq!(
        h.checkpoint(&binding).await.unwrap().snapshot().unwrap().len(),
        3
    );

    seed(&h, &["A", "C"]);
    h.run_once(&[binding]).await;
    let deleted: Vec<_> = h
        .sink
        .documents("countries")
        .into_iter()
        .filter(|d| d.is_deletion())
        .collect();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].body["code"], "B");
}

#[tokio::test(start_paused = true)]
async fn test_failed_poll_after_flushed_chunks_infers_nothing() {
    let h = Harness::new();
    h.source.create_table(countries_table());
    seed(&h, &["A", "B", "C"]);
    let mut binding = countries();
    binding.commit_every_rows = Some(1);
    let report = h.run_once(&[binding.clone()]).await;
    assert_eq!(report.binding("countries").unwrap().peak_buffered, 1);
    assert_eq!(h.sink.largest_append(), 1);

    // A reaches the sink before the connection drops.
    seed(&h, &["A", "C"]);
    h.source.fail_after_rows(1);
    h.run_once(&[binding.clone()]).await;
    let docs = h.sink.documents("countries");
    assert_eq!(docs.len(), 4);
    assert!(docs.iter().all(|d| !d.is_deletion()));
    assert_eq!(
        h.checkpoint(&binding).await.unwrap().snapshot().unwrap().len(),
        3
    );

    h.run_once(&[binding]).await;
    let deleted: Vec<_> = h
        .sink
        .documents("countries")
        .into_iter()
        .filter(|d| d.is_deletion())
        .collect();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].body["code"], "B");
}

async fn poll_twice(binding: &BindingConfig) -> (Vec<String>, Vec<String>) {
    let h = Harness::new();
    h.source.create_table(countries_table());
    seed(&h, &["A", "B", "C"]);

    h.run_once(&[binding.clone()]).await;
    tokio::time::advance(Duration::from_secs(300)).await;
    h.run_once(&[binding.clone()]).await;

    let docs = h.sink.documents("countries");
    assert_eq!(docs.len(), 6);
    (serialized(&docs[..3]), serialized(&docs[3..]))
}

#[tokio::test(start_paused = true)]
async fn test_full_refresh_is_idempotent() {
    let binding = BindingConfig::new("countries", "countries").with_key(&["code"]);
    let (first, second) = poll_twice(&binding).await;
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_full_refresh_with_deletions_is_idempotent() {
    let (first, second) = poll_twice(&countries()).await;
    assert_eq!(first, second);

    let ordinal = BindingConfig::new("countries", "countries").with_deletions();
    let (first, second) = poll_twice(&ordinal).await;
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_full_refresh_without_deletions_keeps_no_snapshot() {
    let h = Harness::new();
    h.source.create_table(countries_table());
    seed(&h, &["A", "B"]);
    let binding = BindingConfig::new("countries", "countries").with_key(&["code"]);
    h.run_once(&[binding.clone()]).await;

    let checkpoint = h.checkpoint(&binding).await.unwrap();
    assert_eq!(checkpoint.progress, Progress::Snapshot(None));
    assert!(h.sink.documents("countries")[0].body["_meta"]
        .get("row_id")
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_ordinal_identity_tombstones_trailing_rows() {
    let h = Harness::new();
    h.source.create_table(countries_table());
    seed(&h, &["A", "B", "C"]);
    let binding = BindingConfig::new("countries", "countries").with_deletions();

    h.run_once(&[binding.clone()]).await;
    assert_eq!(h.sink.documents("countries")[1].body["_meta"]["row_id"], 1);

    seed(&h, &["A", "B"]);
    h.run_once(&[binding]).await;
    let docs = h.sink.documents("countries");
    let tombstone = docs.last().unwrap();
    assert!(tombstone.is_deletion());
    assert_eq!(tombstone.key.as_deref(), Some("2"));
    assert_eq!(tombstone.body["_meta"]["row_id"], 2);
    assert!(tombstone.body.get("code").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_row_identity_columns_override_key() {
    let h = Harness::new();
    h.source.create_table(
        TableDefinition::new(
            TableRef::new(None, "countries"),
            vec![
                ColumnDefinition::new("code", ColumnType::Text),
                ColumnDefinition::new("name", ColumnType::Text),
                ColumnDefinition::new("region", ColumnType::Text),
            ],
        )
        .with_primary_key(vec!["code".to_string()]),
    );
    h.source.set_rows(
        "countries",
        vec![
            country("A").with("region", "EU"),
            country("B").with("region", "EU"),
        ],
    );
    let mut binding = countries();
    binding.row_identity = vec!["code".to_string(), "region".to_string()];
    h.run_once(&[binding.clone()]).await;

    h.source
        .set_rows("countries", vec![country("A").with("region", "EU")]);
    h.run_once(&[binding]).await;

    let tombstone = h.sink.documents("countries").pop().unwrap();
    assert!(tombstone.is_deletion());
    assert_eq!(tombstone.key.as_deref(), Some("[\"B\",\"EU\"]"));
    assert_eq!(tombstone.body["region"], "EU");
}
