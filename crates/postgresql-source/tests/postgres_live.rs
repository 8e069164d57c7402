//! Tests against a live PostgreSQL server.
//!
//! Skipped unless `BATCH_CAPTURE_TEST_POSTGRES_URI` is set.

use batch_capture_postgresql_source::PostgresConnector;
use futures::TryStreamExt;
use sync_core::{Dialect, Query, SourceConnector, TableRef, Value};

fn test_uri() -> Option<String> {
    std::env::var("BATCH_CAPTURE_TEST_POSTGRES_URI").ok()
}

#[tokio::test]
async fn test_describe_and_query_with_cursor_param() {
    let Some(uri) = test_uri() else {
        eprintln!("BATCH_CAPTURE_TEST_POSTGRES_URI not set, skipping");
        return;
    };

    let (client, connection) = tokio_postgres::connect(&uri, tokio_postgres::NoTls)
        .await
        .unwrap();
    tokio::spawn(connection);
    client
        .batch_execute(
            "DROP TABLE IF EXISTS bc_live_users;
             CREATE TABLE bc_live_users (
                 id BIGINT PRIMARY KEY,
                 name TEXT,
                 balance NUMERIC(10, 2),
                 updated_at TIMESTAMPTZ NOT NULL
             );
             INSERT INTO bc_live_users VALUES
                 (1, 'a', 1.50, '2024-01-01T00:00:00Z'),
                 (2, 'b', NULL, '2024-01-02T00:00:00Z'),
                 (3, 'c', 3.00, '2024-01-03T00:00:00Z');",
        )
        .await
        .unwrap();

    let connector = PostgresConnector::new(uri);
    let mut session = connector.connect().await.unwrap();

    let table = session
        .describe_table(&TableRef::new(None, "bc_live_users"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(table.primary_key, vec!["id".to_string()]);
    assert!(!table.require_column("updated_at").unwrap().nullable);

    let after: chrono::DateTime<chrono::Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
    let query = Query {
        sql: "SELECT * FROM bc_live_users WHERE updated_at > $1 ORDER BY updated_at".to_string(),
        params: vec![Value::TimestampTz(after)],
        dialect: Dialect::Postgres,
        table: None,
        cursor: None,
        templated: false,
    };
    let rows: Vec<_> = session
        .query(&query)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("id"), Some(&Value::Int(2)));
    assert_eq!(rows[0].get("balance"), Some(&Value::Null));
    assert_eq!(rows[1].get("balance"), Some(&Value::Decimal("3.00".into())));

    assert!(session
        .sanity_check(std::time::Duration::from_secs(60))
        .await
        .is_ok());

    client
        .batch_execute("DROP TABLE bc_live_users")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_untyped_columns_fall_back_to_text() {
    let Some(uri) = test_uri() else {
        eprintln!("BATCH_CAPTURE_TEST_POSTGRES_URI not set, skipping");
        return;
    };

    let connector = PostgresConnector::new(uri);
    let mut session = connector.connect().await.unwrap();
    let query = Query {
        sql: "SELECT 'NaN'::numeric AS nan,
                     12345678901234567890123456789012::numeric AS wide,
                     '1 year 2 mons 4 days 01:02:03.5'::interval AS span,
                     '192.168.0.1'::inet AS host,
                     '10:30:00+02'::timetz AS local_time,
                     ARRAY[1.5, 'NaN']::numeric[] AS amounts,
                     '<a/>'::xml AS doc"
            .to_string(),
        params: vec![],
        dialect: Dialect::Postgres,
        table: None,
        cursor: None,
        templated: false,
    };
    let rows: Vec<_> = session
        .query(&query)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let row = &rows[0];
    assert_eq!(row.get("nan"), Some(&Value::Decimal("NaN".into())));
    assert_eq!(
        row.get("wide"),
        Some(&Value::Decimal("12345678901234567890123456789012".into()))
    );
    assert_eq!(row.get("span"), Some(&Value::Text("P1Y2M4DT1H2M3.5S".into())));
    assert_eq!(row.get("host"), Some(&Value::Text("192.168.0.1".into())));
    assert_eq!(
        row.get("local_time"),
        Some(&Value::Text("10:30:00+02:00".into()))
    );
    assert_eq!(
        row.get("amounts"),
        Some(&Value::Array(vec![
            Value::Decimal("1.5".into()),
            Value::Decimal("NaN".into()),
        ]))
    );
    assert_eq!(row.get("doc"), Some(&Value::Text("<a/>".into())));
}
