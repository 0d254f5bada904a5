//! Integration tests for the single-file connector and connection injection.
//!
//! Tests verify that:
//! - A missing database file is a configuration error
//! - Write operations commit on success and roll back on error
//! - Zero-row statements are logged as successes with a distinct message
//! - Native failures are classified per category and path
//! - A caller-supplied connection always wins

use daokit::connectors::{Connector, SqlConnector, SqliteConnector};
use daokit::context::{DataContext, SQLITE_CONNECTOR};
use daokit::db::{Connection, InjectConnection, SqlDaoHelper};
use daokit::error::{DaoError, ErrorCode};
use daokit::logging::{LogSink, MemorySink};
use daokit::models::{ExecOutcome, QueryParam};
use serde_json::json;
use std::error::Error as _;
use std::sync::Arc;
use tempfile::NamedTempFile;

struct Fixture {
    _file: NamedTempFile,
    sink: Arc<MemorySink>,
    context: DataContext,
}

impl Fixture {
    fn dao(&self) -> &SqlDaoHelper {
        self.context.dao()
    }
}

/// Single-file context with a `users` table.
async fn setup() -> Fixture {
    let file = NamedTempFile::new().unwrap();
    let sink = Arc::new(MemorySink::new());
    let log_sink: Arc<dyn LogSink> = sink.clone();
    let connector = SqliteConnector::new_with_sink(file.path(), 0, log_sink.clone()).unwrap();
    let context = DataContext::with_sink(log_sink).with_sqlite(Arc::new(connector));
    context.init_all().await.unwrap();

    let dao = context.dao().clone();
    InjectConnection::write()
        .run(&context, async |conn: &mut Connection| {
            dao.execute(
                conn,
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, age INTEGER)",
                &[],
            )
            .await
        })
        .await
        .unwrap();
    sink.clear();

    Fixture {
        _file: file,
        sink,
        context,
    }
}

async fn insert_user(fx: &Fixture, name: &str, age: i64) -> Result<ExecOutcome, DaoError> {
    let dao = fx.dao().clone();
    let params = vec![QueryParam::from(name), QueryParam::Int(age)];
    InjectConnection::write()
        .run(&fx.context, async |conn: &mut Connection| {
            dao.insert(conn, "INSERT INTO users (name, age) VALUES (?, ?)", &params)
                .await
        })
        .await
}

async fn count_users(fx: &Fixture) -> i64 {
    let dao = fx.dao().clone();
    let rows = InjectConnection::read()
        .run(&fx.context, async |conn: &mut Connection| {
            dao.read(conn, "SELECT COUNT(*) AS n FROM users", &[]).await
        })
        .await
        .unwrap();
    rows[0]["n"].as_i64().unwrap()
}

#[test]
fn test_missing_path_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let err = SqliteConnector::new_with_sink(dir.path().join("absent.db"), 0, sink.clone())
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::ConfPathMissing);
    assert_eq!(sink.failures().len(), 1);
    assert_eq!(sink.failures()[0].action(), Some("sql.init"));
}

#[tokio::test]
async fn test_pool_properties() {
    let file = NamedTempFile::new().unwrap();
    let connector = SqliteConnector::new(file.path(), 1800).unwrap();

    assert!(connector.is_initialized());
    assert_eq!(connector.pool_size(), 1);
    assert_eq!(connector.max_overflow(), 0);
    assert_eq!(connector.pool_recycle(), 1800);
    assert_eq!(connector.pool_timeout(), 0);
    assert!(connector.database_url().starts_with("sqlite://"));
}

#[tokio::test]
async fn test_connections_after_close() {
    let file = NamedTempFile::new().unwrap();
    let connector = SqliteConnector::new(file.path(), 0).unwrap();
    assert!(connector.is_connected().await);
    assert!(!connector.version().await.is_empty());

    connector.close().await;
    let err = connector.get_read_connection().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NetUnreachable);
    assert!(!connector.is_connected().await);

    connector.init().await.unwrap();
    assert!(connector.get_write_connection().await.is_ok());
}

#[tokio::test]
async fn test_write_then_read() {
    let fx = setup().await;

    let outcome = insert_user(&fx, "alice", 30).await.unwrap();
    assert_eq!(outcome.rows_affected, 1);
    assert_eq!(outcome.changes_delta, 1);

    let dao = fx.dao().clone();
    let rows = InjectConnection::read()
        .run(&fx.context, async |conn: &mut Connection| {
            assert!(!conn.is_transaction());
            dao.read(
                conn,
                "SELECT id, name, age FROM users WHERE name = ?",
                &[QueryParam::from("alice")],
            )
            .await
        })
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("alice"));
    assert_eq!(rows[0]["age"], json!(30));

    let before = fx
        .sink
        .with_action("sql.query")
        .into_iter()
        .find(|r| r.message == "About to execute SELECT query")
        .unwrap();
    assert!(before.str_field("db.connection_id").is_some());
    assert_eq!(before.field("db.params"), Some(&json!(["alice"])));
}

#[tokio::test]
async fn test_zero_row_update_is_not_a_failure() {
    let fx = setup().await;

    let dao = fx.dao().clone();
    let outcome = InjectConnection::write()
        .run(&fx.context, async |conn: &mut Connection| {
            dao.update(
                conn,
                "UPDATE users SET age = ? WHERE name = ?",
                &[QueryParam::Int(40), QueryParam::from("nobody")],
            )
            .await
        })
        .await
        .unwrap();

    assert!(!outcome.modified_rows());
    assert!(fx.sink.failures().is_empty());
    assert!(fx.sink.records().iter().any(|r| {
        r.outcome() == Some("success")
            && r.message == "DML statement executed successfully but did not modify any rows."
    }));
}

#[tokio::test]
async fn test_error_rolls_back_transaction() {
    let fx = setup().await;

    let dao = fx.dao().clone();
    let err = InjectConnection::write()
        .run(&fx.context, async |conn: &mut Connection| {
            assert!(conn.is_transaction());
            dao.insert(
                conn,
                "INSERT INTO users (name, age) VALUES (?, ?)",
                &[QueryParam::from("bob"), QueryParam::Int(25)],
            )
            .await?;
            dao.execute(conn, "INSERT INTO missing_table VALUES (1)", &[])
                .await
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::SqlWriteProgramming);
    assert_eq!(count_users(&fx).await, 0);
}

#[tokio::test]
async fn test_integrity_error_on_write_path() {
    let fx = setup().await;
    insert_user(&fx, "carol", 41).await.unwrap();
    fx.sink.clear();

    let err = insert_user(&fx, "carol", 42).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::SqlWriteIntegrity);
    assert_eq!(err.code().as_u32(), 50090);
    assert!(err.source().is_some());

    let failures = fx.sink.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].str_field("error.type"), Some("IntegrityError"));
    assert_eq!(count_users(&fx).await, 1);
}

#[tokio::test]
async fn test_syntax_error_on_read_path() {
    let fx = setup().await;

    let dao = fx.dao().clone();
    let err = InjectConnection::read()
        .run(&fx.context, async |conn: &mut Connection| {
            dao.read(conn, "SELEC name FROM users", &[]).await
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::SqlReadProgramming);
    assert_eq!(err.code().as_u32(), 50098);
}

#[tokio::test]
async fn test_insert_and_retrieve_data() {
    let fx = setup().await;

    let dao = fx.dao().clone();
    let rows = InjectConnection::write()
        .run(&fx.context, async |conn: &mut Connection| {
            dao.insert_and_retrieve_data(
                conn,
                "INSERT INTO users (name, age) VALUES (?, ?) RETURNING id, name",
                &[QueryParam::from("dave"), QueryParam::Int(52)],
            )
            .await
        })
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("dave"));
    assert_eq!(count_users(&fx).await, 1);
}

#[tokio::test]
async fn test_manual_connection_wins() {
    let fx = setup().await;
    let connector = fx.context.sqlite().unwrap().clone();

    let mut conn = connector.begin_write_transaction().await.unwrap();
    let id = conn.id();

    let dao = fx.dao().clone();
    InjectConnection::write()
        .with_connector_attr(SQLITE_CONNECTOR)
        .run_with(&fx.context, Some(&mut conn), async |c: &mut Connection| {
            assert_eq!(c.id(), id);
            dao.insert(
                c,
                "INSERT INTO users (name, age) VALUES (?, ?)",
                &[QueryParam::from("erin"), QueryParam::Int(29)],
            )
            .await
        })
        .await
        .unwrap();

    // the caller owns the transaction
    conn.rollback().await.unwrap();
    assert_eq!(count_users(&fx).await, 0);
}
