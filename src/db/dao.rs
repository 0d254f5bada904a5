//! Statement execution on injected connections.
//!
//! Every statement is logged before it runs (connection id, statement text,
//! parameters) and after it completes. Native failures never leave this
//! module: each one is classified and re-raised as a relational error whose
//! code depends on the failure category and on the path (mutating statements
//! use the write block, row-returning queries the read block).
//!
//! Database-specific execution lives in the `mysql`, `postgres` and `sqlite`
//! submodules, which mirror each other.

use crate::db::connection::{Connection, Link};
use crate::db::types::{JsonRow, RowToJson};
use crate::error::{DaoError, DbResult, SqlFailure};
use crate::logging::{LogAction, LogBuilder, LogSink, default_sink};
use crate::models::{Direction, ExecOutcome, QueryParam};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;

/// Raw-SQL helper used by data-access objects.
#[derive(Clone)]
pub struct SqlDaoHelper {
    sink: Arc<dyn LogSink>,
}

impl SqlDaoHelper {
    pub fn new() -> Self {
        Self {
            sink: default_sink(),
        }
    }

    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Run a row-returning query.
    pub async fn read(
        &self,
        conn: &mut Connection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>> {
        self.fetch_all(conn, sql, params).await
    }

    pub async fn insert(
        &self,
        conn: &mut Connection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecOutcome> {
        self.execute(conn, sql, params).await
    }

    /// Run an insert that returns rows (e.g. `INSERT ... RETURNING`).
    ///
    /// Failures are classified on the read path.
    pub async fn insert_and_retrieve_data(
        &self,
        conn: &mut Connection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>> {
        self.fetch_all(conn, sql, params).await
    }

    pub async fn update(
        &self,
        conn: &mut Connection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecOutcome> {
        self.execute(conn, sql, params).await
    }

    pub async fn delete(
        &self,
        conn: &mut Connection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecOutcome> {
        self.execute(conn, sql, params).await
    }

    /// Execute a mutating statement.
    pub async fn execute(
        &self,
        conn: &mut Connection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecOutcome> {
        self.log_statement(conn, "About to execute DML statement", sql, params);
        let start = Instant::now();

        let result = match conn.link_mut() {
            Link::MySql(slot) => mysql::execute(slot.conn(), sql, params).await,
            Link::Postgres(slot) => postgres::execute(slot.conn(), sql, params).await,
            Link::Sqlite(slot) => sqlite::execute(slot.conn(), sql, params).await,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.map_failure(conn, Direction::Write, sql, err)),
        };

        let message = if outcome.changes_delta > 0 {
            format!(
                "DML statement succeeded; {} row(s) were affected.",
                outcome.changes_delta
            )
        } else {
            "DML statement executed successfully but did not modify any rows.".to_string()
        };
        LogBuilder::new(&self.sink)
            .event(LogAction::SqlQuery)
            .success()
            .msg(message)
            .duration_ms(start.elapsed().as_secs_f64() * 1000.0)
            .db_context(conn.context())
            .field("db.connection_id", conn.id().to_string())
            .field("db.rows_affected", outcome.rows_affected)
            .field("db.changes_delta", outcome.changes_delta)
            .field("db.rows_modified", outcome.modified_rows())
            .emit();

        Ok(outcome)
    }

    /// Execute a row-returning query and decode every row.
    pub async fn fetch_all(
        &self,
        conn: &mut Connection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>> {
        self.log_statement(conn, "About to execute SELECT query", sql, params);
        let start = Instant::now();

        let result = match conn.link_mut() {
            Link::MySql(slot) => mysql::fetch_all(slot.conn(), sql, params).await,
            Link::Postgres(slot) => postgres::fetch_all(slot.conn(), sql, params).await,
            Link::Sqlite(slot) => sqlite::fetch_all(slot.conn(), sql, params).await,
        };

        let rows = match result {
            Ok(rows) => rows,
            Err(err) => return Err(self.map_failure(conn, Direction::Read, sql, err)),
        };

        let message = if rows.is_empty() {
            "SELECT query executed successfully but returned no rows.".to_string()
        } else {
            format!("SELECT query succeeded; fetched {} row(s).", rows.len())
        };
        LogBuilder::new(&self.sink)
            .event(LogAction::SqlQuery)
            .success()
            .msg(message)
            .duration_ms(start.elapsed().as_secs_f64() * 1000.0)
            .db_context(conn.context())
            .field("db.connection_id", conn.id().to_string())
            .field("db.row_count", rows.len())
            .emit();

        Ok(rows)
    }

    fn log_statement(&self, conn: &Connection, message: &str, sql: &str, params: &[QueryParam]) {
        LogBuilder::new(&self.sink)
            .event(LogAction::SqlQuery)
            .msg(message)
            .db_context(conn.context())
            .field("db.connection_id", conn.id().to_string())
            .field("db.statement", sql)
            .field(
                "db.params",
                serde_json::to_value(params).unwrap_or(JsonValue::Null),
            )
            .emit();
    }

    fn map_failure(
        &self,
        conn: &Connection,
        direction: Direction,
        sql: &str,
        err: sqlx::Error,
    ) -> DaoError {
        let failure = SqlFailure::classify(&err);
        let code = failure.code(direction);
        let statement_kind = match direction {
            Direction::Write => "DML",
            Direction::Read => "SELECT",
        };

        LogBuilder::new(&self.sink)
            .event(LogAction::SqlQuery)
            .failure(code, &err)
            .error_type(failure.type_name())
            .msg(format!(
                "{} when executing {statement_kind} {sql:?}",
                failure.label()
            ))
            .db_context(conn.context())
            .field("db.connection_id", conn.id().to_string())
            .field("db.statement", sql)
            .emit();

        DaoError::relational(code, format!("{}: {err}", failure.label())).with_source(err)
    }
}

impl Default for SqlDaoHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SqlDaoHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlDaoHelper").finish_non_exhaustive()
    }
}

mod mysql {
    use super::*;
    use crate::db::params::BindParams;
    use sqlx::{Executor, MySqlConnection};

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<ExecOutcome, sqlx::Error> {
        // Without params, run as plain text: some statements can't be prepared.
        let result = if params.is_empty() {
            (&mut *conn).execute(sql).await?
        } else {
            sqlx::query::<sqlx::MySql>(sql)
                .bind_params(params)
                .execute(&mut *conn)
                .await?
        };
        let rows_affected = result.rows_affected();
        Ok(ExecOutcome {
            rows_affected,
            changes_delta: rows_affected,
        })
    }

    pub async fn fetch_all(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<JsonRow>, sqlx::Error> {
        let rows = if params.is_empty() {
            (&mut *conn).fetch_all(sql).await?
        } else {
            sqlx::query::<sqlx::MySql>(sql)
                .bind_params(params)
                .fetch_all(&mut *conn)
                .await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }
}

mod postgres {
    use super::*;
    use crate::db::params::BindParams;
    use sqlx::PgConnection;

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<ExecOutcome, sqlx::Error> {
        let query = sqlx::query::<sqlx::Postgres>(sql).bind_params(params);
        let rows_affected = query.execute(&mut *conn).await?.rows_affected();
        Ok(ExecOutcome {
            rows_affected,
            changes_delta: rows_affected,
        })
    }

    pub async fn fetch_all(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<JsonRow>, sqlx::Error> {
        let query = sqlx::query::<sqlx::Postgres>(sql).bind_params(params);
        let rows = query.fetch_all(&mut *conn).await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::BindParams;
    use sqlx::SqliteConnection;

    async fn total_changes(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT total_changes()")
            .fetch_one(&mut *conn)
            .await
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<ExecOutcome, sqlx::Error> {
        let before = total_changes(conn).await?;
        let query = sqlx::query::<sqlx::Sqlite>(sql).bind_params(params);
        let rows_affected = query.execute(&mut *conn).await?.rows_affected();
        let after = total_changes(conn).await?;
        Ok(ExecOutcome {
            rows_affected,
            changes_delta: u64::try_from(after - before).unwrap_or(0),
        })
    }

    pub async fn fetch_all(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<JsonRow>, sqlx::Error> {
        let query = sqlx::query::<sqlx::Sqlite>(sql).bind_params(params);
        let rows = query.fetch_all(&mut *conn).await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }
}
