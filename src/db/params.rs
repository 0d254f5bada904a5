//! Binding of [`QueryParam`] lists onto prepared queries.
//!
//! Scalars, text and bytes bind the same way on every dialect. JSON is the
//! one dialect-specific case: servers with a JSON type get [`Json`], the
//! single-file engine gets the serialized text.

use crate::models::QueryParam;
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{Database, Encode, MySql, Postgres, Sqlite, Type};

type DialectQuery<'q, DB> = Query<'q, DB, <DB as Database>::Arguments<'q>>;

/// Positional binding of [`QueryParam`]s, in order.
pub(crate) trait BindParams<'q>: Sized {
    fn bind_param(self, param: &'q QueryParam) -> Self;

    fn bind_params(self, params: &'q [QueryParam]) -> Self {
        params.iter().fold(self, Self::bind_param)
    }
}

fn bind_with<'q, DB>(
    query: DialectQuery<'q, DB>,
    param: &'q QueryParam,
    json: fn(DialectQuery<'q, DB>, &'q JsonValue) -> DialectQuery<'q, DB>,
) -> DialectQuery<'q, DB>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
{
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Json(v) => json(query, v),
    }
}

impl<'q> BindParams<'q> for Query<'q, MySql, MySqlArguments> {
    fn bind_param(self, param: &'q QueryParam) -> Self {
        bind_with(self, param, |query, v| query.bind(Json(v)))
    }
}

impl<'q> BindParams<'q> for Query<'q, Postgres, PgArguments> {
    fn bind_param(self, param: &'q QueryParam) -> Self {
        bind_with(self, param, |query, v| query.bind(Json(v)))
    }
}

impl<'q> BindParams<'q> for Query<'q, Sqlite, SqliteArguments<'q>> {
    fn bind_param(self, param: &'q QueryParam) -> Self {
        bind_with(self, param, |query, v| query.bind(v.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::{Connection, Row, SqliteConnection};

    #[tokio::test]
    async fn test_sqlite_binds_in_order() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        let params = vec![
            QueryParam::Int(7),
            QueryParam::String("seven".into()),
            QueryParam::Bytes(vec![0xde, 0xad]),
            QueryParam::Null,
            QueryParam::Json(json!({"a": 1})),
        ];

        let row = sqlx::query::<Sqlite>("SELECT ?, ?, ?, ?, ?")
            .bind_params(&params)
            .fetch_one(&mut conn)
            .await
            .unwrap();

        assert_eq!(row.get::<i64, _>(0), 7);
        assert_eq!(row.get::<String, _>(1), "seven");
        assert_eq!(row.get::<Vec<u8>, _>(2), vec![0xde, 0xad]);
        assert_eq!(row.get::<Option<String>, _>(3), None);
        // the single-file engine receives JSON as text
        assert_eq!(row.get::<String, _>(4), r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_sqlite_empty_params_leave_query_untouched() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        let row = sqlx::query::<Sqlite>("SELECT 1")
            .bind_params(&[])
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>(0), 1);
    }
}
