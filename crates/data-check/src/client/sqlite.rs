//! SQLite client backed by a `sqlx` pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use data_check_core::dialect::{SqlDialect, SqliteDialect};
use data_check_core::error::{DiffError, Result};
use data_check_core::result::{QueryResult, Value};
use data_check_core::schema::{ColumnSchema, FieldType, TableSchema};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::{debug, warn};

use super::{run_with_timeout, QueryClient, SCHEMA_SAMPLE_LIMIT};

/// Virtual machine instructions SQLite runs between two deadline checks.
const PROGRESS_OPS: i32 = 1000;

/// Runs comparisons against a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteClient {
    pool: SqlitePool,
    dialect: SqliteDialect,
}

impl SqliteClient {
    /// Creates a client over an existing pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            dialect: SqliteDialect::new(),
        }
    }

    /// Connects to a database URL such as `sqlite:data.db`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| DiffError::execution(format!("connect {url}"), e))?;
        Ok(Self::new(pool))
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn acquire(&self, sql: &str) -> Result<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| DiffError::execution(sql, e))
    }

    async fn fetch(&self, sql: &str) -> Result<QueryResult> {
        let mut conn = self.acquire(sql).await?;
        fetch_on(&mut conn, sql).await
    }
}

/// Deadline watched by a connection's progress handler.
#[derive(Debug)]
struct Deadline {
    at: Instant,
    reached: AtomicBool,
}

impl Deadline {
    fn new(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            reached: AtomicBool::new(false),
        }
    }

    /// Returns `false` once the deadline passed, which makes SQLite
    /// interrupt the running statement.
    fn check(&self) -> bool {
        if Instant::now() < self.at {
            return true;
        }
        self.reached.store(true, Ordering::Relaxed);
        false
    }

    fn is_reached(&self) -> bool {
        self.reached.load(Ordering::Relaxed)
    }
}

async fn fetch_on(conn: &mut SqliteConnection, sql: &str) -> Result<QueryResult> {
    debug!(sql = %sql, "Executing SQL");
    let statement = (&mut *conn)
        .prepare(sql)
        .await
        .map_err(|e| DiffError::execution(sql, e))?;
    let columns: Vec<String> = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let rows = sqlx::query(sql)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DiffError::execution(sql, e))?;

    let mut result = QueryResult::new(columns);
    for row in &rows {
        result.rows.push(decode_row(row).map_err(|e| DiffError::execution(sql, e))?);
    }
    Ok(result)
}

#[async_trait]
impl QueryClient for SqliteClient {
    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }

    async fn get_table_schema_from_table(&self, table: &str) -> Result<TableSchema> {
        let (schema, name) = match table.rsplit_once('.') {
            Some((schema, name)) => (
                format!("{}.", self.dialect.quote_identifier(schema.trim_matches('"'))),
                name,
            ),
            None => (String::new(), table),
        };
        let sql = format!(
            "PRAGMA {schema}table_info({})",
            self.dialect.quote_identifier(name.trim_matches('"'))
        );
        debug!(sql = %sql, table = %table, "Fetching table schema");

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DiffError::execution(&sql, e))?;
        if rows.is_empty() {
            return Err(DiffError::execution(sql, format!("no such table: {table}")));
        }

        let columns = rows
            .iter()
            .map(|row| {
                let name: String = row.try_get("name")?;
                let declared: String = row.try_get("type")?;
                let not_null: i64 = row.try_get("notnull")?;
                let column = ColumnSchema::new(name, FieldType::from_declared(&declared));
                Ok(if not_null == 0 { column } else { column.required() })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| DiffError::execution(&sql, e))?;

        TableSchema::from_columns(table, columns)
    }

    async fn get_table_schema_from_sql(&self, sql: &str) -> Result<TableSchema> {
        let sample = format!("select * from (\n{sql}\n) limit {SCHEMA_SAMPLE_LIMIT}");
        debug!(sql = %sample, "Sampling query schema");

        let statement = self
            .pool
            .prepare(&sample)
            .await
            .map_err(|e| DiffError::execution(&sample, e))?;
        let declared: Vec<(String, FieldType)> = statement
            .columns()
            .iter()
            .map(|c| {
                (
                    c.name().to_string(),
                    FieldType::from_declared(c.type_info().name()),
                )
            })
            .collect();

        // Expressions carry no declared type; fall back to the sampled values.
        let sampled = self.fetch(&sample).await?;
        let columns = declared
            .into_iter()
            .enumerate()
            .map(|(i, (name, field_type))| {
                let field_type = if field_type == FieldType::Any {
                    sampled
                        .rows
                        .iter()
                        .filter_map(|row| row.get(i))
                        .find(|value| !value.is_null())
                        .map_or(FieldType::Any, value_type)
                } else {
                    field_type
                };
                ColumnSchema::new(name, field_type)
            })
            .collect();

        TableSchema::from_columns("query", columns)
    }

    /// Runs `sql` with a progress handler that interrupts it at the
    /// deadline, so a timed out statement stops holding its connection.
    async fn run_query(&self, sql: &str, timeout: Duration) -> Result<QueryResult> {
        let mut conn = self.acquire(sql).await?;
        let deadline = Arc::new(Deadline::new(timeout));
        // The handler outlives this call on the pooled connection; once the
        // deadline is dropped it lets every statement run.
        let watched = Arc::downgrade(&deadline);
        conn.lock_handle()
            .await
            .map_err(|e| DiffError::execution(sql, e))?
            .set_progress_handler(PROGRESS_OPS, move || {
                watched.upgrade().map_or(true, |deadline| deadline.check())
            });

        let outcome = run_with_timeout(sql, timeout, fetch_on(&mut conn, sql)).await;

        // Locking waits for the worker, so an interrupted statement is over here.
        match conn.lock_handle().await {
            Ok(mut handle) => handle.remove_progress_handler(),
            Err(e) => warn!(error = %e, "Failed to remove progress handler"),
        }

        match outcome {
            Err(DiffError::Execution { .. } | DiffError::Timeout { .. })
                if deadline.is_reached() =>
            {
                debug!(sql = %sql, "Statement interrupted at deadline");
                Err(DiffError::Timeout {
                    sql: sql.to_string(),
                    timeout,
                    job_cancelled: true,
                })
            }
            outcome => outcome,
        }
    }
}

fn value_type(value: &Value) -> FieldType {
    match value {
        Value::Integer(_) => FieldType::Integer,
        Value::Float(_) => FieldType::Float,
        Value::Bool(_) => FieldType::Boolean,
        Value::Bytes(_) => FieldType::Bytes,
        Value::Record(_) => FieldType::Struct,
        Value::Text(_) => FieldType::String,
        Value::Null => FieldType::Any,
    }
}

fn decode_row(row: &SqliteRow) -> std::result::Result<Vec<Value>, sqlx::Error> {
    (0..row.len())
        .map(|i| {
            let raw = row.try_get_raw(i)?;
            if raw.is_null() {
                return Ok(Value::Null);
            }
            let storage = raw.type_info().name().to_string();
            Ok(match storage.as_str() {
                "INTEGER" => Value::Integer(row.try_get_unchecked(i)?),
                "REAL" => Value::Float(row.try_get_unchecked(i)?),
                "BLOB" => Value::Bytes(row.try_get_unchecked(i)?),
                _ => Value::Text(row.try_get_unchecked(i)?),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_client() -> SqliteClient {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        sqlx::query(
            "CREATE TABLE users (id INTEGER NOT NULL, name TEXT, score REAL, avatar BLOB)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO users VALUES (1, 'ada', 1.5, x'00ff'), (2, NULL, NULL, NULL)")
            .execute(&pool)
            .await
            .unwrap();
        SqliteClient::new(pool)
    }

    #[tokio::test]
    async fn test_table_schema() {
        let client = create_test_client().await;
        let schema = client.get_table_schema_from_table("users").await.unwrap();

        assert_eq!(schema.table_name, "users");
        assert_eq!(schema.columns_names(), vec!["id", "name", "score", "avatar"]);
        assert_eq!(schema.columns[0], ColumnSchema::new("id", FieldType::Integer).required());
        assert_eq!(schema.columns[1].field_type, FieldType::String);
        assert_eq!(schema.columns[2].field_type, FieldType::Float);
        assert_eq!(schema.columns[3].field_type, FieldType::Bytes);

        let qualified = client.get_table_schema_from_table("main.users").await.unwrap();
        assert_eq!(qualified.columns.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_table() {
        let client = create_test_client().await;
        let err = client.get_table_schema_from_table("nope").await.unwrap_err();
        assert!(matches!(err, DiffError::Execution { .. }));
        assert!(err.sql().unwrap().contains("table_info"));
    }

    #[tokio::test]
    async fn test_query_schema() {
        let client = create_test_client().await;
        let schema = client
            .get_table_schema_from_sql(
                "select id, upper(name) as loud, score * 2 as doubled from users",
            )
            .await
            .unwrap();

        assert_eq!(schema.columns_names(), vec!["id", "loud", "doubled"]);
        assert_eq!(schema.columns[0].field_type, FieldType::Integer);
        assert_eq!(schema.columns[1].field_type, FieldType::String);
        assert_eq!(schema.columns[2].field_type, FieldType::Float);
    }

    #[tokio::test]
    async fn test_run_query_decodes_values() {
        let client = create_test_client().await;
        let result = client
            .run_query("select * from users order by id", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result.columns, vec!["id", "name", "score", "avatar"]);
        assert_eq!(
            result.rows[0],
            vec![
                Value::Integer(1),
                Value::from("ada"),
                Value::Float(1.5),
                Value::Bytes(vec![0, 255]),
            ]
        );
        assert_eq!(result.rows[1][1], Value::Null);
    }

    #[tokio::test]
    async fn test_run_query_empty_result_keeps_columns() {
        let client = create_test_client().await;
        let result = client
            .run_query("select id, name from users where id > 10", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert!(result.is_empty());
    }

    const SLOW_COUNT: &str = "with recursive c(x) as (select 1 union all select x + 1 from c \
                              where x < 300000000) select count(*) from c";

    #[tokio::test]
    async fn test_timeout_interrupts_statement() {
        let client = create_test_client().await;
        let err = client
            .run_query(SLOW_COUNT, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiffError::Timeout {
                job_cancelled: true,
                ..
            }
        ));
        assert_eq!(err.sql(), Some(SLOW_COUNT));

        // The pool has a single connection, so this waits on the slow
        // statement unless it was actually stopped.
        let started = Instant::now();
        let result = client
            .run_query("select 1", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.rows, vec![vec![Value::Integer(1)]]);
    }

    #[tokio::test]
    async fn test_expired_deadline_does_not_leak_into_next_query() {
        let client = create_test_client().await;
        client
            .run_query(SLOW_COUNT, Duration::from_millis(50))
            .await
            .unwrap_err();

        let result = client
            .run_query(
                "with recursive c(x) as (select 1 union all select x + 1 from c where x < 200000) \
                 select count(*) from c",
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        assert_eq!(result.rows, vec![vec![Value::Integer(200_000)]]);

        let schema = client.get_table_schema_from_sql("select id from users").await.unwrap();
        assert_eq!(schema.columns_names(), vec!["id"]);
    }

    #[tokio::test]
    async fn test_run_query_error_carries_sql() {
        let client = create_test_client().await;
        let err = client
            .run_query("select missing from users", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.sql(), Some("select missing from users"));
        assert!(err.is_retryable());
    }
}
