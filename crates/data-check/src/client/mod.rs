//! Query execution clients.
//!
//! A [`QueryClient`] resolves schemas and runs SQL against one engine. The
//! orchestrator only talks to this trait, so the same session logic drives
//! SQLite locally and any remote warehouse behind an implementation.

mod cache;
mod sqlite;

pub use cache::{CachedClient, DEFAULT_CACHE_TTL};
pub use sqlite::SqliteClient;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use data_check_core::dialect::SqlDialect;
use data_check_core::error::{DiffError, Result};
use data_check_core::result::QueryResult;
use data_check_core::schema::TableSchema;
use data_check_core::source::Source;

/// Rows sampled to infer the schema of a query source.
pub const SCHEMA_SAMPLE_LIMIT: u64 = 50;

/// An engine able to describe sources and run queries.
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Dialect the engine understands.
    fn dialect(&self) -> &dyn SqlDialect;

    /// Returns the schema of a table or view.
    async fn get_table_schema_from_table(&self, table: &str) -> Result<TableSchema>;

    /// Returns the result shape of a query, by running it on a few rows.
    async fn get_table_schema_from_sql(&self, sql: &str) -> Result<TableSchema>;

    /// Runs a query, failing with [`DiffError::Timeout`] when it does not
    /// finish within `timeout`.
    async fn run_query(&self, sql: &str, timeout: Duration) -> Result<QueryResult>;

    /// Returns the schema of either kind of source.
    async fn get_schema(&self, source: &Source) -> Result<TableSchema> {
        match source {
            Source::Table(table) => self.get_table_schema_from_table(table).await,
            Source::Query(sql) => self.get_table_schema_from_sql(sql).await,
        }
    }
}

/// Awaits `query`, abandoning it after `timeout`.
///
/// Dropping the future does not stop work the engine already started, so
/// the reported timeout leaves `job_cancelled` unset. Clients able to
/// interrupt the statement report the cancellation themselves.
pub async fn run_with_timeout<F>(sql: &str, timeout: Duration, query: F) -> Result<QueryResult>
where
    F: Future<Output = Result<QueryResult>> + Send,
{
    tokio::time::timeout(timeout, query)
        .await
        .map_err(|_| DiffError::Timeout {
            sql: sql.to_string(),
            timeout,
            job_cancelled: false,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_with_timeout_expires() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(QueryResult::default())
        };
        let err = run_with_timeout("select 1", Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiffError::Timeout {
                job_cancelled: false,
                ..
            }
        ));
        assert_eq!(err.sql(), Some("select 1"));
    }

    #[tokio::test]
    async fn test_run_with_timeout_passes_result() {
        let fast = async { Ok(QueryResult::new(["a"])) };
        let result = run_with_timeout("select 1", Duration::from_secs(1), fast)
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["a"]);
    }
}
