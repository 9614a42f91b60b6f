//! Cache-aside wrapper around any [`QueryClient`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use data_check_core::dialect::SqlDialect;
use data_check_core::error::Result;
use data_check_core::result::QueryResult;
use data_check_core::schema::TableSchema;
use tokio::sync::RwLock;
use tracing::debug;

use super::QueryClient;

/// How long a cached answer stays valid by default.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Operation {
    TableSchema,
    QuerySchema,
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    dialect: &'static str,
    operation: Operation,
    text: String,
}

#[derive(Debug, Clone)]
enum Cached {
    Schema(TableSchema),
    Rows(QueryResult),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Cached,
    expire_at: DateTime<Utc>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Utc::now() > self.expire_at
    }
}

/// Remembers schemas and query results for a short time, so re-running a
/// comparison with the same sources does not hit the engine again.
///
/// Failures are never cached.
pub struct CachedClient<C> {
    inner: C,
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, Entry>>,
}

impl<C: QueryClient> CachedClient<C> {
    /// Wraps a client with the default TTL.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            ttl: DEFAULT_CACHE_TTL,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the time to live of cached entries.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drops expired entries and returns how many were removed.
    pub async fn clear_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    fn key(&self, operation: Operation, text: &str) -> CacheKey {
        CacheKey {
            dialect: self.inner.dialect().name(),
            operation,
            text: text.to_string(),
        }
    }

    /// Returns a live entry, removing the looked up one when it expired.
    async fn lookup(&self, key: &CacheKey) -> Option<Cached> {
        {
            let entries = self.entries.read().await;
            let entry = entries.get(key)?;
            if !entry.is_expired() {
                debug!(text = %key.text, "Cache hit");
                return Some(entry.value.clone());
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(Entry::is_expired) {
            entries.remove(key);
        }
        None
    }

    /// Inserts an entry, evicting the expired ones on the way.
    async fn store(&self, key: CacheKey, value: Cached) {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let expire_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| !entry.is_expired());
        entries.insert(key, Entry { value, expire_at });
    }

    async fn schema(&self, operation: Operation, text: &str) -> Result<TableSchema> {
        let key = self.key(operation, text);
        if let Some(Cached::Schema(schema)) = self.lookup(&key).await {
            return Ok(schema);
        }
        let schema = match operation {
            Operation::TableSchema => self.inner.get_table_schema_from_table(text).await?,
            _ => self.inner.get_table_schema_from_sql(text).await?,
        };
        self.store(key, Cached::Schema(schema.clone())).await;
        Ok(schema)
    }
}

#[async_trait]
impl<C: QueryClient> QueryClient for CachedClient<C> {
    fn dialect(&self) -> &dyn SqlDialect {
        self.inner.dialect()
    }

    async fn get_table_schema_from_table(&self, table: &str) -> Result<TableSchema> {
        self.schema(Operation::TableSchema, table).await
    }

    async fn get_table_schema_from_sql(&self, sql: &str) -> Result<TableSchema> {
        self.schema(Operation::QuerySchema, sql).await
    }

    async fn run_query(&self, sql: &str, timeout: Duration) -> Result<QueryResult> {
        let key = self.key(Operation::Query, sql);
        if let Some(Cached::Rows(rows)) = self.lookup(&key).await {
            return Ok(rows);
        }
        let rows = self.inner.run_query(sql, timeout).await?;
        self.store(key, Cached::Rows(rows.clone())).await;
        Ok(rows)
    }
}
