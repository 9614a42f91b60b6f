//! Compare two SQL tables or query results.
//!
//! `data-check` drives a comparison session against a query engine:
//!
//! - **Client** - Schema lookup and query execution, with timeouts and caching
//! - **Config** - Primary key, column selection and sampling, validated up front
//! - **Session** - The typestate comparison: schemas, key, execution, row diffs
//!
//! SQL generation and schema reconciliation live in `data-check-core`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use data_check::prelude::*;
//!
//! let client = Arc::new(SqliteClient::connect("sqlite:warehouse.db").await?);
//! let session = DataDiff::new(client, "users_v1", "users_v2")
//!     .resolve_schemas()
//!     .await?
//!     .select_key(&ComparisonConfig::new("user_id"))?;
//!
//! let complete = session.execute().await?;
//! for ratio in &complete.report().column_ratios {
//!     println!("{}: {:?}", ratio.column, ratio.ratio_equal);
//! }
//! let diff = complete.plain_diff(&["email"]).await?;
//! println!("{}", diff.sql);
//! ```

pub mod client;
pub mod config;
pub mod session;

pub use data_check_core::error::{DiffError, Result};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::client::{CachedClient, QueryClient, SqliteClient};
    pub use crate::config::{load_schema, ColumnSelection, ComparisonConfig, ResolvedConfig};
    pub use crate::session::{
        ComparisonReport, DataDiff, InMemoryComparison, PlainDiff, SessionPhase,
    };
    pub use data_check_core::prelude::*;
}
