//! Schema reconciliation and diff query synthesis for comparing two SQL
//! tables or query results.
//!
//! `data-check-core` holds everything that does not talk to a database:
//!
//! - **Schema** - Column and table schemas with per-type cast rules
//! - **Reconcile** - Common schema and schema drift between two sources
//! - **Synthesizer** - SQL for key reconciliation, per-column ratios and row diffs
//! - **Dialect** - BigQuery, SQLite and DuckDB fragments
//! - **Comparator** - In-memory comparison of already fetched rows
//! - **Report** - Shaping of raw results into sorted findings
//!
//! # Example
//!
//! ```rust
//! use data_check_core::prelude::*;
//!
//! let users_v1 = TableSchema::new("users_v1")
//!     .column(ColumnSchema::new("user_id", FieldType::Integer))
//!     .column(ColumnSchema::new("email", FieldType::String))
//!     .column(ColumnSchema::new("age", FieldType::Integer));
//! let users_v2 = TableSchema::new("users_v2")
//!     .column(ColumnSchema::new("user_id", FieldType::Integer))
//!     .column(ColumnSchema::new("email", FieldType::String));
//!
//! let common = common_schema(&users_v1, &users_v2);
//! assert_eq!(common.columns_names(), vec!["email", "user_id"]);
//!
//! let source1 = Source::parse("project.dataset.users_v1");
//! let source2 = Source::parse("project.dataset.users_v2");
//! let selected = common.select("filtered_columns", &["email"]).unwrap();
//!
//! let sql = QuerySynthesizer::new(&BigQueryDialect, &source1, &source2, "user_id")
//!     .ratio_per_column(&selected)
//!     .unwrap();
//! assert!(sql.starts_with("with\ntable1 as ("));
//! ```

pub mod comparator;
pub mod dialect;
pub mod error;
pub mod format;
pub mod reconcile;
pub mod report;
pub mod result;
pub mod schema;
pub mod source;
pub mod synthesizer;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::comparator::{compute_common_value_ratios, differing_rows, ColumnMatchRatio};
    pub use crate::dialect::{
        BigQueryDialect, DialectKind, DuckDbDialect, SqlDialect, SqliteDialect,
    };
    pub use crate::error::{DiffError, Result};
    pub use crate::reconcile::{common_schema, diff_columns, select_all_columns};
    pub use crate::report::{
        parse_ratio_result, sort_ratios, ColumnRatio, DataQualityWarning, PrimaryKeyInsight,
    };
    pub use crate::result::{IndexedResult, QueryResult, Value};
    pub use crate::schema::{ColumnSchema, FieldMode, FieldType, TableSchema};
    pub use crate::source::Source;
    pub use crate::synthesizer::{QuerySynthesizer, Side};
}
