//! SQL dialect implementations.
//!
//! Each dialect knows how to spell the handful of SQL fragments the diff
//! queries need: identifier quoting, conditional counting, null-safe
//! division, text casts, array flattening, the per-column ratio pair and
//! system sampling. Query structure lives in [`crate::synthesizer`].

mod bigquery;
mod duckdb;
mod sqlite;

pub use bigquery::BigQueryDialect;
pub use duckdb::DuckDbDialect;
pub use sqlite::SqliteDialect;

use serde::{Deserialize, Serialize};

use crate::schema::{CastKind, ColumnSchema};

/// Trait for dialect-specific SQL fragments.
pub trait SqlDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Quote an identifier (column name, alias).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quote a possibly qualified table reference (`schema.table`).
    fn quote_table(&self, table: &str) -> String {
        table
            .split('.')
            .map(|part| self.quote_identifier(part.trim_matches('"')))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Returns a string literal.
    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Counts the rows where `condition` holds.
    fn count_if(&self, condition: &str) -> String {
        format!("count(case when {condition} then 1 end)")
    }

    /// Divides, yielding NULL instead of failing when the divisor is zero.
    fn safe_divide(&self, numerator: &str, denominator: &str) -> String;

    /// Casts an expression to the dialect's text type.
    fn cast_to_text(&self, expr: &str) -> String;

    /// Flattens an array into a sorted, deduplicated, comma-joined string.
    fn array_to_text(&self, expr: &str) -> String;

    /// Builds the nested `{ratio_not_null, ratio_equal}` value.
    fn ratio_pair(&self, ratio_not_null: &str, ratio_equal: &str) -> String;

    /// Returns a query reading roughly `rate` percent of a table.
    fn sampled_table(&self, table: &str, rate: u8) -> String;

    /// Returns the text expression for a column reference, or `None` for
    /// columns that are never compared.
    fn text_expression(&self, column: &ColumnSchema, reference: &str) -> Option<String> {
        match column.cast_kind() {
            CastKind::PassThrough => Some(reference.to_string()),
            CastKind::Aggregate => Some(self.array_to_text(reference)),
            CastKind::Text => Some(self.cast_to_text(reference)),
            CastKind::Skip => None,
        }
    }
}

/// The dialects shipped with this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// Google BigQuery standard SQL.
    #[default]
    BigQuery,
    /// SQLite 3.39 or later.
    Sqlite,
    /// DuckDB.
    DuckDb,
}

impl DialectKind {
    /// Returns the dialect implementation.
    #[must_use]
    pub fn dialect(self) -> &'static dyn SqlDialect {
        match self {
            Self::BigQuery => &BigQueryDialect,
            Self::Sqlite => &SqliteDialect,
            Self::DuckDb => &DuckDbDialect,
        }
    }
}

impl std::str::FromStr for DialectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bigquery" | "bq" => Ok(Self::BigQuery),
            "sqlite" => Ok(Self::Sqlite),
            "duckdb" => Ok(Self::DuckDb),
            other => Err(format!("unknown dialect '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    #[test]
    fn test_dialect_kind_from_str() {
        assert_eq!("BigQuery".parse::<DialectKind>(), Ok(DialectKind::BigQuery));
        assert_eq!("sqlite".parse::<DialectKind>(), Ok(DialectKind::Sqlite));
        assert_eq!("duckdb".parse::<DialectKind>(), Ok(DialectKind::DuckDb));
        assert!("oracle".parse::<DialectKind>().is_err());
    }

    #[test]
    fn test_dialect_names() {
        assert_eq!(DialectKind::BigQuery.dialect().name(), "bigquery");
        assert_eq!(DialectKind::Sqlite.dialect().name(), "sqlite");
        assert_eq!(DialectKind::DuckDb.dialect().name(), "duckdb");
    }

    #[test]
    fn test_default_quoting() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(dialect.quote_table("main.users"), "\"main\".\"users\"");
        assert_eq!(dialect.string_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_text_expression_skips_nested() {
        let dialect = DuckDbDialect;
        let record = ColumnSchema::new("r", FieldType::Record);
        assert_eq!(dialect.text_expression(&record, "\"r\""), None);

        let text = ColumnSchema::new("t", FieldType::String);
        assert_eq!(
            dialect.text_expression(&text, "\"t\""),
            Some("\"t\"".to_string())
        );
    }
}
