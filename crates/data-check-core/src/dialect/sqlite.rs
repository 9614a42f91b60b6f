//! SQLite dialect.
//!
//! SQLite has no arrays, structs or table sampling. Repeated columns are
//! expected to hold JSON arrays, the ratio pair is a JSON object, and
//! sampling falls back to a per-row random filter.

use super::SqlDialect;

/// SQLite dialect (FULL OUTER JOIN needs SQLite 3.39.0+).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn safe_divide(&self, numerator: &str, denominator: &str) -> String {
        format!("cast({numerator} as real) / nullif({denominator}, 0)")
    }

    fn cast_to_text(&self, expr: &str) -> String {
        format!("cast({expr} as text)")
    }

    fn array_to_text(&self, expr: &str) -> String {
        format!(
            "(select group_concat(value, ',') from (select distinct value from json_each({expr}) order by value))"
        )
    }

    fn ratio_pair(&self, ratio_not_null: &str, ratio_equal: &str) -> String {
        format!("json_object('ratio_not_null', {ratio_not_null}, 'ratio_equal', {ratio_equal})")
    }

    fn sampled_table(&self, table: &str, rate: u8) -> String {
        format!(
            "select * from {} where abs(random()) % 100 < {rate}",
            self.quote_table(table)
        )
    }
}
