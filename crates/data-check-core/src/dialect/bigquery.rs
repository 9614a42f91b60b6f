//! BigQuery standard SQL dialect.

use super::SqlDialect;

/// BigQuery dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct BigQueryDialect;

impl BigQueryDialect {
    /// Creates a new BigQuery dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SqlDialect for BigQueryDialect {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "\\`"))
    }

    /// `project.dataset.table` is quoted as a single path.
    fn quote_table(&self, table: &str) -> String {
        format!("`{}`", table.trim_matches('`'))
    }

    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    }

    fn count_if(&self, condition: &str) -> String {
        format!("countif({condition})")
    }

    fn safe_divide(&self, numerator: &str, denominator: &str) -> String {
        format!("safe_divide({numerator}, {denominator})")
    }

    fn cast_to_text(&self, expr: &str) -> String {
        format!("cast({expr} as string)")
    }

    fn array_to_text(&self, expr: &str) -> String {
        format!(
            "array_to_string((select array_agg(distinct x order by x asc) from unnest({expr}) as x), ',')"
        )
    }

    fn ratio_pair(&self, ratio_not_null: &str, ratio_equal: &str) -> String {
        format!("struct({ratio_not_null} as ratio_not_null, {ratio_equal} as ratio_equal)")
    }

    fn sampled_table(&self, table: &str, rate: u8) -> String {
        format!(
            "select * from {} tablesample system ({rate} percent)",
            self.quote_table(table)
        )
    }
}
