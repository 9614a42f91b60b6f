//! DuckDB dialect.

use super::SqlDialect;

/// DuckDB dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbDialect;

impl DuckDbDialect {
    /// Creates a new DuckDB dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SqlDialect for DuckDbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn count_if(&self, condition: &str) -> String {
        format!("count_if({condition})")
    }

    fn safe_divide(&self, numerator: &str, denominator: &str) -> String {
        format!("cast({numerator} as double) / nullif({denominator}, 0)")
    }

    fn cast_to_text(&self, expr: &str) -> String {
        format!("cast({expr} as varchar)")
    }

    fn array_to_text(&self, expr: &str) -> String {
        format!("array_to_string(list_sort(list_distinct({expr})), ',')")
    }

    fn ratio_pair(&self, ratio_not_null: &str, ratio_equal: &str) -> String {
        format!("struct_pack(ratio_not_null := {ratio_not_null}, ratio_equal := {ratio_equal})")
    }

    fn sampled_table(&self, table: &str, rate: u8) -> String {
        format!(
            "select * from {} using sample {rate} percent (system)",
            self.quote_table(table)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments() {
        let dialect = DuckDbDialect::new();
        assert_eq!(dialect.count_if("x"), "count_if(x)");
        assert_eq!(
            dialect.array_to_text("\"tags\""),
            "array_to_string(list_sort(list_distinct(\"tags\")), ',')"
        );
        assert_eq!(
            dialect.sampled_table("main.t", 10),
            "select * from \"main\".\"t\" using sample 10 percent (system)"
        );
    }
}
