//! Shaping of raw query results into comparison findings.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{DiffError, Result};
use crate::result::{QueryResult, Value};
use crate::synthesizer::Side;

/// Agreement figures for one compared column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnRatio {
    /// Column name.
    pub column: String,
    /// Share of joined rows populated on at least one side.
    pub ratio_not_null: Option<f64>,
    /// Share of populated joined rows whose two sides agree.
    pub ratio_equal: Option<f64>,
    /// `1 - ratio_equal`.
    pub percentage_diff_values: Option<f64>,
}

impl ColumnRatio {
    /// Builds the figures of a column, deriving `percentage_diff_values`.
    #[must_use]
    pub fn new(
        column: impl Into<String>,
        ratio_not_null: Option<f64>,
        ratio_equal: Option<f64>,
    ) -> Self {
        Self {
            column: column.into(),
            ratio_not_null,
            ratio_equal,
            percentage_diff_values: ratio_equal.map(|r| 1.0 - r),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RatioPair {
    ratio_not_null: Option<f64>,
    ratio_equal: Option<f64>,
}

/// Transposes the single-row result of the ratio-per-column query into one
/// [`ColumnRatio`] per column.
///
/// Each cell is either a record with `ratio_not_null` and `ratio_equal`
/// fields, the same pair encoded as a JSON object, or NULL.
pub fn parse_ratio_result(result: &QueryResult) -> Result<Vec<ColumnRatio>> {
    let [row] = result.rows.as_slice() else {
        return Err(DiffError::MalformedResult(format!(
            "ratio query returned {} rows, expected 1",
            result.rows.len()
        )));
    };

    result
        .columns
        .iter()
        .zip(row)
        .map(|(column, cell)| {
            let (not_null, equal) = match cell {
                Value::Null => (None, None),
                Value::Record(_) => (
                    cell.field("ratio_not_null").and_then(Value::as_f64),
                    cell.field("ratio_equal").and_then(Value::as_f64),
                ),
                Value::Text(json) => {
                    let pair: RatioPair = serde_json::from_str(json)?;
                    (pair.ratio_not_null, pair.ratio_equal)
                }
                other => {
                    return Err(DiffError::MalformedResult(format!(
                        "column '{column}' holds '{other}', expected a ratio pair"
                    )))
                }
            };
            Ok(ColumnRatio::new(column.as_str(), not_null, equal))
        })
        .collect()
}

/// Sorts ratios by `percentage_diff_values` then `ratio_not_null`, both
/// descending, with undefined values last.
pub fn sort_ratios(ratios: &mut [ColumnRatio]) {
    ratios.sort_by(|a, b| {
        descending(a.percentage_diff_values, b.percentage_diff_values)
            .then_with(|| descending(a.ratio_not_null, b.ratio_not_null))
    });
}

fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Outcome of the primary key reconciliation query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimaryKeyInsight {
    /// Rows of the full outer join.
    pub total_rows: u64,
    /// Keys present only in the second source.
    pub missing_primary_key_in_table1: u64,
    /// Keys present only in the first source.
    pub missing_primary_key_in_table2: u64,
    /// Share of keys present on one side only; undefined for an empty join.
    pub missing_primary_keys_ratio: Option<f64>,
}

impl PrimaryKeyInsight {
    /// Reads the single row returned by the insight query.
    pub fn from_result(result: &QueryResult) -> Result<Self> {
        if result.len() != 1 {
            return Err(DiffError::MalformedResult(format!(
                "primary key insight returned {} rows, expected 1",
                result.len()
            )));
        }
        let count = |column: &str| -> Result<u64> {
            let value = result.value(0, column).unwrap_or(&Value::Null);
            if value.is_null() {
                return Ok(0);
            }
            value
                .as_i64()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| {
                    DiffError::MalformedResult(format!("'{column}' is not a count: {value}"))
                })
        };

        Ok(Self {
            total_rows: count("total_rows")?,
            missing_primary_key_in_table1: count("missing_primary_key_in_table1")?,
            missing_primary_key_in_table2: count("missing_primary_key_in_table2")?,
            missing_primary_keys_ratio: result
                .value(0, "missing_primary_keys_ratio")
                .and_then(Value::as_f64),
        })
    }

    /// Returns whether some keys exist on one side only.
    #[must_use]
    pub fn has_missing_keys(&self) -> bool {
        self.missing_primary_keys_ratio.is_some_and(|r| r > 0.0)
    }
}

/// A primary key found not to be unique in one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQualityWarning {
    /// The source holding duplicates.
    pub side: Side,
    /// The key column.
    pub primary_key: String,
    /// The query that found the duplicates.
    pub sql: String,
    /// Duplicated key values with their row count.
    pub duplicate_keys: QueryResult,
}

impl std::fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "primary key '{}' is not unique in {} ({} duplicated values)",
            self.primary_key,
            self.side,
            self.duplicate_keys.len()
        )
    }
}
