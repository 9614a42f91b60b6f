//! In-memory comparison of two materialized row sets.
//!
//! This is the alternate path for small data: instead of generating SQL,
//! rows of both sources are fetched and compared here. Every value is
//! compared through its text form, so the integer `1` on one side matches
//! the text `'1'` on the other.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{DiffError, Result};
use crate::result::{QueryResult, Value};

/// Share of rows whose key and column value both match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMatchRatio {
    /// Column name.
    pub column: String,
    /// Matching rows divided by the first set's row count.
    pub ratio: f64,
}

/// Computes, for every common column except the primary key, the fraction of
/// rows of `left` whose key and value pair also exists in `right`.
///
/// A set with no matching row yields `0.0`. Zero common columns is an error.
pub fn compute_common_value_ratios(
    left: &QueryResult,
    right: &QueryResult,
    primary_key: &str,
) -> Result<Vec<ColumnMatchRatio>> {
    let left_key = key_index(left, primary_key)?;
    let right_key = key_index(right, primary_key)?;

    let columns: Vec<(usize, usize, &str)> = left
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| name.as_str() != primary_key)
        .filter_map(|(i, name)| {
            right
                .column_index(name)
                .ok()
                .map(|j| (i, j, name.as_str()))
        })
        .collect();

    if columns.is_empty() {
        return Err(DiffError::NoCommonColumns {
            left: "left".to_string(),
            right: "right".to_string(),
        });
    }

    let total = left.len();
    let ratios = columns
        .into_iter()
        .map(|(i, j, name)| {
            let mut pairs: HashMap<(Option<String>, Option<String>), usize> = HashMap::new();
            for row in &right.rows {
                *pairs
                    .entry((text_at(row, right_key), text_at(row, j)))
                    .or_default() += 1;
            }

            let matched: usize = left
                .rows
                .iter()
                .map(|row| {
                    pairs
                        .get(&(text_at(row, left_key), text_at(row, i)))
                        .copied()
                        .unwrap_or(0)
                })
                .sum();

            #[allow(clippy::cast_precision_loss)]
            let ratio = if total == 0 || matched == 0 {
                0.0
            } else {
                matched as f64 / total as f64
            };
            ColumnMatchRatio {
                column: name.to_string(),
                ratio,
            }
        })
        .collect();

    Ok(ratios)
}

/// Returns the rows whose primary key exists on both sides but whose
/// `column` value differs, as `[key, column__1, column__2]`.
pub fn differing_rows(
    left: &QueryResult,
    right: &QueryResult,
    primary_key: &str,
    column: &str,
) -> Result<QueryResult> {
    let left_key = key_index(left, primary_key)?;
    let right_key = key_index(right, primary_key)?;
    let left_column = left.column_index(column)?;
    let right_column = right.column_index(column)?;

    let mut by_key: HashMap<Option<String>, Vec<&Value>> = HashMap::new();
    for row in &right.rows {
        if let Some(value) = row.get(right_column) {
            by_key.entry(text_at(row, right_key)).or_default().push(value);
        }
    }

    let mut result = QueryResult::new([
        primary_key.to_string(),
        format!("{column}__1"),
        format!("{column}__2"),
    ]);
    for row in &left.rows {
        let (Some(key), Some(value)) = (row.get(left_key), row.get(left_column)) else {
            continue;
        };
        let Some(candidates) = by_key.get(&key.to_text()) else {
            continue;
        };
        for other in candidates {
            if value.to_text() != other.to_text() {
                result
                    .rows
                    .push(vec![key.clone(), value.clone(), (*other).clone()]);
            }
        }
    }
    Ok(result)
}

fn key_index(result: &QueryResult, primary_key: &str) -> Result<usize> {
    result
        .column_index(primary_key)
        .map_err(|_| DiffError::PrimaryKeyNotCommon(primary_key.to_string()))
}

fn text_at(row: &[Value], index: usize) -> Option<String> {
    row.get(index).and_then(Value::to_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(a: [i64; 4], b: [i64; 4], c: [&str; 4]) -> QueryResult {
        (0..4).fold(QueryResult::new(["A", "B", "C"]), |frame, i| {
            frame.row([Value::from(a[i]), Value::from(b[i]), Value::from(c[i])])
        })
    }

    fn ratio_of(ratios: &[ColumnMatchRatio], column: &str) -> f64 {
        ratios
            .iter()
            .find(|r| r.column == column)
            .map(|r| r.ratio)
            .unwrap()
    }

    #[test]
    fn test_ratios_three_and_two_quarters() {
        let df1 = frame([1, 2, 3, 4], [4, 5, 6, 7], ["x", "y", "z", "w"]);
        let df2 = frame([1, 2, 3, 4], [4, 5, 6, 8], ["x", "y", "r", "v"]);

        let ratios = compute_common_value_ratios(&df1, &df2, "A").unwrap();
        assert_eq!(ratios.len(), 2);
        assert_eq!(ratio_of(&ratios, "B"), 0.75);
        assert_eq!(ratio_of(&ratios, "C"), 0.5);
    }

    #[test]
    fn test_ratios_with_missing_keys() {
        let df1 = frame([1, 2, 3, 4], [4, 5, 6, 7], ["x", "y", "z", "w"]);
        let df2 = frame([1, 2, 3, 5], [6, 5, 7, 8], ["x", "y", "z", "w"]);

        let ratios = compute_common_value_ratios(&df1, &df2, "A").unwrap();
        assert_eq!(ratio_of(&ratios, "B"), 0.25);
        assert_eq!(ratio_of(&ratios, "C"), 0.75);
    }

    #[test]
    fn test_values_compared_as_text() {
        let df1 = QueryResult::new(["id", "v"]).row([Value::Integer(1), Value::Integer(10)]);
        let df2 = QueryResult::new(["id", "v"]).row([Value::from("1"), Value::from("10")]);

        let ratios = compute_common_value_ratios(&df1, &df2, "id").unwrap();
        assert_eq!(ratios[0].ratio, 1.0);
    }

    #[test]
    fn test_no_match_is_zero() {
        let df1 = QueryResult::new(["id", "v"]).row([Value::Integer(1), Value::from("a")]);
        let df2 = QueryResult::new(["id", "v"]).row([Value::Integer(2), Value::from("a")]);

        let ratios = compute_common_value_ratios(&df1, &df2, "id").unwrap();
        assert_eq!(ratios[0].ratio, 0.0);

        let empty = QueryResult::new(["id", "v"]);
        let ratios = compute_common_value_ratios(&empty, &df2, "id").unwrap();
        assert_eq!(ratios[0].ratio, 0.0);
    }

    #[test]
    fn test_no_common_columns() {
        let df1 = QueryResult::new(["id", "a"]);
        let df2 = QueryResult::new(["id", "b"]);
        assert!(matches!(
            compute_common_value_ratios(&df1, &df2, "id"),
            Err(DiffError::NoCommonColumns { .. })
        ));
    }

    #[test]
    fn test_missing_primary_key() {
        let df1 = QueryResult::new(["id", "a"]);
        let df2 = QueryResult::new(["key", "a"]);
        assert!(matches!(
            compute_common_value_ratios(&df1, &df2, "id"),
            Err(DiffError::PrimaryKeyNotCommon(_))
        ));
    }

    #[test]
    fn test_differing_rows() {
        let df1 = frame([1, 2, 3, 4], [4, 5, 6, 7], ["x", "y", "z", "w"]);
        let df2 = frame([1, 2, 3, 5], [6, 5, 7, 8], ["x", "y", "z", "w"]);

        let diff = differing_rows(&df1, &df2, "A", "B").unwrap();
        assert_eq!(diff.columns, vec!["A", "B__1", "B__2"]);
        assert_eq!(
            diff.rows,
            vec![
                vec![Value::Integer(1), Value::Integer(4), Value::Integer(6)],
                vec![Value::Integer(3), Value::Integer(6), Value::Integer(7)],
            ]
        );

        let same = differing_rows(&df1, &df2, "A", "C").unwrap();
        assert!(same.is_empty());
    }
}
