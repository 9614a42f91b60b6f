//! Comparison configuration and its validation.
//!
//! Everything here is checked before the first query is sent, so a bad key
//! or column name never costs a warehouse scan.

use std::path::Path;
use std::time::Duration;

use data_check_core::error::{DiffError, Result};
use data_check_core::reconcile::{common_schema, select_all_columns};
use data_check_core::schema::TableSchema;
use data_check_core::synthesizer::{FULL_SAMPLING_RATE, MIN_SAMPLING_RATE};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default timeout of a single query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(300);

/// Which columns to compare.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSelection {
    /// Every common column except the primary key.
    #[default]
    All,
    /// The named columns, in this order.
    Explicit(Vec<String>),
}

/// User choices for one comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// Column joining the two sources.
    pub primary_key: Option<String>,
    /// Compared columns.
    #[serde(default)]
    pub columns: ColumnSelection,
    /// Percentage of the first table read by diff queries.
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u8,
    /// Timeout of each query.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

const fn default_sampling_rate() -> u8 {
    FULL_SAMPLING_RATE
}

const fn default_timeout() -> Duration {
    DEFAULT_QUERY_TIMEOUT
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            primary_key: None,
            columns: ColumnSelection::All,
            sampling_rate: FULL_SAMPLING_RATE,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl ComparisonConfig {
    /// Creates a configuration comparing every column on `primary_key`.
    #[must_use]
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: Some(primary_key.into()),
            ..Self::default()
        }
    }

    /// Restricts the comparison to the given columns.
    #[must_use]
    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = ColumnSelection::Explicit(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Compares every common column.
    #[must_use]
    pub fn all_columns(mut self) -> Self {
        self.columns = ColumnSelection::All;
        self
    }

    /// Sets the sampling rate.
    #[must_use]
    pub fn sampling_rate(mut self, rate: u8) -> Self {
        self.sampling_rate = rate;
        self
    }

    /// Sets the query timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks the configuration against both schemas and resolves the
    /// column selection.
    ///
    /// Nested record columns named explicitly are dropped with a warning.
    /// When `sampling_allowed` is false the rate falls back to 100.
    pub fn validate(
        &self,
        schema1: &TableSchema,
        schema2: &TableSchema,
        sampling_allowed: bool,
    ) -> Result<ResolvedConfig> {
        if !(MIN_SAMPLING_RATE..=FULL_SAMPLING_RATE).contains(&self.sampling_rate) {
            return Err(DiffError::InvalidSamplingRate(self.sampling_rate));
        }

        let common = common_schema(schema1, schema2);
        if common.columns.is_empty() {
            return Err(DiffError::NoCommonColumns {
                left: schema1.table_name.clone(),
                right: schema2.table_name.clone(),
            });
        }

        let primary_key = self
            .primary_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(DiffError::PrimaryKeyNotSet)?;
        if !common.contains(primary_key) {
            return Err(DiffError::PrimaryKeyNotCommon(primary_key.to_string()));
        }

        let columns = match &self.columns {
            ColumnSelection::All => select_all_columns(&common, primary_key)?,
            ColumnSelection::Explicit(names) => {
                let mut columns = Vec::with_capacity(names.len());
                for name in names {
                    if common.contains(name) {
                        columns.push(name.clone());
                    } else if is_nested_in_both(schema1, schema2, name) {
                        warn!(column = %name, "Nested record column cannot be compared, skipping");
                    } else {
                        return Err(DiffError::ColumnNotFound {
                            column: name.clone(),
                            table: common.table_name.clone(),
                        });
                    }
                }
                if columns.is_empty() {
                    return Err(DiffError::EmptyColumnSelection);
                }
                columns
            }
        };

        let sampling_rate = if sampling_allowed {
            self.sampling_rate
        } else {
            if self.sampling_rate < FULL_SAMPLING_RATE {
                info!(
                    requested = self.sampling_rate,
                    "Sampling only applies to tables, reading every row"
                );
            }
            FULL_SAMPLING_RATE
        };

        Ok(ResolvedConfig {
            primary_key: primary_key.to_string(),
            columns,
            sampling_rate,
            timeout: self.timeout,
        })
    }
}

fn is_nested_in_both(schema1: &TableSchema, schema2: &TableSchema, name: &str) -> bool {
    let nested = |schema: &TableSchema| schema.get_column(name).is_ok_and(|c| c.is_unsupported());
    schema1.contains(name) && schema2.contains(name) && (nested(schema1) || nested(schema2))
}

/// A configuration checked against the schemas of both sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    /// Column joining the two sources, present in both.
    pub primary_key: String,
    /// Compared columns, all common, never empty, key excluded for "all".
    pub columns: Vec<String>,
    /// Effective sampling rate.
    pub sampling_rate: u8,
    /// Timeout of each query.
    pub timeout: Duration,
}

/// Loads a [`TableSchema`] from a JSON file.
pub fn load_schema(path: impl AsRef<Path>) -> Result<TableSchema> {
    let content = std::fs::read_to_string(path)?;
    let schema: TableSchema = serde_json::from_str(&content)?;
    TableSchema::from_columns(schema.table_name, schema.columns)
}
