//! Schema representation types.
//!
//! A [`TableSchema`] describes the columns of one compared source, either a
//! real table or the result shape of a query. Derived schemas such as the
//! common schema are built fresh for each comparison and never mutated.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::dialect::SqlDialect;
use crate::error::{DiffError, Result};

/// Semantic column types, named after the warehouse type system.
///
/// Dialect aliases (`INT64`, `FLOAT64`, `BOOL`, ...) deserialize to the
/// canonical variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    /// Text.
    String,
    /// 64-bit integer.
    #[serde(alias = "INT64", alias = "INT")]
    Integer,
    /// Double precision floating point.
    #[serde(alias = "FLOAT64")]
    Float,
    /// Exact decimal.
    #[serde(alias = "DECIMAL")]
    Numeric,
    /// Wide exact decimal.
    #[serde(alias = "BIGDECIMAL")]
    BigNumeric,
    /// Boolean.
    #[serde(alias = "BOOL")]
    Boolean,
    /// Absolute point in time.
    Timestamp,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Civil date and time.
    DateTime,
    /// Geography value.
    Geography,
    /// Binary data.
    Bytes,
    /// Nested record (struct of structs).
    Record,
    /// Array.
    Array,
    /// Nested struct.
    Struct,
    /// JSON document.
    Json,
    /// Type could not be determined.
    Any,
}

impl FieldType {
    /// Maps a declared SQL column type (as reported by SQLite or DuckDB
    /// metadata) onto a semantic type, following SQLite affinity rules.
    #[must_use]
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or_default().trim();
        match base {
            "" | "NULL" => Self::Any,
            "BOOLEAN" | "BOOL" => Self::Boolean,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "DATETIME" => Self::DateTime,
            "TIMESTAMP" | "TIMESTAMPTZ" => Self::Timestamp,
            "JSON" | "JSONB" => Self::Json,
            "STRUCT" => Self::Struct,
            "RECORD" => Self::Record,
            "GEOGRAPHY" => Self::Geography,
            "BIGNUMERIC" => Self::BigNumeric,
            _ if base.ends_with("[]") || base.starts_with("ARRAY") => Self::Array,
            _ if base.split_whitespace().any(is_integer_word) => Self::Integer,
            _ if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") => {
                Self::String
            }
            "STRING" | "UUID" => Self::String,
            _ if base.contains("BLOB") || base == "BYTES" || base == "BYTEA" => Self::Bytes,
            _ if base.contains("REAL") || base.contains("FLOA") || base.contains("DOUB") => {
                Self::Float
            }
            _ => Self::Numeric,
        }
    }

    /// Returns the canonical upper-case type name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Numeric => "NUMERIC",
            Self::BigNumeric => "BIGNUMERIC",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::DateTime => "DATETIME",
            Self::Geography => "GEOGRAPHY",
            Self::Bytes => "BYTES",
            Self::Record => "RECORD",
            Self::Array => "ARRAY",
            Self::Struct => "STRUCT",
            Self::Json => "JSON",
            Self::Any => "ANY",
        }
    }
}

/// Whether one word of a declared type names an integer, such as `INT8`,
/// `BIGINT` or `UINTEGER`. `POINT` and `INTERVAL` do not.
fn is_integer_word(word: &str) -> bool {
    let word = word.trim_end_matches(|c: char| c.is_ascii_digit());
    let word = word.strip_prefix('U').unwrap_or(word);
    matches!(
        word,
        "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "HUGEINT"
    )
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    /// Single value, may be NULL.
    #[default]
    Nullable,
    /// Single value, never NULL.
    Required,
    /// Repeated value (array).
    Repeated,
}

impl FieldMode {
    /// Returns the canonical upper-case mode name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nullable => "NULLABLE",
            Self::Required => "REQUIRED",
            Self::Repeated => "REPEATED",
        }
    }
}

/// How a column is turned into text for null-safe comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// Already text, used as is.
    PassThrough,
    /// Array flattened into a sorted, deduplicated, comma-joined string.
    Aggregate,
    /// Cast to the dialect's text type.
    Text,
    /// Nested type, never compared.
    Skip,
}

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Semantic type.
    pub field_type: FieldType,
    /// Column mode.
    #[serde(default)]
    pub mode: FieldMode,
}

impl ColumnSchema {
    /// Creates a new nullable column schema.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode: FieldMode::Nullable,
        }
    }

    /// Sets the column as repeated.
    #[must_use]
    pub fn repeated(mut self) -> Self {
        self.mode = FieldMode::Repeated;
        self
    }

    /// Sets the column as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.mode = FieldMode::Required;
        self
    }

    /// Returns whether the column cannot be compared (nested record).
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        self.field_type == FieldType::Record
    }

    /// Returns the text conversion applied to this column.
    #[must_use]
    pub fn cast_kind(&self) -> CastKind {
        match (self.field_type, self.mode) {
            (FieldType::Record | FieldType::Struct, _) => CastKind::Skip,
            (FieldType::Array, _) | (_, FieldMode::Repeated) => CastKind::Aggregate,
            (FieldType::String, _) => CastKind::PassThrough,
            _ => CastKind::Text,
        }
    }
}

/// A column paired with its text expression, as emitted in generated SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastColumn<'a> {
    /// The source column.
    pub column: &'a ColumnSchema,
    /// SQL expression producing the column's text form.
    pub expression: String,
}

/// Ordered set of columns describing one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Label of the schema; not necessarily a real table.
    pub table_name: String,
    /// Column definitions, names unique.
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Creates a new empty table schema.
    #[must_use]
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            columns: Vec::new(),
        }
    }

    /// Creates a schema from columns, rejecting duplicate names.
    pub fn from_columns(table_name: impl Into<String>, columns: Vec<ColumnSchema>) -> Result<Self> {
        let table_name = table_name.into();
        let mut seen = BTreeSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DiffError::DuplicateColumn {
                    column: column.name.clone(),
                    table: table_name,
                });
            }
        }
        Ok(Self {
            table_name,
            columns,
        })
    }

    /// Adds a column, replacing any column with the same name.
    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        self
    }

    /// Returns the column names, in column order.
    #[must_use]
    pub fn columns_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Returns whether a column with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Gets a column by name.
    pub fn get_column(&self, name: &str) -> Result<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| DiffError::ColumnNotFound {
                column: name.to_string(),
                table: self.table_name.clone(),
            })
    }

    /// Returns the names of nested record columns, which cannot be compared.
    #[must_use]
    pub fn get_unsupported_fields(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_unsupported())
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Returns the column names present in both schemas, sorted by name.
    ///
    /// With `include_unsupported = false`, names flagged unsupported on
    /// either side are left out.
    #[must_use]
    pub fn get_common_column_names(&self, other: &Self, include_unsupported: bool) -> Vec<String> {
        let mine: BTreeSet<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let theirs: BTreeSet<&str> = other.columns.iter().map(|c| c.name.as_str()).collect();

        let unsupported: BTreeSet<&str> = if include_unsupported {
            BTreeSet::new()
        } else {
            self.get_unsupported_fields()
                .into_iter()
                .chain(other.get_unsupported_fields())
                .collect()
        };

        mine.intersection(&theirs)
            .filter(|name| !unsupported.contains(*name))
            .map(|name| (*name).to_string())
            .collect()
    }

    /// Builds a derived schema holding the named columns, in the given order.
    pub fn select<S: AsRef<str>>(&self, table_name: &str, names: &[S]) -> Result<Self> {
        let columns = names
            .iter()
            .map(|name| self.get_column(name.as_ref()).cloned())
            .collect::<Result<Vec<_>>>()?;
        Self::from_columns(table_name, columns)
    }

    /// Returns each comparable column with its text expression.
    ///
    /// Column references are written `{prefix}{name}{suffix}` with the
    /// identifier part quoted. Record and struct columns are skipped, so the
    /// result is not positionally aligned with [`Self::columns_names`].
    #[must_use]
    pub fn cast_columns(
        &self,
        dialect: &dyn SqlDialect,
        prefix: &str,
        suffix: &str,
    ) -> Vec<CastColumn<'_>> {
        self.columns
            .iter()
            .filter_map(|column| {
                let reference = format!(
                    "{prefix}{}",
                    dialect.quote_identifier(&format!("{}{suffix}", column.name))
                );
                dialect
                    .text_expression(column, &reference)
                    .map(|expression| CastColumn { column, expression })
            })
            .collect()
    }

    /// Returns the per-column text expressions only.
    #[must_use]
    pub fn get_query_cast_schema_as_string(
        &self,
        dialect: &dyn SqlDialect,
        prefix: &str,
        suffix: &str,
    ) -> Vec<String> {
        self.cast_columns(dialect, prefix, suffix)
            .into_iter()
            .map(|c| c.expression)
            .collect()
    }
}
