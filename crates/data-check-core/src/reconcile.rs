//! Schema reconciliation between the two compared sources.
//!
//! [`common_schema`] decides which columns can be compared at all;
//! [`diff_columns`] reports schema drift (columns missing on one side or
//! declared with another type).

use crate::error::{DiffError, Result};
use crate::schema::TableSchema;

/// Label of the reconciled schema.
pub const COMMON_SCHEMA_NAME: &str = "common_schema";

/// Returns the columns present in both schemas, excluding unsupported
/// nested records, as declared in `schema1`, sorted by name.
#[must_use]
pub fn common_schema(schema1: &TableSchema, schema2: &TableSchema) -> TableSchema {
    let columns = schema1
        .get_common_column_names(schema2, false)
        .iter()
        .filter_map(|name| schema1.get_column(name).ok().cloned())
        .collect();

    TableSchema {
        table_name: COMMON_SCHEMA_NAME.to_string(),
        columns,
    }
}

/// Returns, per side, the columns absent on the other side or declared with
/// a different type there.
#[must_use]
pub fn diff_columns(schema1: &TableSchema, schema2: &TableSchema) -> (TableSchema, TableSchema) {
    let drifted = |mine: &TableSchema, theirs: &TableSchema, name: &str| TableSchema {
        table_name: name.to_string(),
        columns: mine
            .columns
            .iter()
            .filter(|column| {
                theirs
                    .get_column(&column.name)
                    .map_or(true, |other| other.field_type != column.field_type)
            })
            .cloned()
            .collect(),
    };

    (
        drifted(schema1, schema2, "diff_1_table"),
        drifted(schema2, schema1, "diff_2_table"),
    )
}

/// Returns the columns compared by "select all": every common column except
/// the primary key.
pub fn select_all_columns(common: &TableSchema, primary_key: &str) -> Result<Vec<String>> {
    let columns: Vec<String> = common
        .columns
        .iter()
        .filter(|c| c.name != primary_key)
        .map(|c| c.name.clone())
        .collect();

    if columns.is_empty() {
        return Err(DiffError::EmptyColumnSelection);
    }
    Ok(columns)
}
