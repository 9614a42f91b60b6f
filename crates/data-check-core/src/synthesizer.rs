//! Diff query synthesis.
//!
//! [`QuerySynthesizer`] builds the SQL of every comparison step from two
//! sources, a primary key and a sampling rate. The query shapes are shared
//! by all dialects; only fragments come from the [`SqlDialect`].
//!
//! Every query starts with two common table expressions, `table1` and
//! `table2`, one per source:
//!
//! ```sql
//! with
//! table1 as (
//!     select * from `project.dataset.users_v1`
//! ),
//! table2 as (
//!     select * from `project.dataset.users_v2`
//! ),
//! ...
//! ```

use serde::{Deserialize, Serialize};

use crate::dialect::SqlDialect;
use crate::error::{DiffError, Result};
use crate::schema::{CastColumn, TableSchema};
use crate::source::Source;

/// Maximum number of rows returned by exclusive-key and duplicate-key queries.
pub const EXCLUSIVE_ROWS_LIMIT: u64 = 500;

/// Text standing in for NULL in comparisons, so two NULLs compare equal.
pub const NULL_SENTINEL: &str = "none";

/// Sampling rate meaning "read every row".
pub const FULL_SAMPLING_RATE: u8 = 100;

/// Smallest accepted sampling rate.
pub const MIN_SAMPLING_RATE: u8 = 10;

/// One of the two compared sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The first source.
    Table1,
    /// The second source.
    Table2,
}

impl Side {
    /// Returns the CTE name of this side.
    #[must_use]
    pub fn alias(self) -> &'static str {
        match self {
            Self::Table1 => "table1",
            Self::Table2 => "table2",
        }
    }

    /// Returns the column suffix used for this side's values.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Table1 => "__1",
            Self::Table2 => "__2",
        }
    }

    /// Returns the opposite side.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Table1 => Self::Table2,
            Self::Table2 => Self::Table1,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.alias())
    }
}

/// Builds comparison queries for one pair of sources.
#[derive(Clone, Copy)]
pub struct QuerySynthesizer<'a> {
    dialect: &'a dyn SqlDialect,
    source1: &'a Source,
    source2: &'a Source,
    primary_key: &'a str,
    sampling_rate: u8,
}

impl<'a> QuerySynthesizer<'a> {
    /// Creates a synthesizer reading every row of both sources.
    #[must_use]
    pub fn new(
        dialect: &'a dyn SqlDialect,
        source1: &'a Source,
        source2: &'a Source,
        primary_key: &'a str,
    ) -> Self {
        Self {
            dialect,
            source1,
            source2,
            primary_key,
            sampling_rate: FULL_SAMPLING_RATE,
        }
    }

    /// Sets the sampling rate (percentage of the first table's rows).
    #[must_use]
    pub fn sampling_rate(mut self, rate: u8) -> Self {
        self.sampling_rate = rate;
        self
    }

    /// Returns the dialect.
    #[must_use]
    pub fn dialect(&self) -> &'a dyn SqlDialect {
        self.dialect
    }

    /// Returns the primary key column.
    #[must_use]
    pub fn primary_key(&self) -> &'a str {
        self.primary_key
    }

    /// Sampling only applies when both sources are plain tables.
    #[must_use]
    pub fn is_sampling_allowed(&self) -> bool {
        !self.source1.is_query() && !self.source2.is_query()
    }

    /// Returns whether generated diff queries sample the first table.
    #[must_use]
    pub fn is_sampling_active(&self) -> bool {
        self.sampling_rate < FULL_SAMPLING_RATE && self.is_sampling_allowed()
    }

    fn key(&self) -> String {
        self.dialect.quote_identifier(self.primary_key)
    }

    fn source_query(&self, side: Side, sampled: bool) -> String {
        match (side, self.source1) {
            (Side::Table1, Source::Table(table)) if sampled && self.is_sampling_active() => {
                self.dialect.sampled_table(table, self.sampling_rate)
            }
            (Side::Table1, source) => source.to_query(self.dialect),
            (Side::Table2, _) => self.source2.to_query(self.dialect),
        }
    }

    fn source_ctes(&self, sampled: bool) -> Vec<(&'static str, String)> {
        vec![
            (Side::Table1.alias(), self.source_query(Side::Table1, sampled)),
            (Side::Table2.alias(), self.source_query(Side::Table2, sampled)),
        ]
    }

    /// Compares the primary keys of both sources through a full outer join.
    ///
    /// Emits `total_rows`, `missing_primary_key_in_table1`,
    /// `missing_primary_key_in_table2` and `missing_primary_keys_ratio`,
    /// the latter NULL when the join is empty.
    #[must_use]
    pub fn primary_key_insight(&self) -> String {
        let key = self.key();
        let agg_diff_keys = format!(
            "select\n    count(*) as total_rows,\n    {} as missing_primary_key_in_table1,\n    {} as missing_primary_key_in_table2\nfrom table1\nfull outer join table2\n    using ({key})",
            self.dialect.count_if(&format!("table1.{key} is null")),
            self.dialect.count_if(&format!("table2.{key} is null")),
        );

        let mut ctes = self.source_ctes(false);
        ctes.push(("agg_diff_keys", agg_diff_keys));

        let body = format!(
            "select\n    total_rows,\n    missing_primary_key_in_table1,\n    missing_primary_key_in_table2,\n    {} as missing_primary_keys_ratio\nfrom agg_diff_keys",
            self.dialect.safe_divide(
                "missing_primary_key_in_table1 + missing_primary_key_in_table2",
                "total_rows"
            ),
        );
        render(&ctes, &body)
    }

    /// Returns the rows of `exclusive_to` whose key is absent from the other
    /// source, capped at [`EXCLUSIVE_ROWS_LIMIT`].
    #[must_use]
    pub fn exclusive_primary_keys(&self, schema: &TableSchema, exclusive_to: Side) -> String {
        self.exclusive_primary_keys_with_limit(schema, exclusive_to, EXCLUSIVE_ROWS_LIMIT)
    }

    /// Same as [`Self::exclusive_primary_keys`] with an explicit row cap.
    ///
    /// The key column keeps its name; every other column of `schema` is
    /// suffixed with `__1` or `__2` after the exclusive side.
    #[must_use]
    pub fn exclusive_primary_keys_with_limit(
        &self,
        schema: &TableSchema,
        exclusive_to: Side,
        limit: u64,
    ) -> String {
        let key = self.key();
        let this = exclusive_to.alias();
        let other = exclusive_to.other().alias();

        let mut columns = vec![format!("{this}.{key}")];
        columns.extend(
            schema
                .columns
                .iter()
                .filter(|c| c.name != self.primary_key)
                .map(|c| {
                    format!(
                        "{this}.{} as {}",
                        self.dialect.quote_identifier(&c.name),
                        self.dialect
                            .quote_identifier(&format!("{}{}", c.name, exclusive_to.suffix()))
                    )
                }),
        );

        let body = format!(
            "select\n    {}\nfrom {this}\nleft join {other}\n    using ({key})\nwhere {other}.{key} is null\nlimit {limit}",
            columns.join(",\n    "),
        );
        render(&self.source_ctes(false), &body)
    }

    /// Lists primary key values appearing more than once in one source.
    #[must_use]
    pub fn primary_key_duplicates(&self, side: Side) -> String {
        let key = self.key();
        let alias = side.alias();
        let body = format!(
            "select\n    {key},\n    count(*) as row_count\nfrom {alias}\ngroup by {key}\nhaving count(*) > 1\norder by row_count desc\nlimit {EXCLUSIVE_ROWS_LIMIT}"
        );
        render(&[(alias, self.source_query(side, false))], &body)
    }

    /// Selects raw values of the given columns from one source.
    #[must_use]
    pub fn fetch_rows<S: AsRef<str>>(&self, side: Side, columns: &[S]) -> String {
        let alias = side.alias();
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| self.dialect.quote_identifier(c.as_ref()))
                .collect::<Vec<_>>()
                .join(", ")
        };
        render(
            &[(alias, self.source_query(side, false))],
            &format!("select {projection}\nfrom {alias}"),
        )
    }

    /// Returns the rows, joined on the primary key, where at least one of
    /// the schema's columns differs.
    ///
    /// Every column appears as a `col__1`/`col__2` pair. NULLs are replaced
    /// by [`NULL_SENTINEL`] before comparing, so two NULLs are equal while
    /// NULL against a value differs.
    pub fn plain_diff(&self, schema: &TableSchema) -> Result<String> {
        let key = self.key();
        let (casts1, casts2) = self.comparable_pairs(
            schema,
            "",
            Side::Table1.suffix(),
            "",
            Side::Table2.suffix(),
        )?;

        let mut selected = vec![format!("table1.{key}")];
        for column in &schema.columns {
            let name = self.dialect.quote_identifier(&column.name);
            selected.push(format!(
                "table1.{name} as {}",
                self.dialect
                    .quote_identifier(&format!("{}{}", column.name, Side::Table1.suffix()))
            ));
            selected.push(format!(
                "table2.{name} as {}",
                self.dialect
                    .quote_identifier(&format!("{}{}", column.name, Side::Table2.suffix()))
            ));
        }
        let inner_merged = format!(
            "select\n    {}\nfrom table1\ninner join table2\n    using ({key})",
            selected.join(",\n    "),
        );

        let sentinel = self.dialect.string_literal(NULL_SENTINEL);
        let conditions: Vec<String> = casts1
            .iter()
            .zip(&casts2)
            .map(|(left, right)| {
                format!(
                    "coalesce({}, {sentinel}) <> coalesce({}, {sentinel})",
                    left.expression, right.expression
                )
            })
            .collect();
        let final_result = format!(
            "select *\nfrom inner_merged\nwhere {}",
            conditions.join("\n    or ")
        );

        let mut ctes = self.source_ctes(true);
        ctes.push(("inner_merged", inner_merged));
        ctes.push(("final_result", final_result));
        Ok(render(&ctes, "select *\nfrom final_result"))
    }

    /// Computes, per column, the pair `{ratio_not_null, ratio_equal}` over
    /// the rows joined on the primary key.
    ///
    /// `ratio_not_null` is the share of joined rows populated on at least
    /// one side; `ratio_equal` is the share of those populated rows whose
    /// values agree. Both are NULL when their divisor is zero.
    pub fn ratio_per_column(&self, schema: &TableSchema) -> Result<String> {
        let key = self.key();
        let (casts1, casts2) = self.comparable_pairs(schema, "table1.", "", "table2.", "")?;
        let sentinel = self.dialect.string_literal(NULL_SENTINEL);

        let mut counts = vec!["count(*) as count_common".to_string()];
        let mut ratios = Vec::with_capacity(casts1.len());
        for (left, right) in casts1.iter().zip(&casts2) {
            let name = &left.column.name;
            let not_null = self
                .dialect
                .quote_identifier(&format!("{name}__count_not_null"));
            let equal = self.dialect.quote_identifier(&format!("{name}__count_equal"));

            let populated = format!(
                "coalesce({}, {}) is not null",
                left.expression, right.expression
            );
            let agree = format!(
                "{populated} and coalesce({}, {sentinel}) = coalesce({}, {sentinel})",
                left.expression, right.expression
            );
            counts.push(format!("{} as {not_null}", self.dialect.count_if(&populated)));
            counts.push(format!("{} as {equal}", self.dialect.count_if(&agree)));

            ratios.push(format!(
                "{} as {}",
                self.dialect.ratio_pair(
                    &self.dialect.safe_divide(&not_null, "count_common"),
                    &self.dialect.safe_divide(&equal, &not_null),
                ),
                self.dialect.quote_identifier(name)
            ));
        }

        let count_diff = format!(
            "select\n    {}\nfrom table1\ninner join table2\n    using ({key})",
            counts.join(",\n    "),
        );
        let final_result = format!("select\n    {}\nfrom count_diff", ratios.join(",\n    "));

        let mut ctes = self.source_ctes(true);
        ctes.push(("count_diff", count_diff));
        ctes.push(("final_result", final_result));
        Ok(render(&ctes, "select *\nfrom final_result"))
    }

    fn comparable_pairs<'s>(
        &self,
        schema: &'s TableSchema,
        prefix1: &str,
        suffix1: &str,
        prefix2: &str,
        suffix2: &str,
    ) -> Result<(Vec<CastColumn<'s>>, Vec<CastColumn<'s>>)> {
        let casts1 = schema.cast_columns(self.dialect, prefix1, suffix1);
        let casts2 = schema.cast_columns(self.dialect, prefix2, suffix2);
        if casts1.is_empty() {
            return Err(DiffError::EmptyColumnSelection);
        }
        Ok((casts1, casts2))
    }
}

impl std::fmt::Debug for QuerySynthesizer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySynthesizer")
            .field("dialect", &self.dialect.name())
            .field("source1", self.source1)
            .field("source2", self.source2)
            .field("primary_key", &self.primary_key)
            .field("sampling_rate", &self.sampling_rate)
            .finish()
    }
}

/// Renders `with name as (query), ... body`.
fn render(ctes: &[(&str, String)], body: &str) -> String {
    let parts: Vec<String> = ctes
        .iter()
        .map(|(name, query)| format!("{name} as (\n{}\n)", indent(query)))
        .collect();
    format!("with\n{}\n{body}", parts.join(",\n"))
}

fn indent(sql: &str) -> String {
    sql.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
