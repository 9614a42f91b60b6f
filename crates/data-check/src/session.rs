//! Comparison session using the typestate pattern.
//!
//! A [`DataDiff`] moves through its phases by consuming or borrowing the
//! previous one:
//!
//! ```text
//! Unconfigured --resolve_schemas--> SchemasResolved --select_key--> KeySelected
//!     --execute--> Complete --plain_diff--> PlainDiff
//! ```
//!
//! Methods only exist on the phase where they make sense, so running the
//! ratio query before a key was chosen does not compile. Configuration
//! errors are raised by `select_key`, before any query runs. `execute`
//! borrows the configured session: when the engine fails, the caller still
//! holds it and may simply call `execute` again.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use data_check_core::comparator::{compute_common_value_ratios, differing_rows, ColumnMatchRatio};
use data_check_core::error::Result;
use data_check_core::reconcile::{common_schema, diff_columns};
use data_check_core::report::{
    parse_ratio_result, sort_ratios, ColumnRatio, DataQualityWarning, PrimaryKeyInsight,
};
use data_check_core::result::{IndexedResult, QueryResult};
use data_check_core::schema::TableSchema;
use data_check_core::source::Source;
use data_check_core::synthesizer::{QuerySynthesizer, Side};
use futures::future::try_join;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::client::QueryClient;
use crate::config::{ComparisonConfig, ResolvedConfig};

/// Phases of a comparison session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Sources known, nothing fetched.
    Unconfigured,
    /// Both schemas fetched and reconciled.
    SchemasResolved,
    /// Key and columns validated.
    KeySelected,
    /// Queries in flight.
    Executing,
    /// Report available.
    Complete,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconfigured => "unconfigured",
            Self::SchemasResolved => "schemas_resolved",
            Self::KeySelected => "key_selected",
            Self::Executing => "executing",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Marker trait of session states.
pub trait SessionState {
    /// The phase this state stands for.
    const PHASE: SessionPhase;
}

/// State: nothing fetched yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

/// Raw schemas of both sources and their reconciliation.
#[derive(Debug, Clone)]
pub struct SchemasResolved {
    schema1: TableSchema,
    schema2: TableSchema,
    common: TableSchema,
}

/// State: schemas plus a validated configuration.
#[derive(Debug, Clone)]
pub struct KeySelected {
    schemas: SchemasResolved,
    config: ResolvedConfig,
}

/// State: the comparison ran.
#[derive(Debug, Clone)]
pub struct Complete {
    selected: KeySelected,
    report: ComparisonReport,
}

impl SessionState for Unconfigured {
    const PHASE: SessionPhase = SessionPhase::Unconfigured;
}

impl SessionState for SchemasResolved {
    const PHASE: SessionPhase = SessionPhase::SchemasResolved;
}

impl SessionState for KeySelected {
    const PHASE: SessionPhase = SessionPhase::KeySelected;
}

impl SessionState for Complete {
    const PHASE: SessionPhase = SessionPhase::Complete;
}

/// Findings of a completed comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    /// First source as given.
    pub source1: String,
    /// Second source as given.
    pub source2: String,
    /// Joining column.
    pub primary_key: String,
    /// Effective sampling rate.
    pub sampling_rate: u8,
    /// Key reconciliation outcome.
    pub insight: PrimaryKeyInsight,
    /// SQL of the key reconciliation.
    pub insight_sql: String,
    /// Rows whose key exists only in the first source, when any key is missing.
    pub exclusive_to_table1: Option<IndexedResult>,
    /// Rows whose key exists only in the second source, when any key is missing.
    pub exclusive_to_table2: Option<IndexedResult>,
    /// Per-column agreement, most divergent first.
    pub column_ratios: Vec<ColumnRatio>,
    /// SQL of the per-column ratios.
    pub ratio_sql: String,
    /// Duplicate primary keys found in either source.
    pub warnings: Vec<DataQualityWarning>,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub finished_at: DateTime<Utc>,
}

/// A row-level diff together with the SQL that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlainDiff {
    /// Columns compared.
    pub columns: Vec<String>,
    /// The executed query.
    pub sql: String,
    /// Rows with at least one differing column, as `col__1`/`col__2` pairs.
    pub result: QueryResult,
}

/// Rows of both sources fetched for an in-memory comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InMemoryComparison {
    /// Joining column.
    pub primary_key: String,
    /// Rows of the first source.
    pub left: QueryResult,
    /// Rows of the second source.
    pub right: QueryResult,
    /// Share of matching key and value pairs per column.
    pub ratios: Vec<ColumnMatchRatio>,
}

impl InMemoryComparison {
    /// Returns the rows whose `column` differs for a shared key.
    pub fn differing_rows(&self, column: &str) -> Result<QueryResult> {
        differing_rows(&self.left, &self.right, &self.primary_key, column)
    }
}

/// A comparison between two sources, in state `S`.
pub struct DataDiff<C, S> {
    client: Arc<C>,
    source1: Source,
    source2: Source,
    state: S,
}

impl<C, S: Clone> Clone for DataDiff<C, S> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            source1: self.source1.clone(),
            source2: self.source2.clone(),
            state: self.state.clone(),
        }
    }
}

impl<C, S: SessionState> fmt::Debug for DataDiff<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataDiff")
            .field("source1", &self.source1)
            .field("source2", &self.source2)
            .field("phase", &S::PHASE)
            .finish_non_exhaustive()
    }
}

impl<C, S: SessionState> DataDiff<C, S> {
    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        S::PHASE
    }

    /// Returns the first source.
    #[must_use]
    pub fn source1(&self) -> &Source {
        &self.source1
    }

    /// Returns the second source.
    #[must_use]
    pub fn source2(&self) -> &Source {
        &self.source2
    }

    /// Returns the execution client.
    #[must_use]
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    fn with_state<T>(&self, state: T) -> DataDiff<C, T> {
        DataDiff {
            client: Arc::clone(&self.client),
            source1: self.source1.clone(),
            source2: self.source2.clone(),
            state,
        }
    }
}

impl<C: QueryClient, S: SessionState> DataDiff<C, S> {
    fn synthesizer_for<'a>(&'a self, config: &'a ResolvedConfig) -> QuerySynthesizer<'a> {
        QuerySynthesizer::new(
            self.client.dialect(),
            &self.source1,
            &self.source2,
            &config.primary_key,
        )
        .sampling_rate(config.sampling_rate)
    }
}

impl<C: QueryClient> DataDiff<C, Unconfigured> {
    /// Starts a session; each input is a table reference or a query.
    pub fn new(client: Arc<C>, input1: &str, input2: &str) -> Self {
        Self::from_sources(client, Source::parse(input1), Source::parse(input2))
    }

    /// Starts a session from already classified sources.
    pub fn from_sources(client: Arc<C>, source1: Source, source2: Source) -> Self {
        Self {
            client,
            source1,
            source2,
            state: Unconfigured,
        }
    }

    /// Fetches both schemas concurrently and reconciles them.
    ///
    /// Nested record columns are reported but kept in the raw schemas; only
    /// the common schema leaves them out.
    pub async fn resolve_schemas(self) -> Result<DataDiff<C, SchemasResolved>> {
        info!(source1 = %self.source1, source2 = %self.source2, "Resolving schemas");
        let (schema1, schema2) = try_join(
            self.client.get_schema(&self.source1),
            self.client.get_schema(&self.source2),
        )
        .await?;

        for (side, schema) in [(Side::Table1, &schema1), (Side::Table2, &schema2)] {
            let unsupported = schema.get_unsupported_fields();
            if !unsupported.is_empty() {
                warn!(
                    side = %side,
                    columns = ?unsupported,
                    "Nested record columns cannot be compared and are ignored"
                );
            }
        }

        let common = common_schema(&schema1, &schema2);
        debug!(columns = ?common.columns_names(), "Common schema");

        Ok(DataDiff {
            client: self.client,
            source1: self.source1,
            source2: self.source2,
            state: SchemasResolved {
                schema1,
                schema2,
                common,
            },
        })
    }
}

impl<C: QueryClient> DataDiff<C, SchemasResolved> {
    /// Returns the raw schema of the first source.
    #[must_use]
    pub fn schema1(&self) -> &TableSchema {
        &self.state.schema1
    }

    /// Returns the raw schema of the second source.
    #[must_use]
    pub fn schema2(&self) -> &TableSchema {
        &self.state.schema2
    }

    /// Returns the comparable columns shared by both sources.
    #[must_use]
    pub fn common_schema(&self) -> &TableSchema {
        &self.state.common
    }

    /// Returns, per source, the columns missing on the other side or typed
    /// differently there.
    #[must_use]
    pub fn diff_columns(&self) -> (TableSchema, TableSchema) {
        diff_columns(&self.state.schema1, &self.state.schema2)
    }

    /// Sampling only applies when both sources are tables.
    #[must_use]
    pub fn is_sampling_allowed(&self) -> bool {
        !self.source1.is_query() && !self.source2.is_query()
    }

    /// Validates the key and column choice.
    pub fn select_key(&self, config: &ComparisonConfig) -> Result<DataDiff<C, KeySelected>> {
        let config = config.validate(
            &self.state.schema1,
            &self.state.schema2,
            self.is_sampling_allowed(),
        )?;
        info!(
            primary_key = %config.primary_key,
            columns = config.columns.len(),
            sampling_rate = config.sampling_rate,
            "Key selected"
        );
        Ok(self.with_state(KeySelected {
            schemas: self.state.clone(),
            config,
        }))
    }

    /// Fetches the selected columns of both sources and compares them in
    /// memory instead of in SQL. Meant for small sources.
    pub async fn compare_in_memory(&self, config: &ComparisonConfig) -> Result<InMemoryComparison> {
        let config = config.validate(&self.state.schema1, &self.state.schema2, false)?;
        let mut columns = vec![config.primary_key.clone()];
        columns.extend(config.columns.iter().cloned());

        let synthesizer = QuerySynthesizer::new(
            self.client.dialect(),
            &self.source1,
            &self.source2,
            &config.primary_key,
        );
        let sql1 = synthesizer.fetch_rows(Side::Table1, &columns);
        let sql2 = synthesizer.fetch_rows(Side::Table2, &columns);

        info!(columns = columns.len(), "Fetching rows for in-memory comparison");
        let (left, right) = try_join(
            self.client.run_query(&sql1, config.timeout),
            self.client.run_query(&sql2, config.timeout),
        )
        .await?;

        let ratios = compute_common_value_ratios(&left, &right, &config.primary_key)?;
        Ok(InMemoryComparison {
            primary_key: config.primary_key,
            left,
            right,
            ratios,
        })
    }
}

impl<C: QueryClient> DataDiff<C, KeySelected> {
    /// Returns the validated configuration.
    #[must_use]
    pub fn config(&self) -> &ResolvedConfig {
        &self.state.config
    }

    /// Returns the comparable columns shared by both sources.
    #[must_use]
    pub fn common_schema(&self) -> &TableSchema {
        &self.state.schemas.common
    }

    /// Returns a synthesizer for this session's sources and key.
    #[must_use]
    pub fn synthesizer(&self) -> QuerySynthesizer<'_> {
        self.synthesizer_for(&self.state.config)
    }

    /// Returns the schema of the selected columns.
    pub fn selected_schema(&self) -> Result<TableSchema> {
        self.state
            .schemas
            .common
            .select("filtered_columns", &self.state.config.columns)
    }

    /// Runs the comparison.
    ///
    /// Steps, in order: primary key uniqueness per source, key
    /// reconciliation, rows exclusive to each source when some key is
    /// missing, then per-column ratios. Both sources are queried
    /// concurrently wherever a step reads them independently.
    pub async fn execute(&self) -> Result<DataDiff<C, Complete>> {
        let started_at = Utc::now();
        let config = &self.state.config;
        let synthesizer = self.synthesizer();
        let selected = self.selected_schema()?;
        info!(
            phase = %SessionPhase::Executing,
            primary_key = %config.primary_key,
            "Running comparison"
        );

        let warnings = self.check_primary_keys(&synthesizer).await?;

        let insight_sql = synthesizer.primary_key_insight();
        let insight_result = self.client.run_query(&insight_sql, config.timeout).await?;
        let insight = PrimaryKeyInsight::from_result(&insight_result)?;
        info!(
            total_rows = insight.total_rows,
            missing_in_table1 = insight.missing_primary_key_in_table1,
            missing_in_table2 = insight.missing_primary_key_in_table2,
            "Primary keys reconciled"
        );

        let (exclusive_to_table1, exclusive_to_table2) = if insight.has_missing_keys() {
            let common = &self.state.schemas.common;
            let sql1 = synthesizer.exclusive_primary_keys(common, Side::Table1);
            let sql2 = synthesizer.exclusive_primary_keys(common, Side::Table2);
            let (rows1, rows2) = try_join(
                self.client.run_query(&sql1, config.timeout),
                self.client.run_query(&sql2, config.timeout),
            )
            .await?;
            (
                Some(rows1.set_index(&config.primary_key)?),
                Some(rows2.set_index(&config.primary_key)?),
            )
        } else {
            (None, None)
        };

        let ratio_sql = synthesizer.ratio_per_column(&selected)?;
        let ratio_result = self.client.run_query(&ratio_sql, config.timeout).await?;
        let mut column_ratios = parse_ratio_result(&ratio_result)?;
        sort_ratios(&mut column_ratios);

        let report = ComparisonReport {
            source1: self.source1.to_string(),
            source2: self.source2.to_string(),
            primary_key: config.primary_key.clone(),
            sampling_rate: config.sampling_rate,
            insight,
            insight_sql,
            exclusive_to_table1,
            exclusive_to_table2,
            column_ratios,
            ratio_sql,
            warnings,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            phase = %SessionPhase::Complete,
            columns = report.column_ratios.len(),
            "Comparison finished"
        );

        Ok(self.with_state(Complete {
            selected: self.state.clone(),
            report,
        }))
    }

    async fn check_primary_keys(
        &self,
        synthesizer: &QuerySynthesizer<'_>,
    ) -> Result<Vec<DataQualityWarning>> {
        let timeout = self.state.config.timeout;
        let sql1 = synthesizer.primary_key_duplicates(Side::Table1);
        let sql2 = synthesizer.primary_key_duplicates(Side::Table2);
        let (duplicates1, duplicates2) = try_join(
            self.client.run_query(&sql1, timeout),
            self.client.run_query(&sql2, timeout),
        )
        .await?;

        let warnings: Vec<DataQualityWarning> = [
            (Side::Table1, sql1, duplicates1),
            (Side::Table2, sql2, duplicates2),
        ]
        .into_iter()
        .filter(|(_, _, duplicates)| !duplicates.is_empty())
        .map(|(side, sql, duplicate_keys)| DataQualityWarning {
            side,
            primary_key: self.state.config.primary_key.clone(),
            sql,
            duplicate_keys,
        })
        .collect();

        for warning in &warnings {
            warn!(side = %warning.side, sql = %warning.sql, "{warning}");
        }
        Ok(warnings)
    }
}

impl<C: QueryClient> DataDiff<C, Complete> {
    /// Returns the findings.
    #[must_use]
    pub fn report(&self) -> &ComparisonReport {
        &self.state.report
    }

    /// Returns the validated configuration.
    #[must_use]
    pub fn config(&self) -> &ResolvedConfig {
        &self.state.selected.config
    }

    /// Consumes the session, keeping the findings.
    #[must_use]
    pub fn into_report(self) -> ComparisonReport {
        self.state.report
    }

    /// Returns the configured session, to run the comparison again.
    #[must_use]
    pub fn rerun(&self) -> DataDiff<C, KeySelected> {
        self.with_state(self.state.selected.clone())
    }

    /// Runs the row-level diff over the given common columns.
    pub async fn plain_diff<S: AsRef<str>>(&self, columns: &[S]) -> Result<PlainDiff> {
        let selected = &self.state.selected;
        let names: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
        let schema = selected.schemas.common.select("filtered_columns", &names)?;

        let sql = self.synthesizer_for(&selected.config).plain_diff(&schema)?;
        let result = self.client.run_query(&sql, selected.config.timeout).await?;
        info!(columns = ?names, rows = result.len(), "Plain diff finished");

        Ok(PlainDiff {
            columns: names,
            sql,
            result,
        })
    }
}
