//! data-check CLI
//!
//! Command-line tool comparing two tables or queries.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use data_check::prelude::*;
use data_check_core::format::{
    Rgb, format_optional_percentage, gradient, highlight_diff, render_colored_table, render_table,
};

/// Compare two SQL tables or query results.
#[derive(Parser)]
#[command(name = "data-check")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Timeout of each query, in seconds.
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,

    /// Never colour table cells, even on a terminal.
    #[arg(long)]
    no_color: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the common columns and the schema drift of two sources.
    Schema {
        /// First table or query.
        source1: String,
        /// Second table or query.
        source2: String,
    },

    /// Compare two sources on a primary key.
    Compare {
        /// First table or query.
        source1: String,
        /// Second table or query.
        source2: String,

        /// Primary key column.
        #[arg(short = 'k', long)]
        primary_key: String,

        /// Columns to compare (all common columns if not specified).
        #[arg(short, long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Percentage of the first table to read (tables only).
        #[arg(short, long, default_value_t = 100)]
        sampling_rate: u8,

        /// Also show the differing rows of these columns.
        #[arg(long, value_delimiter = ',')]
        diff_columns: Vec<String>,
    },

    /// Fetch both sources and compare them in memory.
    Memory {
        /// First table or query.
        source1: String,
        /// Second table or query.
        source2: String,

        /// Primary key column.
        #[arg(short = 'k', long)]
        primary_key: String,

        /// Columns to compare (all common columns if not specified).
        #[arg(short, long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Also show the differing rows of this column.
        #[arg(long)]
        diff_column: Option<String>,
    },

    /// Print generated SQL from schema files, without a database.
    Sql {
        /// First table or query.
        source1: String,
        /// Second table or query.
        source2: String,

        /// JSON schema of the first source.
        #[arg(long)]
        schema1: PathBuf,

        /// JSON schema of the second source.
        #[arg(long)]
        schema2: PathBuf,

        /// Target dialect (bigquery, sqlite, duckdb).
        #[arg(long, default_value = "bigquery")]
        dialect: DialectKind,

        /// Primary key column.
        #[arg(short = 'k', long)]
        primary_key: String,

        /// Columns to compare (all common columns if not specified).
        #[arg(short, long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Percentage of the first table to read (tables only).
        #[arg(short, long, default_value_t = 100)]
        sampling_rate: u8,

        /// Query to print.
        #[arg(short, long, value_enum, default_value_t = QueryKind::Ratio)]
        query: QueryKind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum QueryKind {
    /// Primary key reconciliation.
    Insight,
    /// Per-column agreement ratios.
    Ratio,
    /// Row-level diff.
    Plain,
    /// Rows whose key only exists in the first source.
    Exclusive1,
    /// Rows whose key only exists in the second source.
    Exclusive2,
    /// Duplicate keys of the first source.
    Duplicates1,
    /// Duplicate keys of the second source.
    Duplicates2,
}

fn comparison_config(
    primary_key: String,
    columns: Vec<String>,
    sampling_rate: u8,
    timeout: Duration,
) -> ComparisonConfig {
    let config = ComparisonConfig::new(primary_key)
        .sampling_rate(sampling_rate)
        .timeout(timeout);
    if columns.is_empty() {
        config
    } else {
        config.columns(columns)
    }
}

fn schema_table(schema: &TableSchema) -> QueryResult {
    schema
        .columns
        .iter()
        .fold(QueryResult::new(["name", "type", "mode"]), |table, c| {
            table.row([c.name.as_str(), c.field_type.as_str(), c.mode.as_str()])
        })
}

fn ratio_table(ratios: &[ColumnRatio]) -> QueryResult {
    ratios.iter().fold(
        QueryResult::new(["column", "ratio_not_null", "ratio_equal", "percentage_diff_values"]),
        |table, r| {
            table.row([
                r.column.clone(),
                format_optional_percentage(r.ratio_not_null),
                format_optional_percentage(r.ratio_equal),
                format_optional_percentage(r.percentage_diff_values),
            ])
        },
    )
}

fn indexed_table(indexed: &IndexedResult) -> QueryResult {
    let mut columns = vec![indexed.index_name.clone()];
    columns.extend(indexed.result.columns.iter().cloned());
    indexed
        .index
        .iter()
        .zip(&indexed.result.rows)
        .fold(QueryResult::new(columns), |table, (key, row)| {
            table.row(std::iter::once(key.clone()).chain(row.iter().cloned()))
        })
}

/// Shades `ratio_not_null` from white to blue and `percentage_diff_values`
/// from white to red, relative to the other columns.
fn ratio_colors(ratios: &[ColumnRatio]) -> Vec<Vec<Option<Rgb>>> {
    let not_null: Vec<Option<f64>> = ratios.iter().map(|r| r.ratio_not_null).collect();
    let diff: Vec<Option<f64>> = ratios.iter().map(|r| r.percentage_diff_values).collect();
    gradient(&not_null, Rgb::BLUE)
        .into_iter()
        .zip(gradient(&diff, Rgb::RED))
        .map(|(not_null, diff)| vec![None, not_null, None, diff])
        .collect()
}

/// Renders a plain diff, marking the cells whose two sides differ: painted
/// on a terminal, suffixed with `*` otherwise.
fn render_plain_diff(diff: &PlainDiff, color: bool) -> Result<String> {
    let mask = highlight_diff(&diff.result, &diff.columns)?;
    if color {
        let colors: Vec<Vec<Option<Rgb>>> = mask
            .iter()
            .map(|marks| marks.iter().map(|&m| m.then_some(Rgb::HIGHLIGHT)).collect())
            .collect();
        return Ok(render_colored_table(&diff.result, &colors));
    }

    let mut table = QueryResult::new(diff.result.columns.clone());
    for (row, marks) in diff.result.rows.iter().zip(mask) {
        table.rows.push(
            row.iter()
                .zip(marks)
                .map(|(value, marked)| {
                    if marked {
                        Value::Text(format!("{value} *"))
                    } else {
                        value.clone()
                    }
                })
                .collect(),
        );
    }
    Ok(render_table(&table))
}

async fn connect(database: &str) -> anyhow::Result<Arc<CachedClient<SqliteClient>>> {
    info!(database = %database, "Connecting");
    Ok(Arc::new(CachedClient::new(SqliteClient::connect(database).await?)))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let timeout = Duration::from_secs(cli.timeout_secs);
    let color = !cli.no_color && std::io::stdout().is_terminal();

    match cli.command {
        Commands::Sql {
            source1,
            source2,
            schema1,
            schema2,
            dialect,
            primary_key,
            columns,
            sampling_rate,
            query,
        } => {
            let schema1 = load_schema(schema1)?;
            let schema2 = load_schema(schema2)?;
            let (source1, source2) = (Source::parse(&source1), Source::parse(&source2));
            let sampling_allowed = !source1.is_query() && !source2.is_query();
            let config = comparison_config(primary_key, columns, sampling_rate, timeout)
                .validate(&schema1, &schema2, sampling_allowed)?;

            let common = common_schema(&schema1, &schema2);
            let selected = common.select("filtered_columns", &config.columns)?;
            let synthesizer =
                QuerySynthesizer::new(dialect.dialect(), &source1, &source2, &config.primary_key)
                    .sampling_rate(config.sampling_rate);
            let sql = match query {
                QueryKind::Insight => synthesizer.primary_key_insight(),
                QueryKind::Ratio => synthesizer.ratio_per_column(&selected)?,
                QueryKind::Plain => synthesizer.plain_diff(&selected)?,
                QueryKind::Exclusive1 => synthesizer.exclusive_primary_keys(&common, Side::Table1),
                QueryKind::Exclusive2 => synthesizer.exclusive_primary_keys(&common, Side::Table2),
                QueryKind::Duplicates1 => synthesizer.primary_key_duplicates(Side::Table1),
                QueryKind::Duplicates2 => synthesizer.primary_key_duplicates(Side::Table2),
            };
            println!("{sql}");
        }

        Commands::Schema { source1, source2 } => {
            let client = connect(&cli.database).await?;
            let session = DataDiff::new(client, &source1, &source2)
                .resolve_schemas()
                .await?;
            let (diff1, diff2) = session.diff_columns();

            if cli.json {
                return print_json(&serde_json::json!({
                    "common_schema": session.common_schema(),
                    "diff_1_table": diff1,
                    "diff_2_table": diff2,
                }));
            }
            let common = schema_table(session.common_schema());
            println!("Common columns:\n{}\n", render_table(&common));
            println!(
                "Columns differing in table 1:\n{}\n",
                render_table(&schema_table(&diff1))
            );
            println!(
                "Columns differing in table 2:\n{}",
                render_table(&schema_table(&diff2))
            );
        }

        Commands::Compare {
            source1,
            source2,
            primary_key,
            columns,
            sampling_rate,
            diff_columns,
        } => {
            let config = comparison_config(primary_key, columns, sampling_rate, timeout);
            let client = connect(&cli.database).await?;
            let session = DataDiff::new(client, &source1, &source2)
                .resolve_schemas()
                .await?
                .select_key(&config)?;
            let complete = session.execute().await?;
            let plain_diff = if diff_columns.is_empty() {
                None
            } else {
                Some(complete.plain_diff(&diff_columns).await?)
            };

            if cli.json {
                return print_json(&serde_json::json!({
                    "report": complete.report(),
                    "plain_diff": plain_diff,
                }));
            }

            let report = complete.report();
            let insight = &report.insight;
            println!(
                "Rows: {}, missing in table 1: {}, missing in table 2: {}, missing ratio: {}\n",
                insight.total_rows,
                insight.missing_primary_key_in_table1,
                insight.missing_primary_key_in_table2,
                format_optional_percentage(insight.missing_primary_keys_ratio),
            );
            for warning in &report.warnings {
                println!("Warning: {warning}\n{}\n", render_table(&warning.duplicate_keys));
            }
            if let Some(rows) = &report.exclusive_to_table1 {
                println!("Rows only in table 1:\n{}\n", render_table(&indexed_table(rows)));
            }
            if let Some(rows) = &report.exclusive_to_table2 {
                println!("Rows only in table 2:\n{}\n", render_table(&indexed_table(rows)));
            }
            let ratios = ratio_table(&report.column_ratios);
            if color {
                let colors = ratio_colors(&report.column_ratios);
                println!("{}", render_colored_table(&ratios, &colors));
            } else {
                println!("{}", render_table(&ratios));
            }

            if let Some(diff) = plain_diff {
                println!("\n{}\n\n{}", diff.sql, render_plain_diff(&diff, color)?);
            }
        }

        Commands::Memory {
            source1,
            source2,
            primary_key,
            columns,
            diff_column,
        } => {
            let config = comparison_config(primary_key, columns, 100, timeout);
            let client = connect(&cli.database).await?;
            let session = DataDiff::new(client, &source1, &source2)
                .resolve_schemas()
                .await?;
            let comparison = session.compare_in_memory(&config).await?;
            let differing = diff_column
                .map(|column| comparison.differing_rows(&column))
                .transpose()?;

            if cli.json {
                return print_json(&serde_json::json!({
                    "ratios": comparison.ratios,
                    "differing_rows": differing,
                }));
            }
            let table = comparison.ratios.iter().fold(
                QueryResult::new(["column", "ratio"]),
                |table, r| {
                    table.row([
                        r.column.clone(),
                        format_optional_percentage(Some(r.ratio)),
                    ])
                },
            );
            println!("{}", render_table(&table));
            if let Some(rows) = differing {
                println!("\n{}", render_table(&rows));
            }
        }
    }

    info!("Done.");
    Ok(())
}
