//! End-to-end comparison sessions against an in-memory SQLite database.

use std::sync::Arc;
use std::time::Duration;

use data_check::prelude::*;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

async fn create_test_pool(statements: &[&str]) -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");
    for statement in statements {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool
}

async fn scenario_client() -> Arc<SqliteClient> {
    let pool = create_test_pool(&[
        "CREATE TABLE t1 (A INTEGER NOT NULL, B INTEGER, C TEXT)",
        "CREATE TABLE t2 (A INTEGER NOT NULL, B INTEGER, C TEXT)",
        "INSERT INTO t1 VALUES (1, 4, 'x'), (2, 5, 'y'), (3, 6, 'z'), (4, 7, 'w')",
        "INSERT INTO t2 VALUES (1, 6, 'x'), (2, 5, 'y'), (3, 7, 'z'), (5, 8, 'w')",
    ])
    .await;
    Arc::new(SqliteClient::new(pool))
}

fn ratio<'a>(ratios: &'a [ColumnRatio], column: &str) -> &'a ColumnRatio {
    ratios.iter().find(|r| r.column == column).unwrap()
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.unwrap();
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[tokio::test]
async fn test_schemas_are_reconciled() {
    let pool = create_test_pool(&[
        "CREATE TABLE s1 (col1 TEXT, col2 INTEGER, col3 REAL)",
        "CREATE TABLE s2 (col2 INTEGER, col3 TEXT, col4 DATE)",
    ])
    .await;
    let session = DataDiff::new(Arc::new(SqliteClient::new(pool)), "s1", "s2")
        .resolve_schemas()
        .await
        .unwrap();

    assert_eq!(session.phase(), SessionPhase::SchemasResolved);
    assert_eq!(session.common_schema().columns_names(), vec!["col2", "col3"]);

    let (diff1, diff2) = session.diff_columns();
    assert_eq!(diff1.columns_names(), vec!["col1", "col3"]);
    assert_eq!(diff2.columns_names(), vec!["col3", "col4"]);
}

#[tokio::test]
async fn test_full_comparison() {
    let session = DataDiff::new(scenario_client().await, "t1", "t2")
        .resolve_schemas()
        .await
        .unwrap()
        .select_key(&ComparisonConfig::new("A"))
        .unwrap();
    assert_eq!(session.phase(), SessionPhase::KeySelected);
    assert_eq!(session.config().columns, vec!["B", "C"]);

    let complete = session.execute().await.unwrap();
    assert_eq!(complete.phase(), SessionPhase::Complete);
    let report = complete.report();

    assert_eq!(report.insight.total_rows, 5);
    assert_eq!(report.insight.missing_primary_key_in_table1, 1);
    assert_eq!(report.insight.missing_primary_key_in_table2, 1);
    assert_close(report.insight.missing_primary_keys_ratio, 0.4);
    assert!(report.warnings.is_empty());

    let only_in_1 = report.exclusive_to_table1.as_ref().unwrap();
    assert_eq!(only_in_1.index_name, "A");
    assert_eq!(only_in_1.index, vec![Value::Integer(4)]);
    assert_eq!(only_in_1.result.columns, vec!["B__1", "C__1"]);
    assert_eq!(
        only_in_1.result.rows,
        vec![vec![Value::Integer(7), Value::from("w")]]
    );
    let only_in_2 = report.exclusive_to_table2.as_ref().unwrap();
    assert_eq!(only_in_2.index, vec![Value::Integer(5)]);
    assert_eq!(only_in_2.result.columns, vec!["B__2", "C__2"]);

    // Most divergent column first.
    assert_eq!(report.column_ratios[0].column, "B");
    let b = ratio(&report.column_ratios, "B");
    assert_close(b.ratio_not_null, 1.0);
    assert_close(b.ratio_equal, 1.0 / 3.0);
    assert_close(b.percentage_diff_values, 2.0 / 3.0);
    let c = ratio(&report.column_ratios, "C");
    assert_close(c.ratio_equal, 1.0);
    assert_close(c.percentage_diff_values, 0.0);
}

#[tokio::test]
async fn test_plain_diff_after_execution() {
    let complete = DataDiff::new(scenario_client().await, "t1", "t2")
        .resolve_schemas()
        .await
        .unwrap()
        .select_key(&ComparisonConfig::new("A"))
        .unwrap()
        .execute()
        .await
        .unwrap();

    let diff = complete.plain_diff(&["B"]).await.unwrap();
    assert!(diff.sql.contains("inner_merged"));
    assert_eq!(diff.result.columns, vec!["A", "B__1", "B__2"]);

    let mut rows = diff.result.rows.clone();
    rows.sort_by_key(|row| row[0].as_i64());
    assert_eq!(
        rows,
        vec![
            vec![Value::Integer(1), Value::Integer(4), Value::Integer(6)],
            vec![Value::Integer(3), Value::Integer(6), Value::Integer(7)],
        ]
    );

    let same = complete.plain_diff(&["C"]).await.unwrap();
    assert!(same.result.is_empty());
}

#[tokio::test]
async fn test_in_memory_comparison() {
    let session = DataDiff::new(scenario_client().await, "t1", "t2")
        .resolve_schemas()
        .await
        .unwrap();

    let comparison = session
        .compare_in_memory(&ComparisonConfig::new("A"))
        .await
        .unwrap();
    let by_column = |name: &str| {
        comparison
            .ratios
            .iter()
            .find(|r| r.column == name)
            .map(|r| r.ratio)
            .unwrap()
    };
    assert_eq!(by_column("B"), 0.25);
    assert_eq!(by_column("C"), 0.75);

    let differing = comparison.differing_rows("B").unwrap();
    assert_eq!(differing.len(), 2);
}

#[tokio::test]
async fn test_two_nulls_are_equal() {
    let pool = create_test_pool(&[
        "CREATE TABLE n1 (id INTEGER, v INTEGER)",
        "CREATE TABLE n2 (id INTEGER, v INTEGER)",
        "INSERT INTO n1 VALUES (1, NULL), (2, 5), (3, NULL)",
        "INSERT INTO n2 VALUES (1, NULL), (2, 5), (3, 7)",
    ])
    .await;
    let complete = DataDiff::new(Arc::new(SqliteClient::new(pool)), "n1", "n2")
        .resolve_schemas()
        .await
        .unwrap()
        .select_key(&ComparisonConfig::new("id"))
        .unwrap()
        .execute()
        .await
        .unwrap();

    let v = ratio(&complete.report().column_ratios, "v");
    assert_close(v.ratio_not_null, 2.0 / 3.0);
    assert_close(v.ratio_equal, 0.5);
    assert!(complete.report().exclusive_to_table1.is_none());

    let diff = complete.plain_diff(&["v"]).await.unwrap();
    assert_eq!(
        diff.result.rows,
        vec![vec![Value::Integer(3), Value::Null, Value::Integer(7)]]
    );
}

#[tokio::test]
async fn test_disjoint_keys_give_undefined_ratios() {
    let pool = create_test_pool(&[
        "CREATE TABLE d1 (id INTEGER, v TEXT)",
        "CREATE TABLE d2 (id INTEGER, v TEXT)",
        "INSERT INTO d1 VALUES (1, 'a')",
        "INSERT INTO d2 VALUES (2, 'a')",
    ])
    .await;
    let report = DataDiff::new(Arc::new(SqliteClient::new(pool)), "d1", "d2")
        .resolve_schemas()
        .await
        .unwrap()
        .select_key(&ComparisonConfig::new("id"))
        .unwrap()
        .execute()
        .await
        .unwrap()
        .into_report();

    assert_close(report.insight.missing_primary_keys_ratio, 1.0);
    let v = ratio(&report.column_ratios, "v");
    assert_eq!(v.ratio_not_null, None);
    assert_eq!(v.ratio_equal, None);
    assert_eq!(v.percentage_diff_values, None);
}

#[tokio::test]
async fn test_empty_sources() {
    let pool = create_test_pool(&[
        "CREATE TABLE e1 (id INTEGER, v TEXT)",
        "CREATE TABLE e2 (id INTEGER, v TEXT)",
    ])
    .await;
    let report = DataDiff::new(Arc::new(SqliteClient::new(pool)), "e1", "e2")
        .resolve_schemas()
        .await
        .unwrap()
        .select_key(&ComparisonConfig::new("id"))
        .unwrap()
        .execute()
        .await
        .unwrap()
        .into_report();

    assert_eq!(report.insight.total_rows, 0);
    assert_eq!(report.insight.missing_primary_keys_ratio, None);
    assert!(report.exclusive_to_table1.is_none());
    assert_eq!(report.column_ratios[0].ratio_not_null, None);
}

#[tokio::test]
async fn test_duplicate_keys_are_warnings() {
    let pool = create_test_pool(&[
        "CREATE TABLE k1 (id INTEGER, v TEXT)",
        "CREATE TABLE k2 (id INTEGER, v TEXT)",
        "INSERT INTO k1 VALUES (1, 'a'), (1, 'b'), (2, 'c')",
        "INSERT INTO k2 VALUES (1, 'a'), (2, 'c')",
    ])
    .await;
    let report = DataDiff::new(Arc::new(SqliteClient::new(pool)), "k1", "k2")
        .resolve_schemas()
        .await
        .unwrap()
        .select_key(&ComparisonConfig::new("id"))
        .unwrap()
        .execute()
        .await
        .unwrap()
        .into_report();

    assert_eq!(report.warnings.len(), 1);
    let warning = &report.warnings[0];
    assert_eq!(warning.side, Side::Table1);
    assert!(warning.sql.contains("having count(*) > 1"));
    assert_eq!(
        warning.duplicate_keys.rows,
        vec![vec![Value::Integer(1), Value::Integer(2)]]
    );
    assert!(!report.column_ratios.is_empty());
}

#[tokio::test]
async fn test_query_sources_disable_sampling() {
    let session = DataDiff::new(
        scenario_client().await,
        "select A, B from t1 where A < 4",
        "t2",
    )
    .resolve_schemas()
    .await
    .unwrap();
    assert!(session.source1().is_query());
    assert!(!session.is_sampling_allowed());
    assert_eq!(session.common_schema().columns_names(), vec!["A", "B"]);

    let selected = session
        .select_key(&ComparisonConfig::new("A").sampling_rate(50))
        .unwrap();
    assert_eq!(selected.config().sampling_rate, 100);

    let report = selected.execute().await.unwrap().into_report();
    assert_eq!(report.insight.missing_primary_key_in_table2, 0);
    assert_eq!(report.insight.missing_primary_key_in_table1, 1);
    assert_close(ratio(&report.column_ratios, "B").ratio_equal, 1.0 / 3.0);
}

#[tokio::test]
async fn test_sampling_applies_to_first_table() {
    let session = DataDiff::new(scenario_client().await, "t1", "t2")
        .resolve_schemas()
        .await
        .unwrap()
        .select_key(&ComparisonConfig::new("A").sampling_rate(50))
        .unwrap();
    assert_eq!(session.config().sampling_rate, 50);

    let report = session.execute().await.unwrap().into_report();
    assert!(report.ratio_sql.contains("abs(random()) % 100 < 50"));
    assert!(!report.insight_sql.contains("random()"));
}

#[tokio::test]
async fn test_configuration_errors_before_queries() {
    let session = DataDiff::new(scenario_client().await, "t1", "t2")
        .resolve_schemas()
        .await
        .unwrap();

    let err = session
        .select_key(&ComparisonConfig::new("missing"))
        .unwrap_err();
    assert!(matches!(err, DiffError::PrimaryKeyNotCommon(_)));
    assert!(err.is_configuration());

    assert!(matches!(
        session.select_key(&ComparisonConfig::new("A").columns(["nope"])),
        Err(DiffError::ColumnNotFound { .. })
    ));
}

#[tokio::test]
async fn test_execution_failure_keeps_session() {
    let pool = create_test_pool(&[
        "CREATE TABLE f1 (id INTEGER, v TEXT)",
        "CREATE TABLE f2 (id INTEGER, v TEXT)",
    ])
    .await;
    let session = DataDiff::new(Arc::new(SqliteClient::new(pool.clone())), "f1", "f2")
        .resolve_schemas()
        .await
        .unwrap()
        .select_key(&ComparisonConfig::new("id"))
        .unwrap();

    sqlx::query("DROP TABLE f2").execute(&pool).await.unwrap();
    let err = session.execute().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(err.sql().unwrap().contains("\"f2\""));

    sqlx::query("CREATE TABLE f2 (id INTEGER, v TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    let complete = session.execute().await.unwrap();
    assert_eq!(complete.report().insight.total_rows, 0);
}

#[tokio::test]
async fn test_cached_client_session() {
    let pool = create_test_pool(&[
        "CREATE TABLE c1 (id INTEGER, v TEXT)",
        "CREATE TABLE c2 (id INTEGER, v TEXT)",
        "INSERT INTO c1 VALUES (1, 'a')",
        "INSERT INTO c2 VALUES (1, 'b')",
    ])
    .await;
    let client = Arc::new(CachedClient::new(SqliteClient::new(pool.clone())));

    let session = DataDiff::new(Arc::clone(&client), "c1", "c2")
        .resolve_schemas()
        .await
        .unwrap()
        .select_key(&ComparisonConfig::new("id"))
        .unwrap();
    let first = session.execute().await.unwrap().into_report();
    assert_close(ratio(&first.column_ratios, "v").ratio_equal, 0.0);

    // Cached results survive a change of the underlying data.
    sqlx::query("UPDATE c2 SET v = 'a'").execute(&pool).await.unwrap();
    let cached = session.execute().await.unwrap().into_report();
    assert_close(ratio(&cached.column_ratios, "v").ratio_equal, 0.0);

    client.clear().await;
    let fresh = session.execute().await.unwrap().into_report();
    assert_close(ratio(&fresh.column_ratios, "v").ratio_equal, 1.0);
}

#[tokio::test]
async fn test_identical_keys_have_no_exclusive_rows() {
    let pool = create_test_pool(&[
        "CREATE TABLE k1 (id INTEGER NOT NULL, v TEXT)",
        "CREATE TABLE k2 (id INTEGER NOT NULL, v TEXT)",
        "INSERT INTO k1 VALUES (1, 'a'), (2, 'b'), (3, 'c')",
        "INSERT INTO k2 VALUES (1, 'a'), (2, 'x'), (3, 'c')",
    ])
    .await;
    let session = DataDiff::new(Arc::new(SqliteClient::new(pool)), "k1", "k2")
        .resolve_schemas()
        .await
        .unwrap()
        .select_key(&ComparisonConfig::new("id"))
        .unwrap();

    let synthesizer = session.synthesizer();
    for side in [Side::Table1, Side::Table2] {
        let sql = synthesizer.exclusive_primary_keys(session.common_schema(), side);
        let rows = session
            .client()
            .run_query(&sql, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(rows.is_empty(), "{side}: {rows:?}");
    }

    let report = session.execute().await.unwrap().into_report();
    assert_eq!(report.insight.missing_primary_keys_ratio, Some(0.0));
    assert!(report.exclusive_to_table1.is_none());
    assert!(report.exclusive_to_table2.is_none());
}

#[tokio::test]
async fn test_exclusive_rows_are_capped() {
    let pool = create_test_pool(&[
        "CREATE TABLE big (id INTEGER NOT NULL, v INTEGER)",
        "CREATE TABLE small (id INTEGER NOT NULL, v INTEGER)",
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 600) \
         INSERT INTO big SELECT x, x * 2 FROM c",
        "INSERT INTO small VALUES (1, 2)",
    ])
    .await;
    let session = DataDiff::new(Arc::new(SqliteClient::new(pool)), "big", "small")
        .resolve_schemas()
        .await
        .unwrap()
        .select_key(&ComparisonConfig::new("id"))
        .unwrap();

    let sql = session
        .synthesizer()
        .exclusive_primary_keys(session.common_schema(), Side::Table1);
    let rows = session
        .client()
        .run_query(&sql, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(rows.len(), 500);

    let report = session.execute().await.unwrap().into_report();
    assert_eq!(report.insight.total_rows, 600);
    assert_eq!(report.insight.missing_primary_key_in_table2, 599);
    assert_eq!(report.exclusive_to_table1.map(|rows| rows.len()), Some(500));
    assert_eq!(report.exclusive_to_table2.map(|rows| rows.len()), Some(0));
}
