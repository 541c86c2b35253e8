//! End-to-end progressive select tests against in-memory SQLite.
//!
//! The fixture mirrors the reference scenario: table `t(a, c)` split into
//! two partitions, `t_parts` seeded by hand so the partition assignment is
//! exact: partition 0 = {(1,'a'), (3,'b')}, partition 1 = {(5,'a'),
//! (7,'b'), (9,'c')}.

use std::sync::Arc;

use trickledb::trickledb::meta::{ColumnStats, MemoryMetaStore, MetaStore, Partition};
use trickledb::trickledb::sql::ast::{
    Expr, SelectItem, SelectProgressive, TableRef,
};
use trickledb::trickledb::sql::connection::{SqlConnection, SqliteConnection};
use trickledb::trickledb::statement::{ProgressiveStatement, StatementState};
use trickledb::{SqliteDriver, SqlValue, StatementFactory};

fn setup_source() -> Arc<SqliteConnection> {
    let conn = SqliteConnection::open_in_memory().expect("open source db");
    for sql in [
        "CREATE TABLE t (a INTEGER, c VARCHAR(100))",
        "CREATE TABLE t_parts (a INTEGER, c VARCHAR(100), _partition INTEGER)",
        "INSERT INTO t VALUES (1, 'a'), (3, 'b'), (5, 'a'), (7, 'b'), (9, 'c')",
        "INSERT INTO t_parts VALUES (1, 'a', 0), (3, 'b', 0)",
        "INSERT INTO t_parts VALUES (5, 'a', 1), (7, 'b', 1), (9, 'c', 1)",
    ] {
        conn.execute(sql, &[]).expect("seed source db");
    }
    Arc::new(conn)
}

fn setup_meta() -> Arc<MemoryMetaStore> {
    let meta = Arc::new(MemoryMetaStore::new());
    meta.add(
        vec![
            Partition {
                source_table: "t".to_string(),
                partition_table: "t_parts_0".to_string(),
                id: 0,
                row_count: 2,
            },
            Partition {
                source_table: "t".to_string(),
                partition_table: "t_parts_1".to_string(),
                id: 1,
                row_count: 3,
            },
        ],
        vec![ColumnStats {
            table: "t".to_string(),
            name: "a".to_string(),
            min: 1,
            max: 9,
        }],
    );
    meta
}

fn factory(meta: Arc<MemoryMetaStore>) -> StatementFactory {
    let driver = Arc::new(SqliteDriver::new());
    StatementFactory::new(
        driver.clone(),
        driver,
        meta,
        tokio::runtime::Handle::current(),
    )
}

fn buffer_conn() -> Arc<SqliteConnection> {
    Arc::new(SqliteConnection::open_in_memory().expect("open buffer db"))
}

fn select_items(items: Vec<SelectItem>) -> SelectProgressive {
    SelectProgressive {
        items,
        from: TableRef::table("t"),
        where_clause: None,
        group_by: vec![],
        with_future_group_by: vec![],
    }
}

fn avg_query() -> SelectProgressive {
    SelectProgressive {
        items: vec![
            SelectItem::Expression {
                expr: Expr::func("AVG", vec![Expr::col("a")]),
                alias: None,
            },
            SelectItem::Column("c".to_string()),
        ],
        from: TableRef::table("t"),
        where_clause: None,
        group_by: vec![Expr::col("c")],
        with_future_group_by: vec![],
    }
}

fn sorted_pairs(rows: &[Vec<SqlValue>]) -> Vec<(f64, String)> {
    let mut pairs: Vec<(f64, String)> = rows
        .iter()
        .map(|row| {
            let value = row[0].as_f64().expect("numeric first column");
            let key = match &row[1] {
                SqlValue::Text(s) => s.clone(),
                other => other.to_string(),
            };
            (value, key)
        })
        .collect();
    pairs.sort_by(|left, right| left.1.cmp(&right.1));
    pairs
}

#[tokio::test]
async fn grouped_avg_refines_per_partition() {
    let source = setup_source();
    let factory = factory(setup_meta());
    let statement = factory
        .prepare_select(source, buffer_conn(), &avg_query())
        .expect("prepare avg query");
    statement.run();

    let batch1 = statement.result_set().await.expect("first batch");
    assert_eq!(batch1.partition, 0);
    assert_eq!(batch1.progress, 0.5);
    assert_eq!(
        sorted_pairs(&batch1.rows),
        vec![(1.0, "a".to_string()), (3.0, "b".to_string())]
    );

    let batch2 = statement.result_set().await.expect("second batch");
    assert_eq!(batch2.partition, 1);
    assert_eq!(batch2.progress, 1.0);
    assert_eq!(
        sorted_pairs(&batch2.rows),
        vec![
            (3.0, "a".to_string()),
            (5.0, "b".to_string()),
            (9.0, "c".to_string())
        ]
    );

    assert!(statement.result_set().await.is_none());
    assert!(statement.is_done());
    assert_eq!(statement.read_partitions(), 2);
    statement.close();
}

#[tokio::test]
async fn count_with_partition_meta_function_extrapolates() {
    let source = setup_source();
    let factory = factory(setup_meta());
    let query = select_items(vec![
        SelectItem::Expression {
            expr: Expr::func("COUNT", vec![Expr::col("a")]),
            alias: None,
        },
        SelectItem::Expression {
            expr: Expr::func("PROGRESSIVE_PARTITION", vec![]),
            alias: None,
        },
    ]);
    let statement = factory
        .prepare_select(source, buffer_conn(), &query)
        .expect("prepare count query");
    statement.run();

    // 2 rows merged at progress 0.5 extrapolate to 4, then 5 rows at 1.0
    let batch1 = statement.result_set().await.expect("first batch");
    assert_eq!(batch1.rows.len(), 1);
    assert_eq!(batch1.rows[0][0].as_f64(), Some(4.0));
    assert_eq!(batch1.rows[0][1].as_i64(), Some(0));

    let batch2 = statement.result_set().await.expect("second batch");
    assert_eq!(batch2.rows[0][0].as_f64(), Some(5.0));
    assert_eq!(batch2.rows[0][1].as_i64(), Some(1));

    assert!(statement.result_set().await.is_none());
}

#[tokio::test]
async fn progressive_sum_converges_to_plain_sum() {
    let source = setup_source();
    let factory = factory(setup_meta());
    let query = select_items(vec![SelectItem::Expression {
        expr: Expr::func("SUM", vec![Expr::col("a")]),
        alias: Some("total".to_string()),
    }]);
    let statement = factory
        .prepare_select(source.clone(), buffer_conn(), &query)
        .expect("prepare sum query");
    statement.run();

    let mut last = None;
    while let Some(batch) = statement.result_set().await {
        last = Some(batch);
    }
    let last = last.expect("at least one batch");
    assert_eq!(last.progress, 1.0);

    let exact = source
        .query_row("SELECT SUM(a) FROM t", &[])
        .expect("plain sum")[0]
        .as_f64()
        .expect("numeric sum");
    assert_eq!(last.rows[0][0].as_f64(), Some(exact));
    assert_eq!(last.columns, vec!["total".to_string()]);
}

#[tokio::test]
async fn progress_meta_function_reports_fraction() {
    let source = setup_source();
    let factory = factory(setup_meta());
    let query = select_items(vec![
        SelectItem::Expression {
            expr: Expr::func("COUNT", vec![Expr::col("a")]),
            alias: None,
        },
        SelectItem::Expression {
            expr: Expr::func("PROGRESSIVE_PROGRESS", vec![]),
            alias: None,
        },
    ]);
    let statement = factory
        .prepare_select(source, buffer_conn(), &query)
        .expect("prepare progress query");
    statement.run();

    let batch1 = statement.result_set().await.expect("first batch");
    assert_eq!(batch1.rows[0][1].as_f64(), Some(0.5));
    let batch2 = statement.result_set().await.expect("second batch");
    assert_eq!(batch2.rows[0][1].as_f64(), Some(1.0));
}

#[tokio::test]
async fn partitions_merge_in_ascending_order_without_gaps() {
    let source = setup_source();
    let factory = factory(setup_meta());
    let statement = factory
        .prepare_select(source, buffer_conn(), &avg_query())
        .expect("prepare avg query");
    statement.run();

    let mut seen = Vec::new();
    while let Some(batch) = statement.result_set().await {
        seen.push(batch.partition);
    }
    assert_eq!(seen, vec![0, 1]);
}

#[tokio::test]
async fn close_unblocks_waiting_consumer() {
    let source = setup_source();
    let factory = factory(setup_meta());
    let statement = factory
        .prepare_select(source, buffer_conn(), &avg_query())
        .expect("prepare avg query");
    // never run the worker: result_set would block forever without close

    let waiter = {
        let statement = statement.clone();
        tokio::spawn(async move { statement.result_set().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    statement.close();

    let received = tokio::time::timeout(std::time::Duration::from_secs(2), waiter)
        .await
        .expect("consumer released after close")
        .expect("waiter task");
    assert!(received.is_none());
    assert!(!statement.is_done());
    assert_eq!(statement.state(), StatementState::Closed);
}

#[tokio::test]
async fn execution_failure_is_terminal_and_observable() {
    let source = setup_source();
    source
        .execute("DROP TABLE t_parts", &[])
        .expect("drop scan table");
    let factory = factory(setup_meta());
    let statement = factory
        .prepare_select(source, buffer_conn(), &avg_query())
        .expect("prepare avg query");
    statement.run();

    assert!(statement.result_set().await.is_none());
    assert!(!statement.is_done());
    assert_eq!(statement.state(), StatementState::Failed);
}

#[tokio::test]
async fn confidence_interval_shrinks_with_progress() {
    let source = setup_source();
    let factory = factory(setup_meta());
    let query = select_items(vec![
        SelectItem::Expression {
            expr: Expr::func("AVG", vec![Expr::col("a")]),
            alias: None,
        },
        SelectItem::Expression {
            expr: Expr::func("PROGRESSIVE_CONFIDENCE", vec![Expr::col("a")]),
            alias: None,
        },
    ]);
    let statement = factory
        .prepare_select(source, buffer_conn(), &query)
        .expect("prepare confidence query");
    statement.run();

    let batch1 = statement.result_set().await.expect("first batch");
    let width1 = batch1.rows[0][1].as_f64().expect("half-width");
    let batch2 = statement.result_set().await.expect("second batch");
    let width2 = batch2.rows[0][1].as_f64().expect("half-width");

    assert!(width1.is_finite() && width1 > 0.0);
    assert!(width2 < width1, "more rows must tighten the interval");
}
