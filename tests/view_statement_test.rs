//! Broadcast-mode tests: progressive views, shared buffers, independent
//! listeners and late-joiner seeding.

use std::sync::Arc;
use std::time::Duration;

use trickledb::trickledb::meta::{MemoryMetaStore, MetaStore, Partition};
use trickledb::trickledb::sql::ast::{
    CreateProgressiveView, Expr, SelectItem, SelectProgressive, TableRef,
};
use trickledb::trickledb::sql::connection::{SqlConnection, SqliteConnection};
use trickledb::trickledb::statement::ProgressiveStatement;
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
        vec![],
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

fn view_definition() -> CreateProgressiveView {
    CreateProgressiveView {
        name: "v".to_string(),
        query: SelectProgressive {
            items: vec![
                SelectItem::Expression {
                    expr: Expr::func("AVG", vec![Expr::col("a")]),
                    alias: Some("avg_a".to_string()),
                },
                SelectItem::Column("c".to_string()),
            ],
            from: TableRef::table("t"),
            where_clause: None,
            group_by: vec![Expr::col("c")],
            with_future_group_by: vec![],
        },
    }
}

fn wildcard_over_view() -> SelectProgressive {
    SelectProgressive {
        items: vec![SelectItem::Wildcard],
        from: TableRef::table("v"),
        where_clause: None,
        group_by: vec![],
        with_future_group_by: vec![],
    }
}

async fn await_done(statement: &Arc<trickledb::trickledb::statement::ViewStatement>) {
    for _ in 0..200 {
        if statement.read_partitions() == 2 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("view worker did not finish");
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
async fn late_listener_is_seeded_with_last_partition() {
    let source = setup_source();
    let buffer: Arc<dyn SqlConnection> =
        Arc::new(SqliteConnection::open_in_memory().expect("buffer db"));
    let factory = factory(setup_meta());

    let view = factory
        .prepare_view(source.clone(), buffer.clone(), &view_definition())
        .expect("prepare view");
    view.run();
    await_done(&view).await;

    // the reader registers after every partition already completed
    let reader = factory
        .prepare_select(source, buffer, &wildcard_over_view())
        .expect("prepare view select");
    reader.run();

    let batch = tokio::time::timeout(Duration::from_secs(5), reader.result_set())
        .await
        .expect("late listener must be seeded")
        .expect("seeded batch");
    assert_eq!(batch.partition, 1);
    assert_eq!(batch.progress, 1.0);
    assert_eq!(
        sorted_pairs(&batch.rows),
        vec![
            (3.0, "a".to_string()),
            (5.0, "b".to_string()),
            (9.0, "c".to_string())
        ]
    );
    reader.close();
}

#[tokio::test]
async fn listeners_read_the_shared_buffer_independently() {
    let source = setup_source();
    let buffer: Arc<dyn SqlConnection> =
        Arc::new(SqliteConnection::open_in_memory().expect("buffer db"));
    let factory = factory(setup_meta());

    let view = factory
        .prepare_view(source.clone(), buffer.clone(), &view_definition())
        .expect("prepare view");
    view.run();
    await_done(&view).await;

    // one wildcard reader, one projecting reader with its own alias
    let wildcard = factory
        .prepare_select(source.clone(), buffer.clone(), &wildcard_over_view())
        .expect("wildcard reader");
    let projected = factory
        .prepare_select(
            source,
            buffer,
            &SelectProgressive {
                items: vec![SelectItem::AliasedColumn {
                    column: "avg_a".to_string(),
                    alias: "delay".to_string(),
                }],
                from: TableRef::table("v"),
                where_clause: None,
                group_by: vec![Expr::col("c")],
                with_future_group_by: vec![],
            },
        )
        .expect("projected reader");

    wildcard.run();
    projected.run();

    let wildcard_batch = tokio::time::timeout(Duration::from_secs(5), wildcard.result_set())
        .await
        .expect("wildcard batch")
        .expect("wildcard rows");
    assert_eq!(wildcard_batch.rows.len(), 3);

    let projected_batch = tokio::time::timeout(Duration::from_secs(5), projected.result_set())
        .await
        .expect("projected batch")
        .expect("projected rows");
    assert_eq!(projected.field_names(), vec!["delay".to_string()]);
    assert_eq!(projected_batch.rows.len(), 3);

    wildcard.close();
    projected.close();
}

#[tokio::test]
async fn closed_listener_stops_receiving_but_worker_survives() {
    let source = setup_source();
    let buffer: Arc<dyn SqlConnection> =
        Arc::new(SqliteConnection::open_in_memory().expect("buffer db"));
    let factory = factory(setup_meta());

    let view = factory
        .prepare_view(source.clone(), buffer.clone(), &view_definition())
        .expect("prepare view");

    let reader = factory
        .prepare_select(source, buffer, &wildcard_over_view())
        .expect("prepare view select");
    reader.run();
    reader.close();

    view.run();
    await_done(&view).await;

    // the closed listener must release its consumer instead of delivering
    let received = tokio::time::timeout(Duration::from_secs(2), reader.result_set())
        .await
        .expect("closed reader must not hang");
    assert!(received.is_none());
    assert_eq!(view.read_partitions(), 2);
}

#[tokio::test]
async fn duplicate_view_names_are_rejected() {
    let source = setup_source();
    let buffer: Arc<dyn SqlConnection> =
        Arc::new(SqliteConnection::open_in_memory().expect("buffer db"));
    let factory = factory(setup_meta());

    factory
        .prepare_view(source.clone(), buffer.clone(), &view_definition())
        .expect("first view");
    let duplicate = factory.prepare_view(source, buffer, &view_definition());
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn future_group_key_is_readable_through_the_view() {
    let source = setup_source();
    let buffer: Arc<dyn SqlConnection> =
        Arc::new(SqliteConnection::open_in_memory().expect("buffer db"));
    let factory = factory(setup_meta());

    // c is grouped eagerly: the view buffer keys on it even though a direct
    // read-back would aggregate it away
    let view_def = CreateProgressiveView {
        name: "vf".to_string(),
        query: SelectProgressive {
            items: vec![
                SelectItem::Expression {
                    expr: Expr::func("SUM", vec![Expr::col("a")]),
                    alias: Some("total".to_string()),
                },
                SelectItem::Expression {
                    expr: Expr::Future(Box::new(Expr::col("c"))),
                    alias: None,
                },
            ],
            from: TableRef::table("t"),
            where_clause: None,
            group_by: vec![Expr::Future(Box::new(Expr::col("c")))],
            with_future_group_by: vec![],
        },
    };
    let view = factory
        .prepare_view(source.clone(), buffer.clone(), &view_def)
        .expect("prepare future view");
    view.run();
    await_done(&view).await;

    let reader = factory
        .prepare_select(
            source,
            buffer,
            &SelectProgressive {
                items: vec![
                    SelectItem::Column("total".to_string()),
                    SelectItem::Column("c".to_string()),
                ],
                from: TableRef::table("vf"),
                where_clause: None,
                group_by: vec![],
                with_future_group_by: vec!["c".to_string()],
            },
        )
        .expect("prepare future reader");
    reader.run();

    let batch = tokio::time::timeout(Duration::from_secs(5), reader.result_set())
        .await
        .expect("future reader batch")
        .expect("future reader rows");
    // per-c totals at progress 1.0: a = 6, b = 10, c = 9
    assert_eq!(
        sorted_pairs(&batch.rows),
        vec![
            (6.0, "a".to_string()),
            (10.0, "b".to_string()),
            (9.0, "c".to_string())
        ]
    );
    reader.close();
}
