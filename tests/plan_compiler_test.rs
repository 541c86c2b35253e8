//! Plan compiler tests: classification, derived-query shapes and the
//! compile-time error taxonomy.

use std::sync::Arc;

use trickledb::trickledb::driver::{Driver, DriverCapabilities, PartitionPlan};
use trickledb::trickledb::meta::{ColumnStats, MemoryMetaStore, MetaStore};
use trickledb::trickledb::sql::ast::{
    Expr, SelectItem, SelectProgressive, SqlStatement, SqlType, TableRef,
};
use trickledb::trickledb::sql::connection::{SqlConnection, SqliteConnection};
use trickledb::{MetaField, PlanCompiler, SqlError, SqliteDriver};

fn setup_conn() -> SqliteConnection {
    let conn = SqliteConnection::open_in_memory().expect("open db");
    conn.execute("CREATE TABLE t (a INTEGER, b INTEGER, c VARCHAR(100))", &[])
        .expect("create table");
    conn
}

fn setup_meta() -> MemoryMetaStore {
    let meta = MemoryMetaStore::new();
    meta.add(
        vec![],
        vec![ColumnStats {
            table: "t".to_string(),
            name: "a".to_string(),
            min: 1,
            max: 9,
        }],
    );
    meta
}

fn compiler() -> PlanCompiler {
    let driver = Arc::new(SqliteDriver::new());
    PlanCompiler::new(driver.clone(), driver)
}

fn aggregate(name: &str, column: &str) -> SelectItem {
    SelectItem::Expression {
        expr: Expr::func(name, vec![Expr::col(column)]),
        alias: None,
    }
}

fn meta_function(name: &str) -> SelectItem {
    SelectItem::Expression {
        expr: Expr::func(name, vec![]),
        alias: None,
    }
}

fn select(items: Vec<SelectItem>, group_by: Vec<Expr>) -> SelectProgressive {
    SelectProgressive {
        items,
        from: TableRef::table("t"),
        where_clause: None,
        group_by,
        with_future_group_by: vec![],
    }
}

#[test]
fn classifies_every_supported_item() {
    let plan = compiler()
        .compile_select(
            &setup_conn(),
            &setup_meta(),
            &select(
                vec![
                    aggregate("AVG", "a"),
                    aggregate("SUM", "b"),
                    aggregate("COUNT", "a"),
                    SelectItem::Column("c".to_string()),
                    meta_function("PROGRESSIVE_PARTITION"),
                    meta_function("PROGRESSIVE_PROGRESS"),
                    aggregate("PROGRESSIVE_CONFIDENCE", "a"),
                ],
                vec![Expr::col("c")],
            ),
        )
        .expect("compile");

    assert_eq!(
        plan.meta_fields,
        vec![
            MetaField::Avg,
            MetaField::Sum,
            MetaField::Count,
            MetaField::None,
            MetaField::Partition,
            MetaField::Progress,
            MetaField::ConfidenceInterval,
        ]
    );
    // AVG expands to two buffer columns, meta functions to none
    let expected: Vec<String> = ["f0_SUM", "f0_COUNT", "f1_SUM", "f2_COUNT", "f3", "f6_CONFIDENCE"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(plan.buffer_field_names, expected);
    assert_eq!(plan.group_key_columns, vec!["f3".to_string()]);
    assert_eq!(plan.bounds.get(&6), Some(&(1, 9)));
}

#[test]
fn source_query_targets_one_partition() {
    let driver = Arc::new(SqliteDriver::new());
    let plan = compiler()
        .compile_select(
            &setup_conn(),
            &setup_meta(),
            &select(
                vec![aggregate("AVG", "a"), SelectItem::Column("c".to_string())],
                vec![Expr::col("c")],
            ),
        )
        .expect("compile");

    let sql = driver.to_sql(&SqlStatement::Select(plan.source_query.clone()));
    assert!(sql.contains("FROM \"t_parts\""), "scan table, got: {}", sql);
    assert!(sql.contains("\"_partition\" = ?"), "partition filter, got: {}", sql);
    assert!(sql.contains("SUM(\"a\")"), "avg sum half, got: {}", sql);
    assert!(sql.contains("COUNT(\"a\")"), "avg count half, got: {}", sql);
    assert!(sql.contains("GROUP BY \"c\""), "group key, got: {}", sql);
}

#[test]
fn merge_statement_is_an_additive_upsert() {
    let driver = Arc::new(SqliteDriver::new());
    let plan = compiler()
        .compile_select(
            &setup_conn(),
            &setup_meta(),
            &select(
                vec![aggregate("AVG", "a"), SelectItem::Column("c".to_string())],
                vec![Expr::col("c")],
            ),
        )
        .expect("compile");

    let sql = driver.to_sql(&SqlStatement::Insert(plan.buffer_merge.clone()));
    assert!(sql.contains("ON CONFLICT (\"f1\")"), "conflict target, got: {}", sql);
    assert!(
        sql.contains("\"f0_SUM\" = (\"f0_SUM\" + \"excluded\".\"f0_SUM\")"),
        "additive update, got: {}",
        sql
    );
    assert!(
        sql.contains("\"f1\" = \"excluded\".\"f1\""),
        "key overwrite, got: {}",
        sql
    );
}

#[test]
fn read_back_rescales_and_preserves_aliases() {
    let driver = Arc::new(SqliteDriver::new());
    let plan = compiler()
        .compile_select(
            &setup_conn(),
            &setup_meta(),
            &select(
                vec![
                    SelectItem::Expression {
                        expr: Expr::func("SUM", vec![Expr::col("a")]),
                        alias: Some("total".to_string()),
                    },
                    SelectItem::Column("c".to_string()),
                ],
                vec![Expr::col("c")],
            ),
        )
        .expect("compile");

    let sql = driver.to_sql(&SqlStatement::Select(plan.buffer_read.clone()));
    assert!(
        sql.contains("(SUM(\"f0_SUM\") / ?) AS \"total\""),
        "rescaled sum under its alias, got: {}",
        sql
    );
    assert!(sql.contains("GROUP BY \"f1\""), "group key, got: {}", sql);
    assert_eq!(plan.field_names, vec!["total".to_string(), "c".to_string()]);
}

#[test]
fn buffer_ddl_keys_group_columns() {
    let driver = Arc::new(SqliteDriver::new());
    let plan = compiler()
        .compile_select(
            &setup_conn(),
            &setup_meta(),
            &select(
                vec![aggregate("AVG", "a"), SelectItem::Column("c".to_string())],
                vec![Expr::col("c")],
            ),
        )
        .expect("compile");

    let sql = driver.to_sql(&SqlStatement::CreateTable(plan.buffer_create.clone()));
    assert!(sql.contains("\"f0_SUM\" BIGINT"), "sum column, got: {}", sql);
    assert!(sql.contains("\"f0_COUNT\" BIGINT"), "count column, got: {}", sql);
    assert!(sql.contains("\"f1\" VARCHAR"), "group column type, got: {}", sql);
    assert!(sql.contains("PRIMARY KEY (\"f1\")"), "primary key, got: {}", sql);
}

#[test]
fn rejects_unsupported_function() {
    let result = compiler().compile_select(
        &setup_conn(),
        &setup_meta(),
        &select(vec![aggregate("MEDIAN", "a")], vec![]),
    );
    assert!(matches!(
        result,
        Err(SqlError::UnsupportedOperation { .. })
    ));
}

#[test]
fn rejects_qualified_from() {
    let query = SelectProgressive {
        items: vec![aggregate("SUM", "a")],
        from: TableRef {
            names: vec!["db".to_string(), "t".to_string()],
        },
        where_clause: None,
        group_by: vec![],
        with_future_group_by: vec![],
    };
    let result = compiler().compile_select(&setup_conn(), &setup_meta(), &query);
    assert!(matches!(result, Err(SqlError::InvalidQuery { .. })));
}

#[test]
fn rejects_nested_future_markers() {
    let query = SelectProgressive {
        items: vec![aggregate("SUM", "a")],
        from: TableRef::table("t"),
        where_clause: Some(Expr::Future(Box::new(Expr::Future(Box::new(
            Expr::binary(
                Expr::col("b"),
                trickledb::trickledb::sql::ast::BinaryOperator::Equal,
                Expr::Literal(trickledb::trickledb::sql::ast::LiteralValue::Integer(1)),
            ),
        ))))),
        group_by: vec![],
        with_future_group_by: vec![],
    };
    let result = compiler().compile_select(&setup_conn(), &setup_meta(), &query);
    assert!(matches!(result, Err(SqlError::InvalidQuery { .. })));
}

#[test]
fn future_where_predicate_becomes_buffer_key() {
    use trickledb::trickledb::sql::ast::{BinaryOperator, LiteralValue};

    let query = SelectProgressive {
        items: vec![aggregate("AVG", "a"), SelectItem::Column("c".to_string())],
        from: TableRef::table("t"),
        where_clause: Some(Expr::Future(Box::new(Expr::binary(
            Expr::col("c"),
            BinaryOperator::Equal,
            Expr::Literal(LiteralValue::String("a".to_string())),
        )))),
        group_by: vec![Expr::col("c")],
        with_future_group_by: vec![],
    };
    let plan = compiler()
        .compile_select(&setup_conn(), &setup_meta(), &query)
        .expect("compile");

    // the lifted predicate is appended as a FUTURE key column
    assert_eq!(plan.meta_fields.last(), Some(&MetaField::Future));
    let future_column = plan.buffer_field_names.last().expect("future column");
    assert!(future_column.ends_with("_FUTURE"));
    assert!(plan.group_key_columns.contains(future_column));

    let driver = Arc::new(SqliteDriver::new());
    let sql = driver.to_sql(&SqlStatement::Select(plan.source_query.clone()));
    assert!(
        sql.contains("CAST((\"c\" = 'a') AS INTEGER)"),
        "eagerly evaluated predicate, got: {}",
        sql
    );
    // the future predicate no longer restricts the residual WHERE
    assert!(
        !sql.contains("WHERE (\"c\" = 'a')"),
        "predicate must not filter the source scan, got: {}",
        sql
    );
}

/// A buffer driver without upsert support, for the capability precondition.
struct NoUpsertDriver;

impl Driver for NoUpsertDriver {
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            has_upsert: false,
            has_partitions: false,
        }
    }

    fn to_sql(&self, statement: &SqlStatement) -> String {
        SqliteDriver::new().to_sql(statement)
    }

    fn to_sql_type(&self, data_type: &SqlType) -> String {
        SqliteDriver::new().to_sql_type(data_type)
    }

    fn build_partition_plan(&self, table: &str, partition_count: u32) -> PartitionPlan {
        SqliteDriver::new().build_partition_plan(table, partition_count)
    }
}

#[test]
fn grouped_merge_requires_upsert_capability() {
    let source = Arc::new(SqliteDriver::new());
    let compiler = PlanCompiler::new(source, Arc::new(NoUpsertDriver));

    let grouped = select(
        vec![aggregate("AVG", "a"), SelectItem::Column("c".to_string())],
        vec![Expr::col("c")],
    );
    let result = compiler.compile_select(&setup_conn(), &setup_meta(), &grouped);
    assert!(matches!(
        result,
        Err(SqlError::UnsupportedOperation { .. })
    ));

    // keyless queries fall back to a plain insert
    let keyless = select(vec![aggregate("SUM", "a")], vec![]);
    let plan = compiler
        .compile_select(&setup_conn(), &setup_meta(), &keyless)
        .expect("keyless compile");
    assert!(plan.buffer_merge.on_conflict.is_none());
}

#[test]
fn missing_column_stats_fail_confidence_compilation() {
    let meta = MemoryMetaStore::new();
    let result = compiler().compile_select(
        &setup_conn(),
        &meta,
        &select(vec![aggregate("PROGRESSIVE_CONFIDENCE", "a")], vec![]),
    );
    assert!(matches!(result, Err(SqlError::MetaError { .. })));
}
