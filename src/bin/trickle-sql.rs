//! TrickleDB command line: prepare tables and run progressive queries
//! against a SQLite database file.
//!
//! ```text
//! trickle-sql prepare --db flights.db --table ontime --partition-size 100000
//! trickle-sql query --db flights.db --table ontime --avg depdelay --column origin --group-by origin
//! ```
//!
//! Each progressive batch is printed as one JSON line.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;

use trickledb::trickledb::meta::SqliteMetaStore;
use trickledb::trickledb::sql::ast::{Expr, SelectItem, SelectProgressive, TableRef};
use trickledb::trickledb::sql::connection::{SqlConnection, SqliteConnection};
use trickledb::trickledb::statement::ProgressiveStatement;
use trickledb::{PartitionManager, SqliteDriver, SqlValue, StatementFactory};

#[derive(Parser)]
#[command(name = "trickle-sql")]
#[command(about = "Progressive approximate queries over partitioned SQLite tables")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a table into partitions and record its metadata
    Prepare {
        /// SQLite database file
        #[arg(long)]
        db: String,

        /// Source table to split
        #[arg(long)]
        table: String,

        /// Target rows per partition
        #[arg(long, default_value = "100000")]
        partition_size: u64,
    },
    /// Run a progressive aggregate query and print every batch
    Query {
        /// SQLite database file
        #[arg(long)]
        db: String,

        /// Source table (must be prepared)
        #[arg(long)]
        table: String,

        /// AVG aggregates, by column
        #[arg(long)]
        avg: Vec<String>,

        /// SUM aggregates, by column
        #[arg(long)]
        sum: Vec<String>,

        /// COUNT aggregates, by column
        #[arg(long)]
        count: Vec<String>,

        /// Plain pass-through columns
        #[arg(long)]
        column: Vec<String>,

        /// GROUP BY columns
        #[arg(long)]
        group_by: Vec<String>,

        /// Include PROGRESSIVE_PARTITION() in the output
        #[arg(long)]
        partition: bool,

        /// Include PROGRESSIVE_PROGRESS() in the output
        #[arg(long)]
        progress: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Prepare {
            db,
            table,
            partition_size,
        } => prepare(&db, &table, partition_size),
        Commands::Query {
            db,
            table,
            avg,
            sum,
            count,
            column,
            group_by,
            partition,
            progress,
        } => {
            let select = build_select(&table, &avg, &sum, &count, &column, &group_by, partition, progress);
            query(&db, &select).await
        }
    }
}

fn prepare(db: &str, table: &str, partition_size: u64) -> Result<(), Box<dyn std::error::Error>> {
    let driver = Arc::new(SqliteDriver::new());
    let conn: Arc<dyn SqlConnection> = Arc::new(SqliteConnection::open(db)?);
    let meta = SqliteMetaStore::open(conn.clone())?;

    let manager = PartitionManager::new(driver);
    let partitions = manager.prepare_table(conn.as_ref(), table, &meta, partition_size)?;
    info!("prepared {} partitions for table {}", partitions.len(), table);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_select(
    table: &str,
    avg: &[String],
    sum: &[String],
    count: &[String],
    columns: &[String],
    group_by: &[String],
    partition: bool,
    progress: bool,
) -> SelectProgressive {
    let mut items = Vec::new();
    for column in avg {
        items.push(SelectItem::Expression {
            expr: Expr::func("AVG", vec![Expr::col(column.clone())]),
            alias: None,
        });
    }
    for column in sum {
        items.push(SelectItem::Expression {
            expr: Expr::func("SUM", vec![Expr::col(column.clone())]),
            alias: None,
        });
    }
    for column in count {
        items.push(SelectItem::Expression {
            expr: Expr::func("COUNT", vec![Expr::col(column.clone())]),
            alias: None,
        });
    }
    for column in columns {
        items.push(SelectItem::Column(column.clone()));
    }
    if partition {
        items.push(SelectItem::Expression {
            expr: Expr::func("PROGRESSIVE_PARTITION", vec![]),
            alias: None,
        });
    }
    if progress {
        items.push(SelectItem::Expression {
            expr: Expr::func("PROGRESSIVE_PROGRESS", vec![]),
            alias: None,
        });
    }

    SelectProgressive {
        items,
        from: TableRef::table(table),
        where_clause: None,
        group_by: group_by.iter().map(|g| Expr::col(g.clone())).collect(),
        with_future_group_by: vec![],
    }
}

async fn query(
    db: &str,
    select: &SelectProgressive,
) -> Result<(), Box<dyn std::error::Error>> {
    let driver = Arc::new(SqliteDriver::new());
    let conn: Arc<dyn SqlConnection> = Arc::new(SqliteConnection::open(db)?);
    let buffer_conn: Arc<dyn SqlConnection> = Arc::new(SqliteConnection::open_in_memory()?);
    let meta = Arc::new(SqliteMetaStore::open(conn.clone())?);

    let factory = StatementFactory::new(
        driver.clone(),
        driver,
        meta,
        tokio::runtime::Handle::current(),
    );
    let statement = factory.prepare_select(conn, buffer_conn, select)?;
    statement.run();

    let columns = statement.field_names();
    while let Some(batch) = statement.result_set().await {
        let rows: Vec<serde_json::Value> = batch
            .rows
            .iter()
            .map(|row| {
                let mut object = serde_json::Map::new();
                for (name, value) in columns.iter().zip(row) {
                    object.insert(name.clone(), json_value(value));
                }
                serde_json::Value::Object(object)
            })
            .collect();
        let line = serde_json::json!({
            "partition": batch.partition,
            "progress": batch.progress,
            "rows": rows,
        });
        println!("{}", line);
    }
    statement.close();
    Ok(())
}

fn json_value(value: &SqlValue) -> serde_json::Value {
    match value {
        SqlValue::Null => serde_json::Value::Null,
        SqlValue::Integer(i) => serde_json::json!(i),
        SqlValue::Float(f) => serde_json::json!(f),
        SqlValue::Text(s) => serde_json::json!(s),
        SqlValue::Boolean(b) => serde_json::json!(b),
    }
}
