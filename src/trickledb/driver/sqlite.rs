//! SQLite dialect.
//!
//! SQLite has upsert but no native partitioned tables, so the partition plan
//! uses the materialized-copy strategy: one plain scan table carrying the
//! `_partition` assignment column, loaded by a copy-per-partition loop whose
//! staging subquery computes `row_number() % N` and projects the row-number
//! helper away.

use super::render::{quote, Renderer};
use super::{Driver, DriverCapabilities, PartitionPlan, PARTITION_COLUMN};
use crate::trickledb::sql::ast::{SqlStatement, SqlType};

pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        SqliteDriver
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SqliteDriver {
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            has_upsert: true,
            has_partitions: false,
        }
    }

    fn to_sql(&self, statement: &SqlStatement) -> String {
        Renderer::new(self, false).statement(statement)
    }

    fn to_sql_type(&self, data_type: &SqlType) -> String {
        match data_type {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Varchar(Some(len)) => format!("VARCHAR({})", len),
            SqlType::Varchar(None) => "VARCHAR".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
        }
    }

    fn build_partition_plan(&self, table: &str, partition_count: u32) -> PartitionPlan {
        let parts = quote(&self.partition_table(table));
        let source = quote(table);

        // schema-only copy of the source plus the assignment column
        let create = format!(
            "CREATE TABLE {} AS SELECT t.*, 0 AS {} FROM {} t WHERE 1 = 0",
            parts, PARTITION_COLUMN, source
        );

        let load_steps = (0..partition_count)
            .map(|id| {
                format!(
                    "INSERT INTO {parts} SELECT * FROM (SELECT t.*, \
                     (ROW_NUMBER() OVER ()) % {count} AS {col} FROM {source} t) s \
                     WHERE s.{col} = {id}",
                    parts = parts,
                    count = partition_count,
                    col = PARTITION_COLUMN,
                    source = source,
                    id = id
                )
            })
            .collect();

        PartitionPlan {
            drop_steps: vec![format!("DROP TABLE IF EXISTS {}", parts)],
            create_steps: vec![create],
            // statistics are per-table in SQLite; one pass covers every partition
            analyze_steps: vec![format!("ANALYZE {}", parts)],
            load_steps,
        }
    }
}
