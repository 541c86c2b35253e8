//! PostgreSQL dialect.
//!
//! Postgres supports native LIST partitioning: the scan table is a
//! partitioned parent keyed by `_partition`, with one child table per
//! partition id, and exactly one bulk `INSERT ... SELECT` populates all
//! partitions together.

use super::render::{quote, Renderer};
use super::{Driver, DriverCapabilities, PartitionPlan, PARTITION_COLUMN};
use crate::trickledb::sql::ast::{SqlStatement, SqlType};

pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        PostgresDriver
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for PostgresDriver {
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            has_upsert: true,
            has_partitions: true,
        }
    }

    fn to_sql(&self, statement: &SqlStatement) -> String {
        Renderer::new(self, true).statement(statement)
    }

    fn to_sql_type(&self, data_type: &SqlType) -> String {
        match data_type {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Real => "DOUBLE PRECISION".to_string(),
            SqlType::Varchar(Some(len)) => format!("VARCHAR({})", len),
            SqlType::Varchar(None) => "TEXT".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
        }
    }

    fn build_partition_plan(&self, table: &str, partition_count: u32) -> PartitionPlan {
        let parts = quote(&self.partition_table(table));
        let source = quote(table);

        let create_parent = format!(
            "CREATE TABLE {} (LIKE {}, {} INTEGER) PARTITION BY LIST ({})",
            parts, source, PARTITION_COLUMN, PARTITION_COLUMN
        );

        let mut create_steps = vec![create_parent];
        let mut analyze_steps = Vec::new();
        for id in 0..partition_count {
            let child = quote(&self.partition_table_at(table, id));
            create_steps.push(format!(
                "CREATE TABLE {} PARTITION OF {} FOR VALUES IN ({})",
                child, parts, id
            ));
            analyze_steps.push(format!("ANALYZE {}", child));
        }

        let load = format!(
            "INSERT INTO {} SELECT t.*, (ROW_NUMBER() OVER ()) % {} FROM {} t",
            parts, partition_count, source
        );

        PartitionPlan {
            drop_steps: vec![format!("DROP TABLE IF EXISTS {} CASCADE", parts)],
            create_steps,
            load_steps: vec![load],
            analyze_steps,
        }
    }
}
