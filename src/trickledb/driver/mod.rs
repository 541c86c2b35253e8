/*!
# SQL Drivers

A [`Driver`] adapts the engine to one SQL dialect: it renders the derived
statement AST to text, maps generic column types, names partition tables and
builds the DDL script that physically splits a source table.

Dialect differences are deliberately small - a capability record
([`DriverCapabilities`]) plus one strategy method
([`Driver::build_partition_plan`]); there is no driver class hierarchy.

## Capabilities

- `has_upsert`: the store supports `INSERT ... ON CONFLICT DO UPDATE`.
  Required for grouped progressive queries (the additive merge is a single
  upsert round trip per source row).
- `has_partitions`: the store supports native partitioned tables. Drivers
  with native partitioning load all partitions with exactly one bulk
  `INSERT ... SELECT`; the others fall back to a copy-per-partition loop.

Both strategies materialize a scan table named
[`Driver::partition_table`] carrying the `_partition` assignment column,
so compiled source queries always read
`FROM <parts> WHERE ... AND _partition = ?`.
*/

pub mod postgres;
mod render;
pub mod sqlite;

pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

use super::sql::ast::{SqlStatement, SqlType};

/// Column used to assign rows to partitions in the scan table.
pub const PARTITION_COLUMN: &str = "_partition";

/// Capability record of a SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// Supports `INSERT ... ON CONFLICT DO UPDATE`
    pub has_upsert: bool,
    /// Supports native partitioned tables (bulk single-statement load)
    pub has_partitions: bool,
}

/// Ordered DDL script produced by [`Driver::build_partition_plan`].
///
/// The partition manager executes the phases in declaration order; drop
/// statements must be idempotent so a table can be re-prepared.
#[derive(Debug, Clone)]
pub struct PartitionPlan {
    /// Drop any pre-existing partition tables
    pub drop_steps: Vec<String>,
    /// Create the scan table (and native partition children)
    pub create_steps: Vec<String>,
    /// Load source rows into the partitions
    pub load_steps: Vec<String>,
    /// Refresh planner statistics per partition
    pub analyze_steps: Vec<String>,
}

/// One SQL dialect consumed by the compiler, the buffer and the partition
/// manager.
pub trait Driver: Send + Sync {
    /// The dialect's capability record.
    fn capabilities(&self) -> DriverCapabilities;

    /// Render a derived statement to dialect text.
    fn to_sql(&self, statement: &SqlStatement) -> String;

    /// Map a generic column type to the dialect's type name.
    fn to_sql_type(&self, data_type: &SqlType) -> String;

    /// Name of the partition scan table derived from a source table.
    fn partition_table(&self, table: &str) -> String {
        format!("{}_parts", table)
    }

    /// Name of one physical partition of a source table.
    fn partition_table_at(&self, table: &str, id: u32) -> String {
        format!("{}_{}", self.partition_table(table), id)
    }

    /// Build the DDL script that splits `table` into `partition_count`
    /// partitions.
    fn build_partition_plan(&self, table: &str, partition_count: u32) -> PartitionPlan;
}
