/*!
# Metadata Store

Persists, per source table, the ordered partition list produced by the
partition manager and per-column min/max statistics consumed for
confidence-interval derivation.

The store is written exactly once per table by the partition manager, fully
before any progressive statement over that table starts; statements only
read it. [`MemoryMetaStore`] is the built-in key-value implementation.
*/

pub mod sqlite;

pub use sqlite::SqliteMetaStore;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// A disjoint horizontal slice of a source table.
///
/// Created once at split time; consumed by the execution engine strictly in
/// ascending `id` order. The id ordering carries no guaranteed
/// correspondence to source insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Table the partition was split from
    pub source_table: String,
    /// Physical (or logical, for copy-strategy stores) partition table name
    pub partition_table: String,
    /// Position in the scan order, `0..N-1`
    pub id: u32,
    /// Rows assigned to this partition at split time
    pub row_count: u64,
}

/// Min/max statistics of one numeric source column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub table: String,
    pub name: String,
    pub min: i64,
    pub max: i64,
}

/// Catalog interface between the partition manager and the query engine.
pub trait MetaStore: Send + Sync {
    /// Record the partitions and column statistics of freshly split tables,
    /// replacing any previous entries for the same tables.
    fn add(&self, partitions: Vec<Partition>, columns: Vec<ColumnStats>);

    /// Ordered partition list of a table; empty when the table was never
    /// prepared.
    fn partitions(&self, table: &str) -> Vec<Partition>;

    /// Statistics of one column, if recorded.
    fn column(&self, table: &str, name: &str) -> Option<ColumnStats>;
}

/// In-memory `MetaStore`.
pub struct MemoryMetaStore {
    partitions: Mutex<HashMap<String, Vec<Partition>>>,
    columns: Mutex<HashMap<(String, String), ColumnStats>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        MemoryMetaStore {
            partitions: Mutex::new(HashMap::new()),
            columns: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaStore for MemoryMetaStore {
    fn add(&self, partitions: Vec<Partition>, columns: Vec<ColumnStats>) {
        let mut by_table = self.partitions.lock().expect("meta partitions lock poisoned");
        let touched: Vec<String> = partitions.iter().map(|p| p.source_table.clone()).collect();
        for table in touched {
            by_table.remove(&table);
        }
        for partition in partitions {
            by_table
                .entry(partition.source_table.clone())
                .or_default()
                .push(partition);
        }
        for list in by_table.values_mut() {
            list.sort_by_key(|p| p.id);
        }

        let mut by_column = self.columns.lock().expect("meta columns lock poisoned");
        for stats in columns {
            by_column.insert((stats.table.clone(), stats.name.clone()), stats);
        }
    }

    fn partitions(&self, table: &str) -> Vec<Partition> {
        self.partitions
            .lock()
            .expect("meta partitions lock poisoned")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn column(&self, table: &str, name: &str) -> Option<ColumnStats> {
        self.columns
            .lock()
            .expect("meta columns lock poisoned")
            .get(&(table.to_string(), name.to_string()))
            .cloned()
    }
}
