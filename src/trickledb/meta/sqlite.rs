//! SQLite-backed metadata store.
//!
//! Persists the catalog next to the data, so a table prepared by one process
//! is queryable by the next. Writes are best-effort: failures are logged and
//! surface downstream as missing partition metadata.

use std::sync::Arc;

use log::error;

use super::{ColumnStats, MetaStore, Partition};
use crate::trickledb::sql::connection::SqlConnection;
use crate::trickledb::sql::error::SqlResult;
use crate::trickledb::sql::value::SqlValue;

const CREATE_PARTITIONS: &str = "CREATE TABLE IF NOT EXISTS progressive_partitions (\
     source_table TEXT NOT NULL, partition_table TEXT NOT NULL, \
     id INTEGER NOT NULL, row_count INTEGER NOT NULL)";

const CREATE_COLUMNS: &str = "CREATE TABLE IF NOT EXISTS progressive_columns (\
     table_name TEXT NOT NULL, column_name TEXT NOT NULL, \
     min INTEGER NOT NULL, max INTEGER NOT NULL, \
     PRIMARY KEY (table_name, column_name))";

pub struct SqliteMetaStore {
    conn: Arc<dyn SqlConnection>,
}

impl SqliteMetaStore {
    pub fn open(conn: Arc<dyn SqlConnection>) -> SqlResult<Self> {
        conn.execute(CREATE_PARTITIONS, &[])?;
        conn.execute(CREATE_COLUMNS, &[])?;
        Ok(SqliteMetaStore { conn })
    }

    fn write(&self, partitions: &[Partition], columns: &[ColumnStats]) -> SqlResult<()> {
        for partition in partitions {
            self.conn.execute(
                "DELETE FROM progressive_partitions WHERE source_table = ?",
                &[SqlValue::Text(partition.source_table.clone())],
            )?;
        }
        for partition in partitions {
            self.conn.execute(
                "INSERT INTO progressive_partitions \
                 (source_table, partition_table, id, row_count) VALUES (?, ?, ?, ?)",
                &[
                    SqlValue::Text(partition.source_table.clone()),
                    SqlValue::Text(partition.partition_table.clone()),
                    SqlValue::Integer(partition.id as i64),
                    SqlValue::Integer(partition.row_count as i64),
                ],
            )?;
        }
        for stats in columns {
            self.conn.execute(
                "INSERT OR REPLACE INTO progressive_columns \
                 (table_name, column_name, min, max) VALUES (?, ?, ?, ?)",
                &[
                    SqlValue::Text(stats.table.clone()),
                    SqlValue::Text(stats.name.clone()),
                    SqlValue::Integer(stats.min),
                    SqlValue::Integer(stats.max),
                ],
            )?;
        }
        Ok(())
    }
}

impl MetaStore for SqliteMetaStore {
    fn add(&self, partitions: Vec<Partition>, columns: Vec<ColumnStats>) {
        if let Err(e) = self.write(&partitions, &columns) {
            error!("failed to persist partition metadata: {}", e);
        }
    }

    fn partitions(&self, table: &str) -> Vec<Partition> {
        let rows = self.conn.query(
            "SELECT source_table, partition_table, id, row_count \
             FROM progressive_partitions WHERE source_table = ? ORDER BY id",
            &[SqlValue::Text(table.to_string())],
        );
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                error!("failed to read partition metadata: {}", e);
                return Vec::new();
            }
        };
        rows.into_iter()
            .filter_map(|row| {
                Some(Partition {
                    source_table: text(row.first())?,
                    partition_table: text(row.get(1))?,
                    id: row.get(2)?.as_i64()? as u32,
                    row_count: row.get(3)?.as_i64()?.max(0) as u64,
                })
            })
            .collect()
    }

    fn column(&self, table: &str, name: &str) -> Option<ColumnStats> {
        let rows = self
            .conn
            .query(
                "SELECT min, max FROM progressive_columns \
                 WHERE table_name = ? AND column_name = ?",
                &[
                    SqlValue::Text(table.to_string()),
                    SqlValue::Text(name.to_string()),
                ],
            )
            .ok()?;
        let row = rows.first()?;
        Some(ColumnStats {
            table: table.to_string(),
            name: name.to_string(),
            min: row.first()?.as_i64()?,
            max: row.get(1)?.as_i64()?,
        })
    }
}

fn text(value: Option<&SqlValue>) -> Option<String> {
    match value {
        Some(SqlValue::Text(s)) => Some(s.clone()),
        _ => None,
    }
}
