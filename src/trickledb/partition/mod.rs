/*!
# Partition Manager

Splits a source table into N balanced partitions and records their metadata.
This is the offline/prepare phase: it runs once per source table, completes
fully before any progressive statement over that table starts, and is
idempotent (re-running drops and rebuilds the partition tables).

Steps, per [`PartitionManager::prepare_table`]:

1. full row count; `partition_count = ceil(row_count / size_hint)`
2. drop pre-existing partition tables
3. create and load partitions via the driver's strategy (native list
   partitioning with one bulk load, or a materialized copy loop)
4. analyze/statistics step per partition
5. record `Partition` rows and numeric-column min/max into the metadata store
*/

use std::sync::Arc;

use log::info;

use super::driver::{Driver, PARTITION_COLUMN};
use super::meta::{ColumnStats, MetaStore, Partition};
use super::sql::ast::{
    BinaryOperator, Expr, LiteralValue, ProjectedColumn, SqlSelect, SqlStatement, SqlType,
};
use super::sql::connection::SqlConnection;
use super::sql::error::{SqlError, SqlResult};

pub struct PartitionManager {
    driver: Arc<dyn Driver>,
}

impl PartitionManager {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        PartitionManager { driver }
    }

    /// Split `table` into `ceil(row_count / partition_size_hint)` partitions
    /// and populate the metadata store.
    pub fn prepare_table(
        &self,
        conn: &dyn SqlConnection,
        table: &str,
        meta: &dyn MetaStore,
        partition_size_hint: u64,
    ) -> SqlResult<Vec<Partition>> {
        if partition_size_hint == 0 {
            return Err(SqlError::invalid_query("partition size hint must be > 0"));
        }

        let row_count = self.count_rows(conn, table, None)?;
        let partition_count = ((row_count + partition_size_hint - 1) / partition_size_hint).max(1);
        let partition_count = u32::try_from(partition_count)
            .map_err(|_| SqlError::execution("partition count overflow", None))?;
        info!(
            "splitting table {} ({} rows) into {} partitions",
            table, row_count, partition_count
        );

        let plan = self.driver.build_partition_plan(table, partition_count);
        for (phase, steps) in [
            ("drop", &plan.drop_steps),
            ("create", &plan.create_steps),
            ("load", &plan.load_steps),
            ("analyze", &plan.analyze_steps),
        ] {
            info!("partition {} phase: {} statements", phase, steps.len());
            for sql in steps {
                conn.execute(sql, &[])?;
            }
        }

        let partitions = self.read_partitions(conn, table, partition_count)?;
        let columns = self.scan_column_stats(conn, table)?;
        info!(
            "recorded {} partitions and {} column statistics for table {}",
            partitions.len(),
            columns.len(),
            table
        );
        meta.add(partitions.clone(), columns);

        Ok(partitions)
    }

    fn count_rows(
        &self,
        conn: &dyn SqlConnection,
        table: &str,
        partition: Option<u32>,
    ) -> SqlResult<u64> {
        let where_clause = partition.map(|id| {
            Expr::binary(
                Expr::col(PARTITION_COLUMN),
                BinaryOperator::Equal,
                Expr::Literal(LiteralValue::Integer(id as i64)),
            )
        });
        let select = SqlSelect {
            items: vec![ProjectedColumn::new(Expr::func("COUNT", vec![Expr::col("*")]))],
            from: table.to_string(),
            where_clause,
            group_by: vec![],
        };
        let sql = self.driver.to_sql(&SqlStatement::Select(select));
        let row = conn.query_row(&sql, &[])?;
        row.first()
            .and_then(|v| v.as_i64())
            .map(|count| count.max(0) as u64)
            .ok_or_else(|| SqlError::execution("count query returned no value", Some(sql)))
    }

    fn read_partitions(
        &self,
        conn: &dyn SqlConnection,
        table: &str,
        partition_count: u32,
    ) -> SqlResult<Vec<Partition>> {
        let scan_table = self.driver.partition_table(table);
        let mut partitions = Vec::with_capacity(partition_count as usize);
        for id in 0..partition_count {
            let row_count = self.count_rows(conn, &scan_table, Some(id))?;
            partitions.push(Partition {
                source_table: table.to_string(),
                partition_table: self.driver.partition_table_at(table, id),
                id,
                row_count,
            });
        }
        Ok(partitions)
    }

    /// Min/max scan over the numeric columns, one query for the whole table.
    fn scan_column_stats(
        &self,
        conn: &dyn SqlConnection,
        table: &str,
    ) -> SqlResult<Vec<ColumnStats>> {
        let numeric: Vec<String> = conn
            .columns(table)?
            .into_iter()
            .filter(|(_, ty)| matches!(ty, SqlType::Integer | SqlType::BigInt))
            .map(|(name, _)| name)
            .collect();
        if numeric.is_empty() {
            return Ok(Vec::new());
        }

        let mut items = Vec::with_capacity(numeric.len() * 2);
        for name in &numeric {
            items.push(ProjectedColumn::new(Expr::func(
                "MIN",
                vec![Expr::col(name.clone())],
            )));
            items.push(ProjectedColumn::new(Expr::func(
                "MAX",
                vec![Expr::col(name.clone())],
            )));
        }
        let select = SqlSelect {
            items,
            from: table.to_string(),
            where_clause: None,
            group_by: vec![],
        };
        let sql = self.driver.to_sql(&SqlStatement::Select(select));
        let row = conn.query_row(&sql, &[])?;

        let mut stats = Vec::with_capacity(numeric.len());
        for (i, name) in numeric.into_iter().enumerate() {
            let min = row.get(i * 2).and_then(|v| v.as_i64()).unwrap_or(0);
            let max = row.get(i * 2 + 1).and_then(|v| v.as_i64()).unwrap_or(0);
            stats.push(ColumnStats {
                table: table.to_string(),
                name,
                min,
                max,
            });
        }
        Ok(stats)
    }
}
