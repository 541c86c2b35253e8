/*!
# Buffer / Merge Engine

Owns the accumulator table of one compiled plan. Per-partition source rows
are merged in with a single additive upsert per row
([`DataBuffer::add`]); progressive read-backs rescale the accumulated state
to full-table estimates ([`DataBuffer::get`]).

[`BufferReader`] is the read-only half on its own: every materialized-view
listener owns one, so independent readers can re-group and filter one shared
buffer without touching the merge path.

The merge loop is cancellation-aware: it checks the owning statement's
cancel token between rows, so a racing `close()` stops the merge at a row
boundary instead of corrupting the sequence.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use super::driver::Driver;
use super::plan::{ExecutionPlan, MetaField, ViewReadPlan};
use super::sql::ast::SqlStatement;
use super::sql::connection::SqlConnection;
use super::sql::error::{SqlError, SqlResult};
use super::sql::value::SqlValue;
use super::statement::CancelToken;

/// Read-only access to a buffer table: one prepared, progress-scaled read
/// query plus the decode rules for its output columns.
pub struct BufferReader {
    conn: Arc<dyn SqlConnection>,
    plan: ViewReadPlan,
    read_sql: String,
    confidence_level: f64,
}

impl BufferReader {
    pub fn new(
        driver: &dyn Driver,
        conn: Arc<dyn SqlConnection>,
        plan: ViewReadPlan,
        confidence_level: f64,
    ) -> Self {
        let read_sql = driver.to_sql(&SqlStatement::Select(plan.read_query.clone()));
        BufferReader {
            conn,
            plan,
            read_sql,
            confidence_level,
        }
    }

    /// Output column names of every batch this reader produces.
    pub fn field_names(&self) -> &[String] {
        &self.plan.field_names
    }

    /// Execute the read query at the given progress point and eagerly
    /// materialize the scaled batch.
    ///
    /// Parameters are bound positionally by walking the classification:
    /// every `SUM`/`COUNT` position consumes the progress scale, the meta
    /// functions consume the partition id and progress literals.
    pub fn get(&self, partition: u32, progress: f64) -> SqlResult<Vec<Vec<SqlValue>>> {
        let mut params = Vec::new();
        for meta_field in &self.plan.meta_fields {
            match meta_field {
                MetaField::Sum | MetaField::Count => params.push(SqlValue::Float(progress)),
                MetaField::Partition => params.push(SqlValue::Integer(partition as i64)),
                MetaField::Progress => params.push(SqlValue::Float(progress)),
                _ => {}
            }
        }

        let mut rows = self.conn.query(&self.read_sql, &params)?;
        if !self.plan.bounds.is_empty() {
            for row in &mut rows {
                self.resolve_confidence(row)?;
            }
        }
        Ok(rows)
    }

    /// Replace accumulated counts at confidence positions by Hoeffding
    /// half-widths derived from the recorded column bounds.
    fn resolve_confidence(&self, row: &mut [SqlValue]) -> SqlResult<()> {
        for (position, (min, max)) in &self.plan.bounds {
            let cell = row.get_mut(*position).ok_or_else(|| {
                SqlError::execution("confidence position out of range", None)
            })?;
            let count = cell.as_f64().unwrap_or(0.0);
            *cell = SqlValue::Float(confidence_half_width(
                *min,
                *max,
                count,
                self.confidence_level,
            ));
        }
        Ok(())
    }
}

/// Hoeffding half-width for the mean of a `[min, max]`-bounded column after
/// `count` observed values: `(max - min) * sqrt(ln(2 / delta) / (2 * count))`.
pub fn confidence_half_width(min: i64, max: i64, count: f64, confidence_level: f64) -> f64 {
    if count <= 0.0 {
        return f64::INFINITY;
    }
    let delta = 1.0 - confidence_level;
    let range = (max - min) as f64;
    range * ((2.0 / delta).ln() / (2.0 * count)).sqrt()
}

/// The accumulator of one compiled plan: merge side plus read side.
pub struct DataBuffer {
    conn: Arc<dyn SqlConnection>,
    plan: Arc<ExecutionPlan>,
    merge_sql: String,
    reader: BufferReader,
    closed: AtomicBool,
}

impl DataBuffer {
    /// Create the buffer table and pre-render the merge and read statements.
    pub fn open(
        driver: &dyn Driver,
        conn: Arc<dyn SqlConnection>,
        plan: Arc<ExecutionPlan>,
        confidence_level: f64,
    ) -> SqlResult<Self> {
        let create_sql = driver.to_sql(&SqlStatement::CreateTable(plan.buffer_create.clone()));
        conn.execute(&create_sql, &[])?;
        debug!("opened buffer table {}", plan.buffer_table);

        let merge_sql = driver.to_sql(&SqlStatement::Insert(plan.buffer_merge.clone()));
        let reader = BufferReader::new(driver, conn.clone(), plan.read_plan(), confidence_level);

        Ok(DataBuffer {
            conn,
            plan,
            merge_sql,
            reader,
            closed: AtomicBool::new(false),
        })
    }

    /// The compiled plan this buffer accumulates for.
    pub fn plan(&self) -> &Arc<ExecutionPlan> {
        &self.plan
    }

    /// Output column names of read-back batches.
    pub fn field_names(&self) -> &[String] {
        self.reader.field_names()
    }

    /// Merge the rows of one just-executed source-partition query.
    ///
    /// Each row binds once: the upsert's conflict clause carries the
    /// additive update, so insert and merge are one round trip. Returns the
    /// number of rows merged; stops early (without error) once `cancel` is
    /// observed.
    pub fn add(&self, rows: &[Vec<SqlValue>], cancel: &CancelToken) -> SqlResult<usize> {
        let expected = self.plan.buffer_field_names.len();
        let mut merged = 0;
        for row in rows {
            if cancel.is_cancelled() {
                break;
            }
            if row.len() != expected {
                return Err(SqlError::execution(
                    format!(
                        "source row has {} columns, buffer expects {}",
                        row.len(),
                        expected
                    ),
                    Some(self.merge_sql.clone()),
                ));
            }
            self.conn.execute(&self.merge_sql, row)?;
            merged += 1;
        }
        Ok(merged)
    }

    /// Progressive read-back at the given partition/progress point.
    pub fn get(&self, partition: u32, progress: f64) -> SqlResult<Vec<Vec<SqlValue>>> {
        self.reader.get(partition, progress)
    }

    /// Release the buffer. Idempotent; never escalates.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closed buffer table {}", self.plan.buffer_table);
    }

    /// Drop the buffer table. Best effort, used by statements that own a
    /// throwaway buffer (view buffers are kept).
    pub fn drop_table(&self, driver: &dyn Driver) {
        let drop_sql = driver.to_sql(&SqlStatement::DropTable(
            crate::trickledb::sql::ast::SqlDropTable {
                name: self.plan.buffer_table.clone(),
                if_exists: true,
            },
        ));
        if let Err(e) = self.conn.execute(&drop_sql, &[]) {
            warn!("failed to drop buffer table {}: {}", self.plan.buffer_table, e);
        }
    }
}
