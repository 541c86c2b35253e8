/*!
# Execution Plans

The plan compiler turns one progressive SELECT into an immutable
[`ExecutionPlan`]: the per-partition source query, the buffer DDL, the
additive merge statement and the progress-scaled read-back query, plus the
[`MetaField`] classification of every projected column.

A plan is built in one pass and never mutated; the execution engine reuses it
across every partition of the query's lifetime.
*/

pub mod compiler;

pub use compiler::PlanCompiler;

use std::collections::HashMap;

use super::sql::ast::{SqlCreateTable, SqlInsert, SqlSelect};

/// Classification of one projected column.
///
/// Position-indexed against the original select list. The tag decides how a
/// column is rewritten into the source query, stored in the buffer and
/// reconstructed at read time. `Avg` expands to two physical buffer columns
/// (sum, count).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    /// Plain column or literal (group key); passes through all three queries
    None,
    /// `AVG(expr)`; split into sum and count, reconstructed by division
    Avg,
    /// `COUNT(expr)`; accumulated and rescaled by progress at read time
    Count,
    /// `SUM(expr)`; accumulated and rescaled by progress at read time
    Sum,
    /// `PROGRESSIVE_PARTITION()`; bound as a literal at read time
    Partition,
    /// `PROGRESSIVE_PROGRESS()`; bound as a literal at read time
    Progress,
    /// `PROGRESSIVE_CONFIDENCE(expr)`; accumulated count resolved to a
    /// half-width at read time using recorded column bounds
    ConfidenceInterval,
    /// `FUTURE`-marked group key or lifted WHERE predicate; evaluated
    /// eagerly and kept as a buffer key, invisible to direct read-backs
    Future,
}

impl MetaField {
    /// Whether the field is bound as a runtime parameter of the read-back
    /// query rather than read from the buffer.
    pub fn is_function(&self) -> bool {
        matches!(self, MetaField::Partition | MetaField::Progress)
    }

    /// Whether the field substitutes a physical buffer column at read time.
    pub fn is_substitute(&self) -> bool {
        matches!(
            self,
            MetaField::Count
                | MetaField::Sum
                | MetaField::Partition
                | MetaField::Progress
                | MetaField::ConfidenceInterval
        )
    }

    /// Whether the field aggregates source rows.
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            MetaField::Avg | MetaField::Count | MetaField::Sum | MetaField::ConfidenceInterval
        )
    }

    /// Number of physical buffer columns backing this field.
    pub fn buffer_column_count(&self) -> usize {
        match self {
            MetaField::Avg => 2,
            MetaField::Partition | MetaField::Progress => 0,
            _ => 1,
        }
    }
}

/// Immutable compiled form of one progressive query.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Source table the query scans
    pub source_table: String,
    /// Accumulator table owned by this plan's buffer
    pub buffer_table: String,
    /// Per-partition source query; parameter 0 is the partition id
    pub source_query: SqlSelect,
    /// Buffer DDL, keyed by `group_key_columns` when present
    pub buffer_create: SqlCreateTable,
    /// Additive merge (upsert when keyed, plain insert otherwise)
    pub buffer_merge: SqlInsert,
    /// Progress-scaled read-back query
    pub buffer_read: SqlSelect,
    /// Classification per original select position (plus lifted futures)
    pub meta_fields: Vec<MetaField>,
    /// Output names per position, original aliases preserved
    pub field_names: Vec<String>,
    /// Physical buffer column names, in buffer order
    pub buffer_field_names: Vec<String>,
    /// Buffer key columns; empty for single-implicit-row buffers
    pub group_key_columns: Vec<String>,
    /// Column min/max per confidence-interval position
    pub bounds: HashMap<usize, (i64, i64)>,
}

impl ExecutionPlan {
    /// The read-only slice of the plan a buffer reader needs.
    ///
    /// FUTURE positions are buffer-resident keys without a projected output
    /// column, so they are dropped here; the returned classification is
    /// aligned with the read query's output columns.
    pub fn read_plan(&self) -> ViewReadPlan {
        let mut meta_fields = Vec::new();
        let mut field_names = Vec::new();
        let mut bounds = HashMap::new();
        for (position, meta_field) in self.meta_fields.iter().enumerate() {
            if *meta_field == MetaField::Future {
                continue;
            }
            if let Some(b) = self.bounds.get(&position) {
                bounds.insert(meta_fields.len(), *b);
            }
            meta_fields.push(*meta_field);
            field_names.push(self.field_names[position].clone());
        }
        ViewReadPlan {
            read_query: self.buffer_read.clone(),
            meta_fields,
            field_names,
            bounds,
        }
    }

    /// Starting buffer-column offset of every select position.
    pub fn buffer_column_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.meta_fields.len());
        let mut next = 0;
        for meta_field in &self.meta_fields {
            offsets.push(next);
            next += meta_field.buffer_column_count();
        }
        offsets
    }
}

/// A compiled read query over an existing buffer: what a view listener (or
/// the owning statement itself) needs to produce one scaled batch.
#[derive(Debug, Clone)]
pub struct ViewReadPlan {
    /// Scaled read query over the buffer table
    pub read_query: SqlSelect,
    /// Classification per output position
    pub meta_fields: Vec<MetaField>,
    /// Output column names
    pub field_names: Vec<String>,
    /// Column min/max per confidence-interval position
    pub bounds: HashMap<usize, (i64, i64)>,
}
