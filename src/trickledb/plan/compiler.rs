/*!
# Plan Compiler (Query Rewriter)

Compiles one progressive SELECT AST into an [`ExecutionPlan`]:

- **classify** every select item into a [`MetaField`];
- **source query**: project the classified items with `AVG` expanded into
  `(SUM, COUNT)`, drop read-time meta functions, lift `FUTURE` WHERE
  sub-predicates into eagerly-evaluated key columns, rewrite FROM to the
  driver's partition scan table and AND the WHERE with `_partition = ?`;
- **buffer DDL**: one physical column per emitted source value, keyed by the
  group columns;
- **merge statement**: a single upsert whose conflict clause adds every
  non-key column to its stored value;
- **read-back query**: reconstruct `AVG` as a sum/count division, rescale
  every `SUM`/`COUNT` by a progress parameter, bind meta functions as
  parameters, preserve original order and aliases.

The compiler also rewrites selects over progressive views
([`PlanCompiler::compile_view_select`]): projected names are substituted
against the view's buffer columns, so any number of readers can re-group and
filter one shared accumulator.
*/

use std::collections::HashMap;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::trickledb::config::EngineConfig;
use crate::trickledb::driver::{Driver, PARTITION_COLUMN};
use crate::trickledb::meta::MetaStore;
use crate::trickledb::sql::ast::{
    BinaryOperator, ColumnDef, CreateProgressiveView, Expr, LiteralValue, OnConflict,
    ProjectedColumn, SelectItem, SelectProgressive, SqlCreateTable, SqlInsert, SqlSelect, SqlType,
};
use crate::trickledb::sql::connection::SqlConnection;
use crate::trickledb::sql::error::{SqlError, SqlResult};

use super::{ExecutionPlan, MetaField, ViewReadPlan};

pub struct PlanCompiler {
    buffer_driver: Arc<dyn Driver>,
    source_driver: Arc<dyn Driver>,
    config: EngineConfig,
}

impl PlanCompiler {
    pub fn new(source_driver: Arc<dyn Driver>, buffer_driver: Arc<dyn Driver>) -> Self {
        Self::with_config(source_driver, buffer_driver, EngineConfig::default())
    }

    pub fn with_config(
        source_driver: Arc<dyn Driver>,
        buffer_driver: Arc<dyn Driver>,
        config: EngineConfig,
    ) -> Self {
        PlanCompiler {
            source_driver,
            buffer_driver,
            config,
        }
    }

    /// Compile a progressive select against a freshly named buffer table.
    pub fn compile_select(
        &self,
        conn: &dyn SqlConnection,
        meta: &dyn MetaStore,
        select: &SelectProgressive,
    ) -> SqlResult<ExecutionPlan> {
        let buffer_table = self.generate_buffer_table_name();
        self.compile(conn, meta, select, buffer_table)
    }

    /// Compile a progressive view; the view name becomes the buffer table.
    pub fn compile_view(
        &self,
        conn: &dyn SqlConnection,
        meta: &dyn MetaStore,
        view: &CreateProgressiveView,
    ) -> SqlResult<ExecutionPlan> {
        if view.name.is_empty() {
            return Err(SqlError::invalid_query("view name must not be empty"));
        }
        self.compile(conn, meta, &view.query, view.name.clone())
    }

    fn compile(
        &self,
        conn: &dyn SqlConnection,
        meta: &dyn MetaStore,
        select: &SelectProgressive,
        buffer_table: String,
    ) -> SqlResult<ExecutionPlan> {
        let source_table = select
            .from
            .simple()
            .ok_or_else(|| {
                SqlError::invalid_query("FROM must reference exactly one bare table")
            })?
            .to_string();

        let mut meta_fields = Vec::with_capacity(select.items.len());
        let mut field_names = Vec::with_capacity(select.items.len());
        for item in &select.items {
            meta_fields.push(classify_item(item)?);
            field_names.push(item_field_name(item));
        }

        let source_columns = conn.columns(&source_table)?;
        let column_type = |name: &str| -> SqlType {
            source_columns
                .iter()
                .find(|(col, _)| col.eq_ignore_ascii_case(name))
                .map(|(_, ty)| ty.clone())
                .unwrap_or(SqlType::Varchar(None))
        };

        let mut source_items: Vec<ProjectedColumn> = Vec::new();
        let mut buffer_columns: Vec<ColumnDef> = Vec::new();
        let mut buffer_field_names: Vec<String> = Vec::new();
        let mut group_key_columns: Vec<String> = Vec::new();
        let mut bounds: HashMap<usize, (i64, i64)> = HashMap::new();

        for (i, item) in select.items.iter().enumerate() {
            let expr = item_expr(item)?;
            match meta_fields[i] {
                MetaField::None => {
                    let name = buffer_field_name(i, MetaField::None);
                    let data_type = match &expr {
                        Expr::Column(column) => column_type(column),
                        Expr::Literal(literal) => literal_type(literal),
                        _ => SqlType::Varchar(None),
                    };
                    source_items.push(ProjectedColumn::new(expr));
                    buffer_columns.push(ColumnDef {
                        name: name.clone(),
                        data_type,
                    });
                    buffer_field_names.push(name.clone());
                    group_key_columns.push(name);
                }
                MetaField::Future => {
                    let inner = unwrap_future(&expr);
                    let name = buffer_field_name(i, MetaField::Future);
                    let data_type = match &inner {
                        Expr::Column(column) => column_type(column),
                        _ => SqlType::Integer,
                    };
                    source_items.push(ProjectedColumn::new(inner));
                    buffer_columns.push(ColumnDef {
                        name: name.clone(),
                        data_type,
                    });
                    buffer_field_names.push(name.clone());
                    group_key_columns.push(name);
                }
                MetaField::Avg => {
                    let arg = aggregate_arg(&expr, "AVG")?;
                    let sum_name = buffer_field_name(i, MetaField::Sum);
                    let count_name = buffer_field_name(i, MetaField::Count);
                    source_items.push(ProjectedColumn::new(Expr::func("SUM", vec![arg.clone()])));
                    source_items.push(ProjectedColumn::new(Expr::func("COUNT", vec![arg.clone()])));
                    buffer_columns.push(ColumnDef {
                        name: sum_name.clone(),
                        data_type: sum_type(&arg, &column_type),
                    });
                    buffer_columns.push(ColumnDef {
                        name: count_name.clone(),
                        data_type: SqlType::BigInt,
                    });
                    buffer_field_names.push(sum_name);
                    buffer_field_names.push(count_name);
                }
                MetaField::Sum => {
                    let arg = aggregate_arg(&expr, "SUM")?;
                    let name = buffer_field_name(i, MetaField::Sum);
                    source_items.push(ProjectedColumn::new(Expr::func("SUM", vec![arg.clone()])));
                    buffer_columns.push(ColumnDef {
                        name: name.clone(),
                        data_type: sum_type(&arg, &column_type),
                    });
                    buffer_field_names.push(name);
                }
                MetaField::Count => {
                    let arg = count_arg(&expr);
                    let name = buffer_field_name(i, MetaField::Count);
                    source_items.push(ProjectedColumn::new(Expr::func("COUNT", vec![arg])));
                    buffer_columns.push(ColumnDef {
                        name: name.clone(),
                        data_type: SqlType::BigInt,
                    });
                    buffer_field_names.push(name);
                }
                MetaField::ConfidenceInterval => {
                    let arg = aggregate_arg(&expr, "PROGRESSIVE_CONFIDENCE")?;
                    let column = match &arg {
                        Expr::Column(column) => column.clone(),
                        _ => {
                            return Err(SqlError::invalid_query(
                                "PROGRESSIVE_CONFIDENCE requires a column argument",
                            ))
                        }
                    };
                    let stats = meta.column(&source_table, &column).ok_or_else(|| {
                        SqlError::meta(
                            source_table.clone(),
                            format!("no statistics recorded for column '{}'", column),
                        )
                    })?;
                    bounds.insert(i, (stats.min, stats.max));

                    let name = buffer_field_name(i, MetaField::ConfidenceInterval);
                    source_items.push(ProjectedColumn::new(Expr::func("COUNT", vec![arg])));
                    buffer_columns.push(ColumnDef {
                        name: name.clone(),
                        data_type: SqlType::BigInt,
                    });
                    buffer_field_names.push(name);
                }
                // meta functions do not exist at the source
                MetaField::Partition | MetaField::Progress => {}
            }
        }

        let mut source_groups: Vec<Expr> = select
            .group_by
            .iter()
            .map(|group| unwrap_future(group))
            .collect();

        // lift FUTURE-marked WHERE sub-predicates into eagerly evaluated keys
        let mut lifted: Vec<Expr> = Vec::new();
        let user_where = match &select.where_clause {
            Some(where_clause) => resolve_future_where(where_clause, false, false, &mut lifted)?,
            None => None,
        };
        let has_aggregation = meta_fields.iter().any(|m| m.is_aggregate());
        for predicate in lifted {
            let index = meta_fields.len();
            let name = buffer_field_name(index, MetaField::Future);
            meta_fields.push(MetaField::Future);
            field_names.push(name.clone());
            source_items.push(ProjectedColumn::aliased(
                Expr::cast(predicate, SqlType::Integer),
                name.clone(),
            ));
            buffer_columns.push(ColumnDef {
                name: name.clone(),
                data_type: SqlType::Integer,
            });
            buffer_field_names.push(name.clone());
            group_key_columns.push(name.clone());
            if has_aggregation {
                source_groups.push(Expr::col(name));
            }
        }

        let partition_predicate = Expr::binary(
            Expr::col(PARTITION_COLUMN),
            BinaryOperator::Equal,
            Expr::Param,
        );
        let where_clause = Some(match user_where {
            Some(filter) => Expr::binary(filter, BinaryOperator::And, partition_predicate),
            None => partition_predicate,
        });

        let source_query = SqlSelect {
            items: source_items,
            from: self.source_driver.partition_table(&source_table),
            where_clause,
            group_by: source_groups,
        };

        let buffer_create = SqlCreateTable {
            name: buffer_table.clone(),
            columns: buffer_columns,
            primary_key: group_key_columns.clone(),
        };

        let buffer_merge =
            self.build_merge(&buffer_table, &buffer_field_names, &group_key_columns)?;

        let buffer_read = build_read_query(
            &buffer_table,
            &meta_fields,
            &field_names,
            &buffer_field_names,
        );

        Ok(ExecutionPlan {
            source_table,
            buffer_table,
            source_query,
            buffer_create,
            buffer_merge,
            buffer_read,
            meta_fields,
            field_names,
            buffer_field_names,
            group_key_columns,
            bounds,
        })
    }

    fn build_merge(
        &self,
        buffer_table: &str,
        columns: &[String],
        keys: &[String],
    ) -> SqlResult<SqlInsert> {
        let on_conflict = if keys.is_empty() {
            None
        } else {
            if !self.buffer_driver.capabilities().has_upsert {
                return Err(SqlError::unsupported(
                    "buffer driver does not support upsert, required for grouped progressive queries",
                ));
            }
            let updates = columns
                .iter()
                .map(|column| {
                    let incoming = Expr::Column(format!("excluded.{}", column));
                    if keys.contains(column) {
                        (column.clone(), incoming)
                    } else {
                        let added =
                            Expr::binary(Expr::col(column.clone()), BinaryOperator::Add, incoming);
                        (column.clone(), added)
                    }
                })
                .collect();
            Some(OnConflict {
                keys: keys.to_vec(),
                updates,
            })
        };

        Ok(SqlInsert {
            table: buffer_table.to_string(),
            columns: columns.to_vec(),
            values: vec![Expr::Param; columns.len()],
            on_conflict,
        })
    }

    /// Rewrite a select over a progressive view against the view's buffer.
    pub fn compile_view_select(
        &self,
        view: &ExecutionPlan,
        select: &SelectProgressive,
    ) -> SqlResult<ViewReadPlan> {
        if select.items.len() == 1 && matches!(select.items[0], SelectItem::Wildcard) {
            return Ok(view.read_plan());
        }

        let offsets = view.buffer_column_offsets();
        let find_field = |name: &str| -> SqlResult<usize> {
            view.field_names
                .iter()
                .position(|field| field.eq_ignore_ascii_case(name))
                .ok_or_else(|| SqlError::invalid_query(format!("field not found: {}", name)))
        };

        let mut items = Vec::with_capacity(select.items.len());
        let mut meta_fields = Vec::with_capacity(select.items.len());
        let mut field_names = Vec::with_capacity(select.items.len());
        let mut bounds = HashMap::new();

        for item in &select.items {
            let (name, alias) = match item {
                SelectItem::Column(column) => (column.clone(), None),
                SelectItem::AliasedColumn { column, alias } => {
                    (column.clone(), Some(alias.clone()))
                }
                SelectItem::Expression {
                    expr: Expr::Column(column),
                    alias,
                } => (column.clone(), alias.clone()),
                _ => {
                    return Err(SqlError::invalid_query(
                        "selects over progressive views support plain column references",
                    ))
                }
            };
            let index = find_field(&name)?;
            let meta_field = view.meta_fields[index];
            let expr = substitute_field(view, &offsets, index, meta_field);

            let out_alias = alias.unwrap_or(name);
            if let Some(b) = view.bounds.get(&index) {
                bounds.insert(meta_fields.len(), *b);
            }
            items.push(ProjectedColumn::aliased(expr, out_alias.clone()));
            meta_fields.push(meta_field);
            field_names.push(out_alias);
        }

        let where_clause = match &select.where_clause {
            Some(where_clause) => Some(substitute_where(view, &offsets, where_clause)?),
            None => None,
        };

        let mut group_by = Vec::new();
        for name in &select.with_future_group_by {
            let index = find_field(name)?;
            if view.meta_fields[index] != MetaField::Future {
                return Err(SqlError::invalid_query(format!(
                    "WITH FUTURE GROUP BY requires a FUTURE field, '{}' is not one",
                    name
                )));
            }
            group_by.push(Expr::col(view.buffer_field_names[offsets[index]].clone()));
        }
        for group in &select.group_by {
            let Expr::Column(name) = unwrap_future(group) else {
                return Err(SqlError::invalid_query(
                    "view GROUP BY entries must be column references",
                ));
            };
            let index = find_field(&name)?;
            if view.meta_fields[index] == MetaField::Future {
                return Err(SqlError::invalid_query(format!(
                    "field '{}' is FUTURE-grouped, use WITH FUTURE GROUP BY",
                    name
                )));
            }
            group_by.push(Expr::col(view.buffer_field_names[offsets[index]].clone()));
        }

        Ok(ViewReadPlan {
            read_query: SqlSelect {
                items,
                from: view.buffer_table.clone(),
                where_clause,
                group_by,
            },
            meta_fields,
            field_names,
            bounds,
        })
    }

    fn generate_buffer_table_name(&self) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(|c| (c as char).to_ascii_lowercase())
            .collect();
        format!("{}{}", self.config.buffer_prefix, suffix)
    }
}

fn classify_item(item: &SelectItem) -> SqlResult<MetaField> {
    match item {
        SelectItem::Column(_) | SelectItem::AliasedColumn { .. } => Ok(MetaField::None),
        SelectItem::Expression { expr, .. } => classify_expr(expr),
        SelectItem::Wildcard => Err(SqlError::invalid_query(
            "wildcard selects are only valid over progressive views",
        )),
    }
}

fn classify_expr(expr: &Expr) -> SqlResult<MetaField> {
    match expr {
        Expr::Column(_) | Expr::Literal(_) => Ok(MetaField::None),
        Expr::Future(inner) => {
            if matches!(inner.as_ref(), Expr::Future(_)) {
                return Err(SqlError::invalid_query("future markers must not be nested"));
            }
            Ok(MetaField::Future)
        }
        Expr::Function { name, .. } => match name.to_uppercase().as_str() {
            "AVG" => Ok(MetaField::Avg),
            "COUNT" => Ok(MetaField::Count),
            "SUM" => Ok(MetaField::Sum),
            "PROGRESSIVE_PARTITION" => Ok(MetaField::Partition),
            "PROGRESSIVE_PROGRESS" => Ok(MetaField::Progress),
            "PROGRESSIVE_CONFIDENCE" => Ok(MetaField::ConfidenceInterval),
            other => Err(SqlError::unsupported(format!(
                "operation is not supported: {}",
                other
            ))),
        },
        other => Err(SqlError::unsupported(format!(
            "column shape is not supported: {:?}",
            other
        ))),
    }
}

fn item_expr(item: &SelectItem) -> SqlResult<Expr> {
    match item {
        SelectItem::Column(column) => Ok(Expr::col(column.clone())),
        SelectItem::AliasedColumn { column, .. } => Ok(Expr::col(column.clone())),
        SelectItem::Expression { expr, .. } => Ok(expr.clone()),
        SelectItem::Wildcard => Err(SqlError::invalid_query(
            "wildcard selects are only valid over progressive views",
        )),
    }
}

fn item_field_name(item: &SelectItem) -> String {
    if let Some(alias) = item.alias() {
        return alias.to_string();
    }
    match item {
        SelectItem::Column(column) => column.clone(),
        SelectItem::Expression { expr, .. } => expr_name(expr),
        SelectItem::AliasedColumn { alias, .. } => alias.clone(),
        SelectItem::Wildcard => "*".to_string(),
    }
}

fn expr_name(expr: &Expr) -> String {
    match expr {
        Expr::Column(column) => column.clone(),
        Expr::Literal(LiteralValue::String(s)) => s.clone(),
        Expr::Literal(LiteralValue::Integer(i)) => i.to_string(),
        Expr::Literal(LiteralValue::Float(f)) => f.to_string(),
        Expr::Literal(LiteralValue::Boolean(b)) => b.to_string(),
        Expr::Literal(LiteralValue::Null) => "NULL".to_string(),
        Expr::Function { name, args } => {
            if args.is_empty() {
                format!("{}()", name)
            } else {
                let rendered: Vec<String> = args.iter().map(expr_name).collect();
                format!("{}({})", name, rendered.join(", "))
            }
        }
        Expr::Future(inner) => expr_name(inner),
        _ => "expr".to_string(),
    }
}

fn unwrap_future(expr: &Expr) -> Expr {
    match expr {
        Expr::Future(inner) => (**inner).clone(),
        other => other.clone(),
    }
}

fn aggregate_arg(expr: &Expr, function: &str) -> SqlResult<Expr> {
    let inner = unwrap_future(expr);
    match inner {
        Expr::Function { args, .. } => args.first().cloned().ok_or_else(|| {
            SqlError::invalid_query(format!("{} requires an argument", function))
        }),
        _ => Err(SqlError::invalid_query(format!(
            "{} must be a function call",
            function
        ))),
    }
}

fn count_arg(expr: &Expr) -> Expr {
    match unwrap_future(expr) {
        Expr::Function { args, .. } => args.first().cloned().unwrap_or(Expr::col("*")),
        _ => Expr::col("*"),
    }
}

fn sum_type(arg: &Expr, column_type: &impl Fn(&str) -> SqlType) -> SqlType {
    match arg {
        Expr::Column(column) => match column_type(column) {
            SqlType::Real => SqlType::Real,
            SqlType::Integer | SqlType::BigInt | SqlType::Boolean => SqlType::BigInt,
            _ => SqlType::Real,
        },
        _ => SqlType::Real,
    }
}

fn literal_type(literal: &LiteralValue) -> SqlType {
    match literal {
        LiteralValue::Integer(_) => SqlType::BigInt,
        LiteralValue::Float(_) => SqlType::Real,
        LiteralValue::Boolean(_) => SqlType::Boolean,
        _ => SqlType::Varchar(None),
    }
}

/// Buffer column name of one select position: `f<i>` for plain fields,
/// `f<i>_<TAG>` for everything substituted.
fn buffer_field_name(index: usize, meta_field: MetaField) -> String {
    match meta_field {
        MetaField::None => format!("f{}", index),
        MetaField::Sum | MetaField::Avg => format!("f{}_SUM", index),
        MetaField::Count => format!("f{}_COUNT", index),
        MetaField::ConfidenceInterval => format!("f{}_CONFIDENCE", index),
        MetaField::Future => format!("f{}_FUTURE", index),
        MetaField::Partition => format!("f{}_PARTITION", index),
        MetaField::Progress => format!("f{}_PROGRESS", index),
    }
}

fn build_read_query(
    buffer_table: &str,
    meta_fields: &[MetaField],
    field_names: &[String],
    buffer_field_names: &[String],
) -> SqlSelect {
    let mut items = Vec::new();
    let mut group_by = Vec::new();
    let mut cursor = 0;

    for (position, meta_field) in meta_fields.iter().enumerate() {
        let alias = field_names[position].clone();
        let expr = match meta_field {
            MetaField::None => {
                let column = buffer_field_names[cursor].clone();
                cursor += 1;
                group_by.push(Expr::col(column.clone()));
                Expr::col(column)
            }
            MetaField::Avg => {
                let sum_column = buffer_field_names[cursor].clone();
                let count_column = buffer_field_names[cursor + 1].clone();
                cursor += 2;
                avg_reconstruction(&sum_column, &count_column)
            }
            MetaField::Sum | MetaField::Count => {
                let column = buffer_field_names[cursor].clone();
                cursor += 1;
                percent_aggregation(&column)
            }
            MetaField::ConfidenceInterval => {
                let column = buffer_field_names[cursor].clone();
                cursor += 1;
                Expr::func("SUM", vec![Expr::col(column)])
            }
            MetaField::Partition => Expr::cast(Expr::Param, SqlType::Integer),
            MetaField::Progress => Expr::cast(Expr::Param, SqlType::Real),
            // buffer-resident keys, not part of the direct read-back
            MetaField::Future => {
                cursor += 1;
                continue;
            }
        };
        items.push(ProjectedColumn::aliased(expr, alias));
    }

    SqlSelect {
        items,
        from: buffer_table.to_string(),
        where_clause: None,
        group_by,
    }
}

/// `CAST(SUM(sum) AS REAL) / CAST(SUM(count) AS REAL)` - correct for keyed
/// buffers (one row per group) and for append-only keyless buffers alike.
fn avg_reconstruction(sum_column: &str, count_column: &str) -> Expr {
    Expr::binary(
        Expr::cast(
            Expr::func("SUM", vec![Expr::col(sum_column.to_string())]),
            SqlType::Real,
        ),
        BinaryOperator::Divide,
        Expr::cast(
            Expr::func("SUM", vec![Expr::col(count_column.to_string())]),
            SqlType::Real,
        ),
    )
}

/// `SUM(col) / ?` - the unbiased linear extrapolation to full-table scale.
fn percent_aggregation(column: &str) -> Expr {
    Expr::binary(
        Expr::func("SUM", vec![Expr::col(column.to_string())]),
        BinaryOperator::Divide,
        Expr::Param,
    )
}

fn substitute_field(
    view: &ExecutionPlan,
    offsets: &[usize],
    index: usize,
    meta_field: MetaField,
) -> Expr {
    match meta_field {
        MetaField::Avg => {
            let sum_column = &view.buffer_field_names[offsets[index]];
            let count_column = &view.buffer_field_names[offsets[index] + 1];
            avg_reconstruction(sum_column, count_column)
        }
        MetaField::Sum | MetaField::Count => {
            percent_aggregation(&view.buffer_field_names[offsets[index]])
        }
        MetaField::None | MetaField::Future => {
            Expr::col(view.buffer_field_names[offsets[index]].clone())
        }
        MetaField::Partition => Expr::cast(Expr::Param, SqlType::Integer),
        MetaField::Progress => Expr::cast(Expr::Param, SqlType::Real),
        MetaField::ConfidenceInterval => Expr::func(
            "SUM",
            vec![Expr::col(view.buffer_field_names[offsets[index]].clone())],
        ),
    }
}

/// Replace field references in a view-select WHERE by their buffer columns.
/// Only plain and FUTURE fields are addressable in filters.
fn substitute_where(view: &ExecutionPlan, offsets: &[usize], expr: &Expr) -> SqlResult<Expr> {
    match expr {
        Expr::Column(name) => {
            let index = view
                .field_names
                .iter()
                .position(|field| field.eq_ignore_ascii_case(name))
                .ok_or_else(|| SqlError::invalid_query(format!("field not found: {}", name)))?;
            match view.meta_fields[index] {
                MetaField::None | MetaField::Future => {
                    Ok(Expr::col(view.buffer_field_names[offsets[index]].clone()))
                }
                other => Err(SqlError::invalid_query(format!(
                    "field '{}' ({:?}) cannot be filtered on a view",
                    name, other
                ))),
            }
        }
        Expr::Literal(_) => Ok(expr.clone()),
        Expr::BinaryOp { left, op, right } => Ok(Expr::binary(
            substitute_where(view, offsets, left)?,
            *op,
            substitute_where(view, offsets, right)?,
        )),
        Expr::Future(_) => Err(SqlError::invalid_query(
            "FUTURE markers are not allowed when selecting from a view",
        )),
        other => Err(SqlError::invalid_query(format!(
            "unsupported view filter expression: {:?}",
            other
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FutureType {
    None,
    Mixed,
    Full,
}

fn future_type(expr: &Expr) -> FutureType {
    match expr {
        Expr::Future(_) => FutureType::Full,
        Expr::BinaryOp { left, op, right }
            if matches!(op, BinaryOperator::And | BinaryOperator::Or) =>
        {
            match (future_type(left), future_type(right)) {
                (FutureType::None, FutureType::None) => FutureType::None,
                (FutureType::Full, FutureType::Full) => FutureType::Full,
                _ => FutureType::Mixed,
            }
        }
        _ => FutureType::None,
    }
}

/// Resolve FUTURE markers in a WHERE tree.
///
/// Marked sub-predicates are collected into `lifted` (they become eagerly
/// evaluated key columns) and removed from the residual filter; an OR between
/// a future and a non-future branch additionally lifts the non-future branch
/// and weakens the residual filter, so rows satisfying either side stay
/// visible to later readers. Nested markers are rejected.
fn resolve_future_where(
    expr: &Expr,
    add: bool,
    in_future: bool,
    lifted: &mut Vec<Expr>,
) -> SqlResult<Option<Expr>> {
    let (expr, in_future) = match expr {
        Expr::Future(inner) => {
            if in_future || matches!(inner.as_ref(), Expr::Future(_)) {
                return Err(SqlError::invalid_query("future markers must not be nested"));
            }
            lifted.push((**inner).clone());
            (inner.as_ref(), true)
        }
        other => (other, in_future),
    };

    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let left_future = future_type(left);
            let right_future = future_type(right);
            let reverse = add && left_future == FutureType::Full && right_future == FutureType::Full;

            let resolved_left = resolve_future_where(left, reverse, in_future, lifted)?;
            let resolved_right = resolve_future_where(right, reverse, in_future, lifted)?;

            let op = if reverse {
                BinaryOperator::Or
            } else {
                BinaryOperator::And
            };
            Ok(combine(resolved_left, resolved_right, op))
        }
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Or,
            right,
        } => {
            let left_future = future_type(left);
            let right_future = future_type(right);
            let new_add =
                add || ((left_future == FutureType::Full) ^ (right_future == FutureType::Full));

            let resolved_left = resolve_future_where(left, new_add, in_future, lifted)?;
            if left_future == FutureType::None && right_future == FutureType::Full {
                if let Some(left) = &resolved_left {
                    lifted.push(left.clone());
                }
            }

            let resolved_right = resolve_future_where(right, new_add, in_future, lifted)?;
            if left_future == FutureType::Full && right_future == FutureType::None {
                if let Some(right) = &resolved_right {
                    lifted.push(right.clone());
                }
            }

            Ok(combine(resolved_left, resolved_right, BinaryOperator::Or))
        }
        leaf => {
            if !in_future || add {
                Ok(Some(leaf.clone()))
            } else {
                Ok(None)
            }
        }
    }
}

fn combine(left: Option<Expr>, right: Option<Expr>, op: BinaryOperator) -> Option<Expr> {
    match (left, right) {
        (Some(left), Some(right)) => Some(Expr::binary(left, op, right)),
        (Some(left), None) => Some(left),
        (None, right) => right,
    }
}
