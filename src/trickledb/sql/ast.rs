/*!
# Progressive SQL Abstract Syntax Tree (AST)

This module defines the AST for progressive SQL queries and for the derived
statements the engine generates from them. The input side is what an external
parser produces for the progressive surface; the derived side is what the
plan compiler emits and a [`Driver`](crate::trickledb::driver::Driver)
renders to dialect text.

## Input surface

```sql
-- progressive aggregate select
SELECT PROGRESSIVE AVG(a), c FROM t GROUP BY c

-- meta functions resolved at read time
SELECT PROGRESSIVE COUNT(a), PROGRESSIVE_PARTITION(), PROGRESSIVE_PROGRESS() FROM t

-- shared materialized view with future group keys
CREATE PROGRESSIVE VIEW v AS
SELECT AVG(depdelay) d, origin FUTURE FROM ontime GROUP BY origin FUTURE
```

A `FUTURE` suffix on a GROUP BY key or a WHERE sub-predicate marks it as
unrestricted by progressive visibility: it is evaluated eagerly so that later
readers of the shared buffer can group or filter on it.

## Derived statements

The compiler produces plain relational statements (`SqlSelect`,
`SqlCreateTable`, `SqlInsert` with an optional upsert clause, `SqlDropTable`)
parameterized with positional placeholders (`Expr::Param`). Drivers render
them with their own identifier quoting, type names and placeholder syntax.
*/

/// Root AST node for the progressive surface.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressiveQuery {
    /// `SELECT PROGRESSIVE ...`
    Select(SelectProgressive),
    /// `CREATE PROGRESSIVE VIEW <name> AS <select>`
    CreateView(CreateProgressiveView),
}

/// A progressive SELECT over a single source table (or progressive view).
#[derive(Debug, Clone, PartialEq)]
pub struct SelectProgressive {
    /// Projected items in user order
    pub items: Vec<SelectItem>,
    /// Source table reference; must resolve to a single bare identifier
    pub from: TableRef,
    /// Optional filter; sub-predicates may carry `Expr::Future` markers
    pub where_clause: Option<Expr>,
    /// Grouping expressions; entries may carry `Expr::Future` markers
    pub group_by: Vec<Expr>,
    /// `WITH FUTURE GROUP BY` names, meaningful when selecting from a view
    pub with_future_group_by: Vec<String>,
}

/// `CREATE PROGRESSIVE VIEW` statement.
///
/// The view name doubles as the buffer table name, so the accumulated state
/// is addressable by any number of later readers.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateProgressiveView {
    /// Name of the view (and of its buffer table)
    pub name: String,
    /// The progressive select populating the view
    pub query: SelectProgressive,
}

/// Source table reference of a FROM clause.
///
/// Kept as raw name parts so that the compiler can reject qualified or
/// compound references with a compile-time error instead of a panic.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    /// Dot-separated name parts as parsed
    pub names: Vec<String>,
}

impl TableRef {
    /// Reference a single bare table
    pub fn table(name: impl Into<String>) -> Self {
        TableRef {
            names: vec![name.into()],
        }
    }

    /// The single bare name, if this reference has exactly one part
    pub fn simple(&self) -> Option<&str> {
        match self.names.as_slice() {
            [name] => Some(name.as_str()),
            _ => None,
        }
    }
}

/// One entry of a select list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// Simple column reference: `column_name`
    Column(String),
    /// Aliased column: `column_name AS alias`
    AliasedColumn { column: String, alias: String },
    /// Expression with optional alias: `expr [AS alias]`
    Expression { expr: Expr, alias: Option<String> },
    /// Wildcard selection: `*` (only valid when selecting from a view)
    Wildcard,
}

impl SelectItem {
    /// The alias under which this item surfaces, if it has one
    pub fn alias(&self) -> Option<&str> {
        match self {
            SelectItem::AliasedColumn { alias, .. } => Some(alias.as_str()),
            SelectItem::Expression {
                alias: Some(alias), ..
            } => Some(alias.as_str()),
            _ => None,
        }
    }
}

/// Expression node, shared by the input surface and the derived statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference
    Column(String),
    /// Literal value
    Literal(LiteralValue),
    /// Function call: `func_name(args...)`
    Function { name: String, args: Vec<Expr> },
    /// Binary operation: `expr op expr`
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    /// `FUTURE`-marked sub-expression (input surface only)
    Future(Box<Expr>),
    /// Positional statement parameter (derived statements only)
    Param,
    /// `CAST(expr AS type)` (derived statements only)
    Cast { expr: Box<Expr>, data_type: SqlType },
}

impl Expr {
    /// Column reference shorthand
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    /// Function call shorthand
    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    /// Binary operation shorthand
    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// `CAST(expr AS type)` shorthand
    pub fn cast(expr: Expr, data_type: SqlType) -> Self {
        Expr::Cast {
            expr: Box::new(expr),
            data_type,
        }
    }
}

/// Literal values appearing in queries.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
}

/// Binary operators recognized in WHERE clauses and emitted in derived SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,

    // Logical
    And,
    Or,
}

/// Generic column types for buffer DDL.
///
/// Drivers map these to dialect type names via
/// [`Driver::to_sql_type`](crate::trickledb::driver::Driver::to_sql_type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    BigInt,
    Real,
    Varchar(Option<u32>),
    Boolean,
}

/// One projected column of a derived select.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedColumn {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl ProjectedColumn {
    pub fn new(expr: Expr) -> Self {
        ProjectedColumn { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        ProjectedColumn {
            expr,
            alias: Some(alias.into()),
        }
    }
}

/// Derived SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlSelect {
    pub items: Vec<ProjectedColumn>,
    pub from: String,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
}

/// One column definition of a derived CREATE TABLE.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: SqlType,
}

/// Derived CREATE TABLE statement for buffer tables.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCreateTable {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Primary key columns; empty for keyless buffers
    pub primary_key: Vec<String>,
}

/// Derived DROP TABLE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlDropTable {
    pub name: String,
    pub if_exists: bool,
}

/// Additive-update clause of an upsert merge.
#[derive(Debug, Clone, PartialEq)]
pub struct OnConflict {
    /// Conflict target: the buffer's key columns
    pub keys: Vec<String>,
    /// `SET column = expr` assignments applied on conflict
    pub updates: Vec<(String, Expr)>,
}

/// Derived INSERT statement, optionally upserting.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlInsert {
    pub table: String,
    pub columns: Vec<String>,
    /// Value expressions, one per column (parameters for merge statements)
    pub values: Vec<Expr>,
    /// Upsert clause; `None` renders a plain insert
    pub on_conflict: Option<OnConflict>,
}

/// Any derived statement a driver can render.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlStatement {
    Select(SqlSelect),
    CreateTable(SqlCreateTable),
    DropTable(SqlDropTable),
    Insert(SqlInsert),
}
