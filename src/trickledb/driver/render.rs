//! ANSI rendering of derived statements, shared by the dialects.
//!
//! The only dialect knobs are placeholder syntax (`?` vs `$n`) and the type
//! names supplied by the owning driver.

use super::Driver;
use crate::trickledb::sql::ast::{
    BinaryOperator, Expr, LiteralValue, SqlCreateTable, SqlDropTable, SqlInsert, SqlSelect,
    SqlStatement,
};

pub(crate) struct Renderer<'a> {
    driver: &'a dyn Driver,
    numbered_params: bool,
    next_param: usize,
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(driver: &'a dyn Driver, numbered_params: bool) -> Self {
        Renderer {
            driver,
            numbered_params,
            next_param: 1,
        }
    }

    pub(crate) fn statement(&mut self, statement: &SqlStatement) -> String {
        match statement {
            SqlStatement::Select(select) => self.select(select),
            SqlStatement::CreateTable(create) => self.create_table(create),
            SqlStatement::DropTable(drop) => self.drop_table(drop),
            SqlStatement::Insert(insert) => self.insert(insert),
        }
    }

    fn select(&mut self, select: &SqlSelect) -> String {
        let items = select
            .items
            .iter()
            .map(|item| match &item.alias {
                Some(alias) => format!("{} AS {}", self.expr(&item.expr), quote(alias)),
                None => self.expr(&item.expr),
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("SELECT {} FROM {}", items, quote(&select.from));
        if let Some(where_clause) = &select.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&self.expr(where_clause));
        }
        if !select.group_by.is_empty() {
            let groups = select
                .group_by
                .iter()
                .map(|g| self.expr(g))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" GROUP BY ");
            sql.push_str(&groups);
        }
        sql
    }

    fn create_table(&mut self, create: &SqlCreateTable) -> String {
        let mut defs = create
            .columns
            .iter()
            .map(|c| format!("{} {}", quote(&c.name), self.driver.to_sql_type(&c.data_type)))
            .collect::<Vec<_>>();
        if !create.primary_key.is_empty() {
            let keys = create
                .primary_key
                .iter()
                .map(|k| quote(k))
                .collect::<Vec<_>>()
                .join(", ");
            defs.push(format!("PRIMARY KEY ({})", keys));
        }
        format!("CREATE TABLE {} ({})", quote(&create.name), defs.join(", "))
    }

    fn drop_table(&mut self, drop: &SqlDropTable) -> String {
        if drop.if_exists {
            format!("DROP TABLE IF EXISTS {}", quote(&drop.name))
        } else {
            format!("DROP TABLE {}", quote(&drop.name))
        }
    }

    fn insert(&mut self, insert: &SqlInsert) -> String {
        let columns = insert
            .columns
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let values = insert
            .values
            .iter()
            .map(|v| self.expr(v))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(&insert.table),
            columns,
            values
        );

        if let Some(upsert) = &insert.on_conflict {
            let keys = upsert
                .keys
                .iter()
                .map(|k| quote(k))
                .collect::<Vec<_>>()
                .join(", ");
            let updates = upsert
                .updates
                .iter()
                .map(|(column, value)| format!("{} = {}", quote(column), self.expr(value)))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                keys, updates
            ));
        }
        sql
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Column(name) => quote(name),
            Expr::Literal(literal) => literal_sql(literal),
            Expr::Function { name, args } => {
                let rendered = args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({})", name, rendered)
            }
            Expr::BinaryOp { left, op, right } => {
                format!("({} {} {})", self.expr(left), op_sql(*op), self.expr(right))
            }
            Expr::Cast { expr, data_type } => {
                format!(
                    "CAST({} AS {})",
                    self.expr(expr),
                    self.driver.to_sql_type(data_type)
                )
            }
            Expr::Param => {
                if self.numbered_params {
                    let n = self.next_param;
                    self.next_param += 1;
                    format!("${}", n)
                } else {
                    "?".to_string()
                }
            }
            // Future markers never survive compilation; rendering one is a
            // compiler bug surfaced loudly in the generated SQL
            Expr::Future(inner) => format!("/* future */ {}", self.expr(inner)),
        }
    }
}

/// Quote a (possibly dotted) identifier. `*` passes through unquoted.
pub(crate) fn quote(name: &str) -> String {
    if name == "*" {
        return name.to_string();
    }
    name.split('.')
        .map(|part| {
            if part == "*" {
                part.to_string()
            } else {
                format!("\"{}\"", part.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn literal_sql(literal: &LiteralValue) -> String {
    match literal {
        LiteralValue::String(s) => format!("'{}'", s.replace('\'', "''")),
        LiteralValue::Integer(i) => i.to_string(),
        LiteralValue::Float(f) => f.to_string(),
        LiteralValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        LiteralValue::Null => "NULL".to_string(),
    }
}

fn op_sql(op: BinaryOperator) -> &'static str {
    match op {
        BinaryOperator::Add => "+",
        BinaryOperator::Subtract => "-",
        BinaryOperator::Multiply => "*",
        BinaryOperator::Divide => "/",
        BinaryOperator::Equal => "=",
        BinaryOperator::NotEqual => "<>",
        BinaryOperator::LessThan => "<",
        BinaryOperator::LessThanOrEqual => "<=",
        BinaryOperator::GreaterThan => ">",
        BinaryOperator::GreaterThanOrEqual => ">=",
        BinaryOperator::And => "AND",
        BinaryOperator::Or => "OR",
    }
}
