/*!
# Generic SQL Connection Abstraction

The engine talks to row stores exclusively through [`SqlConnection`]: execute
a statement, or run a query and materialize its rows as
[`SqlValue`](super::value::SqlValue) cells. Everything above this trait is
store-agnostic; everything below it is one concrete client library.

[`SqliteConnection`] is the built-in implementation over `rusqlite`. Repeated
statements (the buffer's merge and read-back queries) go through the
connection's prepared-statement cache, so the per-partition hot path does not
re-parse SQL.
*/

use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::Connection;

use super::ast::SqlType;
use super::error::{SqlError, SqlResult};
use super::value::SqlValue;

/// A live connection to a SQL row store.
///
/// Implementations must be shareable across the statement worker and the
/// calling threads; interior locking is the implementation's concern.
pub trait SqlConnection: Send + Sync {
    /// Execute a statement that returns no rows (DDL, insert, upsert).
    ///
    /// Returns the number of affected rows where the store reports one.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> SqlResult<usize>;

    /// Run a query and eagerly materialize the full row set.
    fn query(&self, sql: &str, params: &[SqlValue]) -> SqlResult<Vec<Vec<SqlValue>>>;

    /// Run a query expected to produce a single row.
    fn query_row(&self, sql: &str, params: &[SqlValue]) -> SqlResult<Vec<SqlValue>> {
        let mut rows = self.query(sql, params)?;
        if rows.is_empty() {
            return Err(SqlError::execution(
                "query returned no rows",
                Some(sql.to_string()),
            ));
        }
        Ok(rows.remove(0))
    }

    /// Column names and generic types of a table, in declaration order.
    ///
    /// The plan compiler uses this to type buffer columns the way the
    /// original select would have surfaced them; the partition manager uses
    /// it to pick the numeric columns worth a min/max statistics scan.
    fn columns(&self, table: &str) -> SqlResult<Vec<(String, SqlType)>>;
}

/// `SqlConnection` over an embedded SQLite database.
pub struct SqliteConnection {
    conn: Mutex<Connection>,
}

impl SqliteConnection {
    /// Open an in-memory database.
    pub fn open_in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SqlError::execution(e.to_string(), None))?;
        Ok(SqliteConnection {
            conn: Mutex::new(conn),
        })
    }

    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> SqlResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| SqlError::execution(e.to_string(), None))?;
        Ok(SqliteConnection {
            conn: Mutex::new(conn),
        })
    }

    fn to_sqlite(value: &SqlValue) -> SqliteValue {
        match value {
            SqlValue::Null => SqliteValue::Null,
            SqlValue::Integer(i) => SqliteValue::Integer(*i),
            SqlValue::Float(f) => SqliteValue::Real(*f),
            SqlValue::Text(s) => SqliteValue::Text(s.clone()),
            SqlValue::Boolean(b) => SqliteValue::Integer(if *b { 1 } else { 0 }),
        }
    }

    fn from_sqlite(value: ValueRef<'_>) -> SqlValue {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Float(f),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(_) => SqlValue::Null,
        }
    }
}

impl SqlConnection for SqliteConnection {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> SqlResult<usize> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| SqlError::execution(e.to_string(), Some(sql.to_string())))?;
        let bound = params.iter().map(Self::to_sqlite);
        stmt.execute(rusqlite::params_from_iter(bound))
            .map_err(|e| SqlError::execution(e.to_string(), Some(sql.to_string())))
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> SqlResult<Vec<Vec<SqlValue>>> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| SqlError::execution(e.to_string(), Some(sql.to_string())))?;
        let column_count = stmt.column_count();
        let bound = params.iter().map(Self::to_sqlite);
        let mut rows = stmt
            .query(rusqlite::params_from_iter(bound))
            .map_err(|e| SqlError::execution(e.to_string(), Some(sql.to_string())))?;

        let mut results = Vec::new();
        loop {
            let row = rows
                .next()
                .map_err(|e| SqlError::execution(e.to_string(), Some(sql.to_string())))?;
            let Some(row) = row else { break };
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let cell = row
                    .get_ref(i)
                    .map_err(|e| SqlError::execution(e.to_string(), Some(sql.to_string())))?;
                cells.push(Self::from_sqlite(cell));
            }
            results.push(cells);
        }
        Ok(results)
    }

    fn columns(&self, table: &str) -> SqlResult<Vec<(String, SqlType)>> {
        let sql = format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\""));
        let rows = self.query(&sql, &[])?;
        if rows.is_empty() {
            return Err(SqlError::execution(
                format!("table not found: {}", table),
                Some(sql),
            ));
        }
        // table_info columns: cid, name, type, notnull, dflt_value, pk
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name = match row.get(1) {
                Some(SqlValue::Text(name)) => name.clone(),
                _ => continue,
            };
            let declared = match row.get(2) {
                Some(SqlValue::Text(ty)) => ty.to_uppercase(),
                _ => String::new(),
            };
            columns.push((name, decl_type(&declared)));
        }
        Ok(columns)
    }
}

fn decl_type(declared: &str) -> SqlType {
    if declared.contains("BIGINT") {
        SqlType::BigInt
    } else if declared.contains("INT") {
        SqlType::Integer
    } else if declared.contains("REAL")
        || declared.contains("FLOA")
        || declared.contains("DOUB")
    {
        SqlType::Real
    } else if declared.contains("BOOL") {
        SqlType::Boolean
    } else {
        SqlType::Varchar(None)
    }
}
