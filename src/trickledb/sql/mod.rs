// SQL layer for the progressive engine
// AST consumed by the plan compiler, derived statements rendered by drivers,
// runtime values and the generic connection abstraction

pub mod ast;
pub mod connection;
pub mod error;
pub mod value;

// Re-export main API
pub use ast::{CreateProgressiveView, Expr, ProgressiveQuery, SelectItem, SelectProgressive};
pub use connection::SqlConnection;
pub use error::{SqlError, SqlResult};
pub use value::SqlValue;
