/*!
# SQL Error Handling

Error types shared by the plan compiler, the buffer engine and the
progressive statements.

## Error Categories

- **Invalid Query**: the query shape cannot be compiled (FROM is not a single
  bare table, nested FUTURE markers, unknown field references)
- **Unsupported Operation**: the query uses a call shape outside the
  supported set, or requires a capability the buffer driver does not have
- **Execution Errors**: runtime failures from the underlying connection
  during partition queries, merges or read-backs
- **Meta Errors**: missing partition or column metadata for a table

Compile-time errors (`InvalidQuery`, `UnsupportedOperation`) are surfaced to
the caller and never retried. Execution errors terminate the statement's
worker and park the statement in a failed, observable state. Resource-release
errors during close are logged and swallowed.
*/

use std::fmt;

/// Errors raised while compiling or executing progressive queries.
///
/// Each variant carries the context needed for user-facing error reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlError {
    /// The query shape cannot be compiled into a progressive plan.
    InvalidQuery {
        /// Human-readable description of the rejected shape
        message: String,
    },

    /// The query requires an operation or capability outside the supported set.
    UnsupportedOperation {
        /// Description of the unsupported call or missing capability
        message: String,
    },

    /// Runtime failure from the underlying connection.
    ExecutionError {
        /// Description of the failure
        message: String,
        /// SQL text that caused the error, if available
        query: Option<String>,
    },

    /// Partition or column metadata is missing for a table.
    MetaError {
        /// Table whose metadata was requested
        table: String,
        /// Description of what was missing
        message: String,
    },
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlError::InvalidQuery { message } => {
                write!(f, "Invalid query: {}", message)
            }
            SqlError::UnsupportedOperation { message } => {
                write!(f, "Unsupported operation: {}", message)
            }
            SqlError::ExecutionError { message, query } => {
                if let Some(q) = query {
                    write!(f, "Execution error in '{}': {}", q, message)
                } else {
                    write!(f, "Execution error: {}", message)
                }
            }
            SqlError::MetaError { table, message } => {
                write!(f, "Metadata error for table '{}': {}", table, message)
            }
        }
    }
}

impl std::error::Error for SqlError {}

impl SqlError {
    /// Create an invalid-query error
    pub fn invalid_query(message: impl Into<String>) -> Self {
        SqlError::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        SqlError::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Create an execution error with the offending SQL text
    pub fn execution(message: impl Into<String>, query: Option<String>) -> Self {
        SqlError::ExecutionError {
            message: message.into(),
            query,
        }
    }

    /// Create a metadata error
    pub fn meta(table: impl Into<String>, message: impl Into<String>) -> Self {
        SqlError::MetaError {
            table: table.into(),
            message: message.into(),
        }
    }
}

/// Result type for SQL operations
pub type SqlResult<T> = Result<T, SqlError>;
