// Progressive SQL engine modules
// Compiles aggregate selects into partitioned incremental execution plans

pub mod buffer;
pub mod config;
pub mod driver;
pub mod meta;
pub mod partition;
pub mod plan;
pub mod sql;
pub mod statement;

// Re-export main API
pub use buffer::DataBuffer;
pub use config::EngineConfig;
pub use driver::{Driver, DriverCapabilities};
pub use meta::{MetaStore, Partition};
pub use plan::{ExecutionPlan, MetaField, PlanCompiler};
pub use sql::error::{SqlError, SqlResult};
pub use statement::{ProgressiveStatement, StatementFactory};
