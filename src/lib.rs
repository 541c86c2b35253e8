//! # trickledb
//!
//! Progressive approximate query processing on top of partitioned SQL row
//! stores. A query tagged progressive is answered as a sequence of
//! increasingly accurate result batches: the source table is pre-split into
//! ordered partitions, and every scanned partition is merged into a running
//! accumulator from which extrapolated full-table estimates are read back.
//!
//! ## Features
//!
//! - **Plan compilation**: one aggregate SELECT is rewritten into a
//!   per-partition source query, an additive upsert merge, and a
//!   progress-scaled read-back query
//! - **Partition management**: tables are split into balanced partitions with
//!   native list partitioning or a materialized-copy strategy
//! - **Progressive statements**: one background worker per statement drives
//!   partition consumption and publishes batches over single-slot channels
//! - **Materialized views**: `CREATE PROGRESSIVE VIEW` shares one buffer
//!   across any number of independently reading listeners
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use trickledb::trickledb::driver::SqliteDriver;
//! use trickledb::trickledb::meta::MemoryMetaStore;
//! use trickledb::trickledb::partition::PartitionManager;
//! use trickledb::trickledb::sql::connection::SqliteConnection;
//! use trickledb::trickledb::statement::StatementFactory;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = Arc::new(SqliteDriver::new());
//!     let meta = Arc::new(MemoryMetaStore::new());
//!     let conn = SqliteConnection::open_in_memory()?;
//!
//!     // offline phase: split the source table
//!     let manager = PartitionManager::new(driver.clone());
//!     manager.prepare_table(&conn, "orders", meta.as_ref(), 100_000)?;
//!
//!     // online phase: a StatementFactory compiles and runs progressive
//!     // queries against the recorded partitions
//!     let _factory = StatementFactory::new(
//!         driver.clone(),
//!         driver,
//!         meta,
//!         tokio::runtime::Handle::current(),
//!     );
//!     Ok(())
//! }
//! ```

pub mod trickledb;

// Re-export main API at crate root for easy access
pub use trickledb::driver::{Driver, DriverCapabilities, PostgresDriver, SqliteDriver};
pub use trickledb::meta::{ColumnStats, MemoryMetaStore, MetaStore, Partition};
pub use trickledb::partition::PartitionManager;
pub use trickledb::plan::{ExecutionPlan, MetaField, PlanCompiler};
pub use trickledb::sql::error::{SqlError, SqlResult};
pub use trickledb::sql::value::SqlValue;
pub use trickledb::statement::{ProgressiveStatement, StatementFactory, StatementState};
