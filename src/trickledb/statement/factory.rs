//! Statement factory: compiles queries, owns the view registry and the
//! task-scheduling context.
//!
//! Routing: a progressive select whose FROM names a registered view becomes
//! a [`ViewSelectStatement`] over the shared buffer; everything else
//! compiles a fresh plan against the metadata store's partitions. View names
//! are case-insensitive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;
use tokio::runtime::Handle;

use crate::trickledb::buffer::{BufferReader, DataBuffer};
use crate::trickledb::config::EngineConfig;
use crate::trickledb::driver::Driver;
use crate::trickledb::meta::{MetaStore, Partition};
use crate::trickledb::plan::PlanCompiler;
use crate::trickledb::sql::ast::{CreateProgressiveView, ProgressiveQuery, SelectProgressive};
use crate::trickledb::sql::connection::SqlConnection;
use crate::trickledb::sql::error::{SqlError, SqlResult};

use super::select::SelectStatement;
use super::view::{ViewSelectStatement, ViewStatement};
use super::ProgressiveStatement;

pub struct StatementFactory {
    source_driver: Arc<dyn Driver>,
    buffer_driver: Arc<dyn Driver>,
    meta: Arc<dyn MetaStore>,
    compiler: PlanCompiler,
    config: EngineConfig,
    handle: Handle,
    views: Mutex<HashMap<String, Arc<ViewStatement>>>,
}

impl StatementFactory {
    pub fn new(
        source_driver: Arc<dyn Driver>,
        buffer_driver: Arc<dyn Driver>,
        meta: Arc<dyn MetaStore>,
        handle: Handle,
    ) -> Self {
        Self::with_config(source_driver, buffer_driver, meta, handle, EngineConfig::default())
    }

    pub fn with_config(
        source_driver: Arc<dyn Driver>,
        buffer_driver: Arc<dyn Driver>,
        meta: Arc<dyn MetaStore>,
        handle: Handle,
        config: EngineConfig,
    ) -> Self {
        let compiler = PlanCompiler::with_config(
            source_driver.clone(),
            buffer_driver.clone(),
            config.clone(),
        );
        StatementFactory {
            source_driver,
            buffer_driver,
            meta,
            compiler,
            config,
            handle,
            views: Mutex::new(HashMap::new()),
        }
    }

    /// Compile and wire up any progressive query.
    pub fn prepare(
        &self,
        source_conn: Arc<dyn SqlConnection>,
        buffer_conn: Arc<dyn SqlConnection>,
        query: &ProgressiveQuery,
    ) -> SqlResult<Arc<dyn ProgressiveStatement>> {
        match query {
            ProgressiveQuery::Select(select) => {
                self.prepare_select(source_conn, buffer_conn, select)
            }
            ProgressiveQuery::CreateView(view) => {
                let statement: Arc<dyn ProgressiveStatement> =
                    self.prepare_view(source_conn, buffer_conn, view)?;
                Ok(statement)
            }
        }
    }

    /// Compile a progressive select, routing view reads to the shared
    /// buffer of a registered view.
    pub fn prepare_select(
        &self,
        source_conn: Arc<dyn SqlConnection>,
        buffer_conn: Arc<dyn SqlConnection>,
        select: &SelectProgressive,
    ) -> SqlResult<Arc<dyn ProgressiveStatement>> {
        if let Some(from) = select.from.simple() {
            let registered = self
                .views
                .lock()
                .expect("view registry lock poisoned")
                .get(&from.to_uppercase())
                .cloned();
            if let Some(view) = registered {
                info!("preparing select over progressive view {}", from);
                let read_plan = self.compiler.compile_view_select(view.plan(), select)?;
                let reader = BufferReader::new(
                    self.buffer_driver.as_ref(),
                    view.buffer_conn(),
                    read_plan,
                    self.config.confidence_level,
                );
                return Ok(Arc::new(ViewSelectStatement::new(
                    view,
                    reader,
                    self.handle.clone(),
                )));
            }
        }

        info!("preparing progressive select");
        let plan = Arc::new(
            self.compiler
                .compile_select(source_conn.as_ref(), self.meta.as_ref(), select)?,
        );
        let partitions = self.partitions_for(&plan.source_table)?;
        let buffer = DataBuffer::open(
            self.buffer_driver.as_ref(),
            buffer_conn,
            plan,
            self.config.confidence_level,
        )?;
        Ok(Arc::new(SelectStatement::new(
            self.source_driver.clone(),
            source_conn,
            buffer,
            partitions,
            self.handle.clone(),
        )))
    }

    /// Compile a `CREATE PROGRESSIVE VIEW` and register it. The returned
    /// statement drives the shared buffer; readers attach through
    /// [`Self::prepare_select`].
    pub fn prepare_view(
        &self,
        source_conn: Arc<dyn SqlConnection>,
        buffer_conn: Arc<dyn SqlConnection>,
        view: &CreateProgressiveView,
    ) -> SqlResult<Arc<ViewStatement>> {
        let key = view.name.to_uppercase();
        if self
            .views
            .lock()
            .expect("view registry lock poisoned")
            .contains_key(&key)
        {
            return Err(SqlError::invalid_query(format!(
                "view already exists: {}",
                view.name
            )));
        }

        info!("preparing progressive view {}", view.name);
        let plan = Arc::new(
            self.compiler
                .compile_view(source_conn.as_ref(), self.meta.as_ref(), view)?,
        );
        let partitions = self.partitions_for(&plan.source_table)?;
        let buffer = DataBuffer::open(
            self.buffer_driver.as_ref(),
            buffer_conn.clone(),
            plan.clone(),
            self.config.confidence_level,
        )?;
        let statement = Arc::new(ViewStatement::new(
            self.source_driver.clone(),
            source_conn,
            buffer_conn,
            buffer,
            plan,
            partitions,
            self.handle.clone(),
        ));
        self.views
            .lock()
            .expect("view registry lock poisoned")
            .insert(key, statement.clone());
        Ok(statement)
    }

    /// Deregister and close a progressive view. Returns whether it existed.
    pub fn remove_view(&self, name: &str) -> bool {
        let removed = self
            .views
            .lock()
            .expect("view registry lock poisoned")
            .remove(&name.to_uppercase());
        match removed {
            Some(statement) => {
                statement.close();
                true
            }
            None => false,
        }
    }

    fn partitions_for(&self, table: &str) -> SqlResult<Vec<Partition>> {
        let partitions = self.meta.partitions(table);
        if partitions.is_empty() {
            return Err(SqlError::meta(
                table,
                "table has no recorded partitions, run the partition manager first",
            ));
        }
        Ok(partitions)
    }
}
