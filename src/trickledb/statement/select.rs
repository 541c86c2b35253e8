//! Single-consumer progressive select statement.
//!
//! One blocking worker iterates the partitions in ascending id order:
//! source query, merge into the buffer, recompute progress, publish the
//! refreshed batch. The consumer awaits batches through
//! [`SelectStatement::result_set`]; cancellation is checked between
//! partitions only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::trickledb::buffer::DataBuffer;
use crate::trickledb::driver::Driver;
use crate::trickledb::meta::Partition;
use crate::trickledb::sql::ast::SqlStatement;
use crate::trickledb::sql::connection::SqlConnection;
use crate::trickledb::sql::value::SqlValue;

use super::{
    BatchSlot, CancelToken, ProgressiveStatement, ResultBatch, StatementState,
};

pub struct SelectStatement {
    inner: Arc<SelectInner>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<ResultBatch>>,
    handle: Handle,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct SelectInner {
    source: Arc<dyn SqlConnection>,
    buffer: DataBuffer,
    partitions: Vec<Partition>,
    source_sql: String,
    read_partitions: AtomicUsize,
    state: Mutex<StatementState>,
    cancel: CancelToken,
    slot: BatchSlot,
}

impl SelectInner {
    fn set_state(&self, state: StatementState) {
        let mut guard = self.state.lock().expect("statement state lock poisoned");
        // a closed statement stays closed
        if *guard == StatementState::Closed {
            return;
        }
        debug!("statement state: {:?} -> {:?}", *guard, state);
        *guard = state;
    }

    fn state(&self) -> StatementState {
        *self.state.lock().expect("statement state lock poisoned")
    }

    fn fail(&self, context: &str, error: &crate::trickledb::sql::error::SqlError) {
        error!("progressive statement failed while {}: {}", context, error);
        self.set_state(StatementState::Failed);
        self.slot.wake();
    }
}

impl SelectStatement {
    pub fn new(
        driver: Arc<dyn Driver>,
        source: Arc<dyn SqlConnection>,
        buffer: DataBuffer,
        partitions: Vec<Partition>,
        handle: Handle,
    ) -> Self {
        let source_sql =
            driver.to_sql(&SqlStatement::Select(buffer.plan().source_query.clone()));
        let (slot, receiver) = BatchSlot::new(partitions.len());
        SelectStatement {
            inner: Arc::new(SelectInner {
                source,
                buffer,
                partitions,
                source_sql,
                read_partitions: AtomicUsize::new(0),
                state: Mutex::new(StatementState::Created),
                cancel: CancelToken::new(),
                slot,
            }),
            receiver: tokio::sync::Mutex::new(receiver),
            handle,
            worker: Mutex::new(None),
        }
    }

    /// Total number of partitions this statement will consume.
    pub fn partition_count(&self) -> usize {
        self.inner.partitions.len()
    }
}

fn worker_loop(inner: Arc<SelectInner>) {
    let total = inner.partitions.len();
    let columns: Vec<String> = inner.buffer.field_names().to_vec();

    for partition in &inner.partitions {
        if inner.cancel.is_cancelled() {
            break;
        }

        inner.set_state(StatementState::Querying);
        info!("query next partition: {}", partition.id);
        let rows = match inner.source.query(
            &inner.source_sql,
            &[SqlValue::Integer(partition.id as i64)],
        ) {
            Ok(rows) => rows,
            Err(e) => return inner.fail("querying partition", &e),
        };

        inner.set_state(StatementState::Merging);
        if let Err(e) = inner.buffer.add(&rows, &inner.cancel) {
            return inner.fail("merging partition", &e);
        }
        // a merge interrupted by close must not count as read
        if inner.cancel.is_cancelled() {
            break;
        }

        let read = inner.read_partitions.fetch_add(1, Ordering::SeqCst) + 1;
        let progress = read as f64 / total as f64;

        inner.set_state(StatementState::Refreshing);
        match inner.buffer.get(partition.id, progress) {
            Ok(batch_rows) => {
                debug!(
                    "publishing batch for partition {} at progress {:.3}",
                    partition.id, progress
                );
                inner.slot.publish(ResultBatch {
                    columns: columns.clone(),
                    rows: batch_rows,
                    partition: partition.id,
                    progress,
                });
            }
            Err(e) => return inner.fail("refreshing results", &e),
        }
    }

    if inner.cancel.is_cancelled() {
        inner.set_state(StatementState::Closed);
    } else {
        info!("progressive statement done, {} partitions merged", total);
        inner.set_state(StatementState::Done);
    }
    inner.slot.wake();
}

#[async_trait]
impl ProgressiveStatement for SelectStatement {
    fn run(&self) {
        let mut worker = self.worker.lock().expect("statement worker lock poisoned");
        if worker.is_some() {
            return;
        }
        self.inner.set_state(StatementState::Running);
        let inner = self.inner.clone();
        *worker = Some(self.handle.spawn_blocking(move || worker_loop(inner)));
    }

    async fn result_set(&self) -> Option<ResultBatch> {
        let mut rx = self.receiver.lock().await;
        let inner = self.inner.clone();
        self.inner
            .slot
            .next(&mut rx, move || {
                inner.cancel.is_cancelled() || inner.state().is_terminal()
            })
            .await
    }

    fn field_names(&self) -> Vec<String> {
        self.inner.buffer.field_names().to_vec()
    }

    fn state(&self) -> StatementState {
        self.inner.state()
    }

    fn is_done(&self) -> bool {
        self.inner.read_partitions.load(Ordering::SeqCst) == self.inner.partitions.len()
    }

    fn read_partitions(&self) -> usize {
        self.inner.read_partitions.load(Ordering::SeqCst)
    }

    fn progress(&self) -> f64 {
        let total = self.inner.partitions.len();
        if total == 0 {
            return 0.0;
        }
        self.inner.read_partitions.load(Ordering::SeqCst) as f64 / total as f64
    }

    fn close(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.set_state(StatementState::Closed);
        self.inner.cancel.cancel();
        self.inner.slot.wake();
        self.inner.buffer.close();
    }
}
