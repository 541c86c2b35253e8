//! Broadcast (materialized-view) statements.
//!
//! A [`ViewStatement`] runs the same partition loop as a plain select, but
//! instead of buffering batches it fans the just-completed partition id out
//! to a registry of listener channels. Each [`ViewSelectStatement`] owns an
//! independent read query against the shared buffer and its own single-slot
//! batch channel; a listener registering after partitions have already
//! completed is seeded with the most recent partition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::trickledb::buffer::{BufferReader, DataBuffer};
use crate::trickledb::driver::Driver;
use crate::trickledb::meta::Partition;
use crate::trickledb::plan::ExecutionPlan;
use crate::trickledb::sql::ast::SqlStatement;
use crate::trickledb::sql::connection::SqlConnection;
use crate::trickledb::sql::value::SqlValue;

use super::{
    BatchSlot, CancelToken, ProgressiveStatement, ResultBatch, StatementState,
};

/// Notification fanned out to view listeners after each merged partition.
#[derive(Debug, Clone, Copy)]
pub struct PartitionNotice {
    pub partition: u32,
    pub read_partitions: usize,
    pub progress: f64,
}

pub struct ViewStatement {
    inner: Arc<ViewInner>,
    plan: Arc<ExecutionPlan>,
    buffer_conn: Arc<dyn SqlConnection>,
    field_names: Vec<String>,
    handle: Handle,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct ViewInner {
    source: Arc<dyn SqlConnection>,
    buffer: DataBuffer,
    partitions: Vec<Partition>,
    source_sql: String,
    read_partitions: AtomicUsize,
    state: Mutex<StatementState>,
    cancel: CancelToken,
    listeners: Mutex<HashMap<u64, watch::Sender<Option<PartitionNotice>>>>,
    last_notice: Mutex<Option<PartitionNotice>>,
    next_listener: AtomicU64,
}

impl ViewInner {
    fn set_state(&self, state: StatementState) {
        let mut guard = self.state.lock().expect("view state lock poisoned");
        if *guard == StatementState::Closed {
            return;
        }
        debug!("view state: {:?} -> {:?}", *guard, state);
        *guard = state;
    }

    fn state(&self) -> StatementState {
        *self.state.lock().expect("view state lock poisoned")
    }

    fn publish(&self, notice: PartitionNotice) {
        *self
            .last_notice
            .lock()
            .expect("view last-notice lock poisoned") = Some(notice);
        let listeners = self.listeners.lock().expect("view listeners lock poisoned");
        debug!(
            "notifying {} listeners of partition {}",
            listeners.len(),
            notice.partition
        );
        for sender in listeners.values() {
            sender.send_replace(Some(notice));
        }
    }
}

impl ViewStatement {
    pub fn new(
        driver: Arc<dyn Driver>,
        source: Arc<dyn SqlConnection>,
        buffer_conn: Arc<dyn SqlConnection>,
        buffer: DataBuffer,
        plan: Arc<ExecutionPlan>,
        partitions: Vec<Partition>,
        handle: Handle,
    ) -> Self {
        let source_sql = driver.to_sql(&SqlStatement::Select(plan.source_query.clone()));
        let field_names = buffer.field_names().to_vec();
        ViewStatement {
            inner: Arc::new(ViewInner {
                source,
                buffer,
                partitions,
                source_sql,
                read_partitions: AtomicUsize::new(0),
                state: Mutex::new(StatementState::Created),
                cancel: CancelToken::new(),
                listeners: Mutex::new(HashMap::new()),
                last_notice: Mutex::new(None),
                next_listener: AtomicU64::new(0),
            }),
            plan,
            buffer_conn,
            field_names,
            handle,
            worker: Mutex::new(None),
        }
    }

    /// The view's compiled plan, consumed when rewriting selects over it.
    pub fn plan(&self) -> &Arc<ExecutionPlan> {
        &self.plan
    }

    /// Total number of partitions the view's worker consumes.
    pub fn partition_count(&self) -> usize {
        self.inner.partitions.len()
    }

    /// Connection holding the view's buffer table.
    pub fn buffer_conn(&self) -> Arc<dyn SqlConnection> {
        self.buffer_conn.clone()
    }

    /// Register a listener channel. Late joiners are seeded with the most
    /// recent partition notice.
    pub fn subscribe(&self) -> (u64, watch::Receiver<Option<PartitionNotice>>) {
        let seed = *self
            .inner
            .last_notice
            .lock()
            .expect("view last-notice lock poisoned");
        let (tx, rx) = watch::channel(seed);
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .expect("view listeners lock poisoned")
            .insert(id, tx);
        (id, rx)
    }

    /// Deregister a listener. The worker is unaffected.
    pub fn unsubscribe(&self, id: u64) {
        self.inner
            .listeners
            .lock()
            .expect("view listeners lock poisoned")
            .remove(&id);
    }
}

fn view_worker_loop(inner: Arc<ViewInner>) {
    let total = inner.partitions.len();

    for partition in &inner.partitions {
        if inner.cancel.is_cancelled() {
            break;
        }

        inner.set_state(StatementState::Querying);
        info!("view query next partition: {}", partition.id);
        let rows = match inner.source.query(
            &inner.source_sql,
            &[SqlValue::Integer(partition.id as i64)],
        ) {
            Ok(rows) => rows,
            Err(e) => {
                error!("progressive view failed while querying: {}", e);
                inner.set_state(StatementState::Failed);
                return;
            }
        };

        inner.set_state(StatementState::Merging);
        if let Err(e) = inner.buffer.add(&rows, &inner.cancel) {
            error!("progressive view failed while merging: {}", e);
            inner.set_state(StatementState::Failed);
            return;
        }
        if inner.cancel.is_cancelled() {
            break;
        }

        let read = inner.read_partitions.fetch_add(1, Ordering::SeqCst) + 1;
        let progress = read as f64 / total as f64;

        inner.set_state(StatementState::Refreshing);
        inner.publish(PartitionNotice {
            partition: partition.id,
            read_partitions: read,
            progress,
        });
    }

    if inner.cancel.is_cancelled() {
        inner.set_state(StatementState::Closed);
    } else {
        info!("progressive view done, {} partitions merged", total);
        inner.set_state(StatementState::Done);
    }
}

#[async_trait]
impl ProgressiveStatement for ViewStatement {
    fn run(&self) {
        let mut worker = self.worker.lock().expect("view worker lock poisoned");
        if worker.is_some() {
            return;
        }
        self.inner.set_state(StatementState::Running);
        let inner = self.inner.clone();
        *worker = Some(self.handle.spawn_blocking(move || view_worker_loop(inner)));
    }

    async fn result_set(&self) -> Option<ResultBatch> {
        // views deliver through their listeners, never directly
        None
    }

    fn field_names(&self) -> Vec<String> {
        self.field_names.clone()
    }

    fn state(&self) -> StatementState {
        self.inner.state()
    }

    fn is_done(&self) -> bool {
        // a view is immediately usable: readers attach at any time
        true
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
        self.inner.buffer.close();
    }
}

/// A select over a registered progressive view.
///
/// Owns an independent scaled read query against the view's shared buffer;
/// refreshes whenever the view notifies its listeners.
pub struct ViewSelectStatement {
    view: Arc<ViewStatement>,
    inner: Arc<ViewSelectInner>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<ResultBatch>>,
    task: Mutex<Option<JoinHandle<()>>>,
    listener_id: Mutex<Option<u64>>,
    handle: Handle,
}

struct ViewSelectInner {
    reader: Arc<BufferReader>,
    slot: BatchSlot,
    cancel: CancelToken,
    field_names: Vec<String>,
}

impl ViewSelectStatement {
    pub fn new(view: Arc<ViewStatement>, reader: BufferReader, handle: Handle) -> Self {
        let field_names = reader.field_names().to_vec();
        let (slot, receiver) = BatchSlot::new(view.partition_count());
        ViewSelectStatement {
            view,
            inner: Arc::new(ViewSelectInner {
                reader: Arc::new(reader),
                slot,
                cancel: CancelToken::new(),
                field_names,
            }),
            receiver: tokio::sync::Mutex::new(receiver),
            task: Mutex::new(None),
            listener_id: Mutex::new(None),
            handle,
        }
    }
}

async fn listener_loop(
    inner: Arc<ViewSelectInner>,
    mut rx: watch::Receiver<Option<PartitionNotice>>,
) {
    loop {
        // the current value covers both fresh notices and the late-join seed
        let notice = *rx.borrow_and_update();
        if let Some(notice) = notice {
            let reader = inner.reader.clone();
            let read = tokio::task::spawn_blocking(move || {
                reader.get(notice.partition, notice.progress)
            })
            .await;
            match read {
                Ok(Ok(rows)) => {
                    inner.slot.publish(ResultBatch {
                        columns: inner.field_names.clone(),
                        rows,
                        partition: notice.partition,
                        progress: notice.progress,
                    });
                }
                Ok(Err(e)) => {
                    error!("view listener read failed: {}", e);
                    inner.cancel.cancel();
                    inner.slot.wake();
                    return;
                }
                Err(join_error) => {
                    error!("view listener read task failed: {}", join_error);
                    inner.cancel.cancel();
                    inner.slot.wake();
                    return;
                }
            }
        }

        if rx.changed().await.is_err() {
            // view worker dropped its listener registry
            inner.slot.wake();
            return;
        }
    }
}

#[async_trait]
impl ProgressiveStatement for ViewSelectStatement {
    fn run(&self) {
        let mut task = self.task.lock().expect("listener task lock poisoned");
        if task.is_some() {
            return;
        }
        let (id, rx) = self.view.subscribe();
        *self
            .listener_id
            .lock()
            .expect("listener id lock poisoned") = Some(id);
        let inner = self.inner.clone();
        *task = Some(self.handle.spawn(listener_loop(inner, rx)));
    }

    async fn result_set(&self) -> Option<ResultBatch> {
        let mut rx = self.receiver.lock().await;
        let inner = self.inner.clone();
        self.inner
            .slot
            .next(&mut rx, move || inner.cancel.is_cancelled())
            .await
    }

    fn field_names(&self) -> Vec<String> {
        self.inner.field_names.clone()
    }

    fn state(&self) -> StatementState {
        if self.inner.cancel.is_cancelled() {
            StatementState::Closed
        } else if self.task.lock().expect("listener task lock poisoned").is_some() {
            StatementState::Running
        } else {
            StatementState::Created
        }
    }

    fn is_done(&self) -> bool {
        // a view select never completes; readers poll for as long as they care
        false
    }

    fn read_partitions(&self) -> usize {
        self.view.read_partitions()
    }

    fn progress(&self) -> f64 {
        self.view.progress()
    }

    fn close(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        if let Some(id) = self
            .listener_id
            .lock()
            .expect("listener id lock poisoned")
            .take()
        {
            self.view.unsubscribe(id);
        }
        if let Some(task) = self.task.lock().expect("listener task lock poisoned").take() {
            task.abort();
        }
        self.inner.cancel.cancel();
        self.inner.slot.wake();
    }
}
