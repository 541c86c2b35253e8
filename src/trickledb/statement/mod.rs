/*!
# Progressive Statements

The execution engine: one background worker per statement drives partition
consumption against a compiled plan and its buffer, publishing successive
result batches.

## State machine

`Created -> Running -> {Querying, Merging, Refreshing}* -> Done`, with
`Closed` reachable from any state via cancellation and `Failed` as the
terminal observable state of an execution error.

## Delivery

Batches travel over a bounded channel sized to the partition count, so the
worker never blocks on a slow consumer and each batch is delivered at most
once. Blocked consumers are woken by batch publication, completion, failure
or close - never left hanging.

## Modes

- [`SelectStatement`]: single polling consumer
- [`ViewStatement`] + [`ViewSelectStatement`]: broadcast mode for shared
  materialized views; an explicit registry of listener channels is fanned
  out to on every refresh, and late joiners are seeded with the most recent
  partition
*/

pub mod factory;
pub mod select;
pub mod view;

pub use factory::StatementFactory;
pub use select::SelectStatement;
pub use view::{PartitionNotice, ViewSelectStatement, ViewStatement};

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::warn;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::Notify;

use super::sql::value::SqlValue;

/// Lifecycle state of a progressive statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// Compiled, not yet running
    Created,
    /// Worker scheduled
    Running,
    /// Executing the source query of the current partition
    Querying,
    /// Streaming partition rows into the buffer
    Merging,
    /// Reading a scaled batch back from the buffer
    Refreshing,
    /// Every partition merged and published
    Done,
    /// Execution error; no further batches will arrive
    Failed,
    /// Cancelled
    Closed,
}

impl StatementState {
    /// States after which no further batch can arrive.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StatementState::Done | StatementState::Failed | StatementState::Closed
        )
    }
}

/// Cancellation flag shared between a statement, its worker and its buffer.
///
/// Checked between partitions and between merged rows; never mid-statement.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One progressive result batch.
#[derive(Debug, Clone)]
pub struct ResultBatch {
    /// Output column names, original aliases preserved
    pub columns: Vec<String>,
    /// Decoded rows at this progress point
    pub rows: Vec<Vec<SqlValue>>,
    /// Partition whose merge produced this batch
    pub partition: u32,
    /// Progress fraction the batch was scaled with
    pub progress: f64,
}

/// Bounded batch channel between a worker and its consumer.
///
/// Sized to the statement's partition count, so the worker publishes
/// without ever blocking; `next` hands each published batch out exactly
/// once and returns `None` once the statement is terminal with nothing
/// pending.
pub(crate) struct BatchSlot {
    tx: mpsc::Sender<ResultBatch>,
    events: Notify,
}

impl BatchSlot {
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<ResultBatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            BatchSlot {
                tx,
                events: Notify::new(),
            },
            rx,
        )
    }

    pub(crate) fn publish(&self, batch: ResultBatch) {
        if self.tx.try_send(batch).is_err() {
            // capacity covers one batch per partition; overflow means the
            // consumer abandoned the statement without closing it
            warn!("dropping progressive batch: channel full or closed");
        }
    }

    /// Wake a blocked consumer so it re-evaluates the terminal condition.
    pub(crate) fn wake(&self) {
        self.events.notify_one();
    }

    pub(crate) async fn next(
        &self,
        rx: &mut mpsc::Receiver<ResultBatch>,
        terminal: impl Fn() -> bool,
    ) -> Option<ResultBatch> {
        loop {
            match rx.try_recv() {
                Ok(batch) => return Some(batch),
                Err(TryRecvError::Empty) => {
                    if terminal() {
                        return None;
                    }
                    tokio::select! {
                        received = rx.recv() => return received,
                        _ = self.events.notified() => {}
                    }
                }
                Err(TryRecvError::Disconnected) => return None,
            }
        }
    }
}

/// Common surface of all progressive statements.
///
/// `run` schedules the background worker; `result_set` suspends until the
/// next batch or a terminal state; the polling getters are safe to call
/// concurrently.
#[async_trait]
pub trait ProgressiveStatement: Send + Sync {
    /// Schedule the statement's background worker. Idempotent.
    fn run(&self);

    /// Await the next unseen batch; `None` once the statement is terminal.
    async fn result_set(&self) -> Option<ResultBatch>;

    /// Output column names of every batch.
    fn field_names(&self) -> Vec<String>;

    /// Current lifecycle state.
    fn state(&self) -> StatementState;

    /// True once every partition has been merged and published.
    fn is_done(&self) -> bool;

    /// Number of partitions merged so far.
    fn read_partitions(&self) -> usize;

    /// `read_partitions / total_partitions`.
    fn progress(&self) -> f64;

    /// Cancel the statement and release its resources. Idempotent.
    fn close(&self);
}
