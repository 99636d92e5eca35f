//! Single-flight task admission and execution.
//!
//! ```text
//! add_task ─► known op? ─► slot free? ─► legal now? ─► spawn_blocking(run)
//!                │             │             │                 │
//!          UnknownOperation   Busy    IllegalForState   complete / failed
//! ```
//! At most one task is unsettled at a time. The slot is claimed under the
//! book lock, so of two concurrent submissions exactly one wins.

use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;

use super::book::{Task, TaskBook};
use crate::error::{AdmissionError, InfrastructureError, TaskError};
use crate::state_machine::State;

/// What the executor needs from the thing it runs tasks against.
pub trait TaskBody: Send + Sync + 'static {
    /// Every operation the kind declares.
    fn operations(&self) -> &[&'static str];

    fn current_state(&self) -> State;

    /// Triggers legal from the current state.
    fn valid_triggers(&self) -> BTreeSet<&'static str>;

    /// Runs the task to completion on a worker thread.
    fn run(&self, task: &Task) -> Result<(), InfrastructureError>;

    /// Called after `run` failed or panicked.
    fn abandon(&self, _task: &Task, _reason: &str) {}
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

pub struct Executor<B> {
    body: Arc<B>,
    book: Arc<Mutex<TaskBook>>,
    settled: Arc<watch::Sender<u64>>,
    handle: Handle,
}

impl<B: TaskBody> Executor<B> {
    pub fn new(body: Arc<B>, handle: Handle) -> Self {
        let (settled, _) = watch::channel(0);
        Self {
            body,
            book: Arc::new(Mutex::new(TaskBook::default())),
            settled: Arc::new(settled),
            handle,
        }
    }

    /// Admits `operation` and schedules it. Returns the task id.
    ///
    /// The task record is created before any check so its id exists even for
    /// rejected submissions; only an `IllegalForState` rejection keeps it, as
    /// a `failed` current task.
    pub fn add_task(&self, operation: &str, parameters: Value) -> Result<String, AdmissionError> {
        let task = Task::new(operation, parameters);

        let operations = self.body.operations();
        if !operations.contains(&operation) {
            tracing::warn!(operation, "unknown operation");
            return Err(AdmissionError::UnknownOperation {
                operation: operation.to_string(),
                allowed: operations.to_vec(),
            });
        }

        let id = task.id.clone();
        self.book.lock().install(task.clone()).inspect_err(|err| {
            tracing::debug!(operation, error = %err, "task rejected");
        })?;

        if !self.body.valid_triggers().contains(operation) {
            let state = self.body.current_state();
            let err = AdmissionError::IllegalForState {
                operation: operation.to_string(),
                state,
            };
            if let Some(current) = self.book.lock().current_mut(&id) {
                current.fail(err.to_string());
            }
            self.settled.send_modify(|n| *n += 1);
            tracing::warn!(task_id = %id, operation, state, "operation invalid from current state");
            return Err(err);
        }

        tracing::info!(task_id = %id, operation, "task admitted");
        self.spawn(task);
        Ok(id)
    }

    fn spawn(&self, task: Task) {
        let body = Arc::clone(&self.body);
        let book = Arc::clone(&self.book);
        let settled = Arc::clone(&self.settled);

        self.handle.spawn_blocking(move || {
            let outcome = match catch_unwind(AssertUnwindSafe(|| body.run(&task))) {
                Ok(result) => result,
                Err(payload) => Err(InfrastructureError::Panicked {
                    operation: task.operation.clone(),
                    message: panic_message(payload),
                }),
            };

            match outcome {
                Ok(()) => {
                    if let Some(current) = book.lock().current_mut(&task.id) {
                        current.complete();
                    }
                    tracing::info!(task_id = %task.id, operation = %task.operation, "task complete");
                }
                Err(err) => {
                    let reason = err.to_string();
                    if let Some(current) = book.lock().current_mut(&task.id) {
                        current.fail(reason.clone());
                    }
                    tracing::error!(
                        task_id = %task.id,
                        operation = %task.operation,
                        error = %reason,
                        "task failed in executor"
                    );
                    body.abandon(&task, &reason);
                }
            }
            settled.send_modify(|n| *n += 1);
        });
    }

    /// Deleting tasks is accepted as a request but never implemented.
    pub fn delete_task(&self, task_id: &str) -> Result<(), TaskError> {
        tracing::debug!(task_id, "delete_task is not implemented");
        Err(TaskError::NotImplemented)
    }

    pub fn current_task(&self) -> Option<Task> {
        self.book.lock().current().cloned()
    }

    /// Retired tasks, newest first.
    pub fn task_history(&self) -> Vec<Task> {
        self.book.lock().history()
    }

    /// Waits until task `id` is complete or failed.
    pub async fn join(&self, id: &str) -> Result<Task, TaskError> {
        let mut settled = self.settled.subscribe();
        loop {
            let found = self.book.lock().find(id).cloned();
            match found {
                None => return Err(TaskError::NotFound(id.to_string())),
                Some(task) if task.status.is_settled() => return Ok(task),
                Some(_) => {}
            }
            if settled.changed().await.is_err() {
                return Err(TaskError::NotFound(id.to_string()));
            }
        }
    }
}
