//! The per-plugin runtime: one state machine, one status store, one executor
//! and one response mailbox, all owned by a single [`Runtime`] instance.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::error::{
    AdmissionError, CallError, InfrastructureError, RuntimeError, TableError, TaskError, WaitError,
};
use crate::mailbox::Mailbox;
use crate::state_machine::{Blueprint, FAILED, Machine, State, TERMINATED};
use crate::status::{StatusRecord, StatusStore, Watch};
use crate::task::{Executor, Task, TaskBody};

/// A plugin shell: the per-kind value hooks operate on.
pub trait Plugin: Send + Sized + 'static {
    /// The kind's transition table with every hook bound.
    fn blueprint() -> Result<Blueprint<Self>, TableError>;
}

/// Everything a worker thread needs to run a task.
struct Engine<P: Plugin> {
    machine: Machine<P>,
    plugin: Mutex<P>,
    mailbox: Mailbox,
}

impl<P: Plugin> TaskBody for Engine<P> {
    fn operations(&self) -> &[&'static str] {
        self.machine.blueprint().operations()
    }

    fn current_state(&self) -> State {
        self.machine.state()
    }

    fn valid_triggers(&self) -> BTreeSet<&'static str> {
        self.machine.valid_triggers()
    }

    fn run(&self, task: &Task) -> Result<(), InfrastructureError> {
        let mut plugin = self.plugin.lock();
        let fired =
            self.machine
                .fire(&mut plugin, &task.id, &task.operation, task.parameters.clone())?;
        if self.machine.blueprint().replies(&task.operation) {
            let reply = match fired.failure {
                Some(reason) => Err(reason),
                None => Ok(fired.reply.unwrap_or(Value::Null)),
            };
            self.mailbox.put(&task.id, reply);
        }
        Ok(())
    }

    fn abandon(&self, task: &Task, reason: &str) {
        if self.machine.blueprint().replies(&task.operation) {
            self.mailbox.put(&task.id, Err(reason.to_string()));
        }
    }
}

/// Lifecycle runtime for one plugin instance of kind `P`.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct Runtime<P: Plugin> {
    engine: Arc<Engine<P>>,
    executor: Executor<Engine<P>>,
    store: Arc<StatusStore>,
    shutdown: CancellationToken,
}

impl<P: Plugin> Runtime<P> {
    /// Builds the runtime on the ambient tokio runtime.
    pub fn new(plugin: P, config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::with_handle(plugin, config, Handle::try_current()?)
    }

    pub fn with_handle(
        plugin: P,
        config: &RuntimeConfig,
        handle: Handle,
    ) -> Result<Self, RuntimeError> {
        let blueprint = Arc::new(P::blueprint()?);
        let store = Arc::new(StatusStore::new(
            blueprint.kind(),
            blueprint.initial(),
            config.keepalive(),
        ));
        let shutdown = CancellationToken::new();
        let machine = Machine::new(Arc::clone(&blueprint), Arc::clone(&store), shutdown.clone());
        let engine = Arc::new(Engine {
            machine,
            plugin: Mutex::new(plugin),
            mailbox: Mailbox::new(),
        });
        let executor = Executor::new(Arc::clone(&engine), handle);

        tracing::info!(kind = blueprint.kind(), state = blueprint.initial(), "plugin runtime ready");
        Ok(Self {
            engine,
            executor,
            store,
            shutdown,
        })
    }

    pub fn kind(&self) -> &'static str {
        self.store.kind()
    }

    pub fn state(&self) -> State {
        self.engine.machine.state()
    }

    /// Operations legal from the current state.
    pub fn valid_operations(&self) -> Vec<&'static str> {
        let blueprint = self.engine.machine.blueprint();
        self.engine
            .machine
            .valid_triggers()
            .into_iter()
            .filter(|trigger| blueprint.is_operation(trigger))
            .collect()
    }

    /// Submits `operation` for asynchronous execution. Returns the task id.
    pub fn add_task(&self, operation: &str, parameters: Value) -> Result<String, AdmissionError> {
        self.executor.add_task(operation, parameters)
    }

    /// Submits a replying operation and waits for its answer.
    pub async fn call(&self, operation: &str, parameters: Value) -> Result<Value, CallError> {
        let blueprint = self.engine.machine.blueprint();
        if blueprint.is_operation(operation) && !blueprint.replies(operation) {
            return Err(CallError::NoResponse(operation.to_string()));
        }

        let mut claim = self.engine.mailbox.claim()?;
        claim.drain();
        let id = self.executor.add_task(operation, parameters)?;
        claim.take(&id).await
    }

    pub fn delete_task(&self, task_id: &str) -> Result<(), TaskError> {
        self.executor.delete_task(task_id)
    }

    pub fn current_task(&self) -> Option<Task> {
        self.executor.current_task()
    }

    pub fn task_history(&self) -> Vec<Task> {
        self.executor.task_history()
    }

    /// Waits for task `task_id` to settle.
    pub async fn join_task(&self, task_id: &str) -> Result<Task, TaskError> {
        self.executor.join(task_id).await
    }

    /// Reads the plugin shell. Waits while a hook is running.
    pub fn inspect<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        f(&*self.engine.plugin.lock())
    }

    pub fn status(&self) -> Arc<StatusRecord> {
        self.store.status()
    }

    /// Status changes with a resource version above `min_version`.
    pub fn watch(&self, min_version: u64) -> Watch {
        self.store.watch(min_version)
    }

    /// Publishes a payload under the current state.
    pub fn update_status(&self, payload: Value) -> Arc<StatusRecord> {
        self.store.update_status(payload)
    }

    /// Waits until the plugin enters one of `targets`.
    ///
    /// Gives up when the plugin fails or terminates first.
    pub async fn wait_for_state(&self, targets: &[&str]) -> Result<Arc<StatusRecord>, WaitError> {
        let mut watch = self.store.watch(0);
        while let Some(record) = watch.next_record().await {
            if targets.contains(&record.state.as_str()) {
                return Ok(record);
            }
            if record.state == FAILED {
                let reason = record.reason().unwrap_or("unknown failure").to_string();
                return Err(WaitError::Failed(reason));
            }
            if record.state == TERMINATED {
                return Err(WaitError::Terminated(
                    targets.iter().map(|s| s.to_string()).collect(),
                ));
            }
        }
        Err(WaitError::Closed)
    }

    /// Cancelled once the plugin enters `terminated`.
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn api_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn blueprint(&self) -> &Blueprint<P> {
        self.engine.machine.blueprint()
    }

    pub fn describe(&self) -> String {
        self.blueprint().describe()
    }
}
