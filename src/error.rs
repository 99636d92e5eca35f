use thiserror::Error;

use crate::task::TaskStatus;

/// Why a task was rejected before it reached the worker pool.
///
/// Admission errors never mutate the state machine; only `IllegalForState`
/// leaves a trace, as a `failed` current task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("operation {operation} must be one of {allowed:?}")]
    UnknownOperation {
        operation: String,
        allowed: Vec<&'static str>,
    },

    #[error("cannot submit a task while current task is not complete; current task status is {status}")]
    Busy { status: TaskStatus },

    #[error("operation {operation} invalid from state {state}")]
    IllegalForState {
        operation: String,
        state: &'static str,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("trigger {trigger} is not legal from state {state}")]
pub struct IllegalTransition {
    pub trigger: String,
    pub state: &'static str,
}

/// Failure reported by workload code. The hook turns it into `fail(reason)`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct AdapterError {
    message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Error for optional operations an adapter chooses not to implement.
    pub fn unsupported(operation: &str) -> Self {
        Self::new(format!("operation {operation} is not supported by this plugin"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for AdapterError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Failure of the executor itself, as opposed to the workload.
///
/// These mark the task `failed` but leave the state machine where it was.
#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("parameters for {operation} do not match its shape: {source}")]
    Parameters {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("handler for {operation} panicked: {message}")]
    Panicked { operation: String, message: String },
}

/// Inconsistencies in a kind's transition table, caught at registration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("state {0} is not declared")]
    UnknownState(&'static str),

    #[error("trigger {trigger} has no source states")]
    NoSources { trigger: &'static str },

    #[error("trigger {trigger} is registered twice from state {state}")]
    DuplicateEdge {
        trigger: &'static str,
        state: &'static str,
    },

    #[error("operation {0} is registered without a hook on one of its edges")]
    MissingHook(&'static str),

    #[error("required trigger {0} is missing")]
    MissingTrigger(&'static str),

    #[error("terminal state {0} must not have outgoing edges")]
    TerminalExit(&'static str),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("deleting tasks is not implemented")]
    NotImplemented,

    #[error("task {0} not found")]
    NotFound(String),
}

/// Errors from a mailbox-backed synchronous call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("operation {0} does not produce a response")]
    NoResponse(String),

    #[error("another caller is already waiting for a response")]
    MailboxBusy,

    #[error("response mailbox closed")]
    Closed,

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("plugin failed: {0}")]
    Failed(String),

    #[error("plugin terminated before reaching {0:?}")]
    Terminated(Vec<String>),

    #[error("status feed closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid transition table: {0}")]
    Table(#[from] TableError),

    #[error("a tokio runtime is required to execute tasks")]
    NoExecutor(#[from] tokio::runtime::TryCurrentError),
}
