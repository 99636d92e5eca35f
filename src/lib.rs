//! Uniform lifecycle runtime for remotely controlled plugins.
//!
//! A plugin kind declares a transition table ([`state_machine::Blueprint`])
//! and hooks that call into an adapter. [`Runtime`] admits one task at a time,
//! runs hooks on a worker thread, publishes every change to a versioned
//! status store and hands replies back through a single-slot mailbox.

pub mod cli;
pub mod config;
pub mod demo;
pub mod error;
pub mod hook;
pub mod kinds;
pub mod mailbox;
pub mod runtime;
pub mod state_machine;
pub mod status;
pub mod task;
pub mod ui;

pub use config::RuntimeConfig;
pub use error::{
    AdapterError, AdmissionError, CallError, InfrastructureError, RuntimeError, TableError,
    TaskError, WaitError,
};
pub use hook::{Completion, Hook, HookContext, HookResult};
pub use runtime::{Plugin, Runtime};
pub use status::{Frame, StatusRecord, Watch};
pub use task::{Task, TaskStatus};
