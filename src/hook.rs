//! Busy-state hooks and their continuations.
//!
//! A [`Hook`] is the work attached to an operation's trigger. It receives the
//! plugin shell, a [`HookContext`] and its typed parameters, and returns a
//! [`Completion`] naming the follow-up trigger the machine fires next. An
//! `Err` turns into `fail(reason)`.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::AdapterError;
use crate::state_machine::State;
use crate::status::StatusStore;

pub type HookResult = Result<Completion, AdapterError>;

pub(crate) type Invocation<P> = Box<dyn FnOnce(&mut P, &HookContext) -> HookResult + Send>;

type Binder<P> = Box<dyn Fn(Value) -> Result<Invocation<P>, serde_json::Error> + Send + Sync>;

/// Parameters of operations that take none.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct NoArgs {}

/// The continuation a hook hands back to the machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    next: &'static str,
    reply: Option<Value>,
}

impl Completion {
    /// Fire `trigger` once the hook returns.
    pub fn fire(trigger: &'static str) -> Self {
        Self {
            next: trigger,
            reply: None,
        }
    }

    /// Attach the value a waiting caller receives through the mailbox.
    pub fn with_reply(mut self, reply: Value) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn next(&self) -> &'static str {
        self.next
    }

    pub fn reply(&self) -> Option<&Value> {
        self.reply.as_ref()
    }

    pub(crate) fn into_parts(self) -> (&'static str, Option<Value>) {
        (self.next, self.reply)
    }
}

/// Work bound to an operation, generic over the plugin shell `P`.
pub struct Hook<P> {
    binder: Binder<P>,
    replies: bool,
}

impl<P: 'static> Hook<P> {
    /// Wraps a hook function whose parameters deserialize into `A`.
    ///
    /// A `null` parameter value is read as an empty object.
    pub fn new<A>(run: fn(&mut P, &HookContext, A) -> HookResult) -> Self
    where
        A: DeserializeOwned + Send + 'static,
    {
        let binder: Binder<P> = Box::new(move |params: Value| {
            let params = if params.is_null() {
                Value::Object(Default::default())
            } else {
                params
            };
            let args: A = serde_json::from_value(params)?;
            let invocation: Invocation<P> =
                Box::new(move |plugin: &mut P, ctx: &HookContext| run(plugin, ctx, args));
            Ok(invocation)
        });
        Self {
            binder,
            replies: false,
        }
    }

    /// Marks the operation as answering through the response mailbox.
    pub fn replying(mut self) -> Self {
        self.replies = true;
        self
    }

    pub fn replies(&self) -> bool {
        self.replies
    }

    pub(crate) fn bind(&self, params: Value) -> Result<Invocation<P>, serde_json::Error> {
        (self.binder)(params)
    }
}

/// What adapter code may touch while a hook runs.
pub struct HookContext {
    store: Arc<StatusStore>,
    task_id: String,
    state: State,
}

impl HookContext {
    pub(crate) fn new(store: Arc<StatusStore>, task_id: &str, state: State) -> Self {
        Self {
            store,
            task_id: task_id.to_string(),
            state,
        }
    }

    /// The busy state the hook runs in.
    pub fn state(&self) -> State {
        self.state
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Publishes progress without changing the state. Returns the new
    /// resource version.
    pub fn update_status(&self, payload: Value) -> u64 {
        self.store.update_status(payload).resource_version()
    }
}
