use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::table::{Blueprint, FAIL, State, TERMINATED};
use crate::error::{IllegalTransition, InfrastructureError};
use crate::hook::{HookContext, Invocation};
use crate::status::StatusStore;

/// Where a fired trigger left the machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired {
    pub state: State,
    /// Value a hook handed back for a waiting caller.
    pub reply: Option<Value>,
    /// Set when the chain ended in `fail`.
    pub failure: Option<String>,
}

/// Drives one plugin shell through its kind's transition table.
///
/// Every entered state is written to the status store before the next hook
/// runs. Entering `terminated` cancels the shutdown token.
pub struct Machine<P> {
    blueprint: Arc<Blueprint<P>>,
    state: Mutex<State>,
    store: Arc<StatusStore>,
    shutdown: CancellationToken,
}

impl<P: 'static> Machine<P> {
    pub fn new(
        blueprint: Arc<Blueprint<P>>,
        store: Arc<StatusStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let state = Mutex::new(blueprint.initial());
        Self {
            blueprint,
            state,
            store,
            shutdown,
        }
    }

    pub fn blueprint(&self) -> &Blueprint<P> {
        &self.blueprint
    }

    pub fn state(&self) -> State {
        *self.state.lock()
    }

    pub fn valid_triggers(&self) -> BTreeSet<&'static str> {
        self.blueprint.valid_triggers(self.state())
    }

    pub fn can_fire(&self, trigger: &str) -> bool {
        self.blueprint.edge(self.state(), trigger).is_some()
    }

    /// Fires `trigger` with `params`, then follows the hook's completion
    /// chain until it settles.
    ///
    /// Returns `Err` only when nothing changed: the trigger was illegal from
    /// the current state or the parameters did not fit the hook. Adapter
    /// failures and illegal completions end in `failed` and are reported
    /// through [`Fired::failure`].
    pub fn fire(
        &self,
        plugin: &mut P,
        task_id: &str,
        trigger: &str,
        params: Value,
    ) -> Result<Fired, InfrastructureError> {
        let (state, invocation) = self.advance(trigger, params)?;
        let Some(invocation) = invocation else {
            return Ok(Fired {
                state,
                reply: None,
                failure: None,
            });
        };

        let ctx = HookContext::new(Arc::clone(&self.store), task_id, state);
        match invocation(plugin, &ctx) {
            Ok(completion) => {
                let (next, reply) = completion.into_parts();
                match self.fire(plugin, task_id, next, Value::Null) {
                    Ok(fired) => Ok(Fired {
                        reply: reply.or(fired.reply),
                        ..fired
                    }),
                    Err(err) => {
                        let reason = err.to_string();
                        tracing::error!(trigger, state, error = %reason, "completion rejected");
                        Ok(self.failed(reason))
                    }
                }
            }
            Err(err) => {
                tracing::error!(trigger, state, error = %err, "hook failed");
                Ok(self.failed(err.message().to_string()))
            }
        }
    }

    /// Moves to `failed` carrying `reason`. Returns `false` when `fail` is not
    /// legal from the current state.
    pub fn fail(&self, reason: &str) -> bool {
        match self.advance(FAIL, Value::String(reason.to_string())) {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(error = %err, "cannot fail");
                false
            }
        }
    }

    fn failed(&self, reason: String) -> Fired {
        self.fail(&reason);
        Fired {
            state: self.state(),
            reply: None,
            failure: Some(reason),
        }
    }

    /// Looks up the edge, binds its hook and enters the destination.
    ///
    /// Triggers without a hook publish `params` as the status payload; that is
    /// how `fail` carries its reason.
    fn advance(
        &self,
        trigger: &str,
        params: Value,
    ) -> Result<(State, Option<Invocation<P>>), InfrastructureError> {
        let mut state = self.state.lock();
        let edge = self
            .blueprint
            .edge(*state, trigger)
            .ok_or_else(|| IllegalTransition {
                trigger: trigger.to_string(),
                state: *state,
            })?;

        let (invocation, payload) = match &edge.hook {
            Some(hook) => {
                let invocation =
                    hook.bind(params)
                        .map_err(|source| InfrastructureError::Parameters {
                            operation: trigger.to_string(),
                            source,
                        })?;
                (Some(invocation), Value::Null)
            }
            None => (None, params),
        };

        tracing::debug!(from = *state, to = edge.dest, trigger, "transition");
        *state = edge.dest;
        self.store.update_state(Some(edge.dest), payload);
        if edge.dest == TERMINATED {
            tracing::info!(kind = self.blueprint.kind(), "plugin terminated");
            self.shutdown.cancel();
        }
        Ok((edge.dest, invocation))
    }
}
