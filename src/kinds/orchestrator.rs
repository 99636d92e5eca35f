//! Orchestrator plugins: gather agents, then run episodes against them.
//!
//! The shell keeps the registrations; the adapter only contacts the agents.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AdapterError, TableError};
use crate::hook::{Completion, Hook, HookContext, HookResult, NoArgs};
use crate::runtime::Plugin;
use crate::state_machine::{Blueprint, FAIL, FAILED, State, TERMINATED, all_except, only};

pub const KIND: &str = "OrchestratorInstanceStatus";

const STATES: &[State] = &[
    "uninitialized",
    "initializing",
    "waiting_for_agents",
    "registering_agent",
    "ready",
    "running",
    "completed_episode",
    "stopping_episode",
    "saving_episode",
    "resetting",
    "terminating",
    TERMINATED,
    FAILED,
];

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeParams {
    #[serde(default)]
    pub env: Map<String, Value>,
    #[serde(default = "one_agent")]
    pub agents_needed: usize,
}

fn one_agent() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterAgentParams {
    pub agent_name: String,
    pub agent_url: String,
    #[serde(default)]
    pub skip_train: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartEpisodeParams {
    #[serde(default)]
    pub episode_cfg: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveEpisodeParams {
    pub path: String,
}

/// An agent known to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRegistration {
    pub url: String,
    pub skip_train: bool,
}

pub trait OrchestratorAdapter: Send + 'static {
    fn do_initialize(
        &mut self,
        ctx: &HookContext,
        env: &Map<String, Value>,
        agents_needed: usize,
    ) -> Result<(), AdapterError>;

    /// Contacts the agent and tells it that it has been registered.
    fn do_register_agent(
        &mut self,
        ctx: &HookContext,
        agent_name: &str,
        agent_url: &str,
    ) -> Result<(), AdapterError>;

    /// Runs one episode to completion.
    fn do_start_episode(
        &mut self,
        ctx: &HookContext,
        episode_cfg: &Map<String, Value>,
        agents: &BTreeMap<String, AgentRegistration>,
    ) -> Result<(), AdapterError>;

    fn do_stop_episode(&mut self, ctx: &HookContext) -> Result<(), AdapterError>;

    fn do_save_episode(&mut self, ctx: &HookContext, path: &str) -> Result<(), AdapterError>;

    fn do_terminate(&mut self, _ctx: &HookContext) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_reset(&mut self, ctx: &HookContext) -> Result<(), AdapterError>;
}

pub struct Orchestrator {
    adapter: Box<dyn OrchestratorAdapter>,
    agents_needed: usize,
    agents: BTreeMap<String, AgentRegistration>,
}

impl Orchestrator {
    pub fn new(adapter: impl OrchestratorAdapter) -> Self {
        Self {
            adapter: Box::new(adapter),
            agents_needed: 1,
            agents: BTreeMap::new(),
        }
    }

    pub fn agents(&self) -> &BTreeMap<String, AgentRegistration> {
        &self.agents
    }
}

impl Plugin for Orchestrator {
    fn blueprint() -> Result<Blueprint<Self>, TableError> {
        Blueprint::builder(KIND)
            .states(STATES)
            .initial("uninitialized")
            .trigger(FAIL, all_except(&[TERMINATED]), FAILED)
            .operation(
                "initialize",
                only(&["uninitialized"]),
                "initializing",
                Hook::new(initialize),
            )
            .trigger(
                "waiting_for_agents",
                only(&["initializing", "registering_agent"]),
                "waiting_for_agents",
            )
            .operation(
                "register_agent",
                only(&["waiting_for_agents"]),
                "registering_agent",
                Hook::new(register_agent),
            )
            .trigger("ready", only(&["registering_agent", "stopping_episode"]), "ready")
            .operation("start_episode", only(&["ready"]), "running", Hook::new(start_episode))
            .trigger(
                "completed_episode",
                only(&["running", "saving_episode"]),
                "completed_episode",
            )
            .operation(
                "stop_episode",
                only(&["completed_episode"]),
                "stopping_episode",
                Hook::new(stop_episode),
            )
            .operation(
                "save_episode",
                only(&["completed_episode"]),
                "saving_episode",
                Hook::new(save_episode),
            )
            .operation(
                "terminate",
                all_except(&["terminating", TERMINATED, FAILED]),
                "terminating",
                Hook::new(terminate),
            )
            .trigger("terminated", only(&["terminating"]), TERMINATED)
            .operation(
                "reset",
                all_except(&["terminating", TERMINATED]),
                "resetting",
                Hook::new(reset),
            )
            .trigger("uninitialized", only(&["resetting"]), "uninitialized")
            .build()
    }
}

fn initialize(orch: &mut Orchestrator, ctx: &HookContext, params: InitializeParams) -> HookResult {
    if params.agents_needed == 0 {
        return Err(AdapterError::new("agents_needed must be at least 1"));
    }
    orch.adapter
        .do_initialize(ctx, &params.env, params.agents_needed)?;
    orch.agents_needed = params.agents_needed;
    Ok(Completion::fire("waiting_for_agents"))
}

fn register_agent(
    orch: &mut Orchestrator,
    ctx: &HookContext,
    params: RegisterAgentParams,
) -> HookResult {
    orch.adapter
        .do_register_agent(ctx, &params.agent_name, &params.agent_url)?;
    orch.agents.insert(
        params.agent_name.clone(),
        AgentRegistration {
            url: params.agent_url,
            skip_train: params.skip_train.unwrap_or(false),
        },
    );

    let registered = orch.agents.len();
    tracing::info!(
        agent = %params.agent_name,
        registered,
        needed = orch.agents_needed,
        "agent registered"
    );
    ctx.update_status(serde_json::json!({
        "agents_registered": registered,
        "agents_needed": orch.agents_needed,
    }));
    if registered >= orch.agents_needed {
        Ok(Completion::fire("ready"))
    } else {
        Ok(Completion::fire("waiting_for_agents"))
    }
}

fn start_episode(
    orch: &mut Orchestrator,
    ctx: &HookContext,
    params: StartEpisodeParams,
) -> HookResult {
    orch.adapter
        .do_start_episode(ctx, &params.episode_cfg, &orch.agents)?;
    Ok(Completion::fire("completed_episode"))
}

fn stop_episode(orch: &mut Orchestrator, ctx: &HookContext, _: NoArgs) -> HookResult {
    orch.adapter.do_stop_episode(ctx)?;
    Ok(Completion::fire("ready"))
}

fn save_episode(orch: &mut Orchestrator, ctx: &HookContext, params: SaveEpisodeParams) -> HookResult {
    orch.adapter.do_save_episode(ctx, &params.path)?;
    Ok(Completion::fire("completed_episode"))
}

fn terminate(orch: &mut Orchestrator, ctx: &HookContext, _: NoArgs) -> HookResult {
    orch.adapter.do_terminate(ctx)?;
    Ok(Completion::fire("terminated"))
}

fn reset(orch: &mut Orchestrator, ctx: &HookContext, _: NoArgs) -> HookResult {
    orch.adapter.do_reset(ctx)?;
    orch.agents.clear();
    orch.agents_needed = 1;
    Ok(Completion::fire("uninitialized"))
}
