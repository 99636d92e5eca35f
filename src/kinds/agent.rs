//! Agent plugins: act inside episodes run by an orchestrator.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AdapterError, TableError};
use crate::hook::{Completion, Hook, HookContext, HookResult, NoArgs};
use crate::runtime::Plugin;
use crate::state_machine::{Blueprint, FAIL, FAILED, State, TERMINATED, all_except, only};

pub const KIND: &str = "AgentInstanceStatus";

const STATES: &[State] = &[
    "started",
    "initializing",
    "initialized",
    "building_model",
    "saving_model_init",
    "saving_model_ready",
    "agent_registering",
    "ready",
    "episode_starting",
    "in_episode",
    "getting_action",
    "replaying_action",
    "episode_stopping",
    "resetting",
    "terminating",
    TERMINATED,
    FAILED,
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeParams {
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub hparams: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildModelParams {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveModelParams {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredParams {
    pub agent_cfg: AgentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeParams {
    pub episode_cfg: Map<String, Value>,
}

/// Observation vectors keyed by name.
pub type Observation = HashMap<String, Value>;

#[derive(Debug, Clone, Deserialize)]
pub struct ObsParams {
    pub obs: Observation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetParams {
    #[serde(default = "unload_by_default")]
    pub unload_model: bool,
}

fn unload_by_default() -> bool {
    true
}

pub trait AgentAdapter: Send + 'static {
    fn do_initialize(
        &mut self,
        ctx: &HookContext,
        props: &Map<String, Value>,
        hparams: &Map<String, Value>,
    ) -> Result<(), AdapterError>;

    fn do_build_model(
        &mut self,
        ctx: &HookContext,
        path: Option<&str>,
    ) -> Result<(), AdapterError>;

    fn do_save_model(&mut self, ctx: &HookContext, path: &str) -> Result<(), AdapterError>;

    fn do_agent_registered(
        &mut self,
        _ctx: &HookContext,
        _agent_cfg: &AgentConfig,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_episode_started(
        &mut self,
        ctx: &HookContext,
        episode_cfg: &Map<String, Value>,
    ) -> Result<(), AdapterError>;

    /// Chooses the next action for `obs`; the result goes back to the caller.
    fn do_get_action(
        &mut self,
        ctx: &HookContext,
        obs: Observation,
    ) -> Result<Value, AdapterError>;

    fn do_replay_action(
        &mut self,
        ctx: &HookContext,
        obs: Observation,
    ) -> Result<(), AdapterError>;

    fn do_episode_stopped(&mut self, ctx: &HookContext) -> Result<(), AdapterError>;

    fn do_terminate(&mut self, _ctx: &HookContext) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_reset(&mut self, ctx: &HookContext, unload_model: bool) -> Result<(), AdapterError>;
}

/// Plugin shell for an agent adapter. Tracks the name the agent goes by.
pub struct Agent {
    adapter: Box<dyn AgentAdapter>,
    name: String,
}

impl Agent {
    pub fn new(name: impl Into<String>, adapter: impl AgentAdapter) -> Self {
        Self {
            adapter: Box::new(adapter),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Plugin for Agent {
    fn blueprint() -> Result<Blueprint<Self>, TableError> {
        Blueprint::builder(KIND)
            .states(STATES)
            .initial("started")
            .trigger(FAIL, all_except(&[TERMINATED]), FAILED)
            .operation("initialize", only(&["started"]), "initializing", Hook::new(initialize))
            .trigger(
                "initialized",
                only(&["initializing", "building_model", "saving_model_init", "resetting"]),
                "initialized",
            )
            .operation("build_model", only(&["initialized"]), "building_model", Hook::new(build_model))
            .operation(
                "save_model",
                only(&["initialized"]),
                "saving_model_init",
                Hook::new(save_model),
            )
            .operation_edge("save_model", only(&["ready"]), "saving_model_ready")
            .operation(
                "agent_registered",
                only(&["initialized"]),
                "agent_registering",
                Hook::new(agent_registered),
            )
            .trigger(
                "ready",
                only(&["agent_registering", "saving_model_ready", "episode_stopping"]),
                "ready",
            )
            .operation(
                "episode_started",
                only(&["ready"]),
                "episode_starting",
                Hook::new(episode_started),
            )
            .trigger(
                "in_episode",
                only(&["episode_starting", "getting_action", "replaying_action"]),
                "in_episode",
            )
            .operation(
                "get_action",
                only(&["in_episode"]),
                "getting_action",
                Hook::new(get_action).replying(),
            )
            .operation(
                "replay_action",
                only(&["in_episode"]),
                "replaying_action",
                Hook::new(replay_action),
            )
            .operation(
                "episode_stopped",
                only(&["in_episode"]),
                "episode_stopping",
                Hook::new(episode_stopped),
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
            .trigger("started", only(&["resetting"]), "started")
            .build()
    }
}

fn initialize(agent: &mut Agent, ctx: &HookContext, params: InitializeParams) -> HookResult {
    if let Some(name) = params.props.get("name").and_then(Value::as_str) {
        agent.name = name.to_string();
    }
    agent
        .adapter
        .do_initialize(ctx, &params.props, &params.hparams)?;
    Ok(Completion::fire("initialized"))
}

fn build_model(agent: &mut Agent, ctx: &HookContext, params: BuildModelParams) -> HookResult {
    let path = params.path.as_deref().filter(|p| !p.is_empty() && *p != "None");
    tracing::info!(agent = %agent.name, ?path, "building agent model");
    agent.adapter.do_build_model(ctx, path)?;
    Ok(Completion::fire("initialized"))
}

fn save_model(agent: &mut Agent, ctx: &HookContext, params: SaveModelParams) -> HookResult {
    agent.adapter.do_save_model(ctx, &params.path)?;
    if ctx.state() == "saving_model_init" {
        Ok(Completion::fire("initialized"))
    } else {
        Ok(Completion::fire("ready"))
    }
}

fn agent_registered(agent: &mut Agent, ctx: &HookContext, params: RegisteredParams) -> HookResult {
    agent.adapter.do_agent_registered(ctx, &params.agent_cfg)?;
    agent.name = params.agent_cfg.name;
    tracing::info!(agent = %agent.name, "registered with orchestrator");
    Ok(Completion::fire("ready"))
}

fn episode_started(agent: &mut Agent, ctx: &HookContext, params: EpisodeParams) -> HookResult {
    if !params.episode_cfg.contains_key("obs") {
        return Err(AdapterError::new("'obs' must be a key in episode_cfg"));
    }
    agent.adapter.do_episode_started(ctx, &params.episode_cfg)?;
    Ok(Completion::fire("in_episode"))
}

fn get_action(agent: &mut Agent, ctx: &HookContext, params: ObsParams) -> HookResult {
    let action = agent.adapter.do_get_action(ctx, params.obs)?;
    Ok(Completion::fire("in_episode").with_reply(action))
}

fn replay_action(agent: &mut Agent, ctx: &HookContext, params: ObsParams) -> HookResult {
    agent.adapter.do_replay_action(ctx, params.obs)?;
    Ok(Completion::fire("in_episode"))
}

fn episode_stopped(agent: &mut Agent, ctx: &HookContext, _: NoArgs) -> HookResult {
    agent.adapter.do_episode_stopped(ctx)?;
    Ok(Completion::fire("ready"))
}

fn terminate(agent: &mut Agent, ctx: &HookContext, _: NoArgs) -> HookResult {
    agent.adapter.do_terminate(ctx)?;
    Ok(Completion::fire("terminated"))
}

fn reset(agent: &mut Agent, ctx: &HookContext, params: ResetParams) -> HookResult {
    agent.adapter.do_reset(ctx, params.unload_model)?;
    if params.unload_model {
        Ok(Completion::fire("started"))
    } else {
        Ok(Completion::fire("initialized"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::Runtime;
    use serde_json::json;

    /// Always answers with the sum of the first observation vector.
    struct Summer;

    impl AgentAdapter for Summer {
        fn do_initialize(
            &mut self,
            _: &HookContext,
            _: &Map<String, Value>,
            _: &Map<String, Value>,
        ) -> Result<(), AdapterError> {
            Ok(())
        }

        fn do_build_model(&mut self, _: &HookContext, _: Option<&str>) -> Result<(), AdapterError> {
            Ok(())
        }

        fn do_save_model(&mut self, _: &HookContext, _: &str) -> Result<(), AdapterError> {
            Ok(())
        }

        fn do_episode_started(&mut self, _: &HookContext, _: &Map<String, Value>) -> Result<(), AdapterError> {
            Ok(())
        }

        fn do_get_action(&mut self, _: &HookContext, obs: Observation) -> Result<Value, AdapterError> {
            let sum: f64 = obs
                .values()
                .flat_map(|v| v.as_array().cloned().unwrap_or_default())
                .filter_map(|v| v.as_f64())
                .sum();
            Ok(json!({ "action": [sum] }))
        }

        fn do_replay_action(&mut self, _: &HookContext, _: Observation) -> Result<(), AdapterError> {
            Ok(())
        }

        fn do_episode_stopped(&mut self, _: &HookContext) -> Result<(), AdapterError> {
            Ok(())
        }

        fn do_reset(&mut self, _: &HookContext, _: bool) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    async fn run(rt: &Runtime<Agent>, op: &str, params: Value) {
        let id = rt.add_task(op, params).unwrap();
        rt.join_task(&id).await.unwrap();
    }

    fn runtime() -> Runtime<Agent> {
        Runtime::new(Agent::new("agent", Summer), &RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn save_model_has_two_edges() {
        let table = Agent::blueprint().unwrap();
        assert_eq!(table.destination("initialized", "save_model"), Some("saving_model_init"));
        assert_eq!(table.destination("ready", "save_model"), Some("saving_model_ready"));
        assert!(table.replies("get_action"));
    }

    #[tokio::test]
    async fn save_model_returns_to_where_it_started() {
        let rt = runtime();
        run(&rt, "initialize", json!({"props": {"name": "scout"}})).await;
        run(&rt, "save_model", json!({"path": "/tmp/a"})).await;
        assert_eq!(rt.state(), "initialized");

        run(&rt, "agent_registered", json!({"agent_cfg": {"name": "scout-1"}})).await;
        run(&rt, "save_model", json!({"path": "/tmp/a"})).await;
        assert_eq!(rt.state(), "ready");
    }

    #[tokio::test]
    async fn episode_round_trip_with_actions() {
        let rt = runtime();
        run(&rt, "initialize", json!({})).await;
        run(&rt, "agent_registered", json!({"agent_cfg": {"name": "a1", "url": "http://a1"}})).await;
        run(&rt, "episode_started", json!({"episode_cfg": {"obs": [0.0]}})).await;
        assert_eq!(rt.state(), "in_episode");

        let action = rt
            .call("get_action", json!({"obs": {"pos": [1.5, 2.5]}}))
            .await
            .unwrap();
        assert_eq!(action, json!({"action": [4.0]}));
        assert_eq!(rt.state(), "in_episode");

        run(&rt, "replay_action", json!({"obs": {"pos": [1.0]}})).await;
        run(&rt, "episode_stopped", Value::Null).await;
        assert_eq!(rt.state(), "ready");
    }

    #[tokio::test]
    async fn episode_without_obs_fails() {
        let rt = runtime();
        run(&rt, "initialize", json!({})).await;
        run(&rt, "agent_registered", json!({"agent_cfg": {"name": "a1"}})).await;
        run(&rt, "episode_started", json!({"episode_cfg": {"seed": 3}})).await;
        assert_eq!(rt.state(), FAILED);
        assert_eq!(rt.status().reason(), Some("'obs' must be a key in episode_cfg"));
    }

    #[tokio::test]
    async fn reset_keeping_the_model_lands_in_initialized() {
        let rt = runtime();
        run(&rt, "initialize", json!({})).await;
        run(&rt, "reset", json!({"unload_model": false})).await;
        assert_eq!(rt.state(), "initialized");

        run(&rt, "reset", Value::Null).await;
        assert_eq!(rt.state(), "started");
    }
}
