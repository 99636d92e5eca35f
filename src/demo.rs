//! Built-in adapters and scripted lifecycles for the `demo` command.
//!
//! Each adapter does a little simulated work and reports progress through
//! the status store so the watch stream has something to show.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value, json};

use crate::config::RuntimeConfig;
use crate::error::AdapterError;
use crate::hook::HookContext;
use crate::kinds::agent::{AgentAdapter, Observation};
use crate::kinds::evaluation::{EvaluateParams, EvaluationAdapter, Metric};
use crate::kinds::model::{InitializeParams, ModelAdapter};
use crate::kinds::orchestrator::{AgentRegistration, OrchestratorAdapter};
use crate::kinds::transform::{TransformAdapter, TransformParams};
use crate::kinds::{Agent, Evaluation, Model, Orchestrator, Transform};
use crate::runtime::{Plugin, Runtime};
use crate::status::Watch;
use crate::task::Task;

const STEP: Duration = Duration::from_millis(40);

fn work(ctx: &HookContext, steps: u32) {
    for step in 1..=steps {
        std::thread::sleep(STEP);
        ctx.update_status(json!({"progress": step, "of": steps}));
    }
}

/// One scripted submission.
#[derive(Debug, Clone)]
pub struct Step {
    pub operation: &'static str,
    pub parameters: Value,
    /// Submit through the response mailbox and print the reply.
    pub call: bool,
}

impl Step {
    fn task(operation: &'static str, parameters: Value) -> Self {
        Self {
            operation,
            parameters,
            call: false,
        }
    }

    fn call(operation: &'static str, parameters: Value) -> Self {
        Self {
            operation,
            parameters,
            call: true,
        }
    }
}

/// What a finished demo run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub final_state: &'static str,
    pub replies: Vec<Value>,
    pub tasks: usize,
    /// Task records the runtime still remembers, oldest first.
    pub history: Vec<Task>,
}

/// Drives `plugin` through `script`, then terminates it.
///
/// `on_watch` receives a watch opened before the first submission; it runs
/// concurrently with the script.
pub async fn run<P, F, Fut>(
    plugin: P,
    config: &RuntimeConfig,
    script: Vec<Step>,
    on_watch: F,
) -> Result<Outcome>
where
    P: Plugin,
    F: FnOnce(Watch) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let runtime = Runtime::new(plugin, config)?;
    let viewer = tokio::spawn(on_watch(runtime.watch(0)));
    let shutdown = runtime.shutdown_signal();

    let mut replies = Vec::new();
    let mut tasks = 0;
    for step in script.into_iter().chain([Step::task("terminate", Value::Null)]) {
        tasks += 1;
        if step.call {
            let reply = runtime
                .call(step.operation, step.parameters)
                .await
                .with_context(|| format!("calling {}", step.operation))?;
            replies.push(reply);
            continue;
        }
        let id = runtime
            .add_task(step.operation, step.parameters)
            .with_context(|| format!("submitting {}", step.operation))?;
        let task = runtime.join_task(&id).await?;
        if let Some(reason) = task.message {
            bail!("{} failed: {reason}", step.operation);
        }
        if runtime.state() == crate::state_machine::FAILED {
            let reason = runtime.status().reason().unwrap_or_default().to_string();
            bail!("{} left the plugin failed: {reason}", step.operation);
        }
    }

    shutdown.cancelled().await;
    let final_state = runtime.state();
    let mut history = runtime.task_history();
    history.reverse();
    history.extend(runtime.current_task());
    drop(runtime);
    let _ = tokio::time::timeout(Duration::from_secs(1), viewer).await;

    Ok(Outcome {
        final_state,
        replies,
        tasks,
        history,
    })
}

pub struct DemoModel {
    weights: Vec<f64>,
}

impl DemoModel {
    pub fn new() -> Self {
        Self {
            weights: Vec::new(),
        }
    }
}

impl Default for DemoModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelAdapter for DemoModel {
    fn do_initialize(&mut self, ctx: &HookContext, params: InitializeParams) -> Result<(), AdapterError> {
        tracing::info!(objectives = ?params.objectives, "demo model initializing");
        work(ctx, 1);
        Ok(())
    }

    fn do_load_data(
        &mut self,
        ctx: &HookContext,
        dataset_map: HashMap<String, Value>,
    ) -> Result<(), AdapterError> {
        work(ctx, dataset_map.len() as u32);
        Ok(())
    }

    fn do_build_model(&mut self, ctx: &HookContext, _path: Option<&str>) -> Result<(), AdapterError> {
        self.weights = vec![0.5, -0.25];
        work(ctx, 1);
        Ok(())
    }

    fn do_train(&mut self, ctx: &HookContext) -> Result<(), AdapterError> {
        for epoch in 1..=3 {
            std::thread::sleep(STEP);
            for w in &mut self.weights {
                *w *= 0.9;
            }
            ctx.update_status(json!({"epoch": epoch, "weights": self.weights}));
        }
        Ok(())
    }

    fn do_save_model(&mut self, ctx: &HookContext, _path: &str) -> Result<(), AdapterError> {
        work(ctx, 1);
        Ok(())
    }

    fn do_predict(&mut self, ctx: &HookContext) -> Result<(), AdapterError> {
        work(ctx, 2);
        Ok(())
    }

    fn do_stream_predict(
        &mut self,
        _ctx: &HookContext,
        data_map: HashMap<String, Value>,
        _details: bool,
    ) -> Result<Value, AdapterError> {
        let predictions: BTreeMap<String, f64> = data_map
            .into_iter()
            .map(|(key, value)| {
                let x = value.as_f64().unwrap_or_default();
                let y = self.weights.first().copied().unwrap_or_default() * x;
                (key, y)
            })
            .collect();
        Ok(json!(predictions))
    }

    fn do_save_predictions(&mut self, ctx: &HookContext, _data_path: &str) -> Result<(), AdapterError> {
        work(ctx, 1);
        Ok(())
    }

    fn do_terminate(&mut self, _ctx: &HookContext) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_reset(&mut self, _ctx: &HookContext) -> Result<(), AdapterError> {
        self.weights.clear();
        Ok(())
    }
}

/// Picks the index of the largest observation value.
#[derive(Default)]
pub struct DemoAgent;

impl AgentAdapter for DemoAgent {
    fn do_initialize(
        &mut self,
        ctx: &HookContext,
        _props: &Map<String, Value>,
        _hparams: &Map<String, Value>,
    ) -> Result<(), AdapterError> {
        work(ctx, 1);
        Ok(())
    }

    fn do_build_model(&mut self, _ctx: &HookContext, _path: Option<&str>) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_save_model(&mut self, _ctx: &HookContext, _path: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_episode_started(
        &mut self,
        ctx: &HookContext,
        _episode_cfg: &Map<String, Value>,
    ) -> Result<(), AdapterError> {
        work(ctx, 1);
        Ok(())
    }

    fn do_get_action(&mut self, _ctx: &HookContext, obs: Observation) -> Result<Value, AdapterError> {
        let values: Vec<f64> = obs
            .get("obs")
            .and_then(Value::as_array)
            .map(|v| v.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        let best = values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or_default();
        Ok(json!({"action": [best]}))
    }

    fn do_replay_action(&mut self, _ctx: &HookContext, _obs: Observation) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_episode_stopped(&mut self, ctx: &HookContext) -> Result<(), AdapterError> {
        work(ctx, 1);
        Ok(())
    }

    fn do_reset(&mut self, _ctx: &HookContext, _unload_model: bool) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct DemoOrchestrator {
    episodes: u32,
}

impl OrchestratorAdapter for DemoOrchestrator {
    fn do_initialize(
        &mut self,
        _ctx: &HookContext,
        _env: &Map<String, Value>,
        _agents_needed: usize,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_register_agent(
        &mut self,
        ctx: &HookContext,
        _agent_name: &str,
        _agent_url: &str,
    ) -> Result<(), AdapterError> {
        work(ctx, 1);
        Ok(())
    }

    fn do_start_episode(
        &mut self,
        ctx: &HookContext,
        _episode_cfg: &Map<String, Value>,
        agents: &BTreeMap<String, AgentRegistration>,
    ) -> Result<(), AdapterError> {
        self.episodes += 1;
        for (round, name) in agents.keys().enumerate() {
            std::thread::sleep(STEP);
            ctx.update_status(json!({"episode": self.episodes, "turn": round + 1, "agent": name}));
        }
        Ok(())
    }

    fn do_stop_episode(&mut self, _ctx: &HookContext) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_save_episode(&mut self, ctx: &HookContext, _path: &str) -> Result<(), AdapterError> {
        work(ctx, 1);
        Ok(())
    }

    fn do_reset(&mut self, _ctx: &HookContext) -> Result<(), AdapterError> {
        self.episodes = 0;
        Ok(())
    }
}

#[derive(Default)]
pub struct DemoEvaluation;

impl EvaluationAdapter for DemoEvaluation {
    fn metrics(&self) -> Vec<Metric> {
        vec![
            Metric::new("accuracy", &["classification"]),
            Metric::new("f1", &["classification"]),
            Metric::new("rmse", &["regression"]),
        ]
    }

    fn do_evaluate(&mut self, ctx: &HookContext, params: EvaluateParams) -> Result<(), AdapterError> {
        let scores: Map<String, Value> = params
            .metrics
            .iter()
            .enumerate()
            .map(|(i, metric)| (metric.clone(), json!(0.9 - 0.05 * i as f64)))
            .collect();
        std::thread::sleep(STEP);
        ctx.update_status(Value::Object(scores));
        Ok(())
    }
}

#[derive(Default)]
pub struct DemoTransform;

impl TransformAdapter for DemoTransform {
    fn do_transform(&mut self, ctx: &HookContext, params: TransformParams) -> Result<(), AdapterError> {
        for (i, dir) in params.input_dirs.iter().enumerate() {
            std::thread::sleep(STEP);
            ctx.update_status(json!({"input": dir, "done": i + 1, "of": params.input_dirs.len()}));
        }
        Ok(())
    }
}

pub fn model_script() -> Vec<Step> {
    vec![
        Step::task("initialize", json!({"objectives": ["accuracy"]})),
        Step::task("load_data", json!({"dataset_map": {"train": {"path": "/data/train"}}})),
        Step::task("build_model", json!({})),
        Step::task("train", Value::Null),
        Step::call("stream_predict", json!({"data_map": {"a": 2.0, "b": -4.0}})),
        Step::task("save_model", json!({"path": "/tmp/demo-model"})),
    ]
}

pub fn agent_script() -> Vec<Step> {
    vec![
        Step::task("initialize", json!({"props": {"name": "demo-agent"}})),
        Step::task("agent_registered", json!({"agent_cfg": {"name": "demo-agent-1"}})),
        Step::task("episode_started", json!({"episode_cfg": {"obs": [0.0, 0.0]}})),
        Step::call("get_action", json!({"obs": {"obs": [0.1, 0.7, 0.2]}})),
        Step::call("get_action", json!({"obs": {"obs": [0.9, 0.0, 0.3]}})),
        Step::task("episode_stopped", Value::Null),
    ]
}

pub fn orchestrator_script() -> Vec<Step> {
    vec![
        Step::task("initialize", json!({"agents_needed": 2})),
        Step::task(
            "register_agent",
            json!({"agent_name": "red", "agent_url": "http://red:8080"}),
        ),
        Step::task(
            "register_agent",
            json!({"agent_name": "blue", "agent_url": "http://blue:8080"}),
        ),
        Step::task("start_episode", json!({"episode_cfg": {"steps": 2}})),
        Step::task("save_episode", json!({"path": "/tmp/episode"})),
        Step::task("stop_episode", Value::Null),
    ]
}

pub fn evaluation_script() -> Vec<Step> {
    vec![Step::task(
        "evaluate",
        json!({
            "assessment_type": "classification",
            "metrics": ["accuracy", "f1"],
            "input_data_path": "/data/predictions",
            "ground_truth_path": "/data/truth",
            "evaluation_path": "/data/eval",
        }),
    )]
}

pub fn transform_script() -> Vec<Step> {
    vec![Step::task(
        "transform",
        json!({"input_dirs": ["/data/a", "/data/b"], "output_dir": "/data/out"}),
    )]
}

/// Constructors for the demo plugins, for use with [`run`].
pub fn model() -> Model {
    Model::new(DemoModel::new())
}

pub fn agent() -> Agent {
    Agent::new("demo-agent", DemoAgent)
}

pub fn orchestrator() -> Orchestrator {
    Orchestrator::new(DemoOrchestrator::default())
}

pub fn evaluation() -> Evaluation {
    Evaluation::new(DemoEvaluation)
}

pub fn transform() -> Transform {
    Transform::new(DemoTransform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    async fn quiet<P: Plugin>(plugin: P, script: Vec<Step>) -> Outcome {
        run(plugin, &RuntimeConfig::default(), script, |_| async {})
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn model_demo_reaches_terminated() {
        let outcome = quiet(model(), model_script()).await;
        assert_eq!(outcome.final_state, "terminated");
        assert_eq!(outcome.tasks, model_script().len() + 1);
        assert_eq!(
            outcome.history.last().map(|t| t.operation.as_str()),
            Some("terminate")
        );
        assert_eq!(outcome.replies.len(), 1);
        let a = outcome.replies[0]["a"].as_f64().unwrap();
        assert!((a - 0.729).abs() < 1e-9, "{a}");
    }

    #[tokio::test]
    async fn agent_demo_picks_the_best_action() {
        let outcome = quiet(agent(), agent_script()).await;
        assert_eq!(
            outcome.replies,
            vec![json!({"action": [1]}), json!({"action": [0]})]
        );
    }

    #[tokio::test]
    async fn remaining_demos_terminate() {
        for outcome in [
            quiet(orchestrator(), orchestrator_script()).await,
            quiet(evaluation(), evaluation_script()).await,
            quiet(transform(), transform_script()).await,
        ] {
            assert_eq!(outcome.final_state, "terminated");
        }
    }

    #[tokio::test]
    async fn watcher_sees_every_state_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        run(
            evaluation(),
            &RuntimeConfig::default(),
            evaluation_script(),
            move |mut watch| async move {
                while let Some(record) = watch.next_record().await {
                    let mut seen = sink.lock();
                    if seen.last() != Some(&record.state) {
                        seen.push(record.state.clone());
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(
            seen.lock().as_slice(),
            &["started", "evaluating", "ready", "terminating", "terminated"]
        );
    }

    #[tokio::test]
    async fn failing_step_is_reported() {
        let script = vec![Step::task("train", Value::Null)];
        let err = run(model(), &RuntimeConfig::default(), script, |_| async {})
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("train invalid from state started"));
    }
}
