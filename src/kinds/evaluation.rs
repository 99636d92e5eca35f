//! Evaluation plugins: score predictions against ground truth.
//!
//! An adapter may publish a metric catalogue. When it does, `evaluate`
//! only accepts metrics from that catalogue.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AdapterError, TableError};
use crate::hook::{Completion, Hook, HookContext, HookResult, NoArgs};
use crate::runtime::Plugin;
use crate::state_machine::{Blueprint, FAIL, FAILED, State, TERMINATED, all_except, only};

pub const KIND: &str = "EvaluationInstanceStatus";

const STATES: &[State] = &[
    "started",
    "evaluating",
    "ready",
    "resetting",
    "terminating",
    TERMINATED,
    FAILED,
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvaluateParams {
    pub assessment_type: String,
    #[serde(default)]
    pub metrics: Vec<String>,
    pub input_data_path: String,
    #[serde(default)]
    pub evaluation_input_format: Option<String>,
    pub ground_truth_path: String,
    pub evaluation_path: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// A metric an evaluation plugin can compute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    /// Assessment types the metric applies to, e.g. `classification`.
    #[serde(default)]
    pub assessment_types: Vec<String>,
}

impl Metric {
    pub fn new(name: impl Into<String>, assessment_types: &[&str]) -> Self {
        Self {
            name: name.into(),
            assessment_types: assessment_types.iter().map(|t| t.to_string()).collect(),
        }
    }
}

pub trait EvaluationAdapter: Send + 'static {
    /// Metrics `do_evaluate` can compute. Read once, when the plugin is built.
    fn metrics(&self) -> Vec<Metric> {
        Vec::new()
    }

    fn do_evaluate(&mut self, ctx: &HookContext, params: EvaluateParams) -> Result<(), AdapterError>;

    fn do_terminate(&mut self, _ctx: &HookContext) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_reset(&mut self, _ctx: &HookContext) -> Result<(), AdapterError> {
        Ok(())
    }
}

pub struct Evaluation {
    adapter: Box<dyn EvaluationAdapter>,
    catalogue: Arc<[Metric]>,
}

impl Evaluation {
    pub fn new(adapter: impl EvaluationAdapter) -> Self {
        let catalogue = adapter.metrics().into();
        Self {
            adapter: Box::new(adapter),
            catalogue,
        }
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.catalogue
    }

    /// Every assessment type named by the catalogue, sorted, without repeats.
    pub fn assessment_types(&self) -> Vec<String> {
        self.catalogue
            .iter()
            .flat_map(|metric| metric.assessment_types.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn check_metrics(&self, params: &EvaluateParams) -> Result<(), AdapterError> {
        if self.catalogue.is_empty() {
            return Ok(());
        }
        for name in &params.metrics {
            let Some(metric) = self.catalogue.iter().find(|m| &m.name == name) else {
                return Err(AdapterError::new(format!(
                    "metric {name} is not offered by this plugin"
                )));
            };
            if !metric.assessment_types.is_empty()
                && !metric.assessment_types.contains(&params.assessment_type)
            {
                return Err(AdapterError::new(format!(
                    "metric {name} does not apply to {} assessments",
                    params.assessment_type
                )));
            }
        }
        Ok(())
    }
}

impl Plugin for Evaluation {
    fn blueprint() -> Result<Blueprint<Self>, TableError> {
        Blueprint::builder(KIND)
            .states(STATES)
            .initial("started")
            .trigger(FAIL, all_except(&[TERMINATED]), FAILED)
            .operation("evaluate", only(&["started", "ready"]), "evaluating", Hook::new(evaluate))
            .trigger("ready", only(&["evaluating"]), "ready")
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

fn evaluate(eval: &mut Evaluation, ctx: &HookContext, params: EvaluateParams) -> HookResult {
    tracing::info!(
        assessment = %params.assessment_type,
        metrics = params.metrics.len(),
        "evaluating"
    );
    eval.check_metrics(&params)?;
    eval.adapter.do_evaluate(ctx, params)?;
    Ok(Completion::fire("ready"))
}

fn terminate(eval: &mut Evaluation, ctx: &HookContext, _: NoArgs) -> HookResult {
    eval.adapter.do_terminate(ctx)?;
    Ok(Completion::fire("terminated"))
}

fn reset(eval: &mut Evaluation, ctx: &HookContext, _: NoArgs) -> HookResult {
    eval.adapter.do_reset(ctx)?;
    Ok(Completion::fire("started"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::Runtime;
    use crate::task::TaskStatus;
    use serde_json::json;

    struct Accuracy;

    impl EvaluationAdapter for Accuracy {
        fn do_evaluate(&mut self, ctx: &HookContext, params: EvaluateParams) -> Result<(), AdapterError> {
            if params.metrics.iter().any(|m| m != "accuracy") {
                return Err(AdapterError::new("only accuracy is supported"));
            }
            ctx.update_status(json!({"accuracy": 0.91}));
            Ok(())
        }
    }

    fn params(metric: &str) -> Value {
        json!({
            "assessment_type": "classification",
            "metrics": [metric],
            "input_data_path": "/preds",
            "ground_truth_path": "/truth",
            "evaluation_path": "/out",
        })
    }

    #[tokio::test]
    async fn evaluate_from_started_and_ready() {
        let rt = Runtime::new(Evaluation::new(Accuracy), &RuntimeConfig::default()).unwrap();
        for _ in 0..2 {
            let id = rt.add_task("evaluate", params("accuracy")).unwrap();
            assert_eq!(rt.join_task(&id).await.unwrap().status, TaskStatus::Complete);
            assert_eq!(rt.state(), "ready");
        }
    }

    #[tokio::test]
    async fn missing_required_field_fails_task_only() {
        let rt = Runtime::new(Evaluation::new(Accuracy), &RuntimeConfig::default()).unwrap();
        let id = rt.add_task("evaluate", json!({"assessment_type": "x"})).unwrap();
        let task = rt.join_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(rt.state(), "started");
    }

    struct Catalogued {
        scored: Vec<String>,
    }

    impl EvaluationAdapter for Catalogued {
        fn metrics(&self) -> Vec<Metric> {
            vec![
                Metric::new("accuracy", &["classification"]),
                Metric::new("rmse", &["regression"]),
                Metric::new("f1", &["classification", "multilabel"]),
            ]
        }

        fn do_evaluate(&mut self, _: &HookContext, params: EvaluateParams) -> Result<(), AdapterError> {
            self.scored.extend(params.metrics);
            Ok(())
        }
    }

    #[test]
    fn catalogue_lists_metrics_and_assessment_types() {
        let eval = Evaluation::new(Catalogued { scored: Vec::new() });
        let names: Vec<_> = eval.metrics().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["accuracy", "rmse", "f1"]);
        assert_eq!(eval.assessment_types(), ["classification", "multilabel", "regression"]);

        assert!(Evaluation::new(Accuracy).metrics().is_empty());
        assert!(Evaluation::new(Accuracy).assessment_types().is_empty());
    }

    #[tokio::test]
    async fn metrics_outside_the_catalogue_are_rejected() {
        let rt = Runtime::new(
            Evaluation::new(Catalogued { scored: Vec::new() }),
            &RuntimeConfig::default(),
        )
        .unwrap();

        let id = rt.add_task("evaluate", params("f1")).unwrap();
        rt.join_task(&id).await.unwrap();
        assert_eq!(rt.state(), "ready");

        let id = rt.add_task("evaluate", params("bleu")).unwrap();
        rt.join_task(&id).await.unwrap();
        assert_eq!(rt.state(), FAILED);
        assert_eq!(rt.status().reason(), Some("metric bleu is not offered by this plugin"));

        rt.join_task(&rt.add_task("reset", Value::Null).unwrap()).await.unwrap();
        let id = rt.add_task("evaluate", params("rmse")).unwrap();
        rt.join_task(&id).await.unwrap();
        assert_eq!(
            rt.status().reason(),
            Some("metric rmse does not apply to classification assessments")
        );
        assert_eq!(rt.inspect(|eval| eval.metrics().len()), 3);
    }

    #[tokio::test]
    async fn unsupported_metric_fails_then_resets() {
        let rt = Runtime::new(Evaluation::new(Accuracy), &RuntimeConfig::default()).unwrap();
        let id = rt.add_task("evaluate", params("f1")).unwrap();
        rt.join_task(&id).await.unwrap();
        assert_eq!(rt.state(), FAILED);

        let id = rt.add_task("reset", Value::Null).unwrap();
        rt.join_task(&id).await.unwrap();
        assert_eq!(rt.state(), "started");
    }
}
