//! Transform plugins: turn input directories into an output directory.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AdapterError, TableError};
use crate::hook::{Completion, Hook, HookContext, HookResult, NoArgs};
use crate::runtime::Plugin;
use crate::state_machine::{Blueprint, FAIL, FAILED, State, TERMINATED, all_except, only};

pub const KIND: &str = "TransformInstanceStatus";

const STATES: &[State] = &[
    "started",
    "transforming",
    "ready",
    "resetting",
    "terminating",
    TERMINATED,
    FAILED,
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransformParams {
    pub input_dirs: Vec<String>,
    pub output_dir: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

pub trait TransformAdapter: Send + 'static {
    fn do_transform(&mut self, ctx: &HookContext, params: TransformParams) -> Result<(), AdapterError>;

    fn do_terminate(&mut self, _ctx: &HookContext) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_reset(&mut self, _ctx: &HookContext) -> Result<(), AdapterError> {
        Ok(())
    }
}

pub struct Transform {
    adapter: Box<dyn TransformAdapter>,
}

impl Transform {
    pub fn new(adapter: impl TransformAdapter) -> Self {
        Self {
            adapter: Box::new(adapter),
        }
    }
}

impl Plugin for Transform {
    fn blueprint() -> Result<Blueprint<Self>, TableError> {
        Blueprint::builder(KIND)
            .states(STATES)
            .initial("started")
            .trigger(FAIL, all_except(&[TERMINATED]), FAILED)
            .operation(
                "transform",
                only(&["started", "ready"]),
                "transforming",
                Hook::new(transform),
            )
            .trigger("ready", only(&["transforming"]), "ready")
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

fn transform(plugin: &mut Transform, ctx: &HookContext, params: TransformParams) -> HookResult {
    if params.input_dirs.is_empty() {
        return Err(AdapterError::new("at least one input directory is required"));
    }
    plugin.adapter.do_transform(ctx, params)?;
    Ok(Completion::fire("ready"))
}

fn terminate(plugin: &mut Transform, ctx: &HookContext, _: NoArgs) -> HookResult {
    plugin.adapter.do_terminate(ctx)?;
    Ok(Completion::fire("terminated"))
}

fn reset(plugin: &mut Transform, ctx: &HookContext, _: NoArgs) -> HookResult {
    plugin.adapter.do_reset(ctx)?;
    Ok(Completion::fire("started"))
}
