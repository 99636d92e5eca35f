//! Model plugins: train, predict and persist a learned model.
//!
//! `load_data` returns to `ready` only once a model has been built; before
//! that it settles back in `initialized`.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{AdapterError, TableError};
use crate::hook::{Completion, Hook, HookContext, HookResult, NoArgs};
use crate::runtime::Plugin;
use crate::state_machine::{Blueprint, FAIL, FAILED, State, TERMINATED, all_except, only};

pub const KIND: &str = "ModelInstanceStatus";

const STATES: &[State] = &[
    "started",
    "initializing",
    "initialized",
    "loading_data",
    "building_model",
    "building_ensemble",
    "ready",
    "training",
    "saving_model",
    "predicting",
    "updating_properties",
    "saving_predictions",
    "generating",
    "saving_generations",
    "miniaturizing",
    "resetting",
    "terminating",
    TERMINATED,
    FAILED,
];

/// Busy states that settle in `ready`.
const SETTLE_READY: &[State] = &[
    "loading_data",
    "building_model",
    "building_ensemble",
    "training",
    "saving_model",
    "predicting",
    "updating_properties",
    "saving_predictions",
    "generating",
    "saving_generations",
    "miniaturizing",
];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InitializeParams {
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub props: HashMap<String, Value>,
    #[serde(default)]
    pub hparams: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadDataParams {
    pub dataset_map: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildModelParams {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildEnsembleParams {
    #[serde(default)]
    pub ensemble_path: Option<String>,
    #[serde(default)]
    pub model_paths: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveModelParams {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamPredictParams {
    pub data_map: HashMap<String, Value>,
    #[serde(default)]
    pub details: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamPropertiesParams {
    pub props: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataPathParams {
    #[serde(alias = "dataPath")]
    pub data_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiniaturizeParams {
    #[serde(alias = "dataPath")]
    pub data_path: String,
    #[serde(default)]
    pub include_half_precision: bool,
}

/// Workload code behind a model plugin.
///
/// Methods run on a worker thread inside the matching busy state; an `Err`
/// moves the plugin to `failed` with the error as reason.
pub trait ModelAdapter: Send + 'static {
    fn do_initialize(
        &mut self,
        ctx: &HookContext,
        params: InitializeParams,
    ) -> Result<(), AdapterError>;

    fn do_load_data(
        &mut self,
        ctx: &HookContext,
        dataset_map: HashMap<String, Value>,
    ) -> Result<(), AdapterError>;

    fn do_build_model(
        &mut self,
        ctx: &HookContext,
        path: Option<&str>,
    ) -> Result<(), AdapterError>;

    /// Prepares ensemble members before `do_build_model` runs on the
    /// ensemble path. Nothing to do by default.
    fn do_build_ensemble(
        &mut self,
        _ctx: &HookContext,
        _ensemble_path: Option<&str>,
        _model_paths: &HashMap<String, String>,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_train(&mut self, ctx: &HookContext) -> Result<(), AdapterError>;

    fn do_save_model(&mut self, ctx: &HookContext, path: &str) -> Result<(), AdapterError>;

    fn do_predict(&mut self, ctx: &HookContext) -> Result<(), AdapterError>;

    /// Predicts on inline data and returns the predictions to the caller.
    fn do_stream_predict(
        &mut self,
        _ctx: &HookContext,
        _data_map: HashMap<String, Value>,
        _details: bool,
    ) -> Result<Value, AdapterError> {
        Err(AdapterError::unsupported("stream_predict"))
    }

    fn do_update_stream_properties(
        &mut self,
        _ctx: &HookContext,
        _props: HashMap<String, Value>,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_save_predictions(
        &mut self,
        ctx: &HookContext,
        data_path: &str,
    ) -> Result<(), AdapterError>;

    fn do_generate(&mut self, _ctx: &HookContext) -> Result<(), AdapterError> {
        Err(AdapterError::unsupported("generate"))
    }

    fn do_save_generations(
        &mut self,
        _ctx: &HookContext,
        _data_path: &str,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::unsupported("save_generations"))
    }

    fn do_miniaturize(
        &mut self,
        _ctx: &HookContext,
        _data_path: &str,
        _include_half_precision: bool,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    fn do_terminate(&mut self, ctx: &HookContext) -> Result<(), AdapterError>;

    fn do_reset(&mut self, ctx: &HookContext) -> Result<(), AdapterError>;
}

/// Plugin shell for a model adapter.
pub struct Model {
    adapter: Box<dyn ModelAdapter>,
    built: bool,
}

impl Model {
    pub fn new(adapter: impl ModelAdapter) -> Self {
        Self {
            adapter: Box::new(adapter),
            built: false,
        }
    }

    pub fn is_built(&self) -> bool {
        self.built
    }
}

impl Plugin for Model {
    fn blueprint() -> Result<Blueprint<Self>, TableError> {
        Blueprint::builder(KIND)
            .states(STATES)
            .initial("started")
            .trigger(FAIL, all_except(&[TERMINATED]), FAILED)
            .operation("initialize", only(&["started"]), "initializing", Hook::new(initialize))
            .trigger("initialized", only(&["initializing", "loading_data"]), "initialized")
            .operation(
                "load_data",
                only(&["initialized", "ready"]),
                "loading_data",
                Hook::new(load_data),
            )
            .operation("build_model", only(&["initialized"]), "building_model", Hook::new(build_model))
            .operation(
                "build_ensemble",
                only(&["initialized"]),
                "building_ensemble",
                Hook::new(build_ensemble),
            )
            .trigger("ready", only(SETTLE_READY), "ready")
            .operation("train", only(&["ready"]), "training", Hook::new(train))
            .operation("save_model", only(&["ready"]), "saving_model", Hook::new(save_model))
            .operation("predict", only(&["ready"]), "predicting", Hook::new(predict))
            .operation(
                "stream_predict",
                only(&["ready"]),
                "predicting",
                Hook::new(stream_predict).replying(),
            )
            .operation(
                "update_stream_properties",
                only(&["ready"]),
                "updating_properties",
                Hook::new(update_stream_properties),
            )
            .operation(
                "save_predictions",
                only(&["ready"]),
                "saving_predictions",
                Hook::new(save_predictions),
            )
            .operation("generate", only(&["ready"]), "generating", Hook::new(generate))
            .operation(
                "save_generations",
                only(&["ready"]),
                "saving_generations",
                Hook::new(save_generations),
            )
            .operation("miniaturize", only(&["ready"]), "miniaturizing", Hook::new(miniaturize))
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

fn initialize(model: &mut Model, ctx: &HookContext, params: InitializeParams) -> HookResult {
    model.adapter.do_initialize(ctx, params)?;
    Ok(Completion::fire("initialized"))
}

fn load_data(model: &mut Model, ctx: &HookContext, params: LoadDataParams) -> HookResult {
    model.adapter.do_load_data(ctx, params.dataset_map)?;
    if model.built {
        Ok(Completion::fire("ready"))
    } else {
        Ok(Completion::fire("initialized"))
    }
}

fn build_model(model: &mut Model, ctx: &HookContext, params: BuildModelParams) -> HookResult {
    model.adapter.do_build_model(ctx, params.path.as_deref())?;
    model.built = true;
    Ok(Completion::fire("ready"))
}

fn build_ensemble(model: &mut Model, ctx: &HookContext, params: BuildEnsembleParams) -> HookResult {
    let model_paths = params.model_paths.unwrap_or_default();
    model
        .adapter
        .do_build_ensemble(ctx, params.ensemble_path.as_deref(), &model_paths)?;
    model.adapter.do_build_model(ctx, params.ensemble_path.as_deref())?;
    model.built = true;
    Ok(Completion::fire("ready"))
}

fn train(model: &mut Model, ctx: &HookContext, _: NoArgs) -> HookResult {
    model.adapter.do_train(ctx)?;
    Ok(Completion::fire("ready"))
}

fn save_model(model: &mut Model, ctx: &HookContext, params: SaveModelParams) -> HookResult {
    model.adapter.do_save_model(ctx, &params.path)?;
    Ok(Completion::fire("ready"))
}

fn predict(model: &mut Model, ctx: &HookContext, _: NoArgs) -> HookResult {
    model.adapter.do_predict(ctx)?;
    Ok(Completion::fire("ready"))
}

fn stream_predict(model: &mut Model, ctx: &HookContext, params: StreamPredictParams) -> HookResult {
    let predictions = model
        .adapter
        .do_stream_predict(ctx, params.data_map, params.details)?;
    Ok(Completion::fire("ready").with_reply(predictions))
}

fn update_stream_properties(
    model: &mut Model,
    ctx: &HookContext,
    params: StreamPropertiesParams,
) -> HookResult {
    model.adapter.do_update_stream_properties(ctx, params.props)?;
    Ok(Completion::fire("ready"))
}

fn save_predictions(model: &mut Model, ctx: &HookContext, params: DataPathParams) -> HookResult {
    model.adapter.do_save_predictions(ctx, &params.data_path)?;
    Ok(Completion::fire("ready"))
}

fn generate(model: &mut Model, ctx: &HookContext, _: NoArgs) -> HookResult {
    model.adapter.do_generate(ctx)?;
    Ok(Completion::fire("ready"))
}

fn save_generations(model: &mut Model, ctx: &HookContext, params: DataPathParams) -> HookResult {
    model.adapter.do_save_generations(ctx, &params.data_path)?;
    Ok(Completion::fire("ready"))
}

fn miniaturize(model: &mut Model, ctx: &HookContext, params: MiniaturizeParams) -> HookResult {
    model
        .adapter
        .do_miniaturize(ctx, &params.data_path, params.include_half_precision)?;
    Ok(Completion::fire("ready"))
}

fn terminate(model: &mut Model, ctx: &HookContext, _: NoArgs) -> HookResult {
    model.adapter.do_terminate(ctx)?;
    Ok(Completion::fire("terminated"))
}

fn reset(model: &mut Model, ctx: &HookContext, _: NoArgs) -> HookResult {
    model.adapter.do_reset(ctx)?;
    model.built = false;
    Ok(Completion::fire("started"))
}
