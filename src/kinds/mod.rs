//! The five plugin kinds and their transition tables.

pub mod agent;
pub mod evaluation;
pub mod model;
pub mod orchestrator;
pub mod transform;

pub use agent::{Agent, AgentAdapter};
pub use evaluation::{Evaluation, EvaluationAdapter};
pub use model::{Model, ModelAdapter};
pub use orchestrator::{Orchestrator, OrchestratorAdapter};
pub use transform::{Transform, TransformAdapter};
