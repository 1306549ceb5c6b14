//! Workflow stage graph: parsed model, guard evaluator, and TOML loader.

pub mod guard;
pub mod loader;
pub mod types;

pub use guard::{evaluate as evaluate_guard, GuardContext, GuardEvalError};
pub use loader::{WorkflowLoadError, WorkflowLoader};
pub use types::{StageDefinition, StageTransition, WorkflowDefinition};
