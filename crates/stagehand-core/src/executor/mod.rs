//! Executor dispatch: the [`TaskExecutor`] contract, the registry, and the
//! built-in `noop` and `wait_for_event` executors.

pub mod noop;
pub mod registry;
pub mod types;
pub mod wait_for_event;

pub use noop::NoopExecutor;
pub use registry::ExecutorRegistry;
pub use types::{ExecutionResult, TaskControl, TaskExecutor};
pub use wait_for_event::WaitForEventExecutor;
