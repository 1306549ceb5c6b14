//! A named collection of available [`TaskExecutor`] implementations.

use std::collections::HashMap;

use super::types::TaskExecutor;

/// Maps a task's `task_key` to the executor that carries it out.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Box<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under the name returned by [`TaskExecutor::name`].
    /// Replaces and returns any executor previously registered under that name.
    pub fn register(&mut self, executor: impl TaskExecutor + 'static) -> Option<Box<dyn TaskExecutor>> {
        let name = executor.name().to_string();
        self.executors.insert(name, Box::new(executor))
    }

    pub fn get(&self, name: &str) -> Option<&dyn TaskExecutor> {
        self.executors.get(name).map(|b| b.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.executors.keys().map(|s| s.as_str()).collect()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::types::ExecutionResult;
    use async_trait::async_trait;
    use stagehand_db::models::{Task, Ticket};

    struct FakeExecutor {
        executor_name: String,
    }

    #[async_trait]
    impl TaskExecutor for FakeExecutor {
        fn name(&self) -> &str {
            &self.executor_name
        }

        async fn execute(&self, _ticket: &Ticket, _task: &Task) -> ExecutionResult {
            ExecutionResult::success("ok", serde_json::Value::Object(Default::default()))
        }
    }

    #[test]
    fn registry_starts_empty() {
        let registry = ExecutorRegistry::new();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn register_and_get() {
        let mut registry = ExecutorRegistry::new();
        registry.register(FakeExecutor {
            executor_name: "alpha".into(),
        });
        assert_eq!(registry.get("alpha").unwrap().name(), "alpha");
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = ExecutorRegistry::new();
        registry.register(FakeExecutor { executor_name: "alpha".into() });
        let old = registry.register(FakeExecutor { executor_name: "alpha".into() });
        assert!(old.is_some());
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn get_missing_returns_none() {
        let registry = ExecutorRegistry::new();
        assert!(registry.get("missing").is_none());
    }
}
