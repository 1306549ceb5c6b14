//! TOML on-disk format and parsed [`WorkflowDefinition`] shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A parsed, validated workflow stage graph.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub key: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub workspace_type: String,
    pub initial_stage: String,
    pub stages: Vec<StageDefinition>,
}

impl WorkflowDefinition {
    pub fn stage(&self, id: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageDefinition {
    pub id: String,
    pub executor: String,
    pub tools: Vec<String>,
    pub requires_approval: bool,
    pub transitions: Vec<StageTransition>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageTransition {
    pub target: String,
    pub when: Option<String>,
}

/// Top-level structure of a `{workflow_key}.toml` file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowToml {
    pub workflow: WorkflowMetaToml,
    #[serde(default)]
    pub stages: Vec<StageToml>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowMetaToml {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_workspace_type")]
    pub workspace_type: String,
    pub initial_stage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageToml {
    pub id: String,
    pub executor: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub transitions: Vec<TransitionToml>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionToml {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

fn default_workspace_type() -> String {
    "default".to_owned()
}

/// The reserved `"finished"` target, not a real stage id.
pub const FINISHED: &str = "finished";

impl From<WorkflowToml> for WorkflowDefinition {
    fn from(toml: WorkflowToml) -> Self {
        WorkflowDefinition {
            key: toml.workflow.key,
            version: toml.workflow.version,
            description: toml.workflow.description,
            workspace_type: toml.workflow.workspace_type,
            initial_stage: toml.workflow.initial_stage,
            stages: toml
                .stages
                .into_iter()
                .map(|s| StageDefinition {
                    id: s.id,
                    executor: s.executor,
                    tools: s.tools,
                    requires_approval: s.requires_approval,
                    transitions: s
                        .transitions
                        .into_iter()
                        .map(|t| StageTransition {
                            target: t.target,
                            when: t.when,
                        })
                        .collect(),
                    metadata: s.metadata,
                })
                .collect(),
        }
    }
}
