//! Loads `{workflow_key}.toml` files from a directory into validated
//! [`WorkflowDefinition`]s.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::guard;
use super::types::{WorkflowDefinition, WorkflowToml, FINISHED};

#[derive(Debug, Error)]
pub enum WorkflowLoadError {
    #[error("failed to read workflow file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("workflow {key:?} has no stage named {stage:?} (initial_stage)")]
    UnknownInitialStage { key: String, stage: String },

    #[error("workflow {key:?} stage {stage:?} has a transition to unknown target {target:?}")]
    UnknownTransitionTarget {
        key: String,
        stage: String,
        target: String,
    },

    #[error("workflow {key:?} stage {stage:?} has a malformed guard: {guard:?}")]
    MalformedGuard {
        key: String,
        stage: String,
        guard: String,
    },

    #[error("no workflow registered for key {0:?}")]
    NotFound(String),
}

/// Parses and validates a single workflow TOML document.
pub fn parse_workflow(content: &str, path: &Path) -> Result<WorkflowDefinition, WorkflowLoadError> {
    let parsed: WorkflowToml = toml::from_str(content).map_err(|source| WorkflowLoadError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    let definition: WorkflowDefinition = parsed.into();
    validate(&definition)?;
    Ok(definition)
}

fn validate(def: &WorkflowDefinition) -> Result<(), WorkflowLoadError> {
    let stage_ids: HashSet<&str> = def.stages.iter().map(|s| s.id.as_str()).collect();

    if !stage_ids.contains(def.initial_stage.as_str()) {
        return Err(WorkflowLoadError::UnknownInitialStage {
            key: def.key.clone(),
            stage: def.initial_stage.clone(),
        });
    }

    for stage in &def.stages {
        for transition in &stage.transitions {
            if transition.target != FINISHED && !stage_ids.contains(transition.target.as_str()) {
                return Err(WorkflowLoadError::UnknownTransitionTarget {
                    key: def.key.clone(),
                    stage: stage.id.clone(),
                    target: transition.target.clone(),
                });
            }
            if let Some(when) = &transition.when {
                if guard::validate(when).is_err() {
                    return Err(WorkflowLoadError::MalformedGuard {
                        key: def.key.clone(),
                        stage: stage.id.clone(),
                        guard: when.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

/// In-memory registry of workflows loaded from a directory, keyed by `key`.
#[derive(Debug, Clone, Default)]
pub struct WorkflowLoader {
    workflows: HashMap<String, WorkflowDefinition>,
}

impl WorkflowLoader {
    /// Load every `*.toml` file directly under `dir`, one workflow per file.
    pub fn load_dir(dir: &Path) -> Result<Self, WorkflowLoadError> {
        let mut workflows = HashMap::new();
        let entries = std::fs::read_dir(dir).map_err(|source| WorkflowLoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| WorkflowLoadError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|source| WorkflowLoadError::Io {
                path: path.clone(),
                source,
            })?;
            let definition = parse_workflow(&content, &path)?;
            workflows.insert(definition.key.clone(), definition);
        }

        Ok(Self { workflows })
    }

    pub fn get(&self, key: &str) -> Result<&WorkflowDefinition, WorkflowLoadError> {
        self.workflows
            .get(key)
            .ok_or_else(|| WorkflowLoadError::NotFound(key.to_owned()))
    }

    pub fn insert(&mut self, definition: WorkflowDefinition) {
        self.workflows.insert(definition.key.clone(), definition);
    }
}
