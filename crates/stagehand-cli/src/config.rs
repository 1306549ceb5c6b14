//! Resolved CLI configuration.
//!
//! Database URL resolution follows the chain: CLI flag > env var > default,
//! via [`stagehand_db::config::DbConfig`]. Worker tunables are read straight
//! from the environment via [`stagehand_core::worker::WorkerConfig::from_env`]
//! since the CLI exposes no flags for them beyond `--worker-id`.

use std::path::{Path, PathBuf};

use stagehand_db::config::DbConfig;

/// Fully resolved CLI configuration.
#[derive(Debug)]
pub struct StagehandConfig {
    pub db_config: DbConfig,
}

impl StagehandConfig {
    /// Resolve the database URL using the chain: CLI flag > `STAGEHAND_DATABASE_URL` env var > default.
    pub fn resolve(cli_db_url: Option<&str>) -> Self {
        let db_config = match cli_db_url {
            Some(url) => DbConfig::new(url),
            None => DbConfig::from_env(),
        };
        Self { db_config }
    }
}

/// Directory `workflow` TOML files are loaded from: `STAGEHAND_WORKFLOWS_DIR`
/// env var, falling back to the `workflows/` directory shipped alongside
/// this workspace.
pub fn workflows_dir() -> PathBuf {
    std::env::var("STAGEHAND_WORKFLOWS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_workflows_dir().to_path_buf())
}

fn default_workflows_dir() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../workflows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases share a process-global env var, so exercise them in one
    // test rather than risk interleaving with a parallel test run.
    #[test]
    fn resolve_chain() {
        unsafe { std::env::set_var("STAGEHAND_DATABASE_URL", "postgresql://env:5432/envdb") };
        let config = StagehandConfig::resolve(Some("postgresql://cli:5432/clidb"));
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        unsafe { std::env::remove_var("STAGEHAND_DATABASE_URL") };
        let config = StagehandConfig::resolve(None);
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
    }
}
