//! Configuration for the workflow execution engine.
//!
//! Precedence: CLI flag > `--config` file > local `alphred.toml` > defaults,
//! following `loop_core::config::Config`'s layering but backed by plain
//! TOML instead of the daemon's bespoke `key=value` format, since Alphred
//! has no shell-script ancestor to stay wire-compatible with.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Engine configuration: the database location plus the design
/// parameters governing the executor, context assembler, and
/// diagnostics recorder.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file. Resolved relative to the
    /// current working directory when not absolute.
    pub db_path: PathBuf,

    /// Iteration bound on the executor's driving loop per run.
    pub max_steps: u32,

    /// Bounded retries for lifecycle control helpers racing the
    /// executor's own transitions.
    pub max_control_precondition_retries: u32,

    /// Context assembler bounds.
    pub max_upstream_artifacts: usize,
    pub max_context_chars: usize,
    pub max_chars_per_artifact: usize,
    pub failure_route_reserved_chars: usize,
    pub retry_summary_reserved_chars: usize,
    pub join_summary_reserved_chars: usize,
    pub min_remaining_chars: usize,

    /// Diagnostics recorder bounds.
    pub max_diagnostic_event_content_chars: usize,
    pub max_diagnostic_payload_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("alphred.db"),
            max_steps: 500,
            max_control_precondition_retries: 5,
            max_upstream_artifacts: 4,
            max_context_chars: 32_000,
            max_chars_per_artifact: 12_000,
            failure_route_reserved_chars: 6_000,
            retry_summary_reserved_chars: 4_000,
            join_summary_reserved_chars: 4_000,
            min_remaining_chars: 1_000,
            max_diagnostic_event_content_chars: 4_000,
            max_diagnostic_payload_chars: 64_000,
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults (any key the file
    /// omits keeps its default value, via `#[serde(default)]`).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load and merge values from a config file into this instance,
    /// overwriting only keys the file actually sets.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        *self = Self::from_file(path)?;
        Ok(())
    }

    /// Resolve `db_path` relative to `workspace_root` if it isn't already
    /// absolute.
    pub fn resolve_paths(&mut self, workspace_root: &Path) {
        if self.db_path.is_relative() {
            self.db_path = workspace_root.join(&self.db_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_spec_bounds() {
        let config = Config::default();
        assert_eq!(config.max_upstream_artifacts, 4);
        assert_eq!(config.max_context_chars, 32_000);
        assert_eq!(config.max_chars_per_artifact, 12_000);
        assert_eq!(config.min_remaining_chars, 1_000);
    }

    #[test]
    fn load_file_overrides_only_present_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("alphred.toml");
        std::fs::write(&path, "max_steps = 10\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.max_upstream_artifacts, 4);
    }

    #[test]
    fn resolve_paths_joins_relative_db_path() {
        let mut config = Config::default();
        config.resolve_paths(Path::new("/workspace"));
        assert_eq!(config.db_path, PathBuf::from("/workspace/alphred.db"));
    }

    #[test]
    fn resolve_paths_leaves_absolute_db_path() {
        let mut config = Config {
            db_path: PathBuf::from("/var/lib/alphred.db"),
            ..Config::default()
        };
        config.resolve_paths(Path::new("/workspace"));
        assert_eq!(config.db_path, PathBuf::from("/var/lib/alphred.db"));
    }
}
