//! Shell backend configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the host shell backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Working directory for every command.
    pub workspace: PathBuf,
    /// Parent of the per-instance artifact directories.
    pub artifact_root: PathBuf,
    /// Output lines kept per instance.
    pub log_tail_lines: usize,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            artifact_root: std::env::temp_dir().join("gantry-artifacts"),
            log_tail_lines: 200,
            retry_count: 0,
            retry_delay_ms: 1000,
        }
    }
}

impl RunnerConfig {
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = root.into();
        self
    }

    pub fn with_retries(mut self, count: u32, delay_ms: u64) -> Self {
        self.retry_count = count;
        self.retry_delay_ms = delay_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.log_tail_lines, 200);
        assert_eq!(config.retry_count, 0);
        assert_eq!(config.retry_delay_ms, 1000);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: RunnerConfig = serde_json::from_str(r#"{"retry_count": 2}"#).unwrap();
        assert_eq!(config.retry_count, 2);
        assert_eq!(config.log_tail_lines, 200);
    }
}
