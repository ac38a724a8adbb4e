//! CLI configuration: built-in defaults, then the user config file, then flags.

use crate::commands::RunArgs;
use anyhow::{Context, Result};
use clap::ValueEnum;
use gantry_core::RunConfig;
use gantry_runner::RunnerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PARALLELISM: usize = 4;

/// CLI configuration file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub parallelism: usize,
    pub job_timeout_seconds: Option<u64>,
    pub output_format: OutputFormat,
    pub report: ReportSettings,
    pub runner: RunnerConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            job_timeout_seconds: None,
            output_format: OutputFormat::default(),
            report: ReportSettings::default(),
            runner: RunnerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub url: Option<String>,
    pub token: Option<String>,
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Where coverage goes for a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ReporterChoice {
    Webhook { url: String, token: Option<String> },
    Directory(PathBuf),
    Log,
}

/// Fully resolved settings for `gantry run`.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub run_config: RunConfig,
    pub runner: RunnerConfig,
    pub reporter: ReporterChoice,
    pub output: OutputFormat,
}

impl CliConfig {
    /// Load the user config file, or defaults when there is none.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// `GANTRY_CONFIG`, else `<config dir>/gantry/config.yaml`.
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("GANTRY_CONFIG") {
            return Some(PathBuf::from(path));
        }
        directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("gantry").join("config.yaml"))
    }

    /// Layer command-line flags over this configuration.
    pub fn resolve(&self, args: &RunArgs) -> RunSettings {
        let mut run_config = RunConfig::new(args.parallelism.unwrap_or(self.parallelism))
            .with_matrix_values(args.matrix.clone());
        if let Some(seconds) = args.timeout.or(self.job_timeout_seconds) {
            run_config = run_config.with_job_timeout(Duration::from_secs(seconds));
        }

        let mut runner = self.runner.clone();
        if let Some(workspace) = &args.workspace {
            runner.workspace = workspace.clone();
        }

        let url = args.report_url.clone().or_else(|| self.report.url.clone());
        let dir = args.report_dir.clone().or_else(|| self.report.dir.clone());
        let reporter = match (url, dir) {
            (Some(url), _) => ReporterChoice::Webhook {
                url,
                token: args.report_token.clone().or_else(|| self.report.token.clone()),
            },
            (None, Some(dir)) => ReporterChoice::Directory(dir),
            (None, None) => ReporterChoice::Log,
        };

        RunSettings {
            run_config,
            runner,
            reporter,
            output: args.output.unwrap_or(self.output_format),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    fn args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["gantry"];
        full.extend_from_slice(argv);
        Harness::parse_from(full).run
    }

    #[test]
    fn test_defaults_without_file_or_flags() {
        let settings = CliConfig::default().resolve(&args(&[]));
        assert_eq!(settings.run_config.parallelism_bound, DEFAULT_PARALLELISM);
        assert_eq!(settings.run_config.job_timeout, None);
        assert_eq!(settings.reporter, ReporterChoice::Log);
        assert_eq!(settings.output, OutputFormat::Table);
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "parallelism: 8\njob_timeout_seconds: 60\nreport:\n  dir: /tmp/cov\nrunner:\n  retry_count: 1\n",
        )
        .unwrap();
        let config = CliConfig::load_from(&path).unwrap();

        let from_file = config.resolve(&args(&[]));
        assert_eq!(from_file.run_config.parallelism_bound, 8);
        assert_eq!(from_file.run_config.job_timeout, Some(Duration::from_secs(60)));
        assert_eq!(from_file.reporter, ReporterChoice::Directory(PathBuf::from("/tmp/cov")));
        assert_eq!(from_file.runner.retry_count, 1);

        let from_flags = config.resolve(&args(&[
            "-j",
            "2",
            "--timeout",
            "5",
            "--matrix",
            "3.11,3.12",
            "--report-url",
            "http://cov.local",
            "--output",
            "json",
        ]));
        assert_eq!(from_flags.run_config.parallelism_bound, 2);
        assert_eq!(from_flags.run_config.job_timeout, Some(Duration::from_secs(5)));
        assert_eq!(from_flags.run_config.matrix_axis_values, vec!["3.11", "3.12"]);
        assert_eq!(
            from_flags.reporter,
            ReporterChoice::Webhook {
                url: "http://cov.local".to_string(),
                token: None
            }
        );
        assert_eq!(from_flags.output, OutputFormat::Json);
    }
}
