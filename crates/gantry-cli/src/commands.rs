//! CLI command definitions.

use crate::config::OutputFormat;
use clap::{Args, Subcommand};
use gantry_core::pipeline::TriggerType;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter gantry.yaml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a pipeline: parse, expand and build the dependency graph
    Validate {
        /// Path to pipeline file
        #[arg(default_value = "gantry.yaml")]
        path: PathBuf,
    },

    /// Show the expanded instances in dispatch order
    Plan {
        /// Path to pipeline file
        #[arg(default_value = "gantry.yaml")]
        path: PathBuf,

        /// Replace every matrix axis with these values
        #[arg(long, value_delimiter = ',')]
        matrix: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Run a pipeline locally
    Run(RunArgs),

    /// Print the pipeline JSON schema
    Schema,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to pipeline file
    #[arg(default_value = "gantry.yaml")]
    pub path: PathBuf,

    /// Trigger event type
    #[arg(long, default_value = "push", env = "GANTRY_EVENT")]
    pub event: TriggerType,

    /// Git ref the event refers to
    #[arg(long = "ref", default_value = "main", env = "GANTRY_REF")]
    pub git_ref: String,

    /// Maximum concurrently running instances
    #[arg(short = 'j', long, env = "GANTRY_PARALLELISM")]
    pub parallelism: Option<usize>,

    /// Replace every matrix axis with these values
    #[arg(long, value_delimiter = ',')]
    pub matrix: Vec<String>,

    /// Per-instance timeout in seconds for jobs without their own
    #[arg(long, env = "GANTRY_JOB_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Working directory for job commands
    #[arg(long, env = "GANTRY_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Coverage service base URL
    #[arg(long, env = "GANTRY_REPORT_URL")]
    pub report_url: Option<String>,

    /// Bearer token for the coverage service
    #[arg(long, env = "GANTRY_REPORT_TOKEN", hide_env_values = true)]
    pub report_token: Option<String>,

    /// Write coverage to a local directory instead
    #[arg(long, env = "GANTRY_REPORT_DIR")]
    pub report_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    pub output: Option<OutputFormat>,
}
