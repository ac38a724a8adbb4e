//! Pipeline definition types.
//!
//! These types represent the user-authored `gantry.yaml` configuration:
//! a set of job descriptors, pre-expansion.

use crate::ids::DescriptorId;
use crate::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineDefinition {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub jobs: Vec<JobDescriptor>,
}

impl PipelineDefinition {
    /// Parse a pipeline from YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Look up a descriptor by id.
    pub fn job(&self, id: &str) -> Option<&JobDescriptor> {
        self.jobs.iter().find(|job| job.id.as_str() == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Push,
    PullRequest,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Push => "push",
            TriggerType::PullRequest => "pull_request",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "push" => Ok(TriggerType::Push),
            "pull_request" | "pull-request" | "pr" => Ok(TriggerType::PullRequest),
            other => Err(format!("Unknown trigger type: {}", other)),
        }
    }
}

/// Template for one unit of work. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDescriptor {
    pub id: DescriptorId,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Opaque command handed to the execution backend.
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<Dependency>,
    #[serde(default)]
    pub matrix: Option<MatrixAxis>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Whether artifacts of this job feed the barriers that match it.
    #[serde(default = "default_true")]
    pub coverage: bool,
}

fn default_true() -> bool {
    true
}

impl JobDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: DescriptorId::new(id),
            display_name: None,
            run: None,
            depends_on: vec![],
            matrix: None,
            timeout_seconds: None,
            variables: HashMap::new(),
            coverage: true,
        }
    }

    pub fn with_run(mut self, command: impl Into<String>) -> Self {
        self.run = Some(command.into());
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.depends_on.push(dependency);
        self
    }

    pub fn with_matrix<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.matrix = Some(MatrixAxis {
            axis: default_axis(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Hard dependencies: descriptors whose every instance must succeed.
    pub fn hard_dependencies(&self) -> impl Iterator<Item = &DescriptorId> {
        self.depends_on.iter().filter_map(|dep| match dep {
            Dependency::Job(id) => Some(id),
            Dependency::Barrier { .. } => None,
        })
    }

    /// Fan-in dependencies: descriptors whose every instance must be terminal.
    pub fn barrier_dependencies(&self) -> impl Iterator<Item = &DescriptorId> {
        self.depends_on.iter().filter_map(|dep| match dep {
            Dependency::Barrier { barrier } => Some(barrier),
            Dependency::Job(_) => None,
        })
    }
}

/// A declared dependency on another descriptor.
///
/// In YAML a plain string is a hard dependency; `{ barrier: test }` is a fan-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Dependency {
    Job(DescriptorId),
    Barrier { barrier: DescriptorId },
}

impl Dependency {
    pub fn job(id: impl Into<String>) -> Self {
        Dependency::Job(DescriptorId::new(id))
    }

    pub fn barrier(id: impl Into<String>) -> Self {
        Dependency::Barrier {
            barrier: DescriptorId::new(id),
        }
    }

    pub fn target(&self) -> &DescriptorId {
        match self {
            Dependency::Job(id) => id,
            Dependency::Barrier { barrier } => barrier,
        }
    }
}

/// A single ordered matrix axis.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixAxis {
    #[serde(default = "default_axis")]
    pub axis: String,
    #[serde(deserialize_with = "scalar_strings")]
    #[schemars(with = "Vec<String>")]
    pub values: Vec<String>,
}

fn default_axis() -> String {
    "version".to_string()
}

/// Accept strings, numbers and booleans as matrix values.
///
/// YAML reads an unquoted `3.10` as the float `3.1`; quote such values.
fn scalar_strings<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|value| match value {
            serde_json::Value::String(s) => Ok(s),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            serde_json::Value::Bool(b) => Ok(b.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "matrix values must be scalars, got {}",
                other
            ))),
        })
        .collect()
}
