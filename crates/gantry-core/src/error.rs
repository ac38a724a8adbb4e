//! Error types for Gantry.

use crate::ids::{DescriptorId, InstanceId};
use thiserror::Error;

/// Problems with a pipeline definition or run configuration.
///
/// Always fatal: a run that hits one of these is aborted before any dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Pipeline has no jobs")]
    EmptyPipeline,

    #[error("Duplicate job id: {0}")]
    DuplicateDescriptor(DescriptorId),

    #[error("Job {descriptor} depends on unknown job {dependency}")]
    UnknownDependency {
        descriptor: DescriptorId,
        dependency: DescriptorId,
    },

    #[error("Instance {instance} depends on missing instance {dependency}")]
    DanglingDependency {
        instance: InstanceId,
        dependency: InstanceId,
    },

    #[error("Cycle detected in job dependencies: {}", format_cycle(.cycle))]
    CycleDetected { cycle: Vec<InstanceId> },

    #[error("Job {0} declares a matrix with no values")]
    EmptyMatrix(DescriptorId),

    #[error("Job {descriptor} declares matrix value {value} more than once")]
    DuplicateMatrixValue {
        descriptor: DescriptorId,
        value: String,
    },

    #[error("Barrier on {upstream} for {target} matches no instances")]
    EmptyBarrier {
        target: InstanceId,
        upstream: DescriptorId,
    },

    #[error("Parallelism bound must be at least 1, got {0}")]
    InvalidParallelism(usize),

    #[error("Invalid pipeline definition: {0}")]
    InvalidDefinition(String),
}

fn format_cycle(cycle: &[InstanceId]) -> String {
    let mut parts: Vec<&str> = cycle.iter().map(InstanceId::as_str).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.as_str());
    }
    parts.join(" -> ")
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Execution backend error: {0}")]
    Backend(String),

    #[error("Reporting error: {0}")]
    Reporting(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Whether this error aborts a run before scheduling starts.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_closes_loop() {
        let err = ConfigError::CycleDetected {
            cycle: vec![InstanceId::new("a"), InstanceId::new("b")],
        };
        assert_eq!(
            err.to_string(),
            "Cycle detected in job dependencies: a -> b -> a"
        );
    }
}
