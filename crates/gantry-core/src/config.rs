//! Run configuration accepted by the orchestrator.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single pipeline run.
///
/// There is deliberately no `Default`: callers must choose a parallelism bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum number of instances in flight at once.
    pub parallelism_bound: usize,
    /// Replaces every matrix axis' values when non-empty.
    #[serde(default)]
    pub matrix_axis_values: Vec<String>,
    /// Deadline for instances whose job declares none.
    #[serde(
        default,
        rename = "job_timeout_seconds",
        with = "duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub job_timeout: Option<Duration>,
}

impl RunConfig {
    pub fn new(parallelism_bound: usize) -> Self {
        Self {
            parallelism_bound,
            matrix_axis_values: vec![],
            job_timeout: None,
        }
    }

    pub fn with_matrix_values(mut self, values: Vec<String>) -> Self {
        self.matrix_axis_values = values;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism_bound == 0 {
            return Err(ConfigError::InvalidParallelism(self.parallelism_bound));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
