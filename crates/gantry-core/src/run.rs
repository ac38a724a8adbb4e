//! Run and instance execution types.

use crate::ids::{DescriptorId, InstanceId, RunId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle of a single expanded job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Succeeded | InstanceStatus::Failed | InstanceStatus::Skipped
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InstanceStatus::Succeeded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Ready => "ready",
            InstanceStatus::Running => "running",
            InstanceStatus::Succeeded => "succeeded",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failure,
    Cancelled,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Success => f.write_str("success"),
            RunOutcome::Failure => f.write_str("failure"),
            RunOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Side-channel output of one instance, consumed by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialArtifact {
    pub produced_by: InstanceId,
    pub name: String,
    pub payload: Vec<u8>,
}

/// Raw artifact as returned by an execution backend, before attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPayload {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArtifactPayload {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn attribute(self, produced_by: InstanceId) -> PartialArtifact {
        PartialArtifact {
            produced_by,
            name: self.name,
            payload: self.data,
        }
    }
}

/// One row of the per-instance status table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InstanceRecord {
    pub instance_id: InstanceId,
    pub descriptor_id: DescriptorId,
    pub status: InstanceStatus,
    /// Failure or skip reason.
    pub detail: Option<String>,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl InstanceRecord {
    pub fn new(instance_id: InstanceId, descriptor_id: DescriptorId) -> Self {
        Self {
            instance_id,
            descriptor_id,
            status: InstanceStatus::Pending,
            detail: None,
            exit_code: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }
}

/// What a caller sees when a run ends.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    pub instances: Vec<InstanceRecord>,
    /// Reporting failures; never change the outcome.
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn instance(&self, id: &str) -> Option<&InstanceRecord> {
        self.instances.iter().find(|r| r.instance_id.as_str() == id)
    }

    pub fn status_of(&self, id: &str) -> Option<InstanceStatus> {
        self.instance(id).map(|r| r.status)
    }

    pub fn count(&self, status: InstanceStatus) -> usize {
        self.instances.iter().filter(|r| r.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(InstanceStatus::Succeeded.is_terminal());
        assert!(InstanceStatus::Failed.is_terminal());
        assert!(InstanceStatus::Skipped.is_terminal());
        assert!(!InstanceStatus::Running.is_terminal());
        assert!(!InstanceStatus::Ready.is_terminal());
        assert!(!InstanceStatus::Skipped.is_success());
    }

    #[test]
    fn test_artifact_attribution() {
        let artifact = ArtifactPayload::new("coverage.xml", "<coverage/>")
            .attribute(InstanceId::new("test[3.9]"));
        assert_eq!(artifact.produced_by.as_str(), "test[3.9]");
        assert_eq!(artifact.payload, b"<coverage/>".to_vec());
    }
}
