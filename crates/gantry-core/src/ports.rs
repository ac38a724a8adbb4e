//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the orchestrator and the
//! external collaborators: the execution backend that actually runs a job's
//! command, and the coverage reporting service.

use crate::ids::{DescriptorId, HandleId, InstanceId, RunId};
use crate::run::{ArtifactPayload, PartialArtifact};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A concrete command submitted to an execution backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub run_id: RunId,
    pub instance_id: InstanceId,
    pub descriptor_id: DescriptorId,
    pub command: String,
    pub env: HashMap<String, String>,
}

/// Opaque reference to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub id: HandleId,
    pub instance_id: InstanceId,
}

impl JobHandle {
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            id: HandleId::new(),
            instance_id,
        }
    }
}

/// Terminal result reported by the backend for one job.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub artifacts: Vec<ArtifactPayload>,
    pub logs: Vec<String>,
}

impl JobOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i32) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            ..Default::default()
        }
    }

    pub fn with_artifact(mut self, artifact: ArtifactPayload) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

/// Runs job commands somewhere: a local shell, a container, another host.
///
/// Retries, if any, are the backend's business.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Start a job without waiting for it.
    async fn submit(&self, spec: JobSpec) -> Result<JobHandle>;

    /// Wait for a submitted job to reach a terminal state.
    async fn wait(&self, handle: &JobHandle) -> Result<JobOutcome>;

    /// Stop a running job. Cancelling a finished job is not an error.
    async fn cancel(&self, handle: &JobHandle) -> Result<()>;
}

/// Everything the finalize call gets to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub run_id: RunId,
    /// The barrier instance that fired.
    pub barrier: InstanceId,
    /// Artifacts in completion order.
    pub artifacts: Vec<PartialArtifact>,
    /// Matched upstream instances that did not succeed.
    pub failed_contributors: Vec<InstanceId>,
}

/// External coverage reporting collaborator.
#[async_trait]
pub trait CoverageReporter: Send + Sync {
    /// Submit one partial result as soon as it is produced.
    async fn report_partial(&self, run_id: RunId, artifact: &PartialArtifact) -> Result<()>;

    /// Close out the report once the whole upstream set is terminal.
    async fn finalize(&self, request: &FinalizeRequest) -> Result<()>;
}
