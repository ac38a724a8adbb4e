//! Collects partial artifacts for one barrier and issues the single finalize call.

use gantry_core::ids::{InstanceId, RunId};
use gantry_core::ports::{CoverageReporter, FinalizeRequest};
use gantry_core::run::PartialArtifact;
use gantry_core::{Error, Result};
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ResultAggregator {
    barrier: InstanceId,
    contributors: BTreeSet<InstanceId>,
    artifacts: Vec<PartialArtifact>,
    finalized: bool,
}

impl ResultAggregator {
    pub fn new(barrier: InstanceId, contributors: BTreeSet<InstanceId>) -> Self {
        Self {
            barrier,
            contributors,
            artifacts: Vec::new(),
            finalized: false,
        }
    }

    pub fn barrier(&self) -> &InstanceId {
        &self.barrier
    }

    pub fn accepts(&self, instance: &InstanceId) -> bool {
        !self.finalized && self.contributors.contains(instance)
    }

    /// Artifacts collected so far, in completion order.
    pub fn artifacts(&self) -> &[PartialArtifact] {
        &self.artifacts
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Take ownership of an artifact produced by a contributor.
    pub fn collect(&mut self, artifact: PartialArtifact) {
        debug!(
            barrier = %self.barrier,
            instance = %artifact.produced_by,
            artifact = %artifact.name,
            "Collecting partial artifact"
        );
        self.artifacts.push(artifact);
    }

    /// Hand everything collected to the reporter. Callable once.
    pub async fn finalize(
        &mut self,
        reporter: &dyn CoverageReporter,
        run_id: RunId,
        failed_contributors: Vec<InstanceId>,
    ) -> Result<usize> {
        if self.finalized {
            return Err(Error::Internal(format!(
                "barrier {} already finalized",
                self.barrier
            )));
        }
        self.finalized = true;

        let request = FinalizeRequest {
            run_id,
            barrier: self.barrier.clone(),
            artifacts: std::mem::take(&mut self.artifacts),
            failed_contributors,
        };
        let count = request.artifacts.len();

        info!(
            barrier = %self.barrier,
            artifacts = count,
            failed = request.failed_contributors.len(),
            "Finalizing report"
        );
        reporter.finalize(&request).await?;
        Ok(count)
    }
}
