//! Reporter that only logs. Used for local runs with no reporting service.

use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::ids::RunId;
use gantry_core::ports::{CoverageReporter, FinalizeRequest};
use gantry_core::run::PartialArtifact;
use tracing::info;

#[derive(Debug, Default, Clone)]
pub struct LogReporter;

impl LogReporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CoverageReporter for LogReporter {
    async fn report_partial(&self, run_id: RunId, artifact: &PartialArtifact) -> Result<()> {
        info!(
            run_id = %run_id,
            instance = %artifact.produced_by,
            artifact = %artifact.name,
            bytes = artifact.payload.len(),
            "Partial coverage received"
        );
        Ok(())
    }

    async fn finalize(&self, request: &FinalizeRequest) -> Result<()> {
        info!(
            run_id = %request.run_id,
            barrier = %request.barrier,
            artifacts = request.artifacts.len(),
            failed = request.failed_contributors.len(),
            "Coverage finalized"
        );
        Ok(())
    }
}
