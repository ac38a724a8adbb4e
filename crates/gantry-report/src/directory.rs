//! Reporter that writes coverage to a local directory.

use crate::error::ReportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_core::ids::{InstanceId, RunId};
use gantry_core::ports::{CoverageReporter, FinalizeRequest};
use gantry_core::run::PartialArtifact;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MANIFEST_DIR: &str = "manifests";

/// Written once per finalize, one file per barrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: RunId,
    pub barrier: InstanceId,
    pub artifacts: Vec<ManifestEntry>,
    pub failed_contributors: Vec<InstanceId>,
    pub finalized_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub instance: InstanceId,
    pub name: String,
    /// Relative to the reporter directory.
    pub path: PathBuf,
    pub bytes: usize,
}

/// `<dir>/<instance>/<name>` per partial, `<dir>/manifests/<barrier>.json` on finalize.
#[derive(Debug, Clone)]
pub struct DirectoryReporter {
    dir: PathBuf,
}

impl DirectoryReporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the manifest for `barrier` is written.
    pub fn manifest_path(&self, barrier: &InstanceId) -> PathBuf {
        let file = barrier.as_str().replace(['/', '\\'], "_");
        self.dir.join(MANIFEST_DIR).join(format!("{}.json", file))
    }

    fn relative_path(artifact: &PartialArtifact) -> PathBuf {
        let name = Path::new(&artifact.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        PathBuf::from(artifact.produced_by.as_str()).join(name)
    }

    async fn write_partial(&self, artifact: &PartialArtifact) -> Result<PathBuf, ReportError> {
        let relative = Self::relative_path(artifact);
        let full = self.dir.join(&relative);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, &artifact.payload).await?;
        debug!(path = %full.display(), "Wrote partial coverage");
        Ok(relative)
    }

    async fn write_manifest(&self, request: &FinalizeRequest) -> Result<PathBuf, ReportError> {
        let manifest = Manifest {
            run_id: request.run_id,
            barrier: request.barrier.clone(),
            artifacts: request
                .artifacts
                .iter()
                .map(|a| ManifestEntry {
                    instance: a.produced_by.clone(),
                    name: a.name.clone(),
                    path: Self::relative_path(a),
                    bytes: a.payload.len(),
                })
                .collect(),
            failed_contributors: request.failed_contributors.clone(),
            finalized_at: Utc::now(),
        };

        let path = self.manifest_path(&request.barrier);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_vec_pretty(&manifest)?).await?;
        Ok(path)
    }
}

#[async_trait]
impl CoverageReporter for DirectoryReporter {
    async fn report_partial(&self, _run_id: RunId, artifact: &PartialArtifact) -> gantry_core::Result<()> {
        self.write_partial(artifact).await?;
        Ok(())
    }

    async fn finalize(&self, request: &FinalizeRequest) -> gantry_core::Result<()> {
        let path = self.write_manifest(request).await?;
        info!(path = %path.display(), artifacts = request.artifacts.len(), "Wrote coverage manifest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn artifact(instance: &str, name: &str) -> PartialArtifact {
        PartialArtifact {
            produced_by: InstanceId::new(instance),
            name: name.to_string(),
            payload: instance.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_partial_written_per_instance() {
        let dir = TempDir::new().unwrap();
        let reporter = DirectoryReporter::new(dir.path());

        reporter
            .report_partial(RunId::new(), &artifact("test[3.9]", "coverage.xml"))
            .await
            .unwrap();

        let written = std::fs::read(dir.path().join("test[3.9]").join("coverage.xml")).unwrap();
        assert_eq!(written, b"test[3.9]".to_vec());
    }

    #[tokio::test]
    async fn test_artifact_name_cannot_escape_directory() {
        let dir = TempDir::new().unwrap();
        let reporter = DirectoryReporter::new(dir.path().join("out"));

        reporter
            .report_partial(RunId::new(), &artifact("lint", "../../evil.txt"))
            .await
            .unwrap();

        assert!(dir.path().join("out").join("lint").join("evil.txt").exists());
    }

    #[tokio::test]
    async fn test_finalize_writes_manifest() {
        let dir = TempDir::new().unwrap();
        let reporter = DirectoryReporter::new(dir.path());
        let request = FinalizeRequest {
            run_id: RunId::new(),
            barrier: InstanceId::new("report"),
            artifacts: vec![
                artifact("test[3.11]", "coverage.xml"),
                artifact("test[3.9]", "coverage.xml"),
            ],
            failed_contributors: vec![InstanceId::new("test[3.10]")],
        };

        reporter.finalize(&request).await.unwrap();

        let raw = std::fs::read(dir.path().join(MANIFEST_DIR).join("report.json")).unwrap();
        let manifest: Manifest = serde_json::from_slice(&raw).unwrap();
        assert_eq!(manifest.run_id, request.run_id);
        assert_eq!(manifest.artifacts.len(), 2);
        assert_eq!(manifest.artifacts[0].instance.as_str(), "test[3.11]");
        assert_eq!(
            manifest.artifacts[1].path,
            PathBuf::from("test[3.9]").join("coverage.xml")
        );
        assert_eq!(manifest.failed_contributors, vec![InstanceId::new("test[3.10]")]);
    }

    #[tokio::test]
    async fn test_each_barrier_gets_its_own_manifest() {
        let dir = TempDir::new().unwrap();
        let reporter = DirectoryReporter::new(dir.path());
        let run_id = RunId::new();

        for (barrier, producer) in [("report[a]", "test[a]"), ("report[b]", "test[b]")] {
            let request = FinalizeRequest {
                run_id,
                barrier: InstanceId::new(barrier),
                artifacts: vec![artifact(producer, "coverage.xml")],
                failed_contributors: vec![],
            };
            reporter.finalize(&request).await.unwrap();
        }

        for (barrier, producer) in [("report[a]", "test[a]"), ("report[b]", "test[b]")] {
            let path = reporter.manifest_path(&InstanceId::new(barrier));
            let manifest: Manifest = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
            assert_eq!(manifest.barrier.as_str(), barrier);
            assert_eq!(manifest.artifacts.len(), 1);
            assert_eq!(manifest.artifacts[0].instance.as_str(), producer);
        }
    }
}
