//! Scripted collaborators for scheduler tests.

use async_trait::async_trait;
use gantry_core::ids::{HandleId, InstanceId, RunId};
use gantry_core::ports::{
    CoverageReporter, ExecutionBackend, FinalizeRequest, JobHandle, JobOutcome, JobSpec,
};
use gantry_core::run::{ArtifactPayload, PartialArtifact};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scripted job does once awaited.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(i32),
    /// `wait` returns a backend error.
    Error(String),
    /// Never finishes on its own.
    Hang,
    /// `wait` panics.
    Panic,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub behavior: Behavior,
    pub delay: Duration,
    pub artifacts: Vec<ArtifactPayload>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            behavior: Behavior::Succeed,
            delay: Duration::from_millis(5),
            artifacts: Vec::new(),
        }
    }
}

/// Backend that plays back per-instance scripts and records what it saw.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, Script>>,
    default_artifact: Option<String>,
    jobs: Mutex<HashMap<HandleId, JobSpec>>,
    dispatched: Mutex<Vec<InstanceId>>,
    cancelled: Mutex<Vec<InstanceId>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    running_ids: Arc<Mutex<Vec<InstanceId>>>,
}

/// Decrements the running gauge even when the wait future is dropped.
struct RunningGuard {
    running: Arc<AtomicUsize>,
    running_ids: Arc<Mutex<Vec<InstanceId>>>,
    instance: InstanceId,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut ids) = self.running_ids.lock() {
            ids.retain(|id| id != &self.instance);
        }
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful instance without its own artifacts produces one named `name`
    /// whose payload is the instance id.
    pub fn with_default_artifact(mut self, name: impl Into<String>) -> Self {
        self.default_artifact = Some(name.into());
        self
    }

    pub fn script(self, instance: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(instance.to_string(), script);
        self
    }

    pub fn failing(self, instance: &str, exit_code: i32) -> Self {
        self.script(
            instance,
            Script {
                behavior: Behavior::Fail(exit_code),
                ..Default::default()
            },
        )
    }

    pub fn hanging(self, instance: &str) -> Self {
        self.script(
            instance,
            Script {
                behavior: Behavior::Hang,
                ..Default::default()
            },
        )
    }

    pub fn delayed(self, instance: &str, delay: Duration) -> Self {
        self.script(
            instance,
            Script {
                delay,
                ..Default::default()
            },
        )
    }

    /// Instances in submission order.
    pub fn dispatched(&self) -> Vec<InstanceId> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn was_dispatched(&self, instance: &str) -> bool {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .any(|id| id.as_str() == instance)
    }

    pub fn cancelled(&self) -> Vec<InstanceId> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn is_running(&self, instance: &str) -> bool {
        self.running_ids
            .lock()
            .unwrap()
            .iter()
            .any(|id| id.as_str() == instance)
    }

    /// Highest number of simultaneously awaited jobs observed.
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// The `JobSpec` submitted for an instance, if any.
    pub fn spec_for(&self, instance: &str) -> Option<JobSpec> {
        self.jobs
            .lock()
            .unwrap()
            .values()
            .find(|spec| spec.instance_id.as_str() == instance)
            .cloned()
    }

    fn script_for(&self, instance: &InstanceId) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get(instance.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn submit(&self, spec: JobSpec) -> Result<JobHandle> {
        let handle = JobHandle::new(spec.instance_id.clone());
        self.dispatched.lock().unwrap().push(spec.instance_id.clone());
        self.jobs.lock().unwrap().insert(handle.id, spec);
        Ok(handle)
    }

    async fn wait(&self, handle: &JobHandle) -> Result<JobOutcome> {
        let script = self.script_for(&handle.instance_id);

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.running_ids
            .lock()
            .unwrap()
            .push(handle.instance_id.clone());
        let _guard = RunningGuard {
            running: Arc::clone(&self.running),
            running_ids: Arc::clone(&self.running_ids),
            instance: handle.instance_id.clone(),
        };

        tokio::time::sleep(script.delay).await;

        match script.behavior {
            Behavior::Succeed => {
                let mut outcome = JobOutcome::succeeded();
                outcome.artifacts = script.artifacts;
                if outcome.artifacts.is_empty()
                    && let Some(name) = &self.default_artifact
                {
                    outcome.artifacts.push(ArtifactPayload::new(
                        name.clone(),
                        handle.instance_id.as_str().as_bytes().to_vec(),
                    ));
                }
                Ok(outcome)
            }
            Behavior::Fail(code) => Ok(JobOutcome::failed(code)),
            Behavior::Error(message) => Err(Error::Backend(message)),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::Panic => panic!("scripted panic in {}", handle.instance_id),
        }
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        self.cancelled
            .lock()
            .unwrap()
            .push(handle.instance_id.clone());
        Ok(())
    }
}

/// Reporter that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingReporter {
    partials: Mutex<Vec<PartialArtifact>>,
    finals: Mutex<Vec<FinalizeRequest>>,
    fail_partials: bool,
    fail_finalize: bool,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_finalize() -> Self {
        Self {
            fail_finalize: true,
            ..Default::default()
        }
    }

    pub fn failing_partials() -> Self {
        Self {
            fail_partials: true,
            ..Default::default()
        }
    }

    pub fn partials(&self) -> Vec<PartialArtifact> {
        self.partials.lock().unwrap().clone()
    }

    pub fn finalize_requests(&self) -> Vec<FinalizeRequest> {
        self.finals.lock().unwrap().clone()
    }

    pub fn finalize_count(&self) -> usize {
        self.finals.lock().unwrap().len()
    }
}

#[async_trait]
impl CoverageReporter for RecordingReporter {
    async fn report_partial(&self, _run_id: RunId, artifact: &PartialArtifact) -> Result<()> {
        self.partials.lock().unwrap().push(artifact.clone());
        if self.fail_partials {
            return Err(Error::Reporting("partial endpoint unavailable".to_string()));
        }
        Ok(())
    }

    async fn finalize(&self, request: &FinalizeRequest) -> Result<()> {
        self.finals.lock().unwrap().push(request.clone());
        if self.fail_finalize {
            return Err(Error::Reporting("finalize endpoint unavailable".to_string()));
        }
        Ok(())
    }
}
