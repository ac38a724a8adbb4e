//! Dependency-respecting dispatch of job instances to an execution backend.

use crate::matrix::JobInstance;
use crate::run::PipelineRun;
use futures::FutureExt;
use gantry_core::events::RunEvent;
use gantry_core::ids::InstanceId;
use gantry_core::interpolation::InterpolationContext;
use gantry_core::ports::{CoverageReporter, ExecutionBackend, JobHandle, JobOutcome, JobSpec};
use gantry_core::run::{InstanceStatus, PartialArtifact, RunOutcome, RunReport};
use gantry_core::{Error, Result, RunConfig};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

/// Create a linked cancellation pair for one run.
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

/// Requests cancellation of a run. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observes cancellation inside the scheduler.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token nobody can cancel.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        let watched = self.rx.wait_for(|cancelled| *cancelled).await.map(|_| ());
        if watched.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// How an in-flight instance ended, as seen from its wait task.
#[derive(Debug)]
enum Completion {
    Finished(JobOutcome),
    TimedOut(Duration),
    Errored(String),
}

/// Walks a run's graph, dispatching at most `parallelism_bound` instances at once.
pub struct Scheduler {
    backend: Arc<dyn ExecutionBackend>,
    reporter: Arc<dyn CoverageReporter>,
    config: RunConfig,
    events: Option<mpsc::Sender<RunEvent>>,
}

impl Scheduler {
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        reporter: Arc<dyn CoverageReporter>,
        config: RunConfig,
    ) -> Self {
        Self {
            backend,
            reporter,
            config,
            events: None,
        }
    }

    /// Publish progress events on `tx`. A slow or closed receiver never blocks the run.
    pub fn with_events(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute a planned run to completion or cancellation.
    pub async fn execute(&self, run: &mut PipelineRun, mut cancel: CancelToken) -> Result<RunReport> {
        self.config.validate()?;
        if run.is_started() {
            return Err(Error::Internal(format!("run {} already executed", run.id())));
        }

        let parallelism = self.config.parallelism_bound;
        run.begin();
        info!(
            run_id = %run.id(),
            pipeline = %run.pipeline_name(),
            instances = run.records().len(),
            parallelism,
            "Starting pipeline run"
        );
        self.emit(RunEvent::RunStarted {
            run_id: run.id(),
            instances: run.records().len(),
            timestamp: chrono::Utc::now(),
        });

        let mut in_flight: JoinSet<(InstanceId, Completion)> = JoinSet::new();
        let mut handles: HashMap<InstanceId, JobHandle> = HashMap::new();
        let mut tasks: HashMap<task::Id, InstanceId> = HashMap::new();
        let mut cancelled = false;

        'schedule: loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            run.promote_ready();
            for target in run.armed_targets() {
                self.fire_barrier(run, &target).await;
            }

            let mut progressed = false;
            for id in run.ids_with_status(InstanceStatus::Ready) {
                if in_flight.len() >= parallelism {
                    break;
                }
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'schedule;
                }
                let Some(instance) = run.graph().instance(&id).cloned() else {
                    continue;
                };

                let Some(command) = instance.command.as_deref() else {
                    run.mark_running(&id);
                    self.finish_instance(run, &id, InstanceStatus::Succeeded, None, None);
                    progressed = true;
                    continue;
                };

                let spec = self.job_spec(run, &instance, command);
                run.mark_running(&id);
                self.emit(RunEvent::InstanceStarted {
                    run_id: run.id(),
                    instance: id.clone(),
                    timestamp: chrono::Utc::now(),
                });
                info!(run_id = %run.id(), instance = %id, "Dispatching instance");

                match self.backend.submit(spec).await {
                    Ok(handle) => {
                        let limit = instance.timeout.or(self.config.job_timeout);
                        let backend = Arc::clone(&self.backend);
                        handles.insert(id.clone(), handle.clone());
                        let task_id = id.clone();
                        let spawned = in_flight.spawn(async move {
                            let completion = AssertUnwindSafe(await_completion(backend, handle, limit))
                                .catch_unwind()
                                .await
                                .unwrap_or_else(|_| {
                                    Completion::Errored("execution task panicked".to_string())
                                });
                            (task_id, completion)
                        });
                        tasks.insert(spawned.id(), id);
                    }
                    Err(e) => {
                        warn!(run_id = %run.id(), instance = %id, error = %e, "Submission failed");
                        self.finish_instance(
                            run,
                            &id,
                            InstanceStatus::Failed,
                            Some(format!("submission failed: {}", e)),
                            None,
                        );
                        progressed = true;
                    }
                }
            }

            // Something finished without a backend round trip; its dependents may be ready.
            if progressed {
                continue;
            }
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                joined = in_flight.join_next_with_id() => match joined {
                    Some(Ok((task_id, (id, completion)))) => {
                        tasks.remove(&task_id);
                        handles.remove(&id);
                        self.on_completion(run, &id, completion).await;
                    }
                    Some(Err(e)) => {
                        error!(run_id = %run.id(), error = %e, "Wait task failed");
                        if let Some(id) = tasks.remove(&e.id()) {
                            handles.remove(&id);
                            self.finish_instance(
                                run,
                                &id,
                                InstanceStatus::Failed,
                                Some(format!("wait task failed: {}", e)),
                                None,
                            );
                        }
                    }
                    None => {}
                },
            }
        }

        let outcome = if cancelled {
            self.cancel_in_flight(run, handles, &mut in_flight).await;
            self.sweep(run, "cancelled");
            RunOutcome::Cancelled
        } else {
            self.sweep(run, "unreachable");
            run.derive_outcome()
        };

        run.finish(outcome);
        let report = run.report();
        info!(
            run_id = %run.id(),
            outcome = %outcome,
            duration_ms = report.duration_ms,
            warnings = report.warnings.len(),
            "Pipeline run finished"
        );
        self.emit(RunEvent::RunCompleted {
            run_id: run.id(),
            outcome,
            duration_ms: report.duration_ms,
        });
        Ok(report)
    }

    async fn on_completion(&self, run: &mut PipelineRun, id: &InstanceId, completion: Completion) {
        match completion {
            Completion::Finished(outcome) if outcome.success => {
                debug!(instance = %id, log_lines = outcome.logs.len(), "Instance succeeded");
                self.finish_instance(run, id, InstanceStatus::Succeeded, None, outcome.exit_code);
                for payload in outcome.artifacts {
                    self.route_artifact(run, payload.attribute(id.clone())).await;
                }
            }
            Completion::Finished(outcome) => {
                let detail = match outcome.exit_code {
                    Some(code) => format!("exited with code {}", code),
                    None => "terminated without exit code".to_string(),
                };
                if let Some(last) = outcome.logs.last() {
                    debug!(instance = %id, last_line = %last, "Instance output");
                }
                self.finish_instance(run, id, InstanceStatus::Failed, Some(detail), outcome.exit_code);
            }
            Completion::TimedOut(limit) => {
                self.finish_instance(
                    run,
                    id,
                    InstanceStatus::Failed,
                    Some(format!("timed out after {:?}", limit)),
                    None,
                );
            }
            Completion::Errored(message) => {
                self.finish_instance(
                    run,
                    id,
                    InstanceStatus::Failed,
                    Some(format!("backend error: {}", message)),
                    None,
                );
            }
        }
    }

    /// Record a terminal status and, on anything but success, skip the hard subtree.
    fn finish_instance(
        &self,
        run: &mut PipelineRun,
        id: &InstanceId,
        status: InstanceStatus,
        detail: Option<String>,
        exit_code: Option<i32>,
    ) {
        let duration_ms = run.complete(id, status, detail.clone(), exit_code);
        match status {
            InstanceStatus::Succeeded => {
                info!(run_id = %run.id(), instance = %id, duration_ms, "Instance succeeded")
            }
            _ => warn!(
                run_id = %run.id(),
                instance = %id,
                status = %status,
                detail = detail.as_deref().unwrap_or(""),
                "Instance did not succeed"
            ),
        }
        self.emit(RunEvent::InstanceCompleted {
            run_id: run.id(),
            instance: id.clone(),
            status,
            detail,
            duration_ms,
        });

        if status != InstanceStatus::Succeeded {
            for (skipped, reason) in run.skip_dependents(id) {
                info!(run_id = %run.id(), instance = %skipped, reason = %reason, "Skipping instance");
                self.emit(RunEvent::InstanceSkipped {
                    run_id: run.id(),
                    instance: skipped,
                    reason,
                });
            }
        }
    }

    /// Hand an artifact to every aggregator that wants it, submitting it once as a partial.
    async fn route_artifact(&self, run: &mut PipelineRun, artifact: PartialArtifact) {
        let targets = run.aggregators_accepting(&artifact.produced_by);
        if targets.is_empty() {
            debug!(
                instance = %artifact.produced_by,
                artifact = %artifact.name,
                "Dropping artifact with no interested barrier"
            );
            return;
        }

        if let Err(e) = self.reporter.report_partial(run.id(), &artifact).await {
            self.record_warning(
                run,
                format!(
                    "partial report for {} ({}) failed: {}",
                    artifact.produced_by, artifact.name, e
                ),
            );
        }

        for target in targets {
            if let Some(aggregator) = run.aggregator_mut(&target) {
                aggregator.collect(artifact.clone());
            }
        }
    }

    /// Fire the barriers gating `target` and issue the single finalize call.
    async fn fire_barrier(&self, run: &mut PipelineRun, target: &InstanceId) {
        if !run.fire_barriers(target) {
            return;
        }
        let run_id = run.id();
        let failed = run.failed_contributors(target);
        let Some(aggregator) = run.aggregator_mut(target) else {
            return;
        };
        let artifacts = aggregator.artifacts().len();

        info!(run_id = %run_id, barrier = %target, artifacts, failed = failed.len(), "Barrier fired");
        let result = aggregator.finalize(self.reporter.as_ref(), run_id, failed).await;
        self.emit(RunEvent::BarrierFired {
            run_id,
            barrier: target.clone(),
            artifacts,
        });
        if let Err(e) = result {
            self.record_warning(run, format!("finalize for {} failed: {}", target, e));
        }
    }

    async fn cancel_in_flight(
        &self,
        run: &PipelineRun,
        handles: HashMap<InstanceId, JobHandle>,
        in_flight: &mut JoinSet<(InstanceId, Completion)>,
    ) {
        info!(run_id = %run.id(), in_flight = handles.len(), "Cancelling run");
        for (id, handle) in handles {
            if let Err(e) = self.backend.cancel(&handle).await {
                warn!(run_id = %run.id(), instance = %id, error = %e, "Backend cancel failed");
            }
        }
        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}
    }

    /// Skip every instance left non-terminal.
    fn sweep(&self, run: &mut PipelineRun, reason: &str) {
        for status in [InstanceStatus::Running, InstanceStatus::Ready, InstanceStatus::Pending] {
            for id in run.ids_with_status(status) {
                if reason == "unreachable" {
                    warn!(run_id = %run.id(), instance = %id, status = %status, "Instance never became ready");
                }
                run.complete(&id, InstanceStatus::Skipped, Some(reason.to_string()), None);
                self.emit(RunEvent::InstanceSkipped {
                    run_id: run.id(),
                    instance: id,
                    reason: reason.to_string(),
                });
            }
        }
    }

    fn record_warning(&self, run: &mut PipelineRun, message: String) {
        warn!(run_id = %run.id(), "{}", message);
        self.emit(RunEvent::ReportingWarning {
            run_id: run.id(),
            message: message.clone(),
        });
        run.warn(message);
    }

    /// Interpolate the command and build the environment for one instance.
    fn job_spec(&self, run: &PipelineRun, instance: &JobInstance, command: &str) -> JobSpec {
        let trigger = run.trigger();
        let mut ctx = InterpolationContext::new();
        ctx.variables = run.variables().clone();
        ctx.job.insert("id".to_string(), instance.descriptor_id.to_string());
        ctx.job.insert("instance".to_string(), instance.instance_id.to_string());
        ctx.trigger.insert("event".to_string(), trigger.kind.to_string());
        ctx.trigger.insert("ref".to_string(), trigger.git_ref.clone());
        if let Some(assignment) = &instance.assignment {
            ctx.matrix.insert(assignment.axis.clone(), assignment.value.clone());
        }

        let job_vars: Vec<(String, String)> = instance
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), ctx.interpolate(v)))
            .collect();
        ctx.variables.extend(job_vars);

        let mut env = ctx.variables.clone();
        env.insert("GANTRY_RUN_ID".to_string(), run.id().to_string());
        env.insert("GANTRY_JOB".to_string(), instance.descriptor_id.to_string());
        env.insert("GANTRY_INSTANCE".to_string(), instance.instance_id.to_string());
        env.insert("GANTRY_TRIGGER_EVENT".to_string(), trigger.kind.to_string());
        env.insert("GANTRY_TRIGGER_REF".to_string(), trigger.git_ref.clone());
        if let Some(assignment) = &instance.assignment {
            let axis = assignment.axis.to_uppercase().replace('-', "_");
            env.insert(format!("GANTRY_MATRIX_{}", axis), assignment.value.clone());
        }

        JobSpec {
            run_id: run.id(),
            instance_id: instance.instance_id.clone(),
            descriptor_id: instance.descriptor_id.clone(),
            command: ctx.interpolate(command),
            env,
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events
            && let Err(e) = tx.try_send(event)
        {
            debug!(error = %e, "Dropped run event");
        }
    }
}

async fn await_completion(
    backend: Arc<dyn ExecutionBackend>,
    handle: JobHandle,
    limit: Option<Duration>,
) -> Completion {
    let result = match limit {
        Some(limit) => match tokio::time::timeout(limit, backend.wait(&handle)).await {
            Ok(result) => result,
            Err(_) => {
                if let Err(e) = backend.cancel(&handle).await {
                    warn!(instance = %handle.instance_id, error = %e, "Cancel after timeout failed");
                }
                return Completion::TimedOut(limit);
            }
        },
        None => backend.wait(&handle).await,
    };

    match result {
        Ok(outcome) => Completion::Finished(outcome),
        Err(e) => Completion::Errored(e.to_string()),
    }
}
