//! Per-trigger run state: the graph plus the single-writer status table.

use crate::aggregator::ResultAggregator;
use crate::barrier::FanInBarrier;
use crate::dag::{DependencyGraph, EdgeKind, GraphBuilder};
use crate::matrix::MatrixExpander;
use crate::triggers::TriggerEvent;
use chrono::{DateTime, Utc};
use gantry_core::ids::{InstanceId, RunId};
use gantry_core::pipeline::{JobDescriptor, PipelineDefinition};
use gantry_core::run::{InstanceRecord, InstanceStatus, RunOutcome, RunReport};
use gantry_core::{ConfigError, RunConfig};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// State for one pipeline run.
///
/// Statuses are written only through `&mut self`, which the scheduler holds
/// for the duration of a run. Everything else reads snapshots.
#[derive(Debug)]
pub struct PipelineRun {
    id: RunId,
    pipeline_name: String,
    trigger: TriggerEvent,
    variables: HashMap<String, String>,
    graph: DependencyGraph,
    records: Vec<InstanceRecord>,
    positions: HashMap<InstanceId, usize>,
    barriers: Vec<FanInBarrier>,
    aggregators: BTreeMap<InstanceId, ResultAggregator>,
    warnings: Vec<String>,
    outcome: Option<RunOutcome>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Expand and validate a pipeline for one trigger event.
    ///
    /// Every configuration error surfaces here, before anything is dispatched.
    pub fn plan(
        definition: &PipelineDefinition,
        config: &RunConfig,
        trigger: TriggerEvent,
    ) -> Result<Self, ConfigError> {
        let mut run = Self::from_descriptors(&definition.name, &definition.jobs, config, trigger)?;
        run.variables = definition.variables.clone();
        Ok(run)
    }

    /// Plan a run directly from descriptors.
    pub fn from_descriptors(
        name: impl Into<String>,
        descriptors: &[JobDescriptor],
        config: &RunConfig,
        trigger: TriggerEvent,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut descriptors = descriptors.to_vec();
        if !config.matrix_axis_values.is_empty() {
            for descriptor in &mut descriptors {
                if let Some(matrix) = descriptor.matrix.as_mut() {
                    matrix.values = config.matrix_axis_values.clone();
                }
            }
        }

        let expansion = MatrixExpander::new().expand_all(&descriptors)?;
        let graph = GraphBuilder::new().build(expansion)?;

        let records: Vec<InstanceRecord> = graph
            .instances()
            .map(|i| InstanceRecord::new(i.instance_id.clone(), i.descriptor_id.clone()))
            .collect();
        let positions = records
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.instance_id.clone(), pos))
            .collect();

        let barriers: Vec<FanInBarrier> = graph.barriers().iter().map(FanInBarrier::new).collect();

        let mut contributors: BTreeMap<InstanceId, BTreeSet<InstanceId>> = BTreeMap::new();
        for barrier in &barriers {
            let entry = contributors.entry(barrier.target().clone()).or_default();
            entry.extend(
                barrier
                    .matched()
                    .iter()
                    .filter(|id| graph.instance(id).is_some_and(|i| i.contributes))
                    .cloned(),
            );
        }
        let aggregators = contributors
            .into_iter()
            .map(|(target, set)| (target.clone(), ResultAggregator::new(target, set)))
            .collect();

        let run = Self {
            id: RunId::new(),
            pipeline_name: name.into(),
            trigger,
            variables: HashMap::new(),
            graph,
            records,
            positions,
            barriers,
            aggregators,
            warnings: Vec::new(),
            outcome: None,
            started_at: None,
            completed_at: None,
        };

        debug!(
            run_id = %run.id,
            instances = run.records.len(),
            barriers = run.barriers.len(),
            "Planned pipeline run"
        );

        Ok(run)
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn trigger(&self) -> &TriggerEvent {
        &self.trigger
    }

    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn records(&self) -> &[InstanceRecord] {
        &self.records
    }

    pub fn record(&self, id: &InstanceId) -> Option<&InstanceRecord> {
        self.positions.get(id).map(|&pos| &self.records[pos])
    }

    /// Unknown ids read as `Pending`.
    pub fn status(&self, id: &InstanceId) -> InstanceStatus {
        self.record(id)
            .map(|r| r.status)
            .unwrap_or(InstanceStatus::Pending)
    }

    pub fn barriers(&self) -> &[FanInBarrier] {
        &self.barriers
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Snapshot of the run as a caller-facing report.
    ///
    /// Before the run finishes the outcome is whatever the statuses imply so far.
    pub fn report(&self) -> RunReport {
        let started_at = self.started_at.unwrap_or_else(Utc::now);
        let completed_at = self.completed_at.unwrap_or_else(Utc::now);
        RunReport {
            run_id: self.id,
            outcome: self.outcome.unwrap_or_else(|| self.derive_outcome()),
            instances: self.records.clone(),
            warnings: self.warnings.clone(),
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
        }
    }

    // Mutation below is reserved for the scheduler.

    pub(crate) fn begin(&mut self) {
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = Some(outcome);
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    /// `Success` iff every instance succeeded.
    pub(crate) fn derive_outcome(&self) -> RunOutcome {
        if self.records.iter().all(|r| r.status.is_success()) {
            RunOutcome::Success
        } else {
            RunOutcome::Failure
        }
    }

    pub(crate) fn ids_with_status(&self, status: InstanceStatus) -> Vec<InstanceId> {
        self.records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.instance_id.clone())
            .collect()
    }

    fn record_mut(&mut self, id: &InstanceId) -> Option<&mut InstanceRecord> {
        self.positions.get(id).map(|&pos| &mut self.records[pos])
    }

    pub(crate) fn mark_running(&mut self, id: &InstanceId) {
        if let Some(record) = self.record_mut(id) {
            record.status = InstanceStatus::Running;
            record.started_at = Some(Utc::now());
        }
    }

    /// Move an instance to a terminal status. Returns the elapsed time in ms.
    pub(crate) fn complete(
        &mut self,
        id: &InstanceId,
        status: InstanceStatus,
        detail: Option<String>,
        exit_code: Option<i32>,
    ) -> u64 {
        let Some(record) = self.record_mut(id) else {
            return 0;
        };
        let now = Utc::now();
        let duration_ms = record
            .started_at
            .map(|start| (now - start).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        record.status = status;
        record.detail = detail;
        record.exit_code = exit_code;
        record.completed_at = Some(now);
        record.duration_ms = Some(duration_ms);
        duration_ms
    }

    /// Skip every not-yet-started instance that transitively needs `failed` to succeed.
    pub(crate) fn skip_dependents(&mut self, failed: &InstanceId) -> Vec<(InstanceId, String)> {
        let dependents: Vec<InstanceId> = self
            .graph
            .transitive_hard_dependents(failed)
            .into_iter()
            .map(|i| i.instance_id.clone())
            .collect();

        let reason = format!("dependency {} did not succeed", failed);
        let mut skipped = Vec::new();
        for id in dependents {
            if matches!(
                self.status(&id),
                InstanceStatus::Pending | InstanceStatus::Ready
            ) {
                self.complete(&id, InstanceStatus::Skipped, Some(reason.clone()), None);
                skipped.push((id, reason.clone()));
            }
        }
        skipped
    }

    /// Promote `Pending` instances whose dependencies are satisfied to `Ready`.
    ///
    /// Hard dependencies must have succeeded; fan-in barriers need only be armed.
    pub(crate) fn promote_ready(&mut self) -> Vec<InstanceId> {
        let Self {
            graph,
            records,
            positions,
            barriers,
            ..
        } = self;
        let status_of = |id: &InstanceId| {
            positions
                .get(id)
                .map(|&pos| records[pos].status)
                .unwrap_or(InstanceStatus::Pending)
        };

        for barrier in barriers.iter_mut() {
            barrier.observe(status_of);
        }

        let mut promoted = Vec::new();
        for record in records.iter() {
            if record.status != InstanceStatus::Pending {
                continue;
            }
            let id = &record.instance_id;
            let hard_ready = graph
                .dependencies(id, EdgeKind::Hard)
                .iter()
                .all(|dep| status_of(&dep.instance_id).is_success());
            let fan_in_ready = barriers
                .iter()
                .filter(|b| b.target() == id)
                .all(|b| b.is_armed());
            if hard_ready && fan_in_ready {
                promoted.push(id.clone());
            }
        }

        for id in &promoted {
            if let Some(&pos) = positions.get(id) {
                records[pos].status = InstanceStatus::Ready;
            }
        }
        promoted
    }

    /// Barrier targets whose every barrier is armed and none has fired yet.
    ///
    /// The target's own hard dependencies play no part, so a target that was
    /// skipped still gets its finalize.
    pub(crate) fn armed_targets(&self) -> Vec<InstanceId> {
        self.aggregators
            .keys()
            .filter(|target| {
                let mut gating = self
                    .barriers
                    .iter()
                    .filter(|b| b.target() == *target)
                    .peekable();
                gating.peek().is_some() && gating.all(|b| b.is_armed())
            })
            .cloned()
            .collect()
    }

    /// Fire every barrier gating `target`. True if at least one fired now.
    pub(crate) fn fire_barriers(&mut self, target: &InstanceId) -> bool {
        let mut fired = false;
        for barrier in self.barriers.iter_mut().filter(|b| b.target() == target) {
            fired |= barrier.fire();
        }
        fired
    }

    /// Matched upstream instances of `target` that did not succeed, in id order.
    pub(crate) fn failed_contributors(&self, target: &InstanceId) -> Vec<InstanceId> {
        let matched: BTreeSet<&InstanceId> = self
            .barriers
            .iter()
            .filter(|b| b.target() == target)
            .flat_map(|b| b.matched().iter())
            .collect();
        matched
            .into_iter()
            .filter(|id| !self.status(id).is_success())
            .cloned()
            .collect()
    }

    pub(crate) fn aggregator_mut(&mut self, target: &InstanceId) -> Option<&mut ResultAggregator> {
        self.aggregators.get_mut(target)
    }

    pub(crate) fn aggregators_accepting(&self, instance: &InstanceId) -> Vec<InstanceId> {
        self.aggregators
            .values()
            .filter(|agg| agg.accepts(instance))
            .map(|agg| agg.barrier().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::pipeline::Dependency;
    use pretty_assertions::assert_eq;

    fn descriptors() -> Vec<JobDescriptor> {
        vec![
            JobDescriptor::new("lint").with_run("ruff check ."),
            JobDescriptor::new("test")
                .with_run("pytest")
                .with_matrix(["3.9", "3.10", "3.11"]),
            JobDescriptor::new("report").with_dependency(Dependency::barrier("test")),
        ]
    }

    fn plan() -> PipelineRun {
        PipelineRun::from_descriptors(
            "ci",
            &descriptors(),
            &RunConfig::new(2),
            TriggerEvent::push("main"),
        )
        .unwrap()
    }

    fn id(s: &str) -> InstanceId {
        InstanceId::new(s)
    }

    #[test]
    fn test_plan_starts_everything_pending() {
        let run = plan();
        assert_eq!(run.records().len(), 5);
        assert!(run.records().iter().all(|r| r.status == InstanceStatus::Pending));
        assert!(run.armed_targets().is_empty());
        assert!(!run.is_started());
    }

    #[test]
    fn test_plan_rejects_zero_parallelism() {
        let err = PipelineRun::from_descriptors(
            "ci",
            &descriptors(),
            &RunConfig::new(0),
            TriggerEvent::push("main"),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidParallelism(0));
    }

    #[test]
    fn test_plan_rejects_empty_pipeline() {
        let err = PipelineRun::from_descriptors(
            "ci",
            &[],
            &RunConfig::new(1),
            TriggerEvent::push("main"),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::EmptyPipeline);
    }

    #[test]
    fn test_matrix_override_applies_to_every_axis() {
        let config = RunConfig::new(1).with_matrix_values(vec!["3.12".to_string()]);
        let run = PipelineRun::from_descriptors(
            "ci",
            &descriptors(),
            &config,
            TriggerEvent::push("main"),
        )
        .unwrap();
        let ids: Vec<&str> = run.records().iter().map(|r| r.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["lint", "test[3.12]", "report"]);
    }

    #[test]
    fn test_barrier_target_waits_for_all_terminal() {
        let mut run = plan();

        let ready = run.promote_ready();
        assert_eq!(ready.len(), 4);
        assert!(!ready.contains(&id("report")));

        for t in ["test[3.9]", "test[3.11]"] {
            run.complete(&id(t), InstanceStatus::Succeeded, None, Some(0));
        }
        assert!(run.promote_ready().is_empty());

        run.complete(&id("test[3.10]"), InstanceStatus::Failed, None, Some(1));
        assert_eq!(run.promote_ready(), vec![id("report")]);
        assert_eq!(run.armed_targets(), vec![id("report")]);
        assert_eq!(run.failed_contributors(&id("report")), vec![id("test[3.10]")]);

        assert!(run.fire_barriers(&id("report")));
        assert!(!run.fire_barriers(&id("report")));
        assert!(run.armed_targets().is_empty());
    }

    #[test]
    fn test_barrier_arms_when_target_is_skipped() {
        let mut descriptors = descriptors();
        descriptors[2] = JobDescriptor::new("report")
            .with_dependency(Dependency::job("lint"))
            .with_dependency(Dependency::barrier("test"));
        let mut run = PipelineRun::from_descriptors(
            "ci",
            &descriptors,
            &RunConfig::new(2),
            TriggerEvent::push("main"),
        )
        .unwrap();

        run.complete(&id("lint"), InstanceStatus::Failed, None, Some(1));
        run.skip_dependents(&id("lint"));
        assert_eq!(run.status(&id("report")), InstanceStatus::Skipped);

        for t in ["test[3.9]", "test[3.10]", "test[3.11]"] {
            run.complete(&id(t), InstanceStatus::Succeeded, None, Some(0));
        }
        assert!(run.promote_ready().is_empty());
        assert_eq!(run.armed_targets(), vec![id("report")]);
        assert!(run.fire_barriers(&id("report")));
    }

    #[test]
    fn test_skip_dependents_is_transitive() {
        let descriptors = vec![
            JobDescriptor::new("build").with_run("make"),
            JobDescriptor::new("test")
                .with_run("make test")
                .with_dependency(Dependency::job("build")),
            JobDescriptor::new("deploy")
                .with_run("make deploy")
                .with_dependency(Dependency::job("test")),
        ];
        let mut run = PipelineRun::from_descriptors(
            "ci",
            &descriptors,
            &RunConfig::new(1),
            TriggerEvent::push("main"),
        )
        .unwrap();

        run.complete(&id("build"), InstanceStatus::Failed, None, Some(2));
        let skipped: Vec<InstanceId> = run
            .skip_dependents(&id("build"))
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        assert_eq!(skipped, vec![id("test"), id("deploy")]);
        assert_eq!(run.status(&id("deploy")), InstanceStatus::Skipped);
        assert_eq!(run.derive_outcome(), RunOutcome::Failure);
    }
}
