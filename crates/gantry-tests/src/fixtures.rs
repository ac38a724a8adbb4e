//! Pipeline fixtures.

use gantry_core::pipeline::{Dependency, JobDescriptor, PipelineDefinition};
use gantry_core::RunConfig;
use gantry_scheduler::{PipelineRun, TriggerEvent};
use std::collections::HashMap;

pub const PYTHON_VERSIONS: [&str; 3] = ["3.9", "3.10", "3.11"];

/// Factory for test pipelines.
pub struct PipelineFixture;

impl PipelineFixture {
    /// `lint`, a three-version `test` matrix, and a `report` barrier over `test`.
    pub fn scenario_a() -> Vec<JobDescriptor> {
        vec![
            JobDescriptor::new("lint").with_run("ruff check ."),
            Self::test_matrix(&PYTHON_VERSIONS),
            JobDescriptor::new("report").with_dependency(Dependency::barrier("test")),
        ]
    }

    pub fn test_matrix(versions: &[&str]) -> JobDescriptor {
        JobDescriptor::new("test")
            .with_run("pytest --python ${{ matrix.version }}")
            .with_matrix(versions.iter().copied())
    }

    /// `build -> test[matrix] -> deploy`, with a `report` barrier over `test`.
    pub fn build_test_deploy() -> Vec<JobDescriptor> {
        vec![
            JobDescriptor::new("build").with_run("make"),
            Self::test_matrix(&["a", "b"]).with_dependency(Dependency::job("build")),
            JobDescriptor::new("deploy")
                .with_run("make deploy")
                .with_dependency(Dependency::job("test")),
            JobDescriptor::new("report").with_dependency(Dependency::barrier("test")),
        ]
    }

    /// `n` independent jobs named `job-0` .. `job-{n-1}`.
    pub fn independent(n: usize) -> Vec<JobDescriptor> {
        (0..n)
            .map(|i| JobDescriptor::new(format!("job-{}", i)).with_run("true"))
            .collect()
    }

    pub fn definition(name: &str, jobs: Vec<JobDescriptor>) -> PipelineDefinition {
        PipelineDefinition {
            version: "1".to_string(),
            name: name.to_string(),
            description: None,
            triggers: vec![],
            variables: HashMap::new(),
            jobs,
        }
    }

    /// Plan a run triggered by a push to main.
    pub fn plan(descriptors: &[JobDescriptor], config: &RunConfig) -> PipelineRun {
        PipelineRun::from_descriptors("test-pipeline", descriptors, config, TriggerEvent::push("main"))
            .expect("fixture pipeline should plan")
    }
}
