//! Parsing tests for pipeline definitions and run configuration.

use gantry_core::pipeline::{Dependency, PipelineDefinition, TriggerType};
use gantry_core::run::{InstanceStatus, RunOutcome};
use gantry_core::RunConfig;
use pretty_assertions::assert_eq;

const WORKFLOW: &str = r#"
version: "1"
name: library-ci
description: lint, a version matrix of tests and a coverage finalizer
triggers:
  - type: push
  - type: pull_request
variables:
  PACKAGE: mylib
jobs:
  - id: lint
    run: flake8 ${{ PACKAGE }}
  - id: test
    run: pytest --cov=${{ PACKAGE }}
    timeout_seconds: 600
    matrix:
      values: ["3.9", "3.10", "3.11"]
    variables:
      PYTHONUNBUFFERED: "1"
  - id: report
    depends_on:
      - barrier: test
"#;

#[test]
fn test_workflow_round_trips_through_yaml() {
    let def = PipelineDefinition::from_yaml(WORKFLOW).expect("parse");
    assert_eq!(def.name, "library-ci");
    assert_eq!(
        def.triggers.iter().map(|t| t.trigger_type).collect::<Vec<_>>(),
        vec![TriggerType::Push, TriggerType::PullRequest]
    );

    let test = def.job("test").unwrap();
    assert_eq!(test.timeout_seconds, Some(600));
    assert_eq!(test.matrix.as_ref().unwrap().axis, "version");
    assert!(test.coverage);

    let yaml = serde_yaml::to_string(&def).expect("serialize");
    let reparsed = PipelineDefinition::from_yaml(&yaml).expect("reparse");
    assert_eq!(
        reparsed.job("report").unwrap().depends_on,
        vec![Dependency::barrier("test")]
    );
}

#[test]
fn test_missing_jobs_is_a_parse_error() {
    let err = PipelineDefinition::from_yaml("version: \"1\"\nname: empty\n").unwrap_err();
    assert!(err.to_string().contains("jobs"));
}

#[test]
fn test_nested_matrix_value_rejected() {
    let yaml = r#"
version: "1"
name: bad
jobs:
  - id: test
    matrix:
      values: [[1, 2]]
"#;
    assert!(PipelineDefinition::from_yaml(yaml).is_err());
}

#[test]
fn test_status_wire_names() {
    assert_eq!(
        serde_json::to_string(&InstanceStatus::Succeeded).unwrap(),
        "\"succeeded\""
    );
    assert_eq!(
        serde_json::to_string(&RunOutcome::Cancelled).unwrap(),
        "\"cancelled\""
    );
}

#[test]
fn test_run_config_from_yaml() {
    let config: RunConfig = serde_yaml::from_str(
        "parallelism_bound: 3\nmatrix_axis_values: [\"3.12\"]\njob_timeout_seconds: 30\n",
    )
    .unwrap();
    assert_eq!(config.parallelism_bound, 3);
    assert_eq!(config.matrix_axis_values, vec!["3.12".to_string()]);
    assert_eq!(config.job_timeout.map(|d| d.as_secs()), Some(30));
}
