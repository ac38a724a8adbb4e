//! Command handlers.

use crate::commands::RunArgs;
use crate::config::{CliConfig, OutputFormat, ReporterChoice};
use anyhow::{Context, Result};
use console::style;
use gantry_core::events::RunEvent;
use gantry_core::ports::CoverageReporter;
use gantry_core::run::{InstanceStatus, RunOutcome, RunReport};
use gantry_core::{ConfigError, RunConfig};
use gantry_core::pipeline::PipelineDefinition;
use gantry_report::{DirectoryReporter, LogReporter, WebhookConfig, WebhookReporter};
use gantry_runner::ShellBackend;
use gantry_scheduler::{EdgeKind, PipelineRun, Scheduler, TriggerEvent, TriggerMatcher, cancellation};
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const TEMPLATE: &str = r#"version: "1"
name: python-ci

triggers:
  - type: push
    branches: ["main", "release/*"]
  - type: pull_request

variables:
  PACKAGE: mypkg

jobs:
  - id: lint
    run: ruff check ${{ PACKAGE }}

  - id: test
    matrix:
      axis: version
      values: ["3.9", "3.10", "3.11"]
    timeout_seconds: 900
    run: |
      uv run --python ${{ matrix.version }} pytest --cov=${{ PACKAGE }} --cov-report=xml
      cp coverage.xml "$GANTRY_ARTIFACT_DIR/coverage.xml"

  - id: report
    depends_on:
      - barrier: test
    run: echo "coverage finalized for ${{ trigger.ref }}"
"#;

/// Exit code for an error that escaped a handler.
pub fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    let is_config = err.chain().any(|cause| {
        cause.is::<ConfigError>()
            || cause
                .downcast_ref::<gantry_core::Error>()
                .is_some_and(|e| e.is_config() || matches!(e, gantry_core::Error::Serialization(_)))
    });
    if is_config { ExitCode::from(2) } else { ExitCode::FAILURE }
}

fn exit_code_for_outcome(outcome: RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Success => ExitCode::SUCCESS,
        RunOutcome::Failure => ExitCode::FAILURE,
        RunOutcome::Cancelled => ExitCode::from(130),
    }
}

fn load_definition(path: &Path) -> Result<PipelineDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    PipelineDefinition::from_yaml(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Write a starter pipeline.
pub async fn init(force: bool) -> Result<ExitCode> {
    let path = Path::new("gantry.yaml");

    if path.exists() && !force {
        println!("{} gantry.yaml already exists", style("!").yellow());
        return Ok(ExitCode::SUCCESS);
    }

    tokio::fs::write(path, TEMPLATE).await?;
    println!("{} Created gantry.yaml", style("✓").green());
    Ok(ExitCode::SUCCESS)
}

/// Parse, expand and build the graph without running anything.
pub async fn validate(path: &Path) -> Result<ExitCode> {
    let definition = load_definition(path)?;
    let run = PipelineRun::plan(&definition, &RunConfig::new(1), TriggerEvent::push("main"))
        .with_context(|| format!("validating {}", path.display()))?;

    println!(
        "{} Pipeline \"{}\" is valid",
        style("✓").green(),
        definition.name
    );
    println!("  Descriptors: {}", definition.jobs.len());
    println!("  Instances:   {}", run.graph().len());
    println!("  Barriers:    {}", run.graph().barriers().len());
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Serialize)]
struct PlanEntry {
    instance: String,
    descriptor: String,
    command: Option<String>,
    depends_on: Vec<String>,
    barriers: Vec<String>,
}

/// Print instances in dependency order.
pub async fn plan(path: &Path, matrix: Vec<String>, output: OutputFormat) -> Result<ExitCode> {
    let definition = load_definition(path)?;
    let config = RunConfig::new(1).with_matrix_values(matrix);
    let run = PipelineRun::plan(&definition, &config, TriggerEvent::push("main"))?;
    let graph = run.graph();

    let entries: Vec<PlanEntry> = graph
        .topological_order()?
        .into_iter()
        .map(|instance| PlanEntry {
            instance: instance.instance_id.to_string(),
            descriptor: instance.descriptor_id.to_string(),
            command: instance.command.clone(),
            depends_on: graph
                .dependencies(&instance.instance_id, EdgeKind::Hard)
                .iter()
                .map(|d| d.instance_id.to_string())
                .collect(),
            barriers: graph
                .barriers_for(&instance.instance_id)
                .map(|b| format!("{} ({} instances)", b.upstream, b.matched_upstream().len()))
                .collect(),
        })
        .collect();

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Table => {
            println!(
                "\n{} Plan for {} ({} instances)\n",
                style("▶").cyan().bold(),
                style(&definition.name).bold(),
                entries.len()
            );
            for entry in &entries {
                println!("  {}", style(&entry.instance).bold());
                if !entry.depends_on.is_empty() {
                    println!("      needs   {}", entry.depends_on.join(", "));
                }
                for barrier in &entry.barriers {
                    println!("      waits   all of {}", barrier);
                }
                if entry.command.is_none() {
                    println!("      {}", style("(signal only)").dim());
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Run a pipeline locally with the shell backend.
pub async fn run(config: &CliConfig, args: RunArgs) -> Result<ExitCode> {
    let definition = load_definition(&args.path)?;
    let trigger = TriggerEvent {
        kind: args.event,
        git_ref: args.git_ref.clone(),
    };

    if !TriggerMatcher::new().matches(&definition, &trigger) {
        println!(
            "{} Pipeline \"{}\" is not triggered by {} on {}",
            style("i").blue(),
            definition.name,
            trigger.kind,
            trigger.git_ref
        );
        return Ok(ExitCode::SUCCESS);
    }

    let settings = config.resolve(&args);
    let mut run = PipelineRun::plan(&definition, &settings.run_config, trigger)
        .with_context(|| format!("planning {}", args.path.display()))?;

    let reporter: Arc<dyn CoverageReporter> = match &settings.reporter {
        ReporterChoice::Webhook { url, token } => {
            let mut webhook = WebhookConfig::new(url.clone());
            webhook.token = token.clone();
            Arc::new(WebhookReporter::new(webhook))
        }
        ReporterChoice::Directory(dir) => Arc::new(DirectoryReporter::new(dir.clone())),
        ReporterChoice::Log => Arc::new(LogReporter::new()),
    };
    let backend = Arc::new(ShellBackend::new(settings.runner.clone()));

    let (tx, rx) = mpsc::channel(256);
    let printer = tokio::spawn(print_progress(rx, settings.output == OutputFormat::Table));

    let (cancel, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    if settings.output == OutputFormat::Table {
        println!(
            "\n{} Running pipeline: {} ({} instances, parallelism {})\n",
            style("▶").cyan().bold(),
            style(run.pipeline_name()).bold(),
            run.graph().len(),
            settings.run_config.parallelism_bound
        );
    }

    let scheduler = Scheduler::new(backend, reporter, settings.run_config.clone()).with_events(tx);
    let report = scheduler.execute(&mut run, token).await?;
    drop(scheduler);
    let _ = printer.await;

    info!(run_id = %report.run_id, outcome = %report.outcome, "Run complete");
    match settings.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_report(&report),
    }
    Ok(exit_code_for_outcome(report.outcome))
}

/// Print the pipeline JSON schema.
pub fn schema() -> Result<ExitCode> {
    let schema = schemars::schema_for!(PipelineDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(ExitCode::SUCCESS)
}

async fn print_progress(mut rx: mpsc::Receiver<RunEvent>, enabled: bool) {
    while let Some(event) = rx.recv().await {
        if !enabled {
            continue;
        }
        match event {
            RunEvent::InstanceStarted { instance, .. } => {
                println!("  {} {}", style("▸").cyan(), instance);
            }
            RunEvent::InstanceCompleted {
                instance,
                status,
                detail,
                duration_ms,
                ..
            } => {
                let detail = detail.map(|d| format!(" ({})", d)).unwrap_or_default();
                println!(
                    "  {} {} {}{}",
                    status_icon(status),
                    instance,
                    style(format!("{:.2}s", duration_ms as f64 / 1000.0)).dim(),
                    style(detail).dim()
                );
            }
            RunEvent::InstanceSkipped {
                instance, reason, ..
            } => {
                println!("  {} {} {}", status_icon(InstanceStatus::Skipped), instance, style(reason).dim());
            }
            RunEvent::BarrierFired {
                barrier, artifacts, ..
            } => {
                println!(
                    "  {} barrier {} fired with {} artifact(s)",
                    style("◆").magenta(),
                    barrier,
                    artifacts
                );
            }
            RunEvent::ReportingWarning { message, .. } => {
                println!("  {} {}", style("⚠").yellow(), message);
            }
            RunEvent::RunStarted { .. } | RunEvent::RunCompleted { .. } => {}
        }
    }
}

fn status_icon(status: InstanceStatus) -> console::StyledObject<&'static str> {
    match status {
        InstanceStatus::Succeeded => style("✓").green(),
        InstanceStatus::Failed => style("✗").red(),
        InstanceStatus::Skipped => style("⏭").dim(),
        _ => style("·").dim(),
    }
}

fn print_report(report: &RunReport) {
    println!();
    let width = report
        .instances
        .iter()
        .map(|r| r.instance_id.as_str().len())
        .max()
        .unwrap_or(8);
    for record in &report.instances {
        println!(
            "  {} {:<width$}  {:<9}  {}",
            status_icon(record.status),
            record.instance_id.as_str(),
            record.status.as_str(),
            record.detail.as_deref().unwrap_or(""),
            width = width
        );
    }
    for warning in &report.warnings {
        println!("  {} {}", style("⚠").yellow(), warning);
    }

    println!();
    let seconds = report.duration_ms as f64 / 1000.0;
    match report.outcome {
        RunOutcome::Success => println!(
            "{} Pipeline succeeded in {:.2}s",
            style("✓").green().bold(),
            seconds
        ),
        RunOutcome::Failure => println!(
            "{} Pipeline failed after {:.2}s ({} failed, {} skipped)",
            style("✗").red().bold(),
            seconds,
            report.count(InstanceStatus::Failed),
            report.count(InstanceStatus::Skipped)
        ),
        RunOutcome::Cancelled => println!(
            "{} Pipeline cancelled after {:.2}s",
            style("!").yellow().bold(),
            seconds
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_is_a_valid_pipeline() {
        let definition = PipelineDefinition::from_yaml(TEMPLATE).unwrap();
        let run = PipelineRun::plan(&definition, &RunConfig::new(2), TriggerEvent::push("main")).unwrap();
        assert_eq!(run.graph().len(), 5);
        assert_eq!(run.graph().barriers().len(), 1);
    }

    #[test]
    fn test_config_errors_exit_with_two() {
        let err = anyhow::Error::from(ConfigError::EmptyPipeline).context("planning gantry.yaml");
        assert_eq!(exit_code_for(&err), ExitCode::from(2));

        let err = anyhow::Error::from(gantry_core::Error::Backend("boom".to_string()));
        assert_eq!(exit_code_for(&err), ExitCode::FAILURE);
    }

    #[tokio::test]
    async fn test_validate_reports_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gantry.yaml");
        std::fs::write(
            &path,
            "version: \"1\"\nname: loop\njobs:\n  - id: a\n    run: x\n    depends_on: [b]\n  - id: b\n    run: y\n    depends_on: [a]\n",
        )
        .unwrap();

        let err = validate(&path).await.unwrap_err();
        assert_eq!(exit_code_for(&err), ExitCode::from(2));
        assert!(format!("{:#}", err).contains("a -> b -> a"));
    }
}
