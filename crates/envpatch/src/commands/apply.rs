//! Batch mode: patch every container carrying a name
//!
//! Containers are resolved by exact name and recreated one after another.
//! Already recreated containers are never rolled back when a later one fails.

use crate::cli::OutputFormat;
use crate::ui::spinner::StageSpinner;
use anyhow::Result;
use envpatch_core::directory;
use envpatch_core::docker::Docker;
use envpatch_core::env::EnvironmentAssertion;
use envpatch_core::errors::EnvPatchError;
use envpatch_core::mutation::{
    CancellationFlag, MutationEngine, MutationObserver, MutationOptions, MutationResult,
    NoopObserver, Stage,
};
use serde::Serialize;
use std::io::{IsTerminal, Write};
use tracing::{info, instrument, warn};

/// Arguments of a batch run
#[derive(Debug, Clone)]
pub struct ApplyArgs {
    pub filter: String,
    pub assertion: EnvironmentAssertion,
    pub options: MutationOptions,
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Recreated,
    Unchanged,
    Failed,
}

/// Outcome for one container
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOutcome {
    pub name: String,
    pub old_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_id: Option<String>,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

/// Aggregate outcome of a batch run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub filter: String,
    pub variable: String,
    pub results: Vec<ContainerOutcome>,
    /// Containers skipped after a fail-fast failure or an interrupt
    pub not_attempted: usize,
}

impl ApplyReport {
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == OutcomeStatus::Failed)
            .count()
    }

    pub fn total(&self) -> usize {
        self.results.len() + self.not_attempted
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.not_attempted == 0
    }
}

fn outcome(name: String, old_id: String, result: MutationResult) -> ContainerOutcome {
    match result {
        Ok(report) => ContainerOutcome {
            name,
            old_id,
            status: if report.recreated {
                OutcomeStatus::Recreated
            } else {
                OutcomeStatus::Unchanged
            },
            new_id: Some(report.new_id),
            stage: None,
            error: None,
            recovery: None,
        },
        Err(err) => ContainerOutcome {
            name,
            old_id,
            new_id: None,
            status: OutcomeStatus::Failed,
            stage: Some(err.stage()),
            recovery: Some(err.recovery_hint().to_string()),
            error: Some(err.to_string()),
        },
    }
}

/// Resolve the filter and run the engine over every match.
///
/// Fails before any mutation when the filter matches nothing. A cancelled
/// `cancellation` ends the batch with the container in progress, which is
/// abandoned only if it was not stopped yet.
#[instrument(skip(docker, args, observer, cancellation), fields(filter = %args.filter))]
pub async fn execute_apply<D>(
    docker: &D,
    args: &ApplyArgs,
    observer: &dyn MutationObserver,
    cancellation: CancellationFlag,
) -> Result<ApplyReport, EnvPatchError>
where
    D: Docker + ?Sized,
{
    let matches = directory::resolve(docker, &args.filter).await?;
    let ids: Vec<String> = matches.iter().map(|c| c.id.clone()).collect();
    info!(
        "Applying {} to {} container(s) named {}",
        args.assertion.name(),
        ids.len(),
        args.filter
    );

    let results = MutationEngine::new(docker)
        .with_options(args.options.clone())
        .with_observer(observer)
        .with_cancellation(cancellation)
        .apply(&ids, &args.assertion)
        .await;

    let not_attempted = ids.len() - results.len();
    let results: Vec<ContainerOutcome> = matches
        .into_iter()
        .zip(results)
        .map(|(container, result)| outcome(container.display_name(), container.id, result))
        .collect();

    for failed in results.iter().filter(|r| r.status == OutcomeStatus::Failed) {
        warn!(
            "{} could not be patched: {}",
            failed.name,
            failed.error.as_deref().unwrap_or_default()
        );
    }

    Ok(ApplyReport {
        filter: args.filter.clone(),
        variable: args.assertion.name().to_string(),
        results,
        not_attempted,
    })
}

/// Write the report: `OK` or the JSON document to `out`, failure lines to `err`
pub fn render_report(
    report: &ApplyReport,
    format: OutputFormat,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, report)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            if report.is_success() {
                writeln!(out, "OK")?;
            }
        }
    }

    for failed in report
        .results
        .iter()
        .filter(|r| r.status == OutcomeStatus::Failed)
    {
        writeln!(
            err,
            "{}: {} ({})",
            failed.name,
            failed.error.as_deref().unwrap_or_default(),
            failed.recovery.as_deref().unwrap_or_default()
        )?;
    }
    if report.not_attempted > 0 {
        writeln!(
            err,
            "{} container(s) not attempted",
            report.not_attempted
        )?;
    }
    Ok(())
}

/// Turn Ctrl+C into a cancellation request for the running batch.
///
/// While the listener is installed the interrupt no longer kills the
/// process, so a container that was already stopped is still recreated.
fn interrupt_listener(cancellation: CancellationFlag) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, finishing the container in progress");
                eprintln!("Interrupted: finishing the container in progress");
                cancellation.cancel();
            }
            Err(err) => warn!("Cannot listen for Ctrl+C: {}", err),
        }
    })
}

/// Batch entry point used by the CLI
pub async fn run_apply<D>(docker: &D, args: &ApplyArgs) -> Result<()>
where
    D: Docker + ?Sized,
{
    let spinner_eligible = args.output == OutputFormat::Text && std::io::stderr().is_terminal();
    let spinner = spinner_eligible.then(StageSpinner::new);
    let observer: &dyn MutationObserver = match &spinner {
        Some(spinner) => spinner,
        None => &NoopObserver,
    };

    let cancellation = CancellationFlag::new();
    let interrupt = interrupt_listener(cancellation.clone());
    let report = execute_apply(docker, args, observer, cancellation).await;
    interrupt.abort();
    let report = report?;
    if let Some(spinner) = spinner {
        spinner.finish(report.failed() + report.not_attempted, report.total());
    }

    render_report(
        &report,
        args.output,
        &mut std::io::stdout().lock(),
        &mut std::io::stderr().lock(),
    )?;

    if report.is_success() {
        Ok(())
    } else {
        Err(EnvPatchError::BatchFailed {
            failed: report.failed() + report.not_attempted,
            total: report.total(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envpatch_core::docker::mock::{MockContainer, MockDocker, MockOperation};
    use envpatch_core::errors::RuntimeError;
    use envpatch_core::mutation::BatchPolicy;

    fn args(filter: &str, assignment: &str) -> ApplyArgs {
        ApplyArgs {
            filter: filter.to_string(),
            assertion: EnvironmentAssertion::parse(assignment).unwrap(),
            options: MutationOptions::default(),
            output: OutputFormat::Text,
        }
    }

    async fn run(docker: &MockDocker, batch: &ApplyArgs) -> Result<ApplyReport, EnvPatchError> {
        execute_apply(docker, batch, &NoopObserver, CancellationFlag::new()).await
    }

    fn render(report: &ApplyReport, format: OutputFormat) -> (String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        render_report(report, format, &mut out, &mut err).unwrap();
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_no_match_makes_no_mutation_calls() {
        let docker = MockDocker::with_containers(vec![MockContainer::new("a1", "web-1")]);

        let err = run(&docker, &args("web", "A=1")).await.unwrap_err();

        assert!(matches!(err, EnvPatchError::NoMatchingContainers { .. }));
        assert_eq!(docker.operations(), vec![MockOperation::List]);
    }

    #[tokio::test]
    async fn test_success_prints_ok() {
        let docker = MockDocker::with_containers(vec![
            MockContainer::new("a1", "web-1").with_env(&["FOO=1", "BAR=2"])
        ]);

        let report = run(&docker, &args("web-1", "BAR=3")).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.results[0].status, OutcomeStatus::Recreated);
        let (out, err) = render(&report, OutputFormat::Text);
        assert_eq!(out, "OK\n");
        assert!(err.is_empty());
        assert_eq!(
            docker.container_by_name("web-1").unwrap().env,
            vec!["FOO=1", "BAR=3"]
        );
    }

    #[tokio::test]
    async fn test_failure_is_reported_with_stage() {
        let docker = MockDocker::with_containers(vec![MockContainer::new("a1", "web")]);
        docker.fail_on(
            MockOperation::Create,
            RuntimeError::Engine {
                message: "no space left".to_string(),
            },
        );

        let report = run(&docker, &args("web", "A=1")).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failed(), 1);
        let (out, err) = render(&report, OutputFormat::Text);
        assert!(out.is_empty());
        assert!(err.contains("create stage failed"));
        assert!(err.contains("still holds its name"));
    }

    #[tokio::test]
    async fn test_json_report() {
        let docker = MockDocker::with_containers(vec![
            MockContainer::new("a1", "web").with_env(&["A=1"])
        ]);
        let mut batch = args("web", "A=1");
        batch.options.skip_unchanged = true;
        batch.output = OutputFormat::Json;

        let report = run(&docker, &batch).await.unwrap();
        let (out, _) = render(&report, OutputFormat::Json);
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();

        assert_eq!(json["filter"], "web");
        assert_eq!(json["variable"], "A");
        assert_eq!(json["results"][0]["status"], "unchanged");
        assert_eq!(json["results"][0]["oldId"], "a1");
        assert_eq!(json["results"][0]["newId"], "a1");
        assert_eq!(json["notAttempted"], 0);
        assert!(json["results"][0].get("error").is_none());
    }

    #[tokio::test]
    async fn test_interrupt_before_stop_leaves_containers_running() {
        let docker = MockDocker::with_containers(vec![
            MockContainer::new("a1", "web").with_env(&["A=1"]),
            MockContainer::new("a2", "web").with_env(&["A=1"]),
        ]);
        let cancellation = CancellationFlag::new();
        cancellation.cancel();

        let report = execute_apply(&docker, &args("web", "A=2"), &NoopObserver, cancellation)
            .await
            .unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].status, OutcomeStatus::Failed);
        assert_eq!(report.results[0].stage, Some(Stage::Stop));
        assert_eq!(report.not_attempted, 1);
        assert!(!docker.operations().contains(&MockOperation::Stop));
        assert!(docker
            .containers()
            .iter()
            .all(|c| c.running && c.env == vec!["A=1"]));
    }

    #[tokio::test]
    async fn test_fail_fast_counts_skipped_containers() {
        let docker = MockDocker::with_containers(vec![
            MockContainer::new("a1", "web"),
            MockContainer::new("a2", "web"),
        ]);
        docker.fail_on(
            MockOperation::Stop,
            RuntimeError::Engine {
                message: "stop refused".to_string(),
            },
        );
        let mut batch = args("web", "A=1");
        batch.options.policy = BatchPolicy::FailFast;

        let report = run(&docker, &batch).await.unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.not_attempted, 1);
        assert_eq!(report.total(), 2);
        let (_, err) = render(&report, OutputFormat::Text);
        assert!(err.contains("1 container(s) not attempted"));
    }
}
