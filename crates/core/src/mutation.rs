//! Recreate-in-place environment mutation
//!
//! A container's configuration cannot be changed after creation, so a new
//! environment is applied by recreating the container:
//!
//! 1. **Capture** the configuration, environment, host config and networks
//! 2. **Patch** a working copy of the environment
//! 3. **Stop** the original container
//! 4. **Create** the replacement under a placeholder name
//! 5. **Remove** the original container
//! 6. **Rename** the replacement to the original name
//! 7. **Start** the replacement
//!
//! Stages run strictly in order and are never retried. A failure stops the
//! pipeline where it happened and is reported with the stage, so the operator
//! knows what state the runtime was left in. The original name is held by at
//! most one container at any instant: the replacement only takes it after the
//! original has been removed.

use crate::docker::Docker;
use crate::env::{patch_environment, EnvironmentAssertion, PatchOutcome};
use crate::errors::{MutationError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Capture,
    Patch,
    Stop,
    Create,
    Remove,
    Rename,
    Start,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 7] = [
        Stage::Capture,
        Stage::Patch,
        Stage::Stop,
        Stage::Create,
        Stage::Remove,
        Stage::Rename,
        Stage::Start,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Patch => "patch",
            Self::Stop => "stop",
            Self::Create => "create",
            Self::Remove => "remove",
            Self::Rename => "rename",
            Self::Start => "start",
        }
    }

    /// Whether a failure at this stage happens after the runtime was modified
    pub fn is_after_stop(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Remove | Self::Rename | Self::Start
        )
    }

    /// State the runtime is left in when this stage fails
    pub fn recovery(&self) -> &'static str {
        match self {
            Self::Capture | Self::Patch => "nothing was changed",
            Self::Stop => "the original container is unmodified and still running; safe to retry",
            Self::Create => {
                "the original container is stopped but intact and still holds its name; start it to recover"
            }
            Self::Remove => {
                "the original container is stopped and the replacement exists under its placeholder name; remove one of them"
            }
            Self::Rename => {
                "the original container is gone; the replacement still has its placeholder name and the original name is free"
            }
            Self::Start => "the replacement holds the original name but is not running",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with the rest of a batch after a container fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Attempt every container and report each outcome
    #[default]
    ContinueOnError,
    /// Stop at the first failed container
    FailFast,
}

/// Tuning for the recreate pipeline
#[derive(Debug, Clone, Default)]
pub struct MutationOptions {
    /// Seconds the runtime waits before killing on stop; `None` uses the runtime default
    pub stop_timeout: Option<u32>,
    /// Report an unchanged outcome instead of recreating when the patch changes nothing
    pub skip_unchanged: bool,
    pub policy: BatchPolicy,
}

/// Progress notification emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    StageStarted { container: String, stage: Stage },
    StageCompleted { container: String, stage: Stage },
    StageFailed { container: String, stage: Stage },
    Finished { container: String, new_id: String },
    Skipped { container: String },
}

/// Receiver of engine progress
pub trait MutationObserver: Send + Sync {
    fn on_event(&self, event: &MutationEvent);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl MutationObserver for NoopObserver {
    fn on_event(&self, _event: &MutationEvent) {}
}

static NOOP_OBSERVER: NoopObserver = NoopObserver;

/// Shared cancellation request.
///
/// Honoured only before the Stop stage. Once a container has been stopped
/// the pipeline runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Successful mutation of one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReport {
    /// Container name, preserved across recreation
    pub name: String,
    /// Id before the mutation
    pub old_id: String,
    /// Id after the mutation; equals `old_id` when nothing was recreated
    pub new_id: String,
    /// How the environment was patched
    pub patch: PatchOutcome,
    /// Whether the container was recreated
    pub recreated: bool,
}

/// Outcome of the pipeline for one container
pub type MutationResult = Result<MutationReport, MutationError>;

/// Name the replacement carries until the original is removed
pub fn placeholder_name(original: &str) -> String {
    let base = if original.is_empty() {
        "container"
    } else {
        original
    };
    format!("{}-envpatch-{:08x}", base, fastrand::u32(..))
}

/// Runs the recreate pipeline against a runtime
pub struct MutationEngine<'a, D: ?Sized> {
    docker: &'a D,
    options: MutationOptions,
    observer: &'a dyn MutationObserver,
    cancellation: CancellationFlag,
}

impl<'a, D> MutationEngine<'a, D>
where
    D: Docker + ?Sized,
{
    pub fn new(docker: &'a D) -> Self {
        Self {
            docker,
            options: MutationOptions::default(),
            observer: &NOOP_OBSERVER,
            cancellation: CancellationFlag::default(),
        }
    }

    pub fn with_options(mut self, options: MutationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn MutationObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Apply the assertion to each container in turn.
    ///
    /// Containers are processed sequentially and independently. Results are
    /// returned in input order; under [`BatchPolicy::FailFast`] the list ends
    /// with the first failure, and after a cancellation it ends with the
    /// container that was being processed.
    #[instrument(skip(self, assertion), fields(assertion = %assertion.name()))]
    pub async fn apply(
        &self,
        container_ids: &[String],
        assertion: &EnvironmentAssertion,
    ) -> Vec<MutationResult> {
        let mut results = Vec::with_capacity(container_ids.len());
        for id in container_ids {
            let result = self.apply_one(id, assertion).await;
            let failed = result.is_err();
            results.push(result);
            if self.cancellation.is_cancelled() {
                let remaining = container_ids.len() - results.len();
                if remaining > 0 {
                    info!("Cancelled: {} container(s) not attempted", remaining);
                }
                break;
            }
            if failed && self.options.policy == BatchPolicy::FailFast {
                let remaining = container_ids.len() - results.len();
                if remaining > 0 {
                    info!("Fail-fast: {} container(s) not attempted", remaining);
                }
                break;
            }
        }
        results
    }

    /// Run the full pipeline for one container
    #[instrument(skip(self, assertion), fields(assertion = %assertion.name()))]
    pub async fn apply_one(&self, container_id: &str, assertion: &EnvironmentAssertion) -> MutationResult {
        let handle = self
            .stage(Stage::Capture, container_id, self.docker.inspect_container(container_id))
            .await?;
        let name = handle.name.clone();

        self.emit(MutationEvent::StageStarted {
            container: name.clone(),
            stage: Stage::Patch,
        });
        let mut env = handle.env.clone();
        let patch = patch_environment(&mut env, assertion);
        debug!("Patched environment of {}: {:?}", name, patch);
        self.emit(MutationEvent::StageCompleted {
            container: name.clone(),
            stage: Stage::Patch,
        });

        if self.options.skip_unchanged && !patch.changed() {
            info!("{} already has {}, not recreating", name, assertion);
            self.emit(MutationEvent::Skipped {
                container: name.clone(),
            });
            return Ok(MutationReport {
                name,
                old_id: handle.id.clone(),
                new_id: handle.id,
                patch,
                recreated: false,
            });
        }

        if self.cancellation.is_cancelled() {
            info!("Mutation of {} cancelled before stop", name);
            return Err(MutationError::Cancelled {
                stage: Stage::Stop,
                container: name,
            });
        }

        self.stage(
            Stage::Stop,
            &name,
            self.docker
                .stop_container(&handle.id, self.options.stop_timeout),
        )
        .await?;
        if self.cancellation.is_cancelled() {
            info!("Cancellation requested after {} was stopped; completing recreate", name);
        }

        let placeholder = placeholder_name(&name);
        let spec = handle.to_create_spec(env);
        let new_id = self
            .stage(
                Stage::Create,
                &name,
                self.docker.create_container(&spec, &placeholder),
            )
            .await?;
        debug!("Created {} as {} ({})", name, placeholder, new_id);

        self.stage(
            Stage::Remove,
            &name,
            self.docker.remove_container(&handle.id, true),
        )
        .await?;

        self.stage(
            Stage::Rename,
            &name,
            self.docker.rename_container(&new_id, &name),
        )
        .await?;

        self.stage(Stage::Start, &name, self.docker.start_container(&new_id))
            .await?;

        info!("Recreated {} with {}: {} -> {}", name, assertion.name(), handle.id, new_id);
        self.emit(MutationEvent::Finished {
            container: name.clone(),
            new_id: new_id.clone(),
        });

        Ok(MutationReport {
            name,
            old_id: handle.id,
            new_id,
            patch,
            recreated: true,
        })
    }

    async fn stage<T, F>(&self, stage: Stage, container: &str, call: F) -> Result<T, MutationError>
    where
        F: Future<Output = RuntimeResult<T>>,
    {
        self.emit(MutationEvent::StageStarted {
            container: container.to_string(),
            stage,
        });
        match call.await {
            Ok(value) => {
                debug!("Stage {} completed for {}", stage, container);
                self.emit(MutationEvent::StageCompleted {
                    container: container.to_string(),
                    stage,
                });
                Ok(value)
            }
            Err(source) => {
                warn!(
                    "Stage {} failed for {}: {}; {}",
                    stage,
                    container,
                    source,
                    stage.recovery()
                );
                self.emit(MutationEvent::StageFailed {
                    container: container.to_string(),
                    stage,
                });
                Err(MutationError::StageFailure {
                    stage,
                    container: container.to_string(),
                    source,
                })
            }
        }
    }

    fn emit(&self, event: MutationEvent) {
        self.observer.on_event(&event);
    }
}

/// Apply one assertion to each container with default options
pub async fn apply_environment<D>(
    docker: &D,
    container_ids: &[String],
    assertion: &EnvironmentAssertion,
) -> Vec<MutationResult>
where
    D: Docker + ?Sized,
{
    MutationEngine::new(docker).apply(container_ids, assertion).await
}
