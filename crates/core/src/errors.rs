//! Error types and handling
//!
//! The taxonomy follows the operations of the tool: remote calls against the
//! container runtime fail with a [`RuntimeError`], the recreate pipeline wraps
//! those in a stage-tagged [`MutationError`], and malformed `NAME=VALUE` input
//! is reported as an [`AssertionError`]. Everything is gathered under
//! [`EnvPatchError`] for callers that only need a single error type.

use crate::mutation::Stage;
use thiserror::Error;

/// Errors reported by the container runtime collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime could not be reached at all
    #[error("Container runtime is not reachable: {message}")]
    Connectivity { message: String },

    /// The referenced container id or name no longer resolves
    #[error("Container not found: {id}")]
    NotFound { id: String },

    /// The runtime rejected the call because of a concurrent state change
    #[error("Conflicting container state: {message}")]
    Conflict { message: String },

    /// Any other error reported by the runtime
    #[error("Runtime error: {message}")]
    Engine { message: String },
}

impl RuntimeError {
    /// Whether the error means the target no longer exists
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the error means the runtime is unreachable
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}

/// Invalid `NAME=VALUE` input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssertionError {
    /// The input has no `=` separator
    #[error("Invalid environment assignment '{input}': expected NAME=VALUE")]
    MissingSeparator { input: String },

    /// The variable name is empty
    #[error("Invalid environment assignment: variable name is empty")]
    EmptyName,

    /// The variable name contains `=`
    #[error("Invalid variable name '{name}': must not contain '='")]
    NameContainsSeparator { name: String },
}

/// Failure of the recreate pipeline for a single container
#[derive(Error, Debug)]
pub enum MutationError {
    /// A pipeline stage failed; later stages were not attempted
    #[error("{stage} stage failed for container {container}: {source}")]
    StageFailure {
        stage: Stage,
        container: String,
        #[source]
        source: RuntimeError,
    },

    /// The mutation was cancelled before the container was stopped
    #[error("Mutation of container {container} cancelled before the {stage} stage")]
    Cancelled { stage: Stage, container: String },
}

impl MutationError {
    /// Stage at which the pipeline stopped
    pub fn stage(&self) -> Stage {
        match self {
            Self::StageFailure { stage, .. } | Self::Cancelled { stage, .. } => *stage,
        }
    }

    /// Container the failed mutation targeted
    pub fn container(&self) -> &str {
        match self {
            Self::StageFailure { container, .. } | Self::Cancelled { container, .. } => container,
        }
    }

    /// Whether the runtime was left untouched by the failed mutation
    pub fn left_untouched(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::StageFailure { stage, .. } => !stage.is_after_stop(),
        }
    }

    /// Operator-facing description of the state the failure left behind
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::Cancelled { .. } => "nothing was changed",
            Self::StageFailure { stage, .. } => stage.recovery(),
        }
    }
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum EnvPatchError {
    /// Container runtime errors
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Recreate pipeline errors
    #[error("Mutation error: {0}")]
    Mutation(#[from] MutationError),

    /// Malformed environment assignment
    #[error("{0}")]
    Assertion(#[from] AssertionError),

    /// A name filter matched nothing
    #[error("No containers found matching name '{filter}'")]
    NoMatchingContainers { filter: String },

    /// Some containers of a batch could not be patched
    #[error("{failed} of {total} container(s) could not be patched")]
    BatchFailed { failed: usize, total: usize },

    /// Invalid runtime selection or endpoint
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EnvPatchError {
    /// Whether the error was caused by invalid user input rather than the runtime
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::Assertion(_) | Self::Configuration(_))
    }
}

/// Convenience type alias for Results with EnvPatchError
pub type Result<T> = std::result::Result<T, EnvPatchError>;

/// Convenience type alias for runtime collaborator results
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_runtime_error_display() {
        let error = RuntimeError::NotFound {
            id: "abc123".to_string(),
        };
        assert_eq!(format!("{}", error), "Container not found: abc123");

        let error = RuntimeError::Connectivity {
            message: "connection refused".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Container runtime is not reachable: connection refused"
        );
        assert!(error.is_connectivity());
        assert!(!error.is_not_found());
    }

    #[test]
    fn test_assertion_error_display() {
        let error = AssertionError::MissingSeparator {
            input: "FOO".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Invalid environment assignment 'FOO': expected NAME=VALUE"
        );
        assert_eq!(
            format!("{}", AssertionError::EmptyName),
            "Invalid environment assignment: variable name is empty"
        );
    }

    #[test]
    fn test_stage_failure_keeps_source() {
        let error = MutationError::StageFailure {
            stage: Stage::Create,
            container: "web-1".to_string(),
            source: RuntimeError::Conflict {
                message: "name in use".to_string(),
            },
        };
        assert_eq!(error.stage(), Stage::Create);
        assert_eq!(error.container(), "web-1");
        assert!(!error.left_untouched());
        assert!(error.source().is_some());
        assert!(error.to_string().starts_with("create stage failed"));
    }

    #[test]
    fn test_pre_stop_failures_leave_runtime_untouched() {
        let error = MutationError::StageFailure {
            stage: Stage::Capture,
            container: "api".to_string(),
            source: RuntimeError::NotFound {
                id: "api".to_string(),
            },
        };
        assert!(error.left_untouched());

        let error = MutationError::Cancelled {
            stage: Stage::Stop,
            container: "api".to_string(),
        };
        assert!(error.left_untouched());
        assert_eq!(error.recovery_hint(), "nothing was changed");
    }

    #[test]
    fn test_envpatch_error_from_domain_errors() {
        let err: EnvPatchError = RuntimeError::NotFound { id: "x".into() }.into();
        assert!(matches!(err, EnvPatchError::Runtime(_)));

        let err: EnvPatchError = AssertionError::EmptyName.into();
        assert!(err.is_usage_error());

        let err = EnvPatchError::NoMatchingContainers {
            filter: "web".to_string(),
        };
        assert_eq!(err.to_string(), "No containers found matching name 'web'");
        assert!(!err.is_usage_error());
    }

    #[test]
    fn test_anyhow_conversion() {
        let err = EnvPatchError::BatchFailed {
            failed: 1,
            total: 3,
        };
        let anyhow_error = anyhow::Error::from(err);
        assert!(anyhow_error
            .to_string()
            .contains("1 of 3 container(s) could not be patched"));
        assert!(anyhow_error.downcast_ref::<EnvPatchError>().is_some());
    }
}
