//! Runtime utilities for connecting to the container runtime from CLI flags

use crate::cli::CliContext;
use anyhow::Result;
use envpatch_core::docker::{Docker, EngineRuntime};
use envpatch_core::errors::EnvPatchError;
use envpatch_core::runtime::RuntimeFactory;
use tracing::{debug, info};

/// Create a runtime instance based on CLI context
pub fn create_runtime_from_context(context: &CliContext) -> Result<EngineRuntime> {
    let kind = RuntimeFactory::detect_runtime(context.runtime);
    let endpoint = RuntimeFactory::resolve_endpoint(kind, context.host.as_deref())?;
    debug!("Selected {} runtime at {:?}", kind, endpoint);
    Ok(RuntimeFactory::create_runtime(kind, &endpoint)?)
}

/// Connect and make sure the runtime answers; a failure here is fatal
pub async fn connect_runtime(context: &CliContext) -> Result<EngineRuntime> {
    let runtime = create_runtime_from_context(context)?;
    runtime.ping().await.map_err(EnvPatchError::from)?;
    info!("Connected to {} runtime", runtime.runtime_name());
    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use envpatch_core::runtime::RuntimeKind;

    #[tokio::test]
    async fn test_create_runtime_from_context_podman() {
        let context = CliContext {
            runtime: Some(RuntimeKind::Podman),
            host: Some("tcp://127.0.0.1:8888".to_string()),
            ..CliContext::default()
        };

        let runtime = create_runtime_from_context(&context).unwrap();
        assert_eq!(runtime.runtime_name(), "podman");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_socket_is_connectivity_error() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("podman.sock");
        let context = CliContext {
            runtime: Some(RuntimeKind::Podman),
            host: Some(format!("unix://{}", socket.display())),
            ..CliContext::default()
        };

        let err = create_runtime_from_context(&context).unwrap_err();
        let envpatch_error = err.downcast_ref::<EnvPatchError>().unwrap();
        assert!(!envpatch_error.is_usage_error());
        assert!(err.to_string().contains("not reachable"));
    }

    #[tokio::test]
    async fn test_invalid_host_is_usage_error() {
        let context = CliContext {
            host: Some("ssh://build-box".to_string()),
            ..CliContext::default()
        };

        let err = create_runtime_from_context(&context).unwrap_err();
        let envpatch_error = err.downcast_ref::<EnvPatchError>().unwrap();
        assert!(envpatch_error.is_usage_error());
    }
}
