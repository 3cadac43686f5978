//! Container runtime selection for Docker/Podman
//!
//! Both runtimes are driven through the same Engine API client; they differ in
//! where the API socket lives by default.

use crate::docker::EngineRuntime;
use crate::errors::{EnvPatchError, Result, RuntimeError};
use bollard::{Docker as EngineClient, API_DEFAULT_VERSION};
use tracing::debug;

/// Seconds before an Engine API request is abandoned
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Runtime selection options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl RuntimeKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = EnvPatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            _ => Err(EnvPatchError::Configuration(format!(
                "Unknown runtime: {}. Supported runtimes: docker, podman",
                s
            ))),
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the runtime API is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEndpoint {
    /// Client defaults (honours `DOCKER_HOST`, else the local socket)
    LocalDefaults,
    /// Unix socket or named pipe path
    Socket(String),
    /// TCP address
    Http(String),
}

impl RuntimeEndpoint {
    /// Parse a host specification such as `unix:///run/docker.sock` or `tcp://10.0.0.2:2375`
    pub fn parse(host: &str) -> Result<Self> {
        let host = host.trim();
        if let Some(path) = host.strip_prefix("unix://") {
            return Ok(Self::Socket(path.to_string()));
        }
        if let Some(path) = host.strip_prefix("npipe://") {
            return Ok(Self::Socket(path.to_string()));
        }
        if host.starts_with("tcp://") || host.starts_with("http://") {
            return Ok(Self::Http(host.to_string()));
        }
        if host.starts_with('/') {
            return Ok(Self::Socket(host.to_string()));
        }
        Err(EnvPatchError::Configuration(format!(
            "Unsupported runtime host '{}': expected unix://, npipe://, tcp:// or http://",
            host
        )))
    }
}

/// Runtime factory for creating container runtime instances
pub struct RuntimeFactory;

impl RuntimeFactory {
    /// Detect runtime from CLI flag, environment variable, or default
    ///
    /// Precedence: CLI flag > ENVPATCH_RUNTIME env var > default (docker)
    pub fn detect_runtime(cli_runtime: Option<RuntimeKind>) -> RuntimeKind {
        if let Some(runtime) = cli_runtime {
            return runtime;
        }

        if let Ok(env_runtime) = std::env::var("ENVPATCH_RUNTIME") {
            if let Ok(runtime) = env_runtime.parse() {
                return runtime;
            }
        }

        RuntimeKind::Docker
    }

    /// Resolve the API endpoint
    ///
    /// Precedence: CLI flag > ENVPATCH_HOST > the runtime's own convention
    /// (`DOCKER_HOST` for docker, `CONTAINER_HOST` then the rootless socket for podman)
    pub fn resolve_endpoint(kind: RuntimeKind, cli_host: Option<&str>) -> Result<RuntimeEndpoint> {
        if let Some(host) = cli_host {
            return RuntimeEndpoint::parse(host);
        }

        if let Ok(host) = std::env::var("ENVPATCH_HOST") {
            if !host.trim().is_empty() {
                return RuntimeEndpoint::parse(&host);
            }
        }

        match kind {
            RuntimeKind::Docker => Ok(RuntimeEndpoint::LocalDefaults),
            RuntimeKind::Podman => {
                if let Ok(host) = std::env::var("CONTAINER_HOST") {
                    if !host.trim().is_empty() {
                        return RuntimeEndpoint::parse(&host);
                    }
                }
                let socket = match std::env::var("XDG_RUNTIME_DIR") {
                    Ok(dir) if !dir.is_empty() => format!("{}/podman/podman.sock", dir),
                    _ => "/run/podman/podman.sock".to_string(),
                };
                Ok(RuntimeEndpoint::Socket(socket))
            }
        }
    }

    /// Build a client for the endpoint.
    ///
    /// HTTP endpoints make no request until the first call. A socket endpoint
    /// must exist already, otherwise this fails with a connectivity error.
    pub fn create_runtime(kind: RuntimeKind, endpoint: &RuntimeEndpoint) -> Result<EngineRuntime> {
        debug!("Connecting to {} via {:?}", kind, endpoint);
        let client = match endpoint {
            RuntimeEndpoint::LocalDefaults => EngineClient::connect_with_local_defaults(),
            RuntimeEndpoint::Socket(path) => {
                EngineClient::connect_with_socket(path, DEFAULT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            RuntimeEndpoint::Http(addr) => {
                EngineClient::connect_with_http(addr, DEFAULT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
        }
        .map_err(|e| RuntimeError::Connectivity {
            message: e.to_string(),
        })?;

        Ok(EngineRuntime::new(client, kind.as_str()))
    }
}
