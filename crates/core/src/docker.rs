//! Container runtime integration
//!
//! The [`Docker`] trait is the seam between the recreate pipeline and the
//! container runtime. [`EngineRuntime`] talks to a Docker or Podman daemon over
//! the Engine API. [`mock::MockDocker`] keeps an in-memory runtime for tests.

use crate::errors::{RuntimeError, RuntimeResult};
use async_trait::async_trait;
use bollard::{
    errors::Error as BollardError,
    models::{ContainerCreateBody, ContainerSummary as EngineContainerSummary},
    query_parameters::{
        CreateContainerOptionsBuilder, InspectContainerOptions, ListContainersOptionsBuilder,
        RemoveContainerOptionsBuilder, RenameContainerOptionsBuilder, StartContainerOptions,
        StopContainerOptionsBuilder,
    },
    Docker as EngineClient,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

/// Strip the leading `/` the Engine API puts in front of container names
pub fn normalize_name(raw: &str) -> &str {
    raw.strip_prefix('/').unwrap_or(raw)
}

/// First 12 characters of a container id, as shown by the docker CLI
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Entry of the container listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Container ID
    pub id: String,
    /// Container names without the leading `/`
    pub names: Vec<String>,
    /// Command line the container runs
    pub command: String,
    /// Image reference
    pub image: String,
    /// Container state (running, exited, ...)
    pub state: String,
}

impl ContainerSummary {
    /// Name shown to the operator
    pub fn display_name(&self) -> String {
        self.names.join(", ")
    }

    /// Whether one of the container's names equals `name` exactly
    pub fn has_name(&self, name: &str) -> bool {
        let wanted = normalize_name(name);
        self.names.iter().any(|n| n == wanted)
    }
}

impl From<EngineContainerSummary> for ContainerSummary {
    fn from(entry: EngineContainerSummary) -> Self {
        Self {
            id: entry.id.unwrap_or_default(),
            names: entry
                .names
                .unwrap_or_default()
                .iter()
                .map(|n| normalize_name(n).to_string())
                .collect(),
            command: entry.command.unwrap_or_default(),
            image: entry.image.unwrap_or_default(),
            state: entry.state.map(|s| s.to_string()).unwrap_or_default(),
        }
    }
}

/// Snapshot of everything needed to recreate a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Container ID
    pub id: String,
    /// Primary name without the leading `/`
    pub name: String,
    /// Command line the container runs
    pub command: String,
    /// Whether the container was running at capture time
    pub running: bool,
    /// Environment in declaration order, `NAME=VALUE` or bare `NAME`
    pub env: Vec<String>,
    /// Runtime configuration (image, command, labels, ...)
    pub config: Value,
    /// Host configuration (mounts, ports, restart policy, ...)
    pub host_config: Value,
    /// Network attachments keyed by network name
    pub networks: Value,
}

impl ContainerHandle {
    /// Parse an Engine API inspect payload
    pub fn from_inspect(value: &Value) -> RuntimeResult<Self> {
        let id = value
            .get("Id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuntimeError::Engine {
                message: "inspect payload has no container id".to_string(),
            })?
            .to_string();

        let name = value
            .get("Name")
            .and_then(|v| v.as_str())
            .map(|n| normalize_name(n).to_string())
            .unwrap_or_default();

        let mut command = value
            .get("Path")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if let Some(args) = value.get("Args").and_then(|v| v.as_array()) {
            for arg in args.iter().filter_map(|a| a.as_str()) {
                command.push(' ');
                command.push_str(arg);
            }
        }

        let config = value.get("Config").cloned().unwrap_or_else(|| json!({}));
        let env = config
            .get("Env")
            .and_then(|v| v.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let running = value
            .get("State")
            .and_then(|s| s.get("Running"))
            .and_then(|r| r.as_bool())
            .unwrap_or(false);

        Ok(Self {
            id,
            name,
            command,
            running,
            env,
            config,
            host_config: value.get("HostConfig").cloned().unwrap_or_else(|| json!({})),
            networks: value
                .get("NetworkSettings")
                .and_then(|n| n.get("Networks"))
                .cloned()
                .unwrap_or_else(|| json!({})),
        })
    }

    /// Build a create request reproducing this container with a new environment
    pub fn to_create_spec(&self, env: Vec<String>) -> CreateSpec {
        let mut config = self.config.clone();
        if let Some(object) = config.as_object_mut() {
            object.insert("Env".to_string(), json!(env));
        } else {
            config = json!({ "Env": env });
        }
        CreateSpec {
            config,
            host_config: self.host_config.clone(),
            networks: self.networks.clone(),
        }
    }
}

/// Payload of a create request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSpec {
    pub config: Value,
    pub host_config: Value,
    pub networks: Value,
}

impl CreateSpec {
    /// Environment the new container will carry
    pub fn env(&self) -> Vec<String> {
        self.config
            .get("Env")
            .and_then(|v| v.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Engine API request body: config with host and networking config attached
    pub fn to_request_body(&self) -> Value {
        let mut body = match &self.config {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        body.insert("HostConfig".to_string(), self.host_config.clone());
        body.insert(
            "NetworkingConfig".to_string(),
            json!({ "EndpointsConfig": self.networks }),
        );
        Value::Object(body)
    }
}

/// Container runtime operations used by the tool
#[async_trait]
pub trait Docker: Send + Sync {
    /// Check that the runtime is reachable
    async fn ping(&self) -> RuntimeResult<()>;

    /// List all containers, running or not, optionally restricted to an exact name
    async fn list_containers(&self, name: Option<&str>) -> RuntimeResult<Vec<ContainerSummary>>;

    /// Inspect a container by id or name
    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerHandle>;

    /// Stop a container; stopping a stopped container succeeds
    async fn stop_container(&self, id: &str, timeout: Option<u32>) -> RuntimeResult<()>;

    /// Create a container under `name` and return its id
    async fn create_container(&self, spec: &CreateSpec, name: &str) -> RuntimeResult<String>;

    /// Remove a container
    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()>;

    /// Rename a container
    async fn rename_container(&self, id: &str, new_name: &str) -> RuntimeResult<()>;

    /// Start a container
    async fn start_container(&self, id: &str) -> RuntimeResult<()>;
}

#[async_trait]
impl<T: Docker + ?Sized> Docker for std::sync::Arc<T> {
    async fn ping(&self) -> RuntimeResult<()> {
        (**self).ping().await
    }

    async fn list_containers(&self, name: Option<&str>) -> RuntimeResult<Vec<ContainerSummary>> {
        (**self).list_containers(name).await
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerHandle> {
        (**self).inspect_container(id).await
    }

    async fn stop_container(&self, id: &str, timeout: Option<u32>) -> RuntimeResult<()> {
        (**self).stop_container(id, timeout).await
    }

    async fn create_container(&self, spec: &CreateSpec, name: &str) -> RuntimeResult<String> {
        (**self).create_container(spec, name).await
    }

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        (**self).remove_container(id, force).await
    }

    async fn rename_container(&self, id: &str, new_name: &str) -> RuntimeResult<()> {
        (**self).rename_container(id, new_name).await
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        (**self).start_container(id).await
    }
}

/// Map an Engine API failure onto the runtime error taxonomy
fn map_engine_error(err: BollardError, target: &str) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            404 => RuntimeError::NotFound {
                id: target.to_string(),
            },
            409 => RuntimeError::Conflict { message },
            _ => RuntimeError::Engine {
                message: format!("{} (status {})", message, status_code),
            },
        },
        // The daemon answered but the payload could not be read
        err @ (BollardError::JsonDataError { .. } | BollardError::JsonSerdeError { .. }) => {
            RuntimeError::Engine {
                message: err.to_string(),
            }
        }
        other => RuntimeError::Connectivity {
            message: other.to_string(),
        },
    }
}

/// Runtime backed by the Docker Engine API (Podman exposes the same API)
#[derive(Clone)]
pub struct EngineRuntime {
    client: EngineClient,
    runtime_name: &'static str,
}

impl EngineRuntime {
    /// Wrap a connected client
    pub fn new(client: EngineClient, runtime_name: &'static str) -> Self {
        Self {
            client,
            runtime_name,
        }
    }

    /// Name of the runtime flavour (docker or podman)
    pub fn runtime_name(&self) -> &'static str {
        self.runtime_name
    }
}

impl std::fmt::Debug for EngineRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntime")
            .field("runtime_name", &self.runtime_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Docker for EngineRuntime {
    #[instrument(skip(self))]
    async fn ping(&self) -> RuntimeResult<()> {
        debug!("Pinging {} daemon", self.runtime_name);
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Connectivity {
                message: e.to_string(),
            })
    }

    #[instrument(skip(self))]
    async fn list_containers(&self, name: Option<&str>) -> RuntimeResult<Vec<ContainerSummary>> {
        let options = ListContainersOptionsBuilder::default().all(true).build();
        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| map_engine_error(e, "containers"))?;

        let result: Vec<ContainerSummary> = containers
            .into_iter()
            .map(ContainerSummary::from)
            .filter(|summary| name.map_or(true, |n| summary.has_name(n)))
            .collect();

        debug!("Listed {} container(s)", result.len());
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerHandle> {
        let response = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_engine_error(e, id))?;
        let value = serde_json::to_value(&response).map_err(|e| RuntimeError::Engine {
            message: format!("Failed to read inspect payload: {}", e),
        })?;
        ContainerHandle::from_inspect(&value)
    }

    #[instrument(skip(self))]
    async fn stop_container(&self, id: &str, timeout: Option<u32>) -> RuntimeResult<()> {
        let options = timeout.map(|secs| {
            StopContainerOptionsBuilder::new()
                .t(i32::try_from(secs).unwrap_or(i32::MAX))
                .build()
        });
        match self.client.stop_container(id, options).await {
            Ok(()) => Ok(()),
            // Already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("Container {} was already stopped", id);
                Ok(())
            }
            Err(e) => Err(map_engine_error(e, id)),
        }
    }

    #[instrument(skip(self, spec))]
    async fn create_container(&self, spec: &CreateSpec, name: &str) -> RuntimeResult<String> {
        let body: ContainerCreateBody =
            serde_json::from_value(spec.to_request_body()).map_err(|e| RuntimeError::Engine {
                message: format!("Captured configuration cannot be recreated: {}", e),
            })?;
        let options = CreateContainerOptionsBuilder::new().name(name).build();
        let response = self
            .client
            .create_container(Some(options), body)
            .await
            .map_err(|e| map_engine_error(e, name))?;
        for warning in &response.warnings {
            debug!("Create warning for {}: {}", name, warning);
        }
        Ok(response.id)
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptionsBuilder::new().force(force).build();
        self.client
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_engine_error(e, id))
    }

    #[instrument(skip(self))]
    async fn rename_container(&self, id: &str, new_name: &str) -> RuntimeResult<()> {
        let options = RenameContainerOptionsBuilder::new().name(new_name).build();
        self.client
            .rename_container(id, options)
            .await
            .map_err(|e| map_engine_error(e, id))
    }

    #[instrument(skip(self))]
    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.client
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| map_engine_error(e, id))
    }
}

pub mod mock {
    //! In-memory container runtime
    //!
    //! Holds a set of containers, enforces name uniqueness the way a real
    //! runtime does, records every call, and can be told to fail a given
    //! operation.

    use super::{ContainerHandle, ContainerSummary, CreateSpec, Docker};
    use crate::errors::{RuntimeError, RuntimeResult};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tracing::{debug, instrument};

    /// Runtime operation, used to address call records and injected failures
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum MockOperation {
        Ping,
        List,
        Inspect,
        Stop,
        Create,
        Remove,
        Rename,
        Start,
    }

    /// Mock container state
    #[derive(Debug, Clone, PartialEq)]
    pub struct MockContainer {
        pub id: String,
        pub name: String,
        pub image: String,
        pub command: String,
        pub running: bool,
        pub env: Vec<String>,
        pub host_config: Value,
        pub networks: Value,
    }

    impl MockContainer {
        /// Create a running container with an empty environment
        pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                image: "alpine:3".to_string(),
                command: "sleep infinity".to_string(),
                running: true,
                env: Vec::new(),
                host_config: json!({ "RestartPolicy": { "Name": "no" } }),
                networks: json!({ "bridge": {} }),
            }
        }

        /// Set the environment entries
        pub fn with_env(mut self, env: &[&str]) -> Self {
            self.env = env.iter().map(|e| e.to_string()).collect();
            self
        }

        /// Mark the container as stopped
        pub fn stopped(mut self) -> Self {
            self.running = false;
            self
        }

        /// Set the host configuration
        pub fn with_host_config(mut self, host_config: Value) -> Self {
            self.host_config = host_config;
            self
        }

        /// Set the network attachments
        pub fn with_networks(mut self, networks: Value) -> Self {
            self.networks = networks;
            self
        }

        fn to_summary(&self) -> ContainerSummary {
            ContainerSummary {
                id: self.id.clone(),
                names: vec![self.name.clone()],
                command: self.command.clone(),
                image: self.image.clone(),
                state: if self.running { "running" } else { "exited" }.to_string(),
            }
        }

        fn to_handle(&self) -> ContainerHandle {
            ContainerHandle {
                id: self.id.clone(),
                name: self.name.clone(),
                command: self.command.clone(),
                running: self.running,
                env: self.env.clone(),
                config: json!({
                    "Image": self.image,
                    "Cmd": self.command.split_whitespace().collect::<Vec<_>>(),
                    "Env": self.env,
                }),
                host_config: self.host_config.clone(),
                networks: self.networks.clone(),
            }
        }
    }

    /// Record of a runtime call
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MockCall {
        pub operation: MockOperation,
        /// Container id or name the call addressed
        pub target: String,
    }

    /// Configuration for the MockDocker runtime
    #[derive(Debug, Clone, Default)]
    pub struct MockDockerConfig {
        /// Simulate an unreachable daemon for every operation
        pub daemon_unavailable: bool,
        /// Operations that fail with the given error
        pub failures: HashMap<MockOperation, RuntimeError>,
    }

    /// Mock container runtime
    #[derive(Debug, Default, Clone)]
    pub struct MockDocker {
        config: Arc<Mutex<MockDockerConfig>>,
        containers: Arc<Mutex<Vec<MockContainer>>>,
        history: Arc<Mutex<Vec<MockCall>>>,
    }

    impl MockDocker {
        /// Create an empty runtime
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a runtime holding the given containers
        pub fn with_containers(containers: Vec<MockContainer>) -> Self {
            let docker = Self::new();
            for container in containers {
                docker.add_container(container);
            }
            docker
        }

        /// Add a container
        pub fn add_container(&self, container: MockContainer) {
            self.containers.lock().unwrap().push(container);
        }

        /// Remove a container behind the tool's back
        pub fn delete_container(&self, id: &str) {
            self.containers.lock().unwrap().retain(|c| c.id != id);
        }

        /// Current containers
        pub fn containers(&self) -> Vec<MockContainer> {
            self.containers.lock().unwrap().clone()
        }

        /// Container currently holding `name`
        pub fn container_by_name(&self, name: &str) -> Option<MockContainer> {
            self.containers
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.name == name)
                .cloned()
        }

        /// Calls made so far, oldest first
        pub fn history(&self) -> Vec<MockCall> {
            self.history.lock().unwrap().clone()
        }

        /// Operations called so far, oldest first
        pub fn operations(&self) -> Vec<MockOperation> {
            self.history().into_iter().map(|c| c.operation).collect()
        }

        /// Clear call history
        pub fn clear_history(&self) {
            self.history.lock().unwrap().clear();
        }

        /// Make `operation` fail with `error` until cleared
        pub fn fail_on(&self, operation: MockOperation, error: RuntimeError) {
            self.config
                .lock()
                .unwrap()
                .failures
                .insert(operation, error);
        }

        /// Stop failing `operation`
        pub fn clear_failure(&self, operation: MockOperation) {
            self.config.lock().unwrap().failures.remove(&operation);
        }

        /// Update mock configuration
        pub fn update_config<F>(&self, f: F)
        where
            F: FnOnce(&mut MockDockerConfig),
        {
            let mut config = self.config.lock().unwrap();
            f(&mut config);
        }

        /// Record the call, then apply configured failures
        fn enter(&self, operation: MockOperation, target: &str) -> RuntimeResult<()> {
            self.history.lock().unwrap().push(MockCall {
                operation,
                target: target.to_string(),
            });

            let config = self.config.lock().unwrap();
            if config.daemon_unavailable {
                return Err(RuntimeError::Connectivity {
                    message: "mock daemon unavailable".to_string(),
                });
            }
            match config.failures.get(&operation) {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }
        }

        fn position(containers: &[MockContainer], key: &str) -> RuntimeResult<usize> {
            containers
                .iter()
                .position(|c| c.id == key || c.name == key)
                .ok_or_else(|| RuntimeError::NotFound {
                    id: key.to_string(),
                })
        }
    }

    #[async_trait]
    impl Docker for MockDocker {
        #[instrument(skip(self))]
        async fn ping(&self) -> RuntimeResult<()> {
            self.enter(MockOperation::Ping, "")
        }

        #[instrument(skip(self))]
        async fn list_containers(
            &self,
            name: Option<&str>,
        ) -> RuntimeResult<Vec<ContainerSummary>> {
            self.enter(MockOperation::List, name.unwrap_or_default())?;
            let containers = self.containers.lock().unwrap();
            let result: Vec<ContainerSummary> = containers
                .iter()
                .map(MockContainer::to_summary)
                .filter(|s| name.map_or(true, |n| s.has_name(n)))
                .collect();
            debug!("MockDocker returning {} containers", result.len());
            Ok(result)
        }

        #[instrument(skip(self))]
        async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerHandle> {
            self.enter(MockOperation::Inspect, id)?;
            let containers = self.containers.lock().unwrap();
            let index = Self::position(&containers, id)?;
            Ok(containers[index].to_handle())
        }

        #[instrument(skip(self))]
        async fn stop_container(&self, id: &str, _timeout: Option<u32>) -> RuntimeResult<()> {
            self.enter(MockOperation::Stop, id)?;
            let mut containers = self.containers.lock().unwrap();
            let index = Self::position(&containers, id)?;
            containers[index].running = false;
            Ok(())
        }

        #[instrument(skip(self, spec))]
        async fn create_container(&self, spec: &CreateSpec, name: &str) -> RuntimeResult<String> {
            self.enter(MockOperation::Create, name)?;
            let mut containers = self.containers.lock().unwrap();
            if containers.iter().any(|c| c.name == name) {
                return Err(RuntimeError::Conflict {
                    message: format!("container name {} is already in use", name),
                });
            }

            let id = format!("{:016x}{:016x}", fastrand::u64(..), fastrand::u64(..));
            let command = spec
                .config
                .get("Cmd")
                .and_then(|v| v.as_array())
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p.as_str())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();
            containers.push(MockContainer {
                id: id.clone(),
                name: name.to_string(),
                image: spec
                    .config
                    .get("Image")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                command,
                running: false,
                env: spec.env(),
                host_config: spec.host_config.clone(),
                networks: spec.networks.clone(),
            });
            debug!("MockDocker created {} as {}", name, id);
            Ok(id)
        }

        #[instrument(skip(self))]
        async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
            self.enter(MockOperation::Remove, id)?;
            let mut containers = self.containers.lock().unwrap();
            let index = Self::position(&containers, id)?;
            if containers[index].running && !force {
                return Err(RuntimeError::Conflict {
                    message: format!("container {} is running", id),
                });
            }
            containers.remove(index);
            Ok(())
        }

        #[instrument(skip(self))]
        async fn rename_container(&self, id: &str, new_name: &str) -> RuntimeResult<()> {
            self.enter(MockOperation::Rename, id)?;
            let mut containers = self.containers.lock().unwrap();
            let index = Self::position(&containers, id)?;
            if containers
                .iter()
                .enumerate()
                .any(|(i, c)| i != index && c.name == new_name)
            {
                return Err(RuntimeError::Conflict {
                    message: format!("container name {} is already in use", new_name),
                });
            }
            containers[index].name = new_name.to_string();
            Ok(())
        }

        #[instrument(skip(self))]
        async fn start_container(&self, id: &str) -> RuntimeResult<()> {
            self.enter(MockOperation::Start, id)?;
            let mut containers = self.containers.lock().unwrap();
            let index = Self::position(&containers, id)?;
            containers[index].running = true;
            Ok(())
        }
    }
}
