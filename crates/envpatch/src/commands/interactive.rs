//! Interactive session: list containers and edit their environment
//!
//! The terminal loop runs on a blocking thread. Commands issued by the
//! session are executed as tasks on the async runtime and report back
//! through a channel the loop drains between frames.

use crate::ui::terminal;
use anyhow::{Context, Result};
use envpatch_core::directory;
use envpatch_core::docker::Docker;
use envpatch_core::env::read_environment;
use envpatch_core::errors::EnvPatchError;
use envpatch_core::mutation::{CancellationFlag, MutationEngine, MutationOptions};
use envpatch_core::session::{Command, Event, Session};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info};

/// Runs session commands against the runtime
struct Executor<D: ?Sized> {
    docker: Arc<D>,
    options: MutationOptions,
    events: UnboundedSender<Event>,
    handle: Handle,
    /// Cancellation of the mutation in flight, if any
    mutation: Option<CancellationFlag>,
}

impl<D> Executor<D>
where
    D: Docker + ?Sized + 'static,
{
    /// Start the work for `command`; returns `false` when the session ends
    fn dispatch(&mut self, command: Command) -> bool {
        debug!("Dispatching {:?}", command);
        let docker = Arc::clone(&self.docker);
        let events = self.events.clone();
        match command {
            Command::Quit => return false,
            Command::LoadContainers => {
                self.handle.spawn(async move {
                    let event = match directory::list(docker.as_ref(), None).await {
                        Ok(rows) => Event::ContainersLoaded(rows),
                        Err(err) => Event::RuntimeError(err),
                    };
                    let _ = events.send(event);
                });
            }
            Command::LoadEnvironment { container_id } => {
                self.handle.spawn(async move {
                    let event = match read_environment(docker.as_ref(), &container_id).await {
                        Ok(environment) => Event::SnapshotLoaded {
                            container_id,
                            environment,
                        },
                        Err(err) => Event::RuntimeError(err),
                    };
                    let _ = events.send(event);
                });
            }
            Command::CancelMutation => match &self.mutation {
                Some(flag) => {
                    info!("Cancellation requested for the running mutation");
                    flag.cancel();
                }
                None => debug!("No mutation to cancel"),
            },
            Command::ApplyMutation {
                container_id,
                assertion,
            } => {
                let options = self.options.clone();
                let cancellation = CancellationFlag::new();
                self.mutation = Some(cancellation.clone());
                self.handle.spawn(async move {
                    let result = MutationEngine::new(docker.as_ref())
                        .with_options(options)
                        .with_cancellation(cancellation)
                        .apply_one(&container_id, &assertion)
                        .await;
                    let _ = events.send(Event::MutationCompleted {
                        container_id,
                        result,
                    });
                });
            }
        }
        true
    }
}

/// Run the session until the operator quits.
///
/// The initial listing must succeed, a runtime failure there ends the program.
pub async fn run_interactive<D>(docker: Arc<D>, options: MutationOptions) -> Result<()>
where
    D: Docker + ?Sized + 'static,
{
    let containers = directory::list(docker.as_ref(), None)
        .await
        .map_err(EnvPatchError::from)?;
    info!("Starting interactive session with {} container(s)", containers.len());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut executor = Executor {
        docker,
        options,
        events: tx,
        handle: Handle::current(),
        mutation: None,
    };
    let session = Session::new(containers);

    tokio::task::spawn_blocking(move || {
        terminal::run_session(session, &mut rx, |command| executor.dispatch(command))
    })
    .await
    .context("interactive session thread failed")??;

    info!("Interactive session ended");
    Ok(())
}
