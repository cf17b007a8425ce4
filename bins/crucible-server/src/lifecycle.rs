// Container lifecycle management on top of the Docker daemon.
//
// Every container the service starts is tracked in a process-wide state map
// so that exactly one path ever issues a stop request. The legal
// transitions:
//
//   start ok            -> Running   (entry inserted, deadline armed)
//   wait returns        -> (removed) (entry claimed; daemon removal follows)
//   deadline / stop     -> Stopping  (stop request with 1s grace)
//   stop finished       -> Stopped   (container removed, entry deleted)
//
// A stop request for a container that is absent from the map or not Running
// is a warning-level no-op.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Grace period between SIGTERM and SIGKILL when stopping a container.
const STOP_GRACE_SECS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopping,
    Stopped,
}

/// What the engine asks of the daemon when launching one sandbox.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub binds: Vec<String>,
    pub runtime: String,
    pub nano_cpus: i64,
    pub memory_bytes: i64,
    pub tty: bool,
    pub open_stdin: bool,
    /// Wall-clock limit in milliseconds; `None` for long-lived sessions.
    pub deadline_ms: Option<u64>,
}

/// Handle to a started container.
#[derive(Debug, Clone)]
pub struct SandboxContainer {
    pub id: String,
}

/// Process-wide `container id -> state` map with atomic transitions.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateMap {
    inner: Arc<DashMap<String, ContainerState>>,
}

impl StateMap {
    fn insert_running(&self, id: &str) {
        self.inner.insert(id.to_string(), ContainerState::Running);
    }

    /// Running -> Stopping. Returns false (and changes nothing) for any
    /// other state or an unknown container; this is the double-stop guard.
    fn begin_stop(&self, id: &str) -> bool {
        match self.inner.get_mut(id) {
            Some(mut state) if *state == ContainerState::Running => {
                *state = ContainerState::Stopping;
                true
            }
            _ => false,
        }
    }

    fn mark_stopped(&self, id: &str) {
        if let Some(mut state) = self.inner.get_mut(id) {
            *state = ContainerState::Stopped;
        }
    }

    /// Claim a natural exit: removes the entry only if the container is
    /// still Running. A false return means a stop path owns the teardown.
    fn claim_exit(&self, id: &str) -> bool {
        self.inner
            .remove_if(id, |_, state| *state == ContainerState::Running)
            .is_some()
    }

    fn remove(&self, id: &str) {
        self.inner.remove(id);
    }

    pub(crate) fn get(&self, id: &str) -> Option<ContainerState> {
        self.inner.get(id).map(|entry| *entry)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }
}

#[derive(Clone)]
pub struct ContainerManager {
    docker: Docker,
    states: StateMap,
}

impl ContainerManager {
    pub fn new() -> anyhow::Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("failed to connect to Docker daemon")?;
        Ok(Self {
            docker,
            states: StateMap::default(),
        })
    }

    /// Create and start a container with the given resource caps, register
    /// it as Running, and arm its wall-clock deadline.
    pub async fn start(&self, spec: ContainerSpec) -> Result<SandboxContainer, EngineError> {
        self.ensure_image(&spec.image)
            .await
            .map_err(|e| EngineError::ContainerLaunch(e.to_string()))?;

        let name = format!("crucible-{}", uuid::Uuid::new_v4());
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.cmd.clone(),
            // An explicit command replaces the image entry point entirely;
            // without one the entry point (the session listener) runs.
            entrypoint: spec.cmd.as_ref().map(|_| Vec::new()),
            working_dir: spec.working_dir.clone(),
            tty: Some(spec.tty),
            open_stdin: Some(spec.open_stdin),
            attach_stdin: Some(spec.open_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                binds: if spec.binds.is_empty() {
                    None
                } else {
                    Some(spec.binds.clone())
                },
                runtime: Some(spec.runtime.clone()),
                nano_cpus: Some(spec.nano_cpus),
                memory: Some(spec.memory_bytes),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| EngineError::ContainerLaunch(e.to_string()))?;

        let id = created.id;
        if let Err(e) = self
            .docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
        {
            // The created-but-unstarted container must not linger.
            self.remove_container(&id).await;
            return Err(EngineError::ContainerLaunch(e.to_string()));
        }

        self.states.insert_running(&id);
        debug!(container = %id, image = %spec.image, "container started");

        if let Some(deadline_ms) = spec.deadline_ms {
            self.arm_deadline(&id, deadline_ms);
        }

        Ok(SandboxContainer { id })
    }

    fn arm_deadline(&self, id: &str, deadline_ms: u64) {
        let manager = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(deadline_ms)).await;
            // A container that exited naturally is gone from the map by now
            // and the stop below becomes a no-op.
            if manager.states.get(&id) == Some(ContainerState::Running) {
                info!(container = %id, deadline_ms, "wall-clock limit expired, stopping container");
                manager.stop(&id).await;
            }
        });
    }

    /// Block until the container exits, then drop its map entry (which
    /// disarms the deadline). The container itself stays in the daemon until
    /// `release`, so side channels like the artifact archive remain
    /// readable; a container mid-stop is left to the stop path.
    pub async fn wait(&self, container: &SandboxContainer) -> i64 {
        let mut stream = self.docker.wait_container(
            &container.id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        let exit_code = match stream.next().await {
            Some(Ok(response)) => response.status_code,
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => {
                warn!(container = %container.id, error = %e, "wait failed");
                -1
            }
            None => {
                warn!(container = %container.id, "wait stream ended without a response");
                -1
            }
        };

        self.states.claim_exit(&container.id);
        exit_code
    }

    /// Remove an exited container from the daemon.
    pub async fn release(&self, id: &str) {
        self.remove_container(id).await;
    }

    /// Whether the daemon still reports the container as running.
    pub async fn is_running(&self, id: &str) -> bool {
        match self
            .docker
            .inspect_container(id, None::<bollard::container::InspectContainerOptions>)
            .await
        {
            Ok(inspection) => inspection
                .state
                .and_then(|state| state.running)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// The container's framed stdio stream, followed until exit.
    pub fn logs(
        &self,
        container: &SandboxContainer,
    ) -> impl Stream<Item = Result<LogOutput, BollardError>> {
        self.docker.logs(
            &container.id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            }),
        )
    }

    /// Bidirectional attach for interactive sessions.
    pub async fn attach(
        &self,
        container: &SandboxContainer,
    ) -> Result<AttachContainerResults, EngineError> {
        self.docker
            .attach_container(
                &container.id,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(false),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| EngineError::ContainerLaunch(e.to_string()))
    }

    /// Tar archive of a path inside the container.
    pub async fn download_archive(
        &self,
        container: &SandboxContainer,
        path: &str,
    ) -> anyhow::Result<Vec<u8>> {
        use bollard::container::DownloadFromContainerOptions;

        let mut stream = self.docker.download_from_container(
            &container.id,
            Some(DownloadFromContainerOptions { path }),
        );
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.context("archive stream failed")?);
        }
        Ok(bytes)
    }

    /// Idempotent stop-then-remove. Only the Running -> Stopping transition
    /// issues a stop request; anything else logs and returns.
    pub async fn stop(&self, id: &str) {
        if !self.states.begin_stop(id) {
            warn!(container = %id, "stop requested for container not running, ignoring");
            return;
        }

        if let Err(e) = self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await
        {
            if !is_not_found(&e) {
                warn!(container = %id, error = %e, "stop request failed");
            }
        }
        self.states.mark_stopped(id);
        self.remove_container(id).await;
        self.states.remove(id);
        debug!(container = %id, "container stopped and removed");
    }

    async fn remove_container(&self, id: &str) {
        let result = self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
        match result {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => warn!(container = %id, error = %e, "failed to remove container"),
        }
    }

    async fn ensure_image(&self, image: &str) -> anyhow::Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "image present");
            return Ok(());
        }

        warn!(image, "image missing, pulling");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress.context("failed to pull image")?;
        }
        info!(image, "image pulled");
        Ok(())
    }

    pub(crate) fn states(&self) -> &StateMap {
        &self.states
    }
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Stops and removes the container when dropped while still armed. This is
/// what keeps a panicking or cancelled runner from leaking its container;
/// runners that finish normally defuse the guard and release explicitly.
pub struct ContainerGuard {
    manager: ContainerManager,
    id: String,
    armed: bool,
}

impl ContainerGuard {
    pub fn new(manager: ContainerManager, id: String) -> Self {
        Self {
            manager,
            id,
            armed: true,
        }
    }

    pub fn defuse(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let manager = self.manager.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            if manager.states.get(&id).is_some() {
                manager.stop(&id).await;
            }
            manager.release(&id).await;
        });
    }
}
