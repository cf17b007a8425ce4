// Interactive session coordination.
//
// A session is a long-lived TTY container whose image entry point tails a
// command file inside the bind-mounted workspace. The coordinator appends
// newline-delimited commands to that file (`upsert <path> <b64>`,
// `run [main-class]`, `input <raw>`) and bridges the container's output
// stream back to the client connection.

use std::path::Path;
use std::sync::Arc;
use std::sync::OnceLock;

use anyhow::Context;
use bollard::container::LogOutput;
use dashmap::DashMap;
use futures_util::Stream;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::EngineError;
use crate::io::encoding::{decode_base64, encode_base64};
use crate::io::workspace::Workspace;
use crate::lifecycle::{ContainerManager, ContainerSpec, SandboxContainer};
use crate::sanitize::SourcePolicy;
use crucible_common::types::Language;

/// File watched by the in-image command listener.
const COMMAND_FILE: &str = ".commands";

pub struct Session {
    pub id: Uuid,
    pub language: Language,
    pub container: SandboxContainer,
    workspace: Workspace,
}

pub struct SessionCoordinator {
    sessions: DashMap<Uuid, Session>,
    containers: ContainerManager,
    config: Arc<Config>,
    policy: Arc<dyn SourcePolicy>,
}

impl SessionCoordinator {
    pub fn new(
        config: Arc<Config>,
        containers: ContainerManager,
        policy: Arc<dyn SourcePolicy>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            containers,
            config,
            policy,
        }
    }

    /// Allocate a workspace, start the listener container and register the
    /// session under a fresh ID.
    pub async fn create_session(&self, language: Language) -> Result<Uuid, EngineError> {
        if language == Language::Cpp {
            return Err(EngineError::BadCommand(
                "interactive sessions support python and java".to_string(),
            ));
        }

        let workspace = Workspace::create(&self.config.tmp_dir).await?;
        workspace.write_file(COMMAND_FILE, b"").await?;

        let spec = ContainerSpec {
            image: self.config.image_for(language, false).to_string(),
            // The image entry point is the command listener.
            cmd: None,
            working_dir: Some(crate::config::CONTAINER_WORKDIR.to_string()),
            binds: vec![workspace.bind_mount()],
            runtime: self.config.docker_runtime.clone(),
            nano_cpus: self.config.nano_cpus(),
            memory_bytes: self.config.memory_limit_bytes,
            tty: true,
            open_stdin: true,
            deadline_ms: None,
        };

        let container = match self.containers.start(spec).await {
            Ok(container) => container,
            Err(e) => {
                workspace.remove().await;
                return Err(e);
            }
        };

        let id = Uuid::new_v4();
        info!(session = %id, %language, container = %container.id, "session created");
        self.sessions.insert(
            id,
            Session {
                id,
                language,
                container,
                workspace,
            },
        );
        Ok(id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.sessions.contains_key(&id)
    }

    /// The container's live output stream for bridging to the client.
    pub async fn output_stream(
        &self,
        id: Uuid,
    ) -> Result<impl Stream<Item = Result<LogOutput, bollard::errors::Error>>, EngineError> {
        let container = {
            let session = self
                .sessions
                .get(&id)
                .ok_or(EngineError::SessionNotFound(id))?;
            session.container.clone()
        };
        let attached = self.containers.attach(&container).await?;
        Ok(attached.output)
    }

    /// Write source files into the session by emitting `upsert` commands.
    /// Java files are placed under their package path, mirroring the batch
    /// layout convention.
    pub async fn upsert_files(
        &self,
        id: Uuid,
        files: &std::collections::HashMap<String, String>,
        is_java: bool,
    ) -> Result<(), EngineError> {
        let mut lines = String::new();
        for (name, content) in files {
            let bytes = decode_base64(content)?;
            let text = String::from_utf8_lossy(&bytes);
            self.policy.inspect(name, &text)?;

            let path = if is_java && name.ends_with(".java") {
                match crate::io::workspace::java_package_path(&text) {
                    Some(pkg) => format!("{}/{}", path_string(&pkg), name),
                    None => name.clone(),
                }
            } else {
                name.clone()
            };
            lines.push_str(&format!("upsert {} {}\n", path, encode_base64(&bytes)));
        }
        self.append_commands(id, &lines).await
    }

    /// Signal the listener to (re)start the program.
    pub async fn start_program(
        &self,
        id: Uuid,
        language: Language,
        main_class_name: Option<&str>,
    ) -> Result<(), EngineError> {
        let line = match language {
            Language::Java => {
                let class = main_class_name.ok_or_else(|| {
                    EngineError::BadCommand(
                        "mainClassName is required to start a java program".to_string(),
                    )
                })?;
                format!("run {class}\n")
            }
            Language::Python => "run\n".to_string(),
            Language::Cpp => {
                return Err(EngineError::BadCommand(
                    "interactive sessions support python and java".to_string(),
                ))
            }
        };
        self.append_commands(id, &line).await
    }

    /// Forward one line of stdin to the running program.
    pub async fn send_input(&self, id: Uuid, text: &str) -> Result<(), EngineError> {
        self.append_commands(id, &format!("input {text}\n")).await
    }

    /// Tear the session down: stop the container, drop the map entry,
    /// remove the workspace.
    pub async fn disconnect(&self, id: Uuid) -> Result<(), EngineError> {
        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or(EngineError::SessionNotFound(id))?;
        self.containers.stop(&session.container.id).await;
        self.containers.release(&session.container.id).await;
        session.workspace.remove().await;
        info!(session = %id, "session closed");
        Ok(())
    }

    async fn append_commands(&self, id: Uuid, lines: &str) -> Result<(), EngineError> {
        let (path, container_id) = {
            let session = self
                .sessions
                .get(&id)
                .ok_or(EngineError::SessionNotFound(id))?;
            (
                session.workspace.root().join(COMMAND_FILE),
                session.container.id.clone(),
            )
        };
        // A dead listener would never pick the command up; tear the session
        // down instead of silently appending into the void.
        if !self.containers.is_running(&container_id).await {
            let _ = self.disconnect(id).await;
            return Err(EngineError::SessionNotFound(id));
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open command file {}", path.display()))?;
        file.write_all(lines.as_bytes())
            .await
            .context("failed to append session command")?;
        Ok(())
    }

    /// Best-effort teardown of every live session, for shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| entry.id).collect();
        for id in ids {
            if let Err(e) = self.disconnect(id).await {
                warn!(session = %id, error = %e, "failed to close session");
            }
        }
    }
}

fn path_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Remove ANSI CSI escape sequences from a TTY output chunk.
pub fn strip_ansi(text: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ansi pattern is valid")
    });
    re.replace_all(text, "").into_owned()
}
