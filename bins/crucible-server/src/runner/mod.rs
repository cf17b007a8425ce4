// Language runners: turn one request into one workspace, one container and
// one normalized result.
//
// All three languages share the same skeleton: lay out the workspace,
// assemble an in-container shell command, start the container bound to the
// workspace, drain its logs while waiting for it to exit, read whatever
// side-channel files the command produced, and tear everything down. The
// teardown runs on every exit path: the container guard and the workspace
// both clean up on drop if a runner unwinds early.

mod cpp;
mod java;
mod python;

#[cfg(test)]
mod engine_tests;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::{Config, CONTAINER_WORKDIR};
use crate::error::EngineError;
use crate::io::stdio::collect_log_stream;
use crate::lifecycle::{ContainerGuard, ContainerManager, ContainerSpec, SandboxContainer};
use crate::sanitize::SourcePolicy;

/// Pathological payloads are refused before anything reaches the daemon.
const MAX_SOURCE_BYTES: usize = 1024 * 1024;
const MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Side-channel files exchanged with the container through the workspace.
pub(crate) const INPUT_FILE: &str = "input.txt";
pub(crate) const PROGRAM_OUTPUT_FILE: &str = "program_output.txt";
pub(crate) const MAIN_COMPILE_ERRORS_FILE: &str = "main_compile_errors.txt";
pub(crate) const TEST_COMPILE_ERRORS_FILE: &str = "test_compile_errors.txt";
pub(crate) const COMPILE_ERRORS_FILE: &str = "compile_errors.txt";
pub(crate) const TEST_RESULTS_FILE: &str = "test-results.json";

/// The execution engine shared by every HTTP handler and session.
#[derive(Clone)]
pub struct Engine {
    pub(crate) config: Arc<Config>,
    pub(crate) containers: ContainerManager,
    pub(crate) policy: Arc<dyn SourcePolicy>,
}

impl Engine {
    pub fn new(
        config: Arc<Config>,
        containers: ContainerManager,
        policy: Arc<dyn SourcePolicy>,
    ) -> Self {
        Self {
            config,
            containers,
            policy,
        }
    }

    /// Base spec with the service-wide resource caps applied.
    pub(crate) fn container_spec(&self, image: &str, command: String) -> ContainerSpec {
        ContainerSpec {
            image: image.to_string(),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command]),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            binds: Vec::new(),
            runtime: self.config.docker_runtime.clone(),
            nano_cpus: self.config.nano_cpus(),
            memory_bytes: self.config.memory_limit_bytes,
            tty: false,
            open_stdin: false,
            deadline_ms: Some(self.config.execution_time_limit_ms),
        }
    }

    /// Start the container and capture its complete output.
    ///
    /// Log draining and `wait` run as one joined pair: the daemon's log
    /// buffer exerts back-pressure, so waiting first and reading logs
    /// afterwards can deadlock a chatty program.
    ///
    /// The exited container is kept in the daemon until `CapturedRun::finish`
    /// so that side channels (the artifact archive) remain readable. If the
    /// run is dropped early instead, its guard tears the container down.
    pub(crate) async fn run_to_completion(
        &self,
        spec: ContainerSpec,
    ) -> Result<CapturedRun, EngineError> {
        let started = Instant::now();
        let container = self.containers.start(spec).await?;
        let guard = ContainerGuard::new(self.containers.clone(), container.id.clone());

        let logs = self.containers.logs(&container);
        let (output, exit_code) =
            tokio::join!(collect_log_stream(Box::pin(logs)), self.containers.wait(&container));

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let deadline_ms = self.config.execution_time_limit_ms;
        let timed_out = exit_code != 0 && elapsed_ms >= deadline_ms;

        let mut output = output;
        if timed_out {
            warn!(container = %container.id, elapsed_ms, "execution hit the wall-clock limit");
        } else if exit_code == 137 {
            warn!(container = %container.id, "container was killed, likely over the memory limit");
            output.push_str("[Container killed: likely exceeded memory limit]\n");
        } else if exit_code == 139 {
            output.push_str("[Container killed: segmentation fault]\n");
        } else {
            debug!(container = %container.id, exit_code, elapsed_ms, "container finished");
        }

        Ok(CapturedRun {
            container,
            guard,
            output,
            exit_code,
            timed_out,
        })
    }

    /// Reject oversized payloads up front.
    pub(crate) fn check_sizes(&self, source_len: usize, input_len: usize) -> Result<(), EngineError> {
        if source_len > MAX_SOURCE_BYTES {
            return Err(EngineError::BadCommand(format!(
                "source exceeds the maximum of {MAX_SOURCE_BYTES} bytes"
            )));
        }
        if input_len > MAX_INPUT_BYTES {
            return Err(EngineError::BadCommand(format!(
                "input exceeds the maximum of {MAX_INPUT_BYTES} bytes"
            )));
        }
        Ok(())
    }
}

/// Raw result of one container run, before language-specific shaping.
pub(crate) struct CapturedRun {
    pub container: SandboxContainer,
    guard: ContainerGuard,
    pub output: String,
    pub exit_code: i64,
    pub timed_out: bool,
}

impl CapturedRun {
    /// Captured output with a timeout marker appended when the container
    /// was force-stopped at its deadline.
    pub fn output_with_timeout_note(&self) -> String {
        if self.timed_out {
            format!("{}[Execution timed out]\n", self.output)
        } else {
            self.output.clone()
        }
    }

    /// Awaited removal of the exited container.
    pub async fn finish(mut self, containers: &ContainerManager) {
        self.guard.defuse();
        containers.release(&self.container.id).await;
    }
}

/// Shell-quote one argument for inclusion in an `sh -c` command line.
pub(crate) fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Argument vector appended to a program invocation when the request
/// carried input: the program receives the content of `input.txt` as argv.
pub(crate) fn input_argv(has_input: bool) -> &'static str {
    if has_input {
        " \"$(cat input.txt)\""
    } else {
        ""
    }
}

/// Resolve the request input to raw text, decoding when flagged.
pub(crate) fn resolve_input(
    input: Option<&str>,
    is_base64: bool,
) -> Result<Option<String>, EngineError> {
    match input {
        None => Ok(None),
        Some(raw) if is_base64 => Ok(Some(crate::io::encoding::decode_base64_text(raw)?)),
        Some(raw) => Ok(Some(raw.to_string())),
    }
}

/// Encode the response output when the client asked for base64.
pub(crate) fn shape_output(output: String, as_base64: bool) -> String {
    if as_base64 {
        crate::io::encoding::encode_base64(output.as_bytes())
    } else {
        output
    }
}

/// Python module name for a file like `main.py`.
pub(crate) fn module_name(file: &str) -> &str {
    file.strip_suffix(".py").unwrap_or(file)
}
