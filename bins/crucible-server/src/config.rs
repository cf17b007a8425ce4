// Runtime configuration, sourced from the environment.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use crucible_common::types::Language;

use crate::io::encoding::parse_memory_limit;

/// Fixed path at which every workspace is bind-mounted inside its container.
pub const CONTAINER_WORKDIR: &str = "/usr/src/app";

/// Service-wide configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// OCI runtime handed to the daemon (`runc`, `runsc`, ...).
    pub docker_runtime: String,
    pub image_python: String,
    pub image_python_unittest: String,
    pub image_java: String,
    pub image_java_junit: String,
    pub image_cpp: String,
    pub image_cpp_doctest: String,
    /// Fraction of one core granted to each container.
    pub cpu_limit: f64,
    pub memory_limit_bytes: i64,
    /// Wall-clock limit per container, in milliseconds.
    pub execution_time_limit_ms: u64,
    /// End-to-end limit per HTTP request, in milliseconds.
    pub request_time_limit_ms: u64,
    pub log_level: String,
    /// Root under which per-execution workspaces are created. Must be a host
    /// path the Docker daemon can bind-mount, which differs from the local
    /// temp dir when the service itself runs inside a container.
    pub tmp_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let memory_raw = env::var("MEMORY_LIMIT").unwrap_or_else(|_| "1G".to_string());
        let memory_limit_bytes = parse_memory_limit(&memory_raw)
            .with_context(|| format!("invalid MEMORY_LIMIT '{memory_raw}'"))?;

        Ok(Self {
            bind_addr: env_parse("BIND_ADDR", "0.0.0.0:8080".parse().unwrap()),
            docker_runtime: env::var("DOCKER_RUNTIME").unwrap_or_else(|_| "runc".to_string()),
            image_python: env_image("DOCKER_IMAGE_PYTHON", "crucible-python:latest"),
            image_python_unittest: env_image(
                "DOCKER_IMAGE_PYTHON_UNITTEST",
                "crucible-python-unittest:latest",
            ),
            image_java: env_image("DOCKER_IMAGE_JAVA", "crucible-java:latest"),
            image_java_junit: env_image("DOCKER_IMAGE_JAVA_JUNIT", "crucible-java-junit:latest"),
            image_cpp: env_image("DOCKER_IMAGE_CPP", "crucible-cpp:latest"),
            image_cpp_doctest: env_image("DOCKER_IMAGE_CPP_DOCTEST", "crucible-cpp-doctest:latest"),
            cpu_limit: env_parse("CPU_LIMIT", 0.8),
            memory_limit_bytes,
            execution_time_limit_ms: env_parse("EXECUTION_TIME_LIMIT", 10_000),
            request_time_limit_ms: env_parse("REQUEST_TIME_LIMIT", 10_000),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "warn".to_string()),
            tmp_dir: env::var("HOST_TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
        })
    }

    /// Image reference for a batch execution.
    pub fn image_for(&self, language: Language, assignment: bool) -> &str {
        match (language, assignment) {
            (Language::Python, false) => &self.image_python,
            (Language::Python, true) => &self.image_python_unittest,
            (Language::Java, false) => &self.image_java,
            (Language::Java, true) => &self.image_java_junit,
            (Language::Cpp, false) => &self.image_cpp,
            (Language::Cpp, true) => &self.image_cpp_doctest,
        }
    }

    /// CPU budget expressed in the daemon's nano-CPU unit.
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0) as i64
    }
}

fn env_image(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
