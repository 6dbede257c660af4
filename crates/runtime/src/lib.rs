//! Rezn runtime: lists, starts and removes containers by name.
//! The default implementation shells out to the docker CLI (or anything CLI-compatible).

#![forbid(unsafe_code)]

use std::process::Stdio;

use metrics::{counter, histogram};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime binary could not be run, or the daemon behind it is unreachable.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
    #[error("{op} {target} failed: {stderr}")]
    CommandFailed { op: &'static str, target: String, stderr: String },
    #[error("invalid {what}: {value:?}")]
    InvalidInput { what: &'static str, value: String },
}

/// Narrow interface the reconciler drives. Every call may block and may fail on its own.
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Names of running containers, in the order the runtime reports them.
    async fn list_running(&self) -> Result<Vec<String>, RuntimeError>;

    /// Start a detached container, publishing each port host:container identically.
    async fn create(&self, name: &str, image: &str, ports: &[u16]) -> Result<(), RuntimeError>;

    /// Force-remove a container whether or not it is running.
    async fn destroy(&self, name: &str) -> Result<(), RuntimeError>;
}

/// Docker CLI adapter. `bin` may point at podman or a wrapper script.
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
}

impl DockerCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Binary from `REZN_DOCKER_BIN`, defaulting to `docker`.
    pub fn from_env() -> Self {
        Self::new(std::env::var("REZN_DOCKER_BIN").unwrap_or_else(|_| "docker".to_string()))
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    async fn run(&self, op: &'static str, target: &str, args: &[String]) -> Result<String, RuntimeError> {
        let started = std::time::Instant::now();
        debug!(bin = %self.bin, ?args, "runtime command");
        let out = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("cannot run {}: {}", self.bin, e)))?;
        histogram!("runtime_cmd_ms", started.elapsed().as_secs_f64() * 1000.0);
        if !out.status.success() {
            counter!("runtime_cmd_err_total", 1u64);
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            let stderr = if stderr.is_empty() { format!("exit status {}", out.status) } else { stderr };
            return Err(RuntimeError::CommandFailed { op, target: target.to_string(), stderr });
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_running(&self) -> Result<Vec<String>, RuntimeError> {
        let args = ["ps", "--format", "{{.Names}}"].map(String::from);
        match self.run("list", "containers", &args).await {
            Ok(stdout) => Ok(parse_listing(&stdout)),
            // A failing `ps` means we cannot observe anything; callers treat it like a missing binary.
            Err(RuntimeError::CommandFailed { stderr, .. }) => Err(RuntimeError::Unavailable(stderr)),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, name: &str, image: &str, ports: &[u16]) -> Result<(), RuntimeError> {
        validate("container name", name)?;
        validate("image", image)?;
        self.run("create", name, &run_args(name, image, ports)).await?;
        Ok(())
    }

    async fn destroy(&self, name: &str) -> Result<(), RuntimeError> {
        validate("container name", name)?;
        let args = ["rm".to_string(), "-f".to_string(), name.to_string()];
        self.run("destroy", name, &args).await?;
        Ok(())
    }
}

/// One name per line, trimmed. Empty output is an empty listing, never `[""]`.
pub fn parse_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

/// Arguments for `run -d --name <name> [-p P:P]... <image>`.
pub fn run_args(name: &str, image: &str, ports: &[u16]) -> Vec<String> {
    let mut args = vec!["run".to_string(), "-d".to_string(), "--name".to_string(), name.to_string()];
    for port in ports {
        args.push("-p".to_string());
        args.push(format!("{}:{}", port, port));
    }
    args.push(image.to_string());
    args
}

/// Reject values the CLI would misread: empty, embedded whitespace or `;`, or a leading `-`.
fn validate(what: &'static str, value: &str) -> Result<(), RuntimeError> {
    let bad = value.is_empty()
        || value.starts_with('-')
        || value.chars().any(|c| c.is_whitespace() || c == ';');
    if bad {
        return Err(RuntimeError::InvalidInput { what, value: value.to_string() });
    }
    Ok(())
}
