//! The capability interface the pools and the executor drive.
//!
//! Everything the core needs from a container runtime fits in six
//! operations. [`DockerRuntime`](crate::docker::DockerRuntime) implements
//! them by shelling out to a Docker-compatible CLI; tests substitute an
//! in-memory fake.

use std::{path::Path, time::Duration};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::error::RuntimeError;

/// Isolation and resource settings requested for every sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerLimits {
    pub no_network: bool,
    /// CPU share, in cores (0.5 = half a core).
    pub cpus: f64,
    /// Memory cap in the runtime's notation (e.g. "50m", "1g").
    pub memory: String,
    pub pids_limit: Option<u32>,
    /// Long-running command that keeps an idle sandbox alive.
    pub idle_command: Vec<String>,
}

impl Default for ContainerLimits {
    fn default() -> Self {
        Self {
            no_network: true,
            cpus: 0.5,
            memory: "50m".into(),
            pids_limit: None,
            idle_command: vec!["sleep".into(), "infinity".into()],
        }
    }
}

/// Captured result of a command run inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Interleaved stdout and stderr.
    pub output: String,
    /// Exit status; `None` when the command was killed.
    pub exit_code: Option<i32>,
    /// The deadline fired before the command exited.
    pub timed_out: bool,
}

impl ExecOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Lifecycle commands against an external container runtime.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Human-readable backend name (e.g. "docker", "podman").
    fn backend_name(&self) -> &'static str;

    /// Start an isolated instance of `image` and return its id.
    async fn create(&self, image: &str, limits: &ContainerLimits) -> Result<String, RuntimeError>;

    /// Copy a host file into the instance at `remote`.
    async fn copy_into(&self, id: &str, local: &Path, remote: &str) -> Result<(), RuntimeError>;

    /// Run `argv` inside the instance, killing it once `deadline` elapses.
    ///
    /// A command that runs and exits non-zero is `Ok`; `Err` means the
    /// runtime could not run the command at all.
    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        deadline: Duration,
        max_output_bytes: usize,
    ) -> Result<ExecOutput, RuntimeError>;

    /// Stop the instance, waiting up to `grace` before the runtime kills it.
    async fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Kill the instance immediately.
    async fn kill(&self, id: &str) -> Result<(), RuntimeError>;

    /// Remove the instance. With `force`, a running instance is removed too.
    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError>;
}

/// Cut `output` down to `max_bytes` on a char boundary and mark it.
pub(crate) fn truncate_output(output: &mut String, max_bytes: usize) {
    if output.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str("\n... [output truncated]");
}
