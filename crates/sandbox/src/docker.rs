//! [`SandboxRuntime`] backed by a Docker-compatible CLI (`docker`, `podman`).

use std::{
    path::Path,
    process::Stdio,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::{
        io::{AsyncRead, AsyncReadExt},
        process::Command,
    },
    tracing::{debug, warn},
};

use crate::{
    error::RuntimeError,
    runtime::{ContainerLimits, ExecOutput, SandboxRuntime, truncate_output},
    types::short_id,
};

/// Label attached to every container this crate creates.
pub const MANAGED_LABEL: &str = "runbox.managed=true";

/// How long to keep draining output pipes after the exec client exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Drives containers through the `docker` CLI or a drop-in replacement.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    cli: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerRuntime {
    pub fn new(cli: impl Into<String>) -> Self {
        Self { cli: cli.into() }
    }

    #[must_use]
    pub fn cli(&self) -> &str {
        &self.cli
    }

    /// Check whether the CLI is installed and answers `--version`.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.cli)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|s| s.success())
    }

    /// Ids of every container carrying [`MANAGED_LABEL`], running or not.
    pub async fn list_managed(&self) -> Result<Vec<String>, RuntimeError> {
        let args = [
            "ps".to_string(),
            "-aq".to_string(),
            "--filter".to_string(),
            format!("label={MANAGED_LABEL}"),
        ];
        let stdout = self.run("ps", &args).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Whether the container exists and is running. Any failure to ask
    /// counts as not running.
    async fn is_running(&self, id: &str) -> bool {
        let args = [
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.Running}}".to_string(),
            id.to_string(),
        ];
        self.run("inspect", &args)
            .await
            .is_ok_and(|out| out.trim() == "true")
    }

    async fn run(&self, op: &'static str, args: &[String]) -> Result<String, RuntimeError> {
        let output = Command::new(&self.cli)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| self.spawn_error(source))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::command_failed(op, stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn spawn_error(&self, source: std::io::Error) -> RuntimeError {
        RuntimeError::Spawn {
            cli: self.cli.clone(),
            source,
        }
    }
}

/// Arguments for `<cli> run` that start one idle sandbox.
fn create_args(image: &str, limits: &ContainerLimits) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--label".to_string(),
        MANAGED_LABEL.to_string(),
    ];
    if limits.no_network {
        args.push("--network=none".to_string());
    }
    args.push(format!("--cpus={}", limits.cpus));
    args.push(format!("--memory={}", limits.memory));
    if let Some(pids) = limits.pids_limit {
        args.push(format!("--pids-limit={pids}"));
    }
    // Clear the image entrypoint so the idle command runs as-is.
    args.push("--entrypoint=".to_string());
    args.push(image.to_string());
    args.extend(limits.idle_command.iter().cloned());
    args
}

/// Separate failures of the runtime itself from the program's own exit
/// status, judging only by what the exec client printed.
///
/// A daemon error means the exec never reached the container. An OCI
/// "exec failed" diagnostic with status 126/127 means the command could not
/// be started inside it. The program writes to the same stream, so a daemon
/// error found here is only a suspicion; `exec` confirms it against the
/// container state. A forged launch failure stays a program error.
fn classify_exec_failure(exit_code: i32, output: &str) -> Option<RuntimeError> {
    if exit_code == 0 {
        return None;
    }
    let trimmed = output.trim();
    if trimmed.starts_with("Error response from daemon:") {
        return Some(RuntimeError::command_failed("exec", trimmed));
    }
    if matches!(exit_code, 126 | 127) && trimmed.contains("OCI runtime exec failed") {
        return Some(RuntimeError::LaunchFailed(trimmed.to_string()));
    }
    None
}

/// Copy everything from `reader` into `sink`, keeping at most `limit + 1`
/// bytes so callers can tell the output was cut.
async fn pump<R>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>, limit: usize)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut sink = sink.lock().unwrap_or_else(|e| e.into_inner());
                let room = limit.saturating_add(1).saturating_sub(sink.len());
                sink.extend_from_slice(&buf[..n.min(room)]);
            },
        }
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    fn backend_name(&self) -> &'static str {
        if self.cli.ends_with("podman") {
            "podman"
        } else {
            "docker"
        }
    }

    async fn create(&self, image: &str, limits: &ContainerLimits) -> Result<String, RuntimeError> {
        let stdout = self.run("run", &create_args(image, limits)).await?;
        let id = stdout.trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::EmptyId);
        }
        debug!(id = short_id(&id), image, "sandbox container created");
        Ok(id)
    }

    async fn copy_into(&self, id: &str, local: &Path, remote: &str) -> Result<(), RuntimeError> {
        let args = [
            "cp".to_string(),
            local.display().to_string(),
            format!("{id}:{remote}"),
        ];
        self.run("cp", &args).await.map(|_| ())
    }

    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        deadline: Duration,
        max_output_bytes: usize,
    ) -> Result<ExecOutput, RuntimeError> {
        let mut child = Command::new(&self.cli)
            .arg("exec")
            .arg(id)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| self.spawn_error(source))?;

        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(
                stdout,
                Arc::clone(&captured),
                max_output_bytes,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(
                stderr,
                Arc::clone(&captured),
                max_output_bytes,
            )));
        }

        let (exit_code, timed_out) = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(source)) => return Err(self.spawn_error(source)),
            Err(_) => {
                warn!(
                    id = short_id(id),
                    timeout_secs = deadline.as_secs(),
                    "sandbox exec deadline reached, killing client"
                );
                if let Err(e) = child.kill().await {
                    warn!(id = short_id(id), error = %e, "failed to kill exec client");
                }
                (None, true)
            },
        };

        for pump in pumps {
            if tokio::time::timeout(PIPE_DRAIN_GRACE, pump).await.is_err() {
                debug!(id = short_id(id), "output pipe still open after exit");
            }
        }

        let bytes = std::mem::take(&mut *captured.lock().unwrap_or_else(|e| e.into_inner()));
        let mut output = String::from_utf8_lossy(&bytes).into_owned();
        truncate_output(&mut output, max_output_bytes);

        match exit_code.and_then(|code| classify_exec_failure(code, &output)) {
            Some(err @ RuntimeError::CommandFailed { .. }) => {
                if !self.is_running(id).await {
                    return Err(err);
                }
                debug!(
                    id = short_id(id),
                    "daemon error text from a running sandbox, keeping it as program output"
                );
            },
            Some(err) => return Err(err),
            None => {},
        }

        debug!(
            id = short_id(id),
            ?exit_code,
            timed_out,
            output_len = output.len(),
            "sandbox exec complete"
        );
        Ok(ExecOutput {
            output,
            exit_code,
            timed_out,
        })
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let args = [
            "stop".to_string(),
            "-t".to_string(),
            grace.as_secs().to_string(),
            id.to_string(),
        ];
        self.run("stop", &args).await.map(|_| ())
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        self.run("kill", &["kill".to_string(), id.to_string()])
            .await
            .map(|_| ())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(id.to_string());
        self.run("rm", &args).await.map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn create_args_request_isolation() {
        let args = create_args("python:3.12-slim", &ContainerLimits::default());
        assert_eq!(
            args,
            vec![
                "run",
                "-d",
                "--label",
                "runbox.managed=true",
                "--network=none",
                "--cpus=0.5",
                "--memory=50m",
                "--entrypoint=",
                "python:3.12-slim",
                "sleep",
                "infinity",
            ]
        );
    }

    #[test]
    fn create_args_with_network_and_pids() {
        let limits = ContainerLimits {
            no_network: false,
            cpus: 2.0,
            memory: "1g".into(),
            pids_limit: Some(64),
            idle_command: vec!["sleep".into(), "3600".into()],
        };
        let args = create_args("gcc:14", &limits);
        assert!(!args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--cpus=2".to_string()));
        assert!(args.contains(&"--memory=1g".to_string()));
        assert!(args.contains(&"--pids-limit=64".to_string()));
        assert_eq!(args.last().unwrap(), "3600");
    }

    #[test]
    fn exec_failures_are_told_apart_from_program_exits() {
        assert!(matches!(
            classify_exec_failure(1, "Error response from daemon: No such container: abc"),
            Some(RuntimeError::CommandFailed { op: "exec", .. })
        ));
        assert!(matches!(
            classify_exec_failure(
                127,
                "OCI runtime exec failed: exec failed: unable to start container process: exec: \"node\": executable file not found in $PATH"
            ),
            Some(RuntimeError::LaunchFailed(_))
        ));
        assert!(classify_exec_failure(127, "sh: foo: not found").is_none());
        assert!(classify_exec_failure(1, "Traceback (most recent call last):").is_none());
        assert!(classify_exec_failure(0, "Error response from daemon: fine").is_none());
    }

    #[test]
    fn backend_name_follows_cli() {
        assert_eq!(DockerRuntime::default().backend_name(), "docker");
        assert_eq!(
            DockerRuntime::new("/usr/bin/podman").backend_name(),
            "podman"
        );
    }

    #[tokio::test]
    async fn missing_cli_is_a_spawn_error() {
        let runtime = DockerRuntime::new("runbox-definitely-not-a-real-cli");
        assert!(!runtime.is_available().await);
        let err = runtime.kill("abc").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }

    /// A stand-in container CLI: `exec` prints a daemon-style error and
    /// exits 1, `inspect` answers with `inspect_body`.
    #[cfg(unix)]
    fn scripted_cli(dir: &Path, inspect_body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-docker");
        let script = format!(
            "#!/bin/sh\ncase \"$1\" in\n  exec) echo 'Error response from daemon: x'; echo 'more program output'; exit 1 ;;\n  inspect) {inspect_body} ;;\nesac\n"
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn program_output_cannot_pose_as_a_daemon_error() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = DockerRuntime::new(scripted_cli(dir.path(), "echo true"));

        let out = runtime
            .exec("abc", &["python3".to_string()], Duration::from_secs(5), 1024)
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(1));
        assert!(!out.timed_out);
        assert!(out.output.starts_with("Error response from daemon: x"));
        assert!(out.output.contains("more program output"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn daemon_error_for_a_gone_container_is_a_runtime_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = DockerRuntime::new(scripted_cli(
            dir.path(),
            "echo 'Error: No such object: abc' >&2; exit 1",
        ));

        let err = runtime
            .exec("abc", &["python3".to_string()], Duration::from_secs(5), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::CommandFailed { op: "exec", .. }));
    }

    #[tokio::test]
    async fn pump_caps_captured_bytes() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        pump(&b"0123456789"[..], Arc::clone(&sink), 4).await;
        assert_eq!(sink.lock().unwrap().as_slice(), b"01234");
    }
}
