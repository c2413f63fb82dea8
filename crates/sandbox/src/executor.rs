//! The execution pipeline: route a request to its language pool, run the code
//! in a warm sandbox and hand the sandbox back.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    futures::future::join_all,
    serde::{Deserialize, Serialize},
    tempfile::TempDir,
    tokio::{sync::OnceCell, time::Instant},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use runbox_metrics::{counter, gauge, histogram, executor as executor_metrics, labels};

use crate::{
    error::{ExecError, RuntimeError},
    language::{LanguageSpec, LanguageTable},
    pool::{ContainerPool, PoolOptions, PoolStatus},
    runtime::{ContainerLimits, ExecOutput, SandboxRuntime},
    types::{ExecuteRequest, ExecuteResult, SandboxHandle},
};

/// Deadline for the scrub command that clears a sandbox between runs.
const SCRUB_TIMEOUT: Duration = Duration::from_secs(10);

/// Output cap for the scrub command; only failures are logged.
const SCRUB_OUTPUT_BYTES: usize = 4096;

/// Deadline for killing what a timed-out program left running.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Kills every process in the sandbox except its init and the shell itself.
const REAP_SCRIPT: &str = "kill -KILL -1 2>/dev/null; true";

/// Headroom for output pipes to close after each command.
const PIPE_SLACK: Duration = Duration::from_secs(5);

/// What to do with a sandbox whose program hit the execution deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Destroy it and provision a fresh one.
    #[default]
    Recycle,
    /// Kill its processes, scrub it and return it to the pool.
    Reuse,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Sandboxes per language.
    pub pool_size: usize,
    /// Deadline shared by the compile and run steps.
    pub execution_timeout: Duration,
    /// How long a request waits for an idle sandbox.
    pub acquire_timeout: Duration,
    pub stop_grace: Duration,
    /// How long shutdown waits for in-flight executions.
    pub drain_timeout: Duration,
    pub max_output_bytes: usize,
    pub timeout_policy: TimeoutPolicy,
    pub container: ContainerLimits,
    /// Host directory for staged scripts; the system temp dir when unset.
    pub staging_dir: Option<PathBuf>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        let execution_timeout = Duration::from_secs(10);
        let stop_grace = Duration::from_secs(10);
        Self {
            pool_size: 2,
            execution_timeout,
            acquire_timeout: Duration::from_secs(5),
            stop_grace,
            drain_timeout: default_drain_timeout(execution_timeout, stop_grace),
            max_output_bytes: 200 * 1024,
            timeout_policy: TimeoutPolicy::Recycle,
            container: ContainerLimits::default(),
            staging_dir: None,
        }
    }
}

/// Long enough for an execution that just started to hit its own deadline
/// and hand its sandbox back: either destroyed (bounded by `stop_grace`) or
/// reaped and scrubbed.
#[must_use]
pub fn default_drain_timeout(execution_timeout: Duration, stop_grace: Duration) -> Duration {
    execution_timeout + stop_grace.max(REAP_TIMEOUT + SCRUB_TIMEOUT) + PIPE_SLACK
}

/// Runs submitted programs in per-language pools of warm sandboxes.
pub struct Executor {
    pools: HashMap<String, Arc<ContainerPool>>,
    runtime: Arc<dyn SandboxRuntime>,
    settings: ExecutorSettings,
    shutting_down: AtomicBool,
    shutdown: OnceCell<()>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("backend", &self.runtime.backend_name())
            .field("languages", &self.pools.len())
            .field("settings", &self.settings)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Build one pool per language and start warming them up in the
    /// background. Must be called from within a Tokio runtime.
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        languages: &LanguageTable,
        settings: ExecutorSettings,
    ) -> Self {
        let options = PoolOptions {
            limits: settings.container.clone(),
            stop_grace: settings.stop_grace,
            drain_timeout: settings.drain_timeout,
        };

        let pools: HashMap<_, _> = languages
            .iter()
            .map(|spec| {
                let pool = ContainerPool::new(
                    Arc::clone(spec),
                    settings.pool_size,
                    Arc::clone(&runtime),
                    options.clone(),
                );
                pool.warm_up();
                (spec.name.clone(), pool)
            })
            .collect();

        info!(
            backend = runtime.backend_name(),
            languages = ?languages.names().collect::<Vec<_>>(),
            pool_size = settings.pool_size,
            timeout_secs = settings.execution_timeout.as_secs(),
            "executor started, warming sandbox pools"
        );

        Self {
            pools,
            runtime,
            settings,
            shutting_down: AtomicBool::new(false),
            shutdown: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.runtime.backend_name()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Languages served, sorted by name.
    #[must_use]
    pub fn languages(&self) -> Vec<Arc<LanguageSpec>> {
        let mut specs: Vec<_> = self.pools.values().map(|p| Arc::clone(p.spec())).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Status of every pool, sorted by language.
    #[must_use]
    pub fn pool_status(&self) -> Vec<PoolStatus> {
        let mut status: Vec<_> = self.pools.values().map(|p| p.status()).collect();
        status.sort_by(|a, b| a.language.cmp(&b.language));
        status
    }

    /// Run `request.code` in a sandbox for `request.language`.
    ///
    /// A program that runs to completion is `Ok` whatever its exit status.
    ///
    /// Not cancellation safe: dropping the future after a sandbox was
    /// acquired leaves that sandbox checked out until shutdown. Callers that
    /// may be cancelled should drive it on a spawned task.
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResult, ExecError> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();
        #[cfg(feature = "metrics")]
        gauge!(executor_metrics::EXECUTIONS_IN_FLIGHT).increment(1.0);

        let result = self.pipeline(request).await;

        #[cfg(feature = "metrics")]
        {
            gauge!(executor_metrics::EXECUTIONS_IN_FLIGHT).decrement(1.0);
            let outcome = match &result {
                Ok(r) if r.succeeded => "success",
                Ok(_) => "nonzero_exit",
                Err(e) => e.kind(),
            };
            counter!(
                executor_metrics::EXECUTIONS_TOTAL,
                labels::LANGUAGE => request.language.clone(),
                labels::OUTCOME => outcome
            )
            .increment(1);
            histogram!(
                executor_metrics::EXECUTION_DURATION_SECONDS,
                labels::LANGUAGE => request.language.clone()
            )
            .record(start.elapsed().as_secs_f64());
        }

        match &result {
            Ok(r) => debug!(
                language = %request.language,
                exit_code = ?r.exit_code,
                output_len = r.output.len(),
                "execution complete"
            ),
            Err(e) if e.is_program_error() => {
                debug!(language = %request.language, kind = e.kind(), "program failed")
            },
            Err(e) => warn!(language = %request.language, kind = e.kind(), error = %e, "execution rejected"),
        }
        result
    }

    async fn pipeline(&self, request: &ExecuteRequest) -> Result<ExecuteResult, ExecError> {
        if self.is_shutting_down() {
            return Err(ExecError::ShuttingDown);
        }
        let pool = self
            .pools
            .get(&request.language)
            .ok_or_else(|| ExecError::UnsupportedLanguage(request.language.clone()))?;
        if pool.is_shutting_down() {
            return Err(ExecError::ShuttingDown);
        }

        let handle = pool.acquire(self.settings.acquire_timeout).await?;
        let spec = pool.spec();
        let result = self.run_in(spec, &handle, &request.code).await;

        let recycle = matches!(result, Err(ExecError::Timeout { .. }))
            && self.settings.timeout_policy == TimeoutPolicy::Recycle;
        if recycle {
            pool.retire(handle).await;
        } else {
            if matches!(result, Err(ExecError::Timeout { .. })) {
                self.reap(&handle).await;
            }
            if !matches!(result, Err(ExecError::StagingFailed(_))) {
                self.scrub(spec, &handle).await;
            }
            pool.release(handle);
        }
        result
    }

    /// Stage, deliver, compile and run. The staged copy on the host is
    /// removed when this returns, whatever the outcome.
    async fn run_in(
        &self,
        spec: &LanguageSpec,
        handle: &SandboxHandle,
        code: &str,
    ) -> Result<ExecuteResult, ExecError> {
        let (_workspace, script) = self.stage(spec, code).await?;

        self.runtime
            .copy_into(handle.id(), &script, &spec.remote_path())
            .await
            .map_err(ExecError::DeliveryFailed)?;

        let deadline = Instant::now() + self.settings.execution_timeout;

        if let Some(compile) = spec.compile_command() {
            let out = self.step(handle, &compile, deadline).await?;
            if !out.success() {
                return Err(ExecError::CompileFailed { output: out.output });
            }
            debug!(sandbox = %handle, "compiled");
        }

        let out = self.step(handle, &spec.run_command(), deadline).await?;
        Ok(ExecuteResult::from_exit(out.output, out.exit_code))
    }

    async fn stage(&self, spec: &LanguageSpec, code: &str) -> Result<(TempDir, PathBuf), ExecError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("runbox-");
        let workspace = match &self.settings.staging_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(ExecError::StagingFailed)?;

        let script = workspace.path().join(spec.script_name());
        tokio::fs::write(&script, code)
            .await
            .map_err(ExecError::StagingFailed)?;
        Ok((workspace, script))
    }

    /// Run one command with whatever is left of the shared deadline.
    async fn step(
        &self,
        handle: &SandboxHandle,
        argv: &[String],
        deadline: Instant,
    ) -> Result<ExecOutput, ExecError> {
        let after = self.settings.execution_timeout;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ExecError::Timeout {
                output: String::new(),
                after,
            });
        }

        match self
            .runtime
            .exec(handle.id(), argv, remaining, self.settings.max_output_bytes)
            .await
        {
            Ok(out) if out.timed_out => Err(ExecError::Timeout {
                output: out.output,
                after,
            }),
            Ok(out) => Ok(out),
            Err(RuntimeError::LaunchFailed(output)) => Err(ExecError::RunFailed {
                reason: format!("could not start `{}`", argv.join(" ")),
                output,
            }),
            Err(e) => Err(ExecError::RuntimeFailed(e)),
        }
    }

    /// Kill whatever a timed-out program left behind. Stopping the exec
    /// client does not stop the process inside the container.
    async fn reap(&self, handle: &SandboxHandle) {
        let argv = ["sh", "-c", REAP_SCRIPT].map(String::from);
        match self
            .runtime
            .exec(handle.id(), &argv, REAP_TIMEOUT, SCRUB_OUTPUT_BYTES)
            .await
        {
            Ok(out) if out.success() => debug!(sandbox = %handle, "timed-out program killed"),
            Ok(out) => warn!(
                sandbox = %handle,
                exit_code = ?out.exit_code,
                timed_out = out.timed_out,
                "failed to kill timed-out program"
            ),
            Err(e) => warn!(sandbox = %handle, error = %e, "failed to kill timed-out program"),
        }
    }

    /// Remove the script and build artifacts so the next run starts clean.
    async fn scrub(&self, spec: &LanguageSpec, handle: &SandboxHandle) {
        match self
            .runtime
            .exec(
                handle.id(),
                &spec.scrub_command(),
                SCRUB_TIMEOUT,
                SCRUB_OUTPUT_BYTES,
            )
            .await
        {
            Ok(out) if out.success() => {},
            Ok(out) => warn!(
                sandbox = %handle,
                exit_code = ?out.exit_code,
                timed_out = out.timed_out,
                output = %out.output.trim(),
                "scrub failed"
            ),
            Err(e) => warn!(sandbox = %handle, error = %e, "scrub failed"),
        }
    }

    /// Stop admitting work and tear down every pool.
    ///
    /// Idempotent; concurrent callers all return once every sandbox is gone.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.shutdown
            .get_or_init(|| async {
                info!(pools = self.pools.len(), "executor shutting down");
                join_all(self.pools.values().map(|pool| pool.cleanup())).await;
                info!("executor shut down, all sandboxes destroyed");
            })
            .await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, crate::pool::PoolState, crate::testing::FakeRuntime};

    fn settings() -> ExecutorSettings {
        ExecutorSettings {
            pool_size: 1,
            execution_timeout: Duration::from_millis(500),
            acquire_timeout: Duration::from_millis(200),
            stop_grace: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(5),
            ..ExecutorSettings::default()
        }
    }

    async fn ready(runtime: &Arc<FakeRuntime>, settings: ExecutorSettings) -> Arc<Executor> {
        let executor = Arc::new(Executor::new(
            runtime.clone(),
            &LanguageTable::builtin(),
            settings,
        ));
        for _ in 0..200 {
            if executor.pool_status().iter().all(|s| s.idle == s.capacity) {
                return executor;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pools never warmed up");
    }

    fn exited(output: &str, code: i32) -> Result<ExecOutput, RuntimeError> {
        Ok(ExecOutput {
            output: output.into(),
            exit_code: Some(code),
            timed_out: false,
        })
    }

    #[tokio::test]
    async fn runs_interpreted_code_and_scrubs() {
        let runtime = FakeRuntime::new();
        runtime.on_exec(|_| exited("hello\n", 0));
        let executor = ready(&runtime, settings()).await;

        let result = executor
            .execute(&ExecuteRequest::new("python3", "print('hello')"))
            .await
            .unwrap();
        assert_eq!(result.output, "hello\n");
        assert!(result.succeeded);

        let copies = runtime.copies();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].remote, "/tmp/script.py");
        assert_eq!(copies[0].contents, "print('hello')");

        let execs = runtime.execs();
        assert_eq!(execs[0].argv, vec!["python3", "/tmp/script.py"]);
        assert_eq!(execs[1].argv, vec!["sh", "-c", "rm -rf /tmp/script.py"]);

        let python = executor
            .pool_status()
            .into_iter()
            .find(|s| s.language == "python3")
            .unwrap();
        assert_eq!(python.idle, 1);
        assert_eq!(python.in_use, 0);
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_completed_run() {
        let runtime = FakeRuntime::new();
        runtime.on_exec(|_| exited("Traceback: ZeroDivisionError\n", 1));
        let executor = ready(&runtime, settings()).await;

        let result = executor
            .execute(&ExecuteRequest::new("python3", "1/0"))
            .await
            .unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.exit_code, Some(1));
        assert!(result.output.contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn unsupported_language_never_acquires() {
        let runtime = FakeRuntime::new();
        let executor = ready(&runtime, settings()).await;

        let err = executor
            .execute(&ExecuteRequest::new("brainfuck", "+++"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::UnsupportedLanguage(ref l) if l == "brainfuck"));
        assert!(runtime.execs().is_empty());
        assert!(executor.pool_status().iter().all(|s| s.in_use == 0));
    }

    #[tokio::test]
    async fn compile_failure_skips_the_run() {
        let runtime = FakeRuntime::new();
        runtime.on_exec(|argv| {
            if argv[0] == "g++" {
                exited("script.cpp:1: error: expected ';'\n", 1)
            } else {
                exited("should not run", 0)
            }
        });
        let executor = ready(&runtime, settings()).await;

        let err = executor
            .execute(&ExecuteRequest::new("cpp", "int main() { return 0 }"))
            .await
            .unwrap_err();
        match err {
            ExecError::CompileFailed { output } => assert!(output.contains("expected ';'")),
            other => panic!("unexpected {other:?}"),
        }
        let argv0: Vec<_> = runtime.execs().into_iter().map(|c| c.argv[0].clone()).collect();
        assert_eq!(argv0, vec!["g++", "sh"]);
    }

    #[tokio::test]
    async fn compiled_languages_compile_then_run() {
        let runtime = FakeRuntime::new();
        runtime.on_exec(|_| exited("42\n", 0));
        let executor = ready(&runtime, settings()).await;

        let result = executor
            .execute(&ExecuteRequest::new("java", "class script {}"))
            .await
            .unwrap();
        assert_eq!(result.output, "42\n");

        let execs = runtime.execs();
        assert_eq!(execs[0].argv, vec!["javac", "/tmp/script.java"]);
        assert_eq!(execs[1].argv, vec!["java", "-cp", "/tmp", "script"]);
        // Compile and run share one deadline.
        assert!(execs[1].deadline <= execs[0].deadline);
        assert_eq!(
            execs[2].argv,
            vec!["sh", "-c", "rm -rf /tmp/script.java /tmp/*.class"]
        );
    }

    #[tokio::test]
    async fn timeout_returns_partial_output_and_recycles() {
        let runtime = FakeRuntime::new();
        runtime.set_exec_delay(Duration::from_secs(60));
        let executor = ready(&runtime, settings()).await;
        let before = runtime.created().len();

        let err = executor
            .execute(&ExecuteRequest::new("python3", "while True: pass"))
            .await
            .unwrap_err();
        match &err {
            ExecError::Timeout { output, after } => {
                assert_eq!(output, "partial");
                assert_eq!(*after, Duration::from_millis(500));
            },
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_program_error());

        for _ in 0..200 {
            if runtime.created().len() == before + 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runtime.created().len(), before + 1);
        assert_eq!(runtime.destroyed().len(), 1);
    }

    #[tokio::test]
    async fn timeout_with_reuse_policy_reaps_scrubs_and_keeps_the_sandbox() {
        let runtime = FakeRuntime::new();
        runtime.set_exec_delay(Duration::from_secs(60));
        let executor = ready(
            &runtime,
            ExecutorSettings {
                timeout_policy: TimeoutPolicy::Reuse,
                ..settings()
            },
        )
        .await;

        let err = executor
            .execute(&ExecuteRequest::new("nodejs", "for(;;){}"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
        assert!(runtime.destroyed().is_empty());

        let execs = runtime.execs();
        let tail: Vec<_> = execs[execs.len() - 2..]
            .iter()
            .map(|c| c.argv[2].clone())
            .collect();
        assert_eq!(tail, vec![REAP_SCRIPT, "rm -rf /tmp/script.js"]);
    }

    #[test]
    fn drain_budget_covers_housekeeping() {
        let budget = default_drain_timeout(Duration::from_secs(10), Duration::ZERO);
        assert!(budget >= Duration::from_secs(10) + REAP_TIMEOUT + SCRUB_TIMEOUT);
        let budget = default_drain_timeout(Duration::from_secs(10), Duration::from_secs(60));
        assert!(budget >= Duration::from_secs(70));
    }

    #[tokio::test]
    async fn draining_pool_refuses_work_while_executor_runs() {
        let runtime = FakeRuntime::new();
        let executor = ready(&runtime, settings()).await;
        executor.pools["python3"].cleanup().await;

        assert!(!executor.is_shutting_down());
        let err = executor
            .execute(&ExecuteRequest::new("python3", "print(1)"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::ShuttingDown));
        assert!(runtime.copies().is_empty());

        let other = executor
            .execute(&ExecuteRequest::new("nodejs", "console.log(1)"))
            .await
            .unwrap();
        assert!(other.succeeded);
    }

    #[tokio::test]
    async fn scrub_failure_still_returns_the_sandbox() {
        let runtime = FakeRuntime::new();
        runtime.fail_scrubs();
        let executor = ready(&runtime, settings()).await;

        for _ in 0..2 {
            let result = executor
                .execute(&ExecuteRequest::new("python3", "print('ok')"))
                .await
                .unwrap();
            assert_eq!(result.output, "ok\n");
        }

        let python = executor
            .pool_status()
            .into_iter()
            .find(|s| s.language == "python3")
            .unwrap();
        assert_eq!(python.idle, 1);
        assert_eq!(python.in_use, 0);
        assert!(runtime.destroyed().is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_releases_the_sandbox() {
        let runtime = FakeRuntime::new();
        runtime.fail_copies();
        let executor = ready(&runtime, settings()).await;

        let err = executor
            .execute(&ExecuteRequest::new("go", "package main"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::DeliveryFailed(_)));
        assert!(executor.pool_status().iter().all(|s| s.in_use == 0));
    }

    #[tokio::test]
    async fn staging_failure_releases_the_sandbox() {
        let runtime = FakeRuntime::new();
        let executor = ready(
            &runtime,
            ExecutorSettings {
                staging_dir: Some(PathBuf::from("/nonexistent/runbox-staging")),
                ..settings()
            },
        )
        .await;

        let err = executor
            .execute(&ExecuteRequest::new("python3", "print(1)"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::StagingFailed(_)));
        assert!(runtime.execs().is_empty());
        assert!(executor.pool_status().iter().all(|s| s.in_use == 0));
    }

    #[tokio::test]
    async fn launch_and_runtime_failures_are_distinguished() {
        let runtime = FakeRuntime::new();
        runtime.on_exec(|argv| match argv[0].as_str() {
            "/tmp/script" => Err(RuntimeError::LaunchFailed(
                "OCI runtime exec failed: no such file".into(),
            )),
            _ => Err(RuntimeError::command_failed(
                "exec",
                "Error response from daemon: container is not running",
            )),
        });
        let executor = ready(&runtime, settings()).await;

        let err = executor
            .execute(&ExecuteRequest::new("python3", "print(1)"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::RuntimeFailed(_)));
        assert!(!err.is_program_error());

        runtime.on_exec(|argv| match argv[0].as_str() {
            "g++" => exited("", 0),
            _ => Err(RuntimeError::LaunchFailed(
                "OCI runtime exec failed: no such file".into(),
            )),
        });
        let err = executor
            .execute(&ExecuteRequest::new("cpp", "int main(){}"))
            .await
            .unwrap_err();
        match err {
            ExecError::RunFailed { output, reason } => {
                assert!(output.contains("OCI runtime exec failed"));
                assert_eq!(reason, "could not start `/tmp/script`");
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_request_waits_for_the_first() {
        let runtime = FakeRuntime::new();
        runtime.set_exec_delay(Duration::from_millis(50));
        let executor = ready(
            &runtime,
            ExecutorSettings {
                acquire_timeout: Duration::from_secs(2),
                ..settings()
            },
        )
        .await;

        let a = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute(&ExecuteRequest::new("python3", "a")).await })
        };
        let b = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute(&ExecuteRequest::new("python3", "b")).await })
        };
        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());

        let ids: Vec<_> = runtime.execs().into_iter().map(|c| c.id).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn second_request_times_out_when_the_first_holds_the_sandbox() {
        let runtime = FakeRuntime::new();
        runtime.set_exec_delay(Duration::from_millis(400));
        let executor = ready(
            &runtime,
            ExecutorSettings {
                acquire_timeout: Duration::from_millis(50),
                ..settings()
            },
        )
        .await;

        let first = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute(&ExecuteRequest::new("python3", "a")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = executor
            .execute(&ExecuteRequest::new("python3", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::PoolExhausted));
        assert!(err.is_retryable());
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work_and_destroys_everything() {
        let runtime = FakeRuntime::new();
        let executor = ready(&runtime, settings()).await;

        tokio::join!(executor.shutdown(), executor.shutdown());
        executor.shutdown().await;

        assert!(executor.is_shutting_down());
        assert!(
            executor
                .pool_status()
                .iter()
                .all(|s| s.state == PoolState::Terminated && s.warm == 0)
        );
        assert_eq!(runtime.live(), 0);

        let err = executor
            .execute(&ExecuteRequest::new("python3", "print(1)"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::ShuttingDown));
    }

    #[tokio::test]
    async fn shutdown_lets_the_in_flight_execution_finish() {
        let runtime = FakeRuntime::new();
        runtime.set_exec_delay(Duration::from_millis(100));
        let executor = ready(&runtime, settings()).await;

        let running = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                executor
                    .execute(&ExecuteRequest::new("python3", "import time"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        executor.shutdown().await;

        let result = running.await.unwrap().unwrap();
        assert_eq!(result.output, "ok\n");
        assert!(runtime.removed_while_busy().is_empty());
        assert_eq!(runtime.live(), 0);
    }

    #[tokio::test]
    async fn languages_are_sorted() {
        let runtime = FakeRuntime::new();
        let executor = ready(&runtime, settings()).await;
        let names: Vec<_> = executor
            .languages()
            .iter()
            .map(|s| s.name.clone())
            .collect();
        assert_eq!(names, vec!["cpp", "go", "java", "nodejs", "python3"]);
        executor.shutdown().await;
    }
}
