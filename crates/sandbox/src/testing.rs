//! In-memory [`SandboxRuntime`] for tests.
//!
//! Records every lifecycle call and answers `exec` through a replaceable
//! handler. Housekeeping commands (`sh -c "rm -rf …"` scrubs and `sh -c
//! "kill …"` reaps) succeed silently unless told otherwise.

use std::{
    collections::HashSet,
    path::Path,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    error::RuntimeError,
    runtime::{ContainerLimits, ExecOutput, SandboxRuntime, truncate_output},
};

type ExecHandler = dyn Fn(&[String]) -> Result<ExecOutput, RuntimeError> + Send + Sync;

/// A single `exec` call as seen by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub id: String,
    pub argv: Vec<String>,
    pub deadline: Duration,
}

/// A single `copy_into` call, with the file contents read at copy time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyCall {
    pub id: String,
    pub remote: String,
    pub contents: String,
}

#[derive(Default)]
struct Recorded {
    created: Vec<String>,
    destroyed: Vec<String>,
    killed: Vec<String>,
    execs: Vec<ExecCall>,
    copies: Vec<CopyCall>,
    /// Containers with an exec currently running.
    busy: HashSet<String>,
    /// Containers removed while an exec was running on them.
    removed_while_busy: Vec<String>,
}

#[derive(Default)]
struct Knobs {
    create_failures: usize,
    create_delay: Duration,
    exec_delay: Duration,
    fail_stops: bool,
    fail_copies: bool,
    fail_scrubs: bool,
}

pub struct FakeRuntime {
    next_id: AtomicUsize,
    recorded: Mutex<Recorded>,
    knobs: Mutex<Knobs>,
    handler: Mutex<Arc<ExecHandler>>,
}

impl FakeRuntime {
    /// A runtime whose programs print `ok` and exit 0.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicUsize::new(0),
            recorded: Mutex::new(Recorded::default()),
            knobs: Mutex::new(Knobs::default()),
            handler: Mutex::new(Arc::new(|_: &[String]| {
                Ok(ExecOutput {
                    output: "ok\n".into(),
                    exit_code: Some(0),
                    timed_out: false,
                })
            })),
        })
    }

    /// Replace the answer for every non-housekeeping `exec`.
    pub fn on_exec<F>(&self, handler: F)
    where
        F: Fn(&[String]) -> Result<ExecOutput, RuntimeError> + Send + Sync + 'static,
    {
        *self.handler.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(handler);
    }

    /// Make the next `n` creates fail.
    pub fn fail_creates(&self, n: usize) {
        self.knobs().create_failures = n;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.knobs().create_delay = delay;
    }

    /// Make every non-housekeeping `exec` take `delay`. Execs whose deadline is
    /// shorter report a timeout with the output `partial`.
    pub fn set_exec_delay(&self, delay: Duration) {
        self.knobs().exec_delay = delay;
    }

    pub fn fail_stops(&self) {
        self.knobs().fail_stops = true;
    }

    pub fn fail_copies(&self) {
        self.knobs().fail_copies = true;
    }

    /// Make every scrub exit non-zero.
    pub fn fail_scrubs(&self) {
        self.knobs().fail_scrubs = true;
    }

    pub fn created(&self) -> Vec<String> {
        self.recorded().created.clone()
    }

    /// Ids that were force-removed.
    pub fn destroyed(&self) -> Vec<String> {
        self.recorded().destroyed.clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.recorded().killed.clone()
    }

    pub fn execs(&self) -> Vec<ExecCall> {
        self.recorded().execs.clone()
    }

    pub fn copies(&self) -> Vec<CopyCall> {
        self.recorded().copies.clone()
    }

    pub fn removed_while_busy(&self) -> Vec<String> {
        self.recorded().removed_while_busy.clone()
    }

    /// Containers created and not yet removed.
    pub fn live(&self) -> usize {
        let recorded = self.recorded();
        recorded.created.len() - recorded.destroyed.len()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn knobs(&self) -> MutexGuard<'_, Knobs> {
        self.knobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn housekeeping(argv: &[String]) -> Option<&str> {
    if argv.first().is_none_or(|a| a != "sh") {
        return None;
    }
    argv.get(2)
        .map(String::as_str)
        .filter(|cmd| cmd.starts_with("rm -rf") || cmd.starts_with("kill"))
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    fn backend_name(&self) -> &'static str {
        "fake"
    }

    async fn create(&self, _image: &str, _limits: &ContainerLimits) -> Result<String, RuntimeError> {
        let delay = self.knobs().create_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        {
            let mut knobs = self.knobs();
            if knobs.create_failures > 0 {
                knobs.create_failures -= 1;
                return Err(RuntimeError::command_failed("run", "image not found"));
            }
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("fake{n:060}");
        self.recorded().created.push(id.clone());
        Ok(id)
    }

    async fn copy_into(&self, id: &str, local: &Path, remote: &str) -> Result<(), RuntimeError> {
        if self.knobs().fail_copies {
            return Err(RuntimeError::command_failed("cp", "no space left on device"));
        }
        let contents = tokio::fs::read_to_string(local).await.map_err(|source| {
            RuntimeError::Spawn {
                cli: "fake".into(),
                source,
            }
        })?;
        self.recorded().copies.push(CopyCall {
            id: id.to_string(),
            remote: remote.to_string(),
            contents,
        });
        Ok(())
    }

    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        deadline: Duration,
        max_output_bytes: usize,
    ) -> Result<ExecOutput, RuntimeError> {
        self.recorded().execs.push(ExecCall {
            id: id.to_string(),
            argv: argv.to_vec(),
            deadline,
        });
        if let Some(cmd) = housekeeping(argv) {
            let failed = cmd.starts_with("rm -rf") && self.knobs().fail_scrubs;
            return Ok(ExecOutput {
                output: if failed {
                    "rm: cannot remove '/tmp': Device or resource busy\n".into()
                } else {
                    String::new()
                },
                exit_code: Some(i32::from(failed)),
                timed_out: false,
            });
        }

        let delay = self.knobs().exec_delay;
        if !delay.is_zero() {
            self.recorded().busy.insert(id.to_string());
            tokio::time::sleep(delay.min(deadline)).await;
            self.recorded().busy.remove(id);
            if delay >= deadline {
                return Ok(ExecOutput {
                    output: "partial".into(),
                    exit_code: None,
                    timed_out: true,
                });
            }
        }

        let handler = Arc::clone(&self.handler.lock().unwrap_or_else(|e| e.into_inner()));
        let mut out = handler(argv)?;
        truncate_output(&mut out.output, max_output_bytes);
        Ok(out)
    }

    async fn stop(&self, _id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        if self.knobs().fail_stops {
            return Err(RuntimeError::command_failed("stop", "timeout"));
        }
        Ok(())
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        self.recorded().killed.push(id.to_string());
        Ok(())
    }

    async fn remove(&self, id: &str, _force: bool) -> Result<(), RuntimeError> {
        let mut recorded = self.recorded();
        if recorded.busy.contains(id) {
            recorded.removed_while_busy.push(id.to_string());
        }
        recorded.destroyed.push(id.to_string());
        Ok(())
    }
}
