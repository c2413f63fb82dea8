//! Error types for the sandbox runtime, the container pools and the executor.

use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`SandboxRuntime`](crate::runtime::SandboxRuntime)
/// while driving the external container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to invoke {cli}: {source}")]
    Spawn {
        cli: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} failed: {stderr}")]
    CommandFailed { op: &'static str, stderr: String },

    #[error("runtime returned an empty instance id")]
    EmptyId,

    #[error("could not launch command in sandbox: {0}")]
    LaunchFailed(String),
}

impl RuntimeError {
    #[must_use]
    pub fn command_failed(op: &'static str, stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            op,
            stderr: stderr.into(),
        }
    }
}

/// Admission failures from [`ContainerPool::acquire`](crate::pool::ContainerPool::acquire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("pool exhausted: no sandbox became idle in time")]
    Exhausted,

    #[error("pool is shutting down")]
    ShuttingDown,
}

/// Errors returned by [`Executor::execute`](crate::executor::Executor::execute).
///
/// `CompileFailed`, `RunFailed` and `Timeout` are attributable to the
/// submitted program and carry its captured output; everything else is an
/// admission or infrastructure failure.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("executor is shutting down")]
    ShuttingDown,

    #[error("no sandboxes available, pool exhausted")]
    PoolExhausted,

    #[error("failed to stage code on the host: {0}")]
    StagingFailed(#[source] std::io::Error),

    #[error("failed to copy code into the sandbox: {0}")]
    DeliveryFailed(#[source] RuntimeError),

    #[error("compilation failed")]
    CompileFailed { output: String },

    #[error("execution failed: {reason}")]
    RunFailed { output: String, reason: String },

    #[error("container runtime failed: {0}")]
    RuntimeFailed(#[source] RuntimeError),

    #[error("execution timed out after {}s", .after.as_secs())]
    Timeout { output: String, after: Duration },
}

impl ExecError {
    /// Stable snake_case tag used on the wire and in metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedLanguage(_) => "unsupported_language",
            Self::ShuttingDown => "shutting_down",
            Self::PoolExhausted => "pool_exhausted",
            Self::StagingFailed(_) => "staging_failed",
            Self::DeliveryFailed(_) => "delivery_failed",
            Self::CompileFailed { .. } => "compile_failed",
            Self::RunFailed { .. } => "run_failed",
            Self::RuntimeFailed(_) => "runtime_failed",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Whether the caller may reasonably retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::PoolExhausted)
    }

    /// Whether the failure came from the submitted program rather than from
    /// the pipeline.
    #[must_use]
    pub fn is_program_error(&self) -> bool {
        matches!(
            self,
            Self::CompileFailed { .. } | Self::RunFailed { .. } | Self::Timeout { .. }
        )
    }

    /// Output captured before the failure, if any.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::CompileFailed { output }
            | Self::RunFailed { output, .. }
            | Self::Timeout { output, .. } => Some(output),
            _ => None,
        }
    }
}

impl From<PoolError> for ExecError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted => Self::PoolExhausted,
            PoolError::ShuttingDown => Self::ShuttingDown,
        }
    }
}
