//! Warm sandbox container pools and the code execution pipeline.
//!
//! An [`Executor`] owns one [`ContainerPool`] per language. Each pool keeps a
//! fixed number of idle containers started through a [`SandboxRuntime`]
//! (normally [`DockerRuntime`]), hands them out one request at a time and
//! tears them all down on shutdown.

pub mod docker;
pub mod error;
pub mod executor;
pub mod language;
pub mod pool;
pub mod runtime;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use {
    docker::DockerRuntime,
    error::{ExecError, PoolError, RuntimeError},
    executor::{Executor, ExecutorSettings, TimeoutPolicy, default_drain_timeout},
    language::{LanguageSpec, LanguageTable},
    pool::{ContainerPool, PoolOptions, PoolState, PoolStatus},
    runtime::{ContainerLimits, ExecOutput, SandboxRuntime},
    types::{ExecuteRequest, ExecuteResult, SandboxHandle},
};
