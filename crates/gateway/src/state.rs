use std::sync::Arc;

use runbox_sandbox::Executor;

#[cfg(feature = "metrics")]
use runbox_metrics::MetricsHandle;

/// Shared state behind every HTTP handler.
pub struct GatewayState {
    pub executor: Arc<Executor>,
    /// Largest accepted `/execute` body, in bytes.
    pub max_request_bytes: usize,
    pub version: String,
    #[cfg(feature = "metrics")]
    pub metrics_handle: Option<MetricsHandle>,
}

impl GatewayState {
    pub fn new(executor: Arc<Executor>, max_request_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            executor,
            max_request_bytes,
            version: env!("CARGO_PKG_VERSION").to_string(),
            #[cfg(feature = "metrics")]
            metrics_handle: None,
        })
    }

    /// Same as [`GatewayState::new`], exposing `handle` on `/metrics`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(
        executor: Arc<Executor>,
        max_request_bytes: usize,
        handle: MetricsHandle,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            max_request_bytes,
            version: env!("CARGO_PKG_VERSION").to_string(),
            metrics_handle: Some(handle),
        })
    }

    /// `"draining"` once the executor stopped admitting work, `"ok"` before.
    #[must_use]
    pub fn status_label(&self) -> &'static str {
        if self.executor.is_shutting_down() {
            "draining"
        } else {
            "ok"
        }
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("executor", &self.executor)
            .field("max_request_bytes", &self.max_request_bytes)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
