//! Metric name and label definitions.
//!
//! Every metric runbox emits is named here so the set stays documented in one
//! place.

/// Sandbox pool metrics, labelled by language.
pub mod pool {
    /// Containers started by pool warm-up or replacement
    pub const CONTAINERS_CREATED_TOTAL: &str = "runbox_pool_containers_created_total";
    /// Containers stopped and removed
    pub const CONTAINERS_DESTROYED_TOTAL: &str = "runbox_pool_containers_destroyed_total";
    /// Container creations that failed
    pub const PROVISION_ERRORS_TOTAL: &str = "runbox_pool_provision_errors_total";
    /// Idle sandboxes ready to be handed out
    pub const IDLE: &str = "runbox_pool_idle";
    /// Sandboxes currently checked out by an execution
    pub const IN_USE: &str = "runbox_pool_in_use";
    /// Time spent waiting for an idle sandbox
    pub const ACQUIRE_WAIT_SECONDS: &str = "runbox_pool_acquire_wait_seconds";
    /// Acquisitions that gave up because the pool stayed exhausted
    pub const ACQUIRE_TIMEOUTS_TOTAL: &str = "runbox_pool_acquire_timeouts_total";
}

/// Execution pipeline metrics
pub mod executor {
    /// Executions by language and outcome
    pub const EXECUTIONS_TOTAL: &str = "runbox_executions_total";
    /// End-to-end execution duration, including the wait for a sandbox
    pub const EXECUTION_DURATION_SECONDS: &str = "runbox_execution_duration_seconds";
    /// Executions currently in the pipeline
    pub const EXECUTIONS_IN_FLIGHT: &str = "runbox_executions_in_flight";
}

/// HTTP request metrics
pub mod http {
    /// Total number of HTTP requests handled
    pub const REQUESTS_TOTAL: &str = "runbox_http_requests_total";
    /// Duration of HTTP requests in seconds
    pub const REQUEST_DURATION_SECONDS: &str = "runbox_http_request_duration_seconds";
    /// Number of currently in-flight HTTP requests
    pub const REQUESTS_IN_FLIGHT: &str = "runbox_http_requests_in_flight";
}

/// Common label keys
pub mod labels {
    pub const LANGUAGE: &str = "language";
    pub const OUTCOME: &str = "outcome";
    pub const ENDPOINT: &str = "endpoint";
    pub const METHOD: &str = "method";
    pub const STATUS: &str = "status";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    /// HTTP request duration buckets (in seconds)
    /// Covers 1ms to 60s
    pub const HTTP_DURATION: &[f64] = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];

    /// Execution duration buckets (in seconds)
    /// Covers 10ms to 2 minutes; compiled languages sit in the upper half
    pub const EXECUTION_DURATION: &[f64] = &[
        0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0,
    ];

    /// Acquire wait buckets (in seconds)
    pub const ACQUIRE_WAIT: &[f64] = &[0.0001, 0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0];
}
