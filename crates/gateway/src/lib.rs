//! Gateway: JSON-over-HTTP front for the sandbox executor.
//!
//! Lifecycle:
//! 1. Build the router around a shared [`GatewayState`]
//! 2. Bind and serve until Ctrl-C / SIGTERM
//! 3. Drain in-flight HTTP requests
//! 4. Shut the executor down, destroying every sandbox
//!
//! All execution semantics live in `runbox-sandbox`; this crate only maps
//! requests and errors onto HTTP.

pub mod execute;
#[cfg(feature = "metrics")]
pub mod metrics_middleware;
#[cfg(feature = "prometheus")]
pub mod metrics_routes;
pub mod server;
pub mod state;

pub use {
    server::{AppState, build_gateway_app, serve, shutdown_signal, start_gateway},
    state::GatewayState,
};
