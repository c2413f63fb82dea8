//! Prometheus scrape endpoint.

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::server::AppState;

/// Metrics in Prometheus text exposition format.
///
/// Answers 503 when no exporter was installed at startup.
pub async fn prometheus_metrics_handler(State(state): State<AppState>) -> Response {
    match state
        .gateway
        .metrics_handle
        .as_ref()
        .filter(|h| h.is_exporting())
    {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not enabled",
        )
            .into_response(),
    }
}
