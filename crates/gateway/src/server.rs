use std::{future::Future, sync::Arc};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::{DefaultBodyLimit, State},
        response::{IntoResponse, Json},
        routing::{get, post},
    },
    serde::Serialize,
    tokio::net::TcpListener,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use crate::{execute::execute_handler, state::GatewayState};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/languages", get(languages_handler))
        .route(
            "/execute",
            post(execute_handler).layer(DefaultBodyLimit::max(state.max_request_bytes)),
        );

    #[cfg(feature = "prometheus")]
    let router = router.route(
        "/metrics",
        get(crate::metrics_routes::prometheus_metrics_handler),
    );

    #[cfg(feature = "metrics")]
    let router = router.route_layer(axum::middleware::from_fn(
        crate::metrics_middleware::http_metrics_middleware,
    ));

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { gateway: state })
}

/// Bind `bind:port` and serve until Ctrl-C or SIGTERM.
pub async fn start_gateway(state: Arc<GatewayState>, bind: &str, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind((bind, port))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    let addr = listener.local_addr()?;

    info!(
        %addr,
        backend = state.executor.backend_name(),
        languages = state.executor.languages().len(),
        "runbox gateway listening"
    );

    serve(listener, state, shutdown_signal()).await
}

/// Serve on `listener` until `signal` resolves, let in-flight requests finish,
/// then shut the executor down.
pub async fn serve<F>(listener: TcpListener, state: Arc<GatewayState>, signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let executor = Arc::clone(&state.executor);
    let app = build_gateway_app(state);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await;

    info!("http server stopped, destroying sandboxes");
    executor.shutdown().await;
    served.context("http server failed")
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let executor = &state.gateway.executor;
    Json(serde_json::json!({
        "status": state.gateway.status_label(),
        "version": state.gateway.version,
        "backend": executor.backend_name(),
        "pools": executor.pool_status(),
    }))
}

#[derive(Debug, Serialize)]
struct LanguageInfo {
    language: String,
    image: String,
    extension: String,
    compiled: bool,
}

async fn languages_handler(State(state): State<AppState>) -> impl IntoResponse {
    let languages: Vec<_> = state
        .gateway
        .executor
        .languages()
        .iter()
        .map(|spec| LanguageInfo {
            language: spec.name.clone(),
            image: spec.image.clone(),
            extension: spec.extension.clone(),
            compiled: spec.is_compiled(),
        })
        .collect();
    Json(languages)
}
