//! `POST /execute`: run one program and map the outcome onto HTTP.
//!
//! | outcome                                   | status |
//! |-------------------------------------------|--------|
//! | completed run, any exit status            | 200    |
//! | `compile_failed`, `run_failed`, `timeout` | 200, `succeeded: false` |
//! | `unsupported_language`                    | 400    |
//! | `pool_exhausted` (with `Retry-After`)     | 503    |
//! | `shutting_down`                           | 503    |
//! | staging, delivery or runtime failure      | 500    |

use std::sync::Arc;

use {
    axum::{
        extract::{State, rejection::JsonRejection},
        http::{StatusCode, header},
        response::{IntoResponse, Json, Response},
    },
    runbox_sandbox::{ExecError, ExecuteRequest},
    serde::Serialize,
    tracing::{Instrument, error, info_span, warn},
    uuid::Uuid,
};

use crate::server::AppState;

/// Error body for requests that produced no program output.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

/// Body for failures attributable to the submitted program.
#[derive(Debug, Serialize)]
pub struct ProgramFailure {
    pub output: String,
    pub succeeded: bool,
    pub error: String,
    pub kind: &'static str,
}

pub async fn execute_handler(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(status = %rejection.status(), error = %rejection.body_text(), "rejected execute request");
            return (
                rejection.status(),
                Json(ErrorBody {
                    error: rejection.body_text(),
                    kind: "invalid_request",
                }),
            )
                .into_response();
        },
    };

    let executor = Arc::clone(&state.gateway.executor);
    let retry_after_secs = executor.settings().acquire_timeout.as_secs().max(1);
    let span = info_span!(
        "execute",
        request_id = %Uuid::new_v4(),
        language = %request.language,
        code_len = request.code.len()
    );

    // Detached so a disconnecting client cannot abandon a checked-out
    // sandbox halfway through the pipeline.
    let task = tokio::spawn(async move { executor.execute(&request).await }.instrument(span));

    match task.await {
        Ok(Ok(result)) => Json(result).into_response(),
        Ok(Err(err)) => error_response(err, retry_after_secs),
        Err(join_err) => {
            error!(error = %join_err, "execution task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "execution task failed".into(),
                    kind: "internal",
                }),
            )
                .into_response()
        },
    }
}

/// HTTP status for an execution error.
#[must_use]
pub fn status_for(err: &ExecError) -> StatusCode {
    match err {
        ExecError::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
        ExecError::PoolExhausted | ExecError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        ExecError::CompileFailed { .. } | ExecError::RunFailed { .. } | ExecError::Timeout { .. } => {
            StatusCode::OK
        },
        ExecError::StagingFailed(_) | ExecError::DeliveryFailed(_) | ExecError::RuntimeFailed(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        },
    }
}

/// Render `err` as a JSON response, adding `Retry-After` when the pool was
/// exhausted.
pub fn error_response(err: ExecError, retry_after_secs: u64) -> Response {
    let status = status_for(&err);
    let kind = err.kind();

    if err.is_program_error() {
        let error = err.to_string();
        let output = match err {
            ExecError::CompileFailed { output }
            | ExecError::RunFailed { output, .. }
            | ExecError::Timeout { output, .. } => output,
            _ => String::new(),
        };
        return (
            status,
            Json(ProgramFailure {
                output,
                succeeded: false,
                error,
                kind,
            }),
        )
            .into_response();
    }

    if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
        error!(kind, error = %err, "execution failed");
    }

    let mut response = (
        status,
        Json(ErrorBody {
            error: err.to_string(),
            kind,
        }),
    )
        .into_response();

    if matches!(err, ExecError::PoolExhausted)
        && let Ok(value) = retry_after_secs.to_string().parse()
    {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}
