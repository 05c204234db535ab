//! HTTP surface for update batches.
//!
//! - `POST /updates` runs (or plans) a batch.
//! - `GET /updates/preflight` reports environment readiness.
//! - `GET /updates/status` lists installed components and available versions.
//! - `POST /updates/rescue` reinstates a component whose directory went missing.
//!
//! Every request builds its own orchestrator on a blocking thread, so two
//! overlapping batches are arbitrated by the on-disk batch lock.

use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rollsafe_core::{
    normalize_identifier, ErrorBody, RescueRequest, RescueResponse, UpdateError,
    UpdateErrorKind, UpdateRequest,
};
use rollsafe_updater::Orchestrator;
use serde::de::DeserializeOwned;

use crate::config::RollsafeConfig;

type SharedConfig = Arc<RollsafeConfig>;

pub fn router(config: SharedConfig) -> Router {
    Router::new()
        .route("/updates", post(updates_handler))
        .route("/updates/preflight", get(preflight_handler))
        .route("/updates/status", get(status_handler))
        .route("/updates/rescue", post(rescue_handler))
        .with_state(config)
}

pub async fn serve(config: RollsafeConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;
    tracing::info!(listen = %listener.local_addr()?, root = %config.root.display(), "serving update API");
    axum::serve(listener, router(Arc::new(config)))
        .await
        .context("update API server failed")
}

async fn updates_handler(State(config): State<SharedConfig>, body: Bytes) -> Response {
    let request: UpdateRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match with_orchestrator(config, move |orchestrator| orchestrator.run_batch(&request)).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => update_error_response(&err),
    }
}

async fn preflight_handler(State(config): State<SharedConfig>) -> Response {
    match with_orchestrator(config, |orchestrator| Ok(orchestrator.preflight())).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => update_error_response(&err),
    }
}

async fn status_handler(State(config): State<SharedConfig>) -> Response {
    match with_orchestrator(config, |orchestrator| Ok(orchestrator.status()?)).await {
        Ok(statuses) => (StatusCode::OK, Json(statuses)).into_response(),
        Err(err) => update_error_response(&err),
    }
}

async fn rescue_handler(State(config): State<SharedConfig>, body: Bytes) -> Response {
    let request: RescueRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let Some(component_id) = normalize_identifier(&request.component) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "no_components",
            format!("invalid component identifier: '{}'", request.component),
        );
    };
    match with_orchestrator(config, move |orchestrator| orchestrator.rescue(&component_id)).await {
        Ok(rescued) => (
            StatusCode::OK,
            Json(RescueResponse {
                ok: rescued,
                rescued,
            }),
        )
            .into_response(),
        Err(err) => update_error_response(&err),
    }
}

async fn with_orchestrator<T, F>(config: SharedConfig, work: F) -> Result<T, UpdateError>
where
    T: Send + 'static,
    F: FnOnce(&Orchestrator) -> Result<T, UpdateError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let orchestrator = config.build_orchestrator()?;
        work(&orchestrator)
    })
    .await
    .map_err(|err| UpdateError::Other(anyhow::anyhow!("update worker failed: {err}")))?
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|err| {
        error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!("invalid request body: {err}"),
        )
    })
}

pub fn status_for(kind: UpdateErrorKind) -> (StatusCode, &'static str) {
    match kind {
        UpdateErrorKind::LockConflict => (StatusCode::CONFLICT, "in_progress"),
        UpdateErrorKind::NoValidComponents => (StatusCode::BAD_REQUEST, "no_components"),
        UpdateErrorKind::PreflightFailed => (StatusCode::SERVICE_UNAVAILABLE, "preflight_failed"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

fn update_error_response(err: &UpdateError) -> Response {
    let (status, code) = status_for(err.kind());
    if status.is_server_error() {
        tracing::error!(error = %err, "update request failed");
    }
    error_response(status, code, err.to_string())
}

fn error_response(status: StatusCode, code: &str, message: String) -> Response {
    (status, Json(ErrorBody::new(code, message))).into_response()
}
