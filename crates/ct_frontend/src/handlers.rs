// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! HTTP entrypoints for the static CT submission APIs, mounted under
//! `/<origin>/ct/v1/`. All endpoints allow cross-origin requests
//! unconditionally, as log data is public.

use crate::ctlog::Log;
use crate::storage::{Appender, DedupStorage, IssuerStorage};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use static_ct_api::{AddChainRequest, GetRootsResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error};

pub struct HandlerOptions {
    /// Per-request deadline, propagated into all storage calls.
    pub deadline: Duration,
    /// If set, 5xx bodies are collapsed to a generic string.
    pub mask_internal_errors: bool,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            deadline: Duration::from_millis(3000),
            mask_internal_errors: false,
        }
    }
}

pub struct AppState<A, I, D> {
    pub log: Log<A, I, D>,
    pub opts: HandlerOptions,
}

/// Builds the router serving `add-chain`, `add-pre-chain`, and `get-roots`
/// under the log's origin prefix. Non-POST requests to the POST endpoints
/// (and vice versa) are answered with 405 by the method router.
pub fn router<A, I, D>(state: Arc<AppState<A, I, D>>) -> Router
where
    A: Appender + 'static,
    I: IssuerStorage + 'static,
    D: DedupStorage + 'static,
{
    let prefix = format!("/{}/ct/v1", state.log.origin());
    Router::new()
        .route(&format!("{prefix}/add-chain"), post(add_chain::<A, I, D>))
        .route(
            &format!("{prefix}/add-pre-chain"),
            post(add_pre_chain::<A, I, D>),
        )
        .route(&format!("{prefix}/get-roots"), get(get_roots::<A, I, D>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn add_chain<A, I, D>(
    State(state): State<Arc<AppState<A, I, D>>>,
    body: Bytes,
) -> Response
where
    A: Appender,
    I: IssuerStorage,
    D: DedupStorage,
{
    add_entry(state, body, false).await
}

async fn add_pre_chain<A, I, D>(
    State(state): State<Arc<AppState<A, I, D>>>,
    body: Bytes,
) -> Response
where
    A: Appender,
    I: IssuerStorage,
    D: DedupStorage,
{
    add_entry(state, body, true).await
}

async fn add_entry<A, I, D>(
    state: Arc<AppState<A, I, D>>,
    body: Bytes,
    expect_precert: bool,
) -> Response
where
    A: Appender,
    I: IssuerStorage,
    D: DedupStorage,
{
    let request: AddChainRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(origin = %state.log.origin(), "malformed add-chain body: {e}");
            return (StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
                .into_response();
        }
    };

    match timeout(
        state.opts.deadline,
        state.log.add_chain_or_pre_chain(&request.chain, expect_precert),
    )
    .await
    {
        Err(_) => (StatusCode::GATEWAY_TIMEOUT, "Deadline exceeded".to_string()).into_response(),
        Ok(Ok(sct)) => Json(sct).into_response(),
        Ok(Err(e)) if e.is_client_error() => {
            debug!(origin = %state.log.origin(), "bad request: {e}");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Ok(Err(e)) => {
            error!(origin = %state.log.origin(), "internal error: {e}");
            let body = if state.opts.mask_internal_errors {
                "Internal Server Error".to_string()
            } else {
                e.to_string()
            };
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}

async fn get_roots<A, I, D>(State(state): State<Arc<AppState<A, I, D>>>) -> Response
where
    A: Appender,
    I: IssuerStorage,
    D: DedupStorage,
{
    match x509_util::certs_to_bytes(state.log.roots().certs()) {
        Ok(certificates) => Json(GetRootsResponse { certificates }).into_response(),
        Err(e) => {
            error!(origin = %state.log.origin(), "failed to encode roots: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_string(),
            )
                .into_response()
        }
    }
}
