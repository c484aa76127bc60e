//! Intra-cluster HTTP endpoints.
//!
//! One listener per target serves:
//!
//! - `PUT /v1/transport?s=<session>&t=<trans>` - inbound stream sessions
//! - `GET /v1/health[?rebalance=true]` - liveness and rebalance status
//! - `GET/POST /v1/rebalance/namespace` - EC listing pull/push
//! - `POST /v1/rebalance/stage` - stage push notifications

use crate::reb::{NamespacePush, RebManager, StagePush};
use crate::transport::ReceiverRegistry;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct Daemon {
    pub manager: Arc<RebManager>,
    pub receiver: Arc<ReceiverRegistry>,
}

/// Build the intra-cluster router.
pub fn router(manager: Arc<RebManager>, receiver: Arc<ReceiverRegistry>) -> Router {
    let daemon = Daemon { manager, receiver };
    Router::new()
        .route("/v1/transport", put(transport_put))
        .route("/v1/health", get(health))
        .route(
            "/v1/rebalance/namespace",
            get(namespace_pull).post(namespace_push),
        )
        .route("/v1/rebalance/stage", post(stage_push))
        .with_state(daemon)
}

#[derive(Deserialize)]
struct TransportQuery {
    /// Session ID (sender-chosen).
    s: String,
    /// Trans-name selecting the receive handler.
    t: String,
}

async fn transport_put(
    State(daemon): State<Daemon>,
    Query(q): Query<TransportQuery>,
    body: Body,
) -> Response {
    let stream = Box::pin(body.into_data_stream());
    match daemon.receiver.consume(&q.t, &q.s, stream).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            debug!(trans = %q.t, session = %q.s, "inbound session failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Deserialize)]
struct HealthQuery {
    #[serde(default)]
    rebalance: bool,
}

async fn health(State(daemon): State<Daemon>, Query(q): Query<HealthQuery>) -> Response {
    if q.rebalance {
        Json(daemon.manager.get_status()).into_response()
    } else {
        (StatusCode::OK, "OK").into_response()
    }
}

async fn namespace_pull(State(daemon): State<Daemon>) -> Response {
    let (code, body) = daemon.manager.ec_namespace_response();
    match body {
        Some(cts) => (StatusCode::OK, Json(cts)).into_response(),
        None => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

async fn namespace_push(
    State(daemon): State<Daemon>,
    Json(push): Json<NamespacePush>,
) -> StatusCode {
    daemon.manager.handle_namespace_push(push);
    StatusCode::OK
}

async fn stage_push(State(daemon): State<Daemon>, Json(push): Json<StagePush>) -> StatusCode {
    daemon.manager.handle_stage_push(push);
    StatusCode::OK
}
