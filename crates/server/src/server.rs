//! HTTP front end for the gateway.
//!
//! ## Endpoints
//!
//! - `GET /health`: liveness check
//! - `GET /:exchange/:operation?<params>`: parameters from the query string
//! - `POST /:exchange/:operation`: parameters from a JSON object body
//!
//! Operations use their kebab-case names (`place-order`, `exchange-info`).
//! Every gateway call answers with a [`ResultEnvelope`] and the HTTP status
//! it carries.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use exgw_core::types::{
    NormalizedCommand, NormalizedError, NormalizedResult, OperationKind, ParamValue,
    ResultEnvelope,
};
use exgw_execution::Gateway;

use crate::order_ids::ClientOrderIds;

/// Shared state for the HTTP handlers.
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub order_ids: ClientOrderIds,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            order_ids: ClientOrderIds::from_start_time(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    exchanges: Vec<String>,
}

type Reply = (StatusCode, Json<ResultEnvelope>);

/// Build the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/:exchange/:operation",
            get(query_handler).post(body_handler),
        )
        .with_state(state)
}

/// `GET /health`
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        exchanges: state
            .gateway
            .exchanges()
            .into_iter()
            .map(|ex| ex.to_string())
            .collect(),
    })
}

/// `GET /:exchange/:operation`
async fn query_handler(
    State(state): State<Arc<AppState>>,
    Path((exchange, operation)): Path<(String, String)>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Reply {
    let params = query
        .into_iter()
        .map(|(k, v)| (k, ParamValue::Text(v)))
        .collect();
    dispatch(&state, &exchange, &operation, params).await
}

/// `POST /:exchange/:operation`
async fn body_handler(
    State(state): State<Arc<AppState>>,
    Path((exchange, operation)): Path<(String, String)>,
    body: Result<Json<BTreeMap<String, ParamValue>>, JsonRejection>,
) -> Reply {
    match body {
        Ok(Json(params)) => dispatch(&state, &exchange, &operation, params).await,
        Err(rejection) => reply(Err(NormalizedError::bad_request(format!(
            "request body must be a JSON object of string or number values: {}",
            rejection.body_text()
        )))),
    }
}

async fn dispatch(
    state: &AppState,
    exchange: &str,
    operation: &str,
    params: BTreeMap<String, ParamValue>,
) -> Reply {
    let command = match NormalizedCommand::parse(exchange, operation, params) {
        Ok(command) => assign_client_order_id(command, &state.order_ids),
        Err(err) => {
            debug!(exchange, operation, error = %err, "unroutable request");
            return reply(Err(err));
        }
    };
    reply(state.gateway.execute(&command).await)
}

/// Place-order requests without a `clientOrderId` get a generated one.
fn assign_client_order_id(command: NormalizedCommand, ids: &ClientOrderIds) -> NormalizedCommand {
    if command.operation != OperationKind::PlaceOrder || command.text("clientOrderId").is_some() {
        return command;
    }
    let id = ids.next_id();
    debug!(exchange = %command.exchange, client_order_id = %id, "assigned client order id");
    command.with_param("clientOrderId", id)
}

fn reply(result: NormalizedResult) -> Reply {
    let envelope = ResultEnvelope::from(result);
    let status =
        StatusCode::from_u16(envelope.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(envelope))
}

/// Serve `state` on `bind_addr` until `cancel` fires.
pub async fn run_server(
    state: Arc<AppState>,
    bind_addr: &str,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
