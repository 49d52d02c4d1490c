use crate::{
    error::AppError,
    router::AppState,
};
use axum::{
    body::Bytes,
    extract::{
        Query,
        State,
    },
    Json,
};
use node_metrics_core::{
    Ack,
    NodeView,
    Sample,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Bodies are parsed regardless of `Content-Type`; agents are sloppy about it.
fn parse_body(body: &Bytes) -> Result<Value, AppError> {
    serde_json::from_slice(body).map_err(|_| AppError::MalformedJson)
}

/// Leadership is settled before the body is looked at.
pub async fn ingest(State(state): State<AppState>, body: Bytes) -> Result<Json<Ack>, AppError> {
    let accepted = async {
        state.gate.authorize().await?;
        let raw = parse_body(&body)?;
        Ok::<_, AppError>(state.gate.accept(&raw)?)
    };
    match accepted.await {
        Ok(ack) => Ok(Json(ack)),
        Err(err) => {
            info!(reason = err.reason(), "rejected /metrics");
            Err(err)
        }
    }
}

pub async fn ingest_containers(State(state): State<AppState>, body: Bytes) -> Result<Json<Ack>, AppError> {
    let accepted = async {
        state.gate.authorize().await?;
        let raw = parse_body(&body)?;
        Ok::<_, AppError>(state.gate.accept_containers(&raw)?)
    };
    match accepted.await {
        Ok(ack) => Ok(Json(ack)),
        Err(err) => {
            info!(reason = err.reason(), "rejected /containers");
            Err(err)
        }
    }
}

pub async fn nodes(State(state): State<AppState>) -> Json<BTreeMap<String, NodeView>> {
    Json(state.query.snapshot())
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    node: Option<String>,
}

pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<BTreeMap<String, Vec<Sample>>> {
    Json(state.query.history(query.node.as_deref()))
}

#[derive(Debug, Serialize)]
pub struct LeaderResponse {
    hostname: String,
    leader: bool,
}

pub async fn leader(State(state): State<AppState>) -> Json<LeaderResponse> {
    Json(LeaderResponse {
        hostname: state.hostname.to_string(),
        leader: state.gate.leader().is_leader(),
    })
}

pub async fn banner(State(state): State<AppState>) -> String {
    format!("node-metrics collector running on {}", state.hostname)
}

pub async fn healthz() -> &'static str {
    "ok"
}
