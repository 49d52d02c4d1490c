use crate::handlers;
use axum::{
    routing::{
        get,
        post,
    },
    Router,
};
use node_metrics_core::{
    IngestGate,
    QueryService,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub gate: IngestGate,
    pub query: QueryService,
    pub hostname: Arc<str>,
}

pub fn create_router(gate: IngestGate, query: QueryService, hostname: impl Into<Arc<str>>) -> Router {
    let state = AppState {
        gate,
        query,
        hostname: hostname.into(),
    };

    Router::new()
        .route("/", get(handlers::banner))
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", post(handlers::ingest))
        .route("/containers", post(handlers::ingest_containers))
        .route("/nodes", get(handlers::nodes))
        .route("/history", get(handlers::history))
        .route("/leader", get(handlers::leader))
        .with_state(state)
}
