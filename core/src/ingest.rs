//! The single write path.
//!
//! `RECEIVED -> authorized? -> NORMALIZED -> STORED -> sink attempted ->
//! ACKNOWLEDGED`. Rejections leave the store untouched and the sink outcome
//! never reaches the caller.

use crate::{
    error::{
        Error,
        Result,
    },
    leader::LeaderStatus,
    normalize::{
        self,
        normalize_containers,
        normalize_record,
    },
    sample::Sample,
    sink::MetricSink,
    store::MetricStore,
};
use serde::Serialize;
use serde_json::Value;
use std::{
    sync::Arc,
    time::Duration,
};

/// Acknowledgement returned to the agent once its data is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub status: &'static str,
    pub node: String,
}

impl Ack {
    fn ok(node: String) -> Self {
        Self { status: "ok", node }
    }
}

#[derive(Clone)]
pub struct IngestGate {
    leader: LeaderStatus,
    store: MetricStore,
    sink: Arc<dyn MetricSink>,
    sink_timeout: Duration,
    per_request: bool,
}

impl IngestGate {
    pub fn new(leader: LeaderStatus, store: MetricStore, sink: Arc<dyn MetricSink>, sink_timeout: Duration) -> Self {
        Self {
            leader,
            store,
            sink,
            sink_timeout,
            per_request: true,
        }
    }

    /// With `false`, the gate trusts the flag maintained by the background
    /// leader watch instead of asking the oracle on every write.
    pub fn with_per_request_check(mut self, per_request: bool) -> Self {
        self.per_request = per_request;
        self
    }

    pub fn leader(&self) -> &LeaderStatus {
        &self.leader
    }

    /// Ask whether this node may accept writes right now. Callers that
    /// still have to decode the request do this first so that a follower
    /// never reveals anything about the body it was sent.
    pub async fn authorize(&self) -> Result<()> {
        let authorized = if self.per_request {
            self.leader.check().await
        } else {
            self.leader.is_leader()
        };
        if authorized {
            Ok(())
        } else {
            debug!("rejected write, not the leader");
            Err(Error::Unauthorized)
        }
    }

    /// Accept one metrics record from an agent.
    pub async fn ingest(&self, raw: &Value) -> Result<Ack> {
        self.authorize().await?;
        self.accept(raw)
    }

    /// Store an already authorized metrics record.
    pub fn accept(&self, raw: &Value) -> Result<Ack> {
        let record = normalize_record(raw, self.store.now())?;
        let node = record.sample.source_id.clone();

        self.store.append(record.sample.clone());
        if let Some(containers) = record.containers {
            self.store.set_aux(&node, containers);
        }
        debug!(%node, cpu = record.sample.cpu, mem = record.sample.mem, "stored sample");

        self.forward(record.sample);
        Ok(Ack::ok(node))
    }

    /// Replace a node's container breakdown:
    /// `{"node": "n1", "containers": [...]}`.
    pub async fn ingest_containers(&self, raw: &Value) -> Result<Ack> {
        self.authorize().await?;
        self.accept_containers(raw)
    }

    pub fn accept_containers(&self, raw: &Value) -> Result<Ack> {
        let object = raw
            .as_object()
            .ok_or_else(|| Error::invalid_payload("expected a JSON object"))?;
        let containers = normalize_containers(object.get("containers").unwrap_or(&Value::Null))?;
        let node = normalize::source_id(object);

        debug!(%node, count = containers.len(), "stored containers");
        self.store.set_aux(&node, containers);
        Ok(Ack::ok(node))
    }

    /// Fire-and-forget delivery to the sink, bounded by the sink timeout.
    fn forward(&self, sample: Sample) {
        let sink = self.sink.clone();
        let timeout = self.sink_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, sink.forward(&sample)).await {
                Ok(result) => result,
                Err(_) => Err(Error::SinkUnavailable(format!("no answer within {timeout:?}"))),
            };
            if let Err(err) = result {
                warn!(node = %sample.source_id, sink = sink.name(), reason = err.reason(), %err, "dropping sample for sink");
            }
        });
    }
}
