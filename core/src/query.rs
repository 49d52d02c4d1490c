use crate::{
    sample::{
        AuxEntry,
        Sample,
    },
    store::MetricStore,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// A node's latest sample with its container breakdown, if one is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub sample: Sample,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<AuxEntry>>,
}

/// Read-only views over the store. Never gated: followers serve reads too.
#[derive(Debug, Clone)]
pub struct QueryService {
    store: MetricStore,
}

impl QueryService {
    pub fn new(store: MetricStore) -> Self {
        Self { store }
    }

    pub fn snapshot(&self) -> BTreeMap<String, NodeView> {
        self.store
            .snapshot()
            .into_iter()
            .map(|(node, sample)| {
                let containers = self.store.aux(&node);
                (node, NodeView { sample, containers })
            })
            .collect()
    }

    pub fn history(&self, node: Option<&str>) -> BTreeMap<String, Vec<Sample>> {
        self.store.history(node)
    }
}
