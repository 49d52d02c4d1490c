//! # Node Metrics Collector
//!
//! Agents on every node POST CPU, memory and network samples to `/metrics`.
//! Only the current Swarm leader accepts them; every replica serves the
//! rolling window through `/nodes` and `/history`.
//!
//! ```bash
//! node-metrics-collector --retention 10m \
//!                        --influx-url http://influx:8086 \
//!                        --influx-org ops --influx-bucket nodes
//! ```

#[macro_use]
extern crate tracing;

mod app;
pub mod logging;

pub use app::App;
pub use logging::{
    init_errors,
    init_logging,
};
pub use node_metrics_config::Args;
