//! # Node Metrics Core
//!
//! Leader-gated, time-windowed aggregation of node metric samples.
//!
//! ## Architecture
//!
//! - **`normalize`**: turns untyped JSON records into canonical [`Sample`]s
//! - **`store`**: the per-source rolling window plus the container cache
//! - **`leader`**: the [`LeaderOracle`] seam and the leadership watch
//! - **`sink`**: the [`MetricSink`] seam and the InfluxDB line-protocol sink
//! - **`ingest`**: the single write path, [`IngestGate`]
//! - **`query`**: read-only views, [`QueryService`]
//! - **`persist`**: optional JSON mirror of the store

#[macro_use]
extern crate tracing;

pub mod clock;
pub mod error;
pub mod ingest;
pub mod leader;
pub mod normalize;
pub mod persist;
pub mod query;
pub mod sample;
pub mod sink;
pub mod store;

pub use clock::{
    Clock,
    ManualClock,
    MonotonicClock,
    SystemClock,
};
pub use error::Error;
pub use ingest::{
    Ack,
    IngestGate,
};
pub use leader::{
    hostname,
    DockerSwarmOracle,
    LeaderOracle,
    LeaderStatus,
    StaticOracle,
};
pub use normalize::{
    normalize_containers,
    normalize_record,
    round_to,
    NormalizedRecord,
};
pub use persist::{
    Mirror,
    MirrorState,
};
pub use query::{
    NodeView,
    QueryService,
};
pub use sample::{
    AuxEntry,
    Sample,
    UNKNOWN,
};
pub use sink::{
    InfluxConfig,
    InfluxSink,
    MetricSink,
    NoopSink,
};
pub use store::MetricStore;
