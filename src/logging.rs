use eyre::{
    Context as _,
    Result,
};
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

const DEFAULT_FILTER: &str =
    "node_metrics_collector=info,node_metrics_core=info,node_metrics_http=info,node_metrics_config=info,warn";

pub fn init_errors() -> Result<()> {
    color_eyre::install()
}

/// `RUST_LOG` wins; without it the workspace crates log at `info`.
pub fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter))
        .with(tracing_error::ErrorLayer::default())
        .try_init()
        .context("Failed to initialize tracing subscriber")
}
