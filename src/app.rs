use axum::serve;
use axum_server::tls_rustls::RustlsConfig;
use eyre::{
    Context as _,
    Result,
};
use node_metrics_config::{
    Args,
    Config,
    LeaderMode,
};
use node_metrics_core::{
    hostname,
    DockerSwarmOracle,
    InfluxConfig,
    InfluxSink,
    IngestGate,
    LeaderOracle,
    LeaderStatus,
    MetricSink,
    MetricStore,
    Mirror,
    MonotonicClock,
    NoopSink,
    QueryService,
    StaticOracle,
};
use node_metrics_http::create_router;
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    net::TcpListener,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct App {
    config: Config,
    cancel: CancellationToken,
}

impl App {
    pub fn new(args: Args) -> Result<Self> {
        let config = Config::new(args).context("Failed to load configuration")?;
        debug!(config_dir = %config.config_dir().display(), data_dir = %config.data_dir().display(), "configuration loaded");
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
        })
    }

    fn oracle(&self, hostname: &str) -> Arc<dyn LeaderOracle> {
        match self.config.leader.mode {
            LeaderMode::Docker => Arc::new(DockerSwarmOracle::new(hostname)),
            LeaderMode::Always => Arc::new(StaticOracle(true)),
            LeaderMode::Never => Arc::new(StaticOracle(false)),
        }
    }

    fn sink(&self) -> Result<Arc<dyn MetricSink>> {
        let Some(settings) = &self.config.sink.influx else {
            info!("no sink configured, samples stay in memory");
            return Ok(Arc::new(NoopSink));
        };

        let influx = InfluxConfig {
            url: settings.url.clone(),
            org: settings.org.clone(),
            bucket: settings.bucket.clone(),
            token: settings.token.clone(),
            measurement: settings.measurement.clone(),
        };
        let sink = InfluxSink::new(influx, reqwest::Client::new(), self.config.sink.timeout)
            .context("Failed to configure the InfluxDB sink")?;
        info!(url = %settings.url, bucket = %settings.bucket, "forwarding samples to InfluxDB");
        Ok(Arc::new(sink))
    }

    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        let hostname = config.leader.hostname.clone().unwrap_or_else(hostname);

        let store = MetricStore::new(config.retention, Arc::new(MonotonicClock::default()));
        let leader = LeaderStatus::new(self.oracle(&hostname), config.leader.timeout);
        let gate = IngestGate::new(leader.clone(), store.clone(), self.sink()?, config.sink.timeout)
            .with_per_request_check(config.leader.per_request);

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        if config.persistence.enabled {
            let mirror = Mirror::new(config.persistence_path(), store.clone());
            mirror.load_or_start_empty().await;
            tasks.push(mirror.spawn(config.persistence.debounce, self.cancel.clone()));
        }
        tasks.push(leader.spawn_watch(config.leader.poll_interval, self.cancel.clone()));
        tasks.push(store.spawn_sweeper(config.sweep_interval, self.cancel.clone()));

        info!(
            %hostname,
            mode = %config.leader.mode,
            retention = ?config.retention,
            "starting node metrics collector"
        );

        let app = create_router(gate, QueryService::new(store), hostname);
        tokio::spawn(shutdown_signal(self.cancel.clone()));

        let served = self.serve(app).await;
        self.cancel.cancel();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(%err, "background task ended abnormally");
            }
        }
        info!("shut down");
        served
    }

    async fn serve(&self, app: axum::Router) -> Result<()> {
        let address = self.config.listen_address;
        info!("listening on {}", address);

        if let Some(tls) = &self.config.tls {
            let rustls_config = RustlsConfig::from_pem_file(&tls.certificate, &tls.private_key)
                .await
                .context("Failed to load TLS certificate")?;
            let handle = axum_server::Handle::new();
            let cancel = self.cancel.clone();
            let shutdown = handle.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });
            axum_server::bind_rustls(address, rustls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")?;
        } else {
            let listener = TcpListener::bind(address)
                .await
                .with_context(|| format!("Failed to bind {address}"))?;
            let cancel = self.cancel.clone();
            serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
                .context("HTTP server failed")?;
        }

        Ok(())
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel.cancelled() => return,
    }
    info!("shutdown requested");
    cancel.cancel();
}
