use clap::Parser;
use std::{
    net::SocketAddr,
    path::PathBuf,
};

/// Leader-gated node metrics collector
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version = version(), about, long_about = None)]
pub struct Args {
    /// Additional configuration file, read after the one in the config directory.
    #[arg(long, env = "NODE_METRICS_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "NODE_METRICS_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,

    /// How long samples are kept, e.g. "5m" or "10m".
    #[arg(long, env = "NODE_METRICS_RETENTION", value_name = "DURATION")]
    pub retention: Option<String>,

    /// How leadership is decided: docker, always or never.
    #[arg(long, env = "NODE_METRICS_LEADER_MODE", value_name = "MODE")]
    pub leader_mode: Option<String>,

    /// Hostname to look for in `docker node ls`.
    #[arg(long, env = "NODE_METRICS_HOSTNAME")]
    pub hostname: Option<String>,

    /// InfluxDB base URL. Forwarding is disabled without it.
    #[arg(long, env = "INFLUX_URL", value_name = "URL")]
    pub influx_url: Option<String>,

    #[arg(long, env = "INFLUX_ORG")]
    pub influx_org: Option<String>,

    #[arg(long, env = "INFLUX_BUCKET")]
    pub influx_bucket: Option<String>,

    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    pub influx_token: Option<String>,

    /// Mirror the store to disk and reload it on start.
    #[arg(long, action, env = "NODE_METRICS_PERSIST")]
    pub persist: bool,

    /// Where the mirror lives. Defaults to the data directory.
    #[arg(long, env = "NODE_METRICS_PERSISTENCE_PATH", value_name = "FILE")]
    pub persistence_path: Option<PathBuf>,

    /// Path to the PEM certificate. Enables TLS together with --private-key.
    #[arg(long, requires = "private_key", value_name = "FILE")]
    pub certificate: Option<PathBuf>,

    /// Path to the PEM private key for the certificate.
    #[arg(long, requires = "certificate", value_name = "FILE")]
    pub private_key: Option<PathBuf>,
}

mod config_ext {
    use super::*;
    use config::{
        Map,
        Source,
        Value,
    };
    use std::collections::HashMap;

    impl Source for Args {
        fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
            Box::new((*self).clone())
        }

        fn collect(&self) -> Result<Map<String, Value>, config::ConfigError> {
            let mut cache = HashMap::<String, Value>::new();
            if let Some(listen_address) = &self.listen_address {
                cache.insert("listen_address".to_string(), listen_address.to_string().into());
            }
            if let Some(retention) = &self.retention {
                cache.insert("retention".to_string(), retention.clone().into());
            }
            if let Some(mode) = &self.leader_mode {
                cache.insert("leader.mode".to_string(), mode.clone().into());
            }
            if let Some(hostname) = &self.hostname {
                cache.insert("leader.hostname".to_string(), hostname.clone().into());
            }
            if let Some(url) = &self.influx_url {
                cache.insert("sink.influx.url".to_string(), url.clone().into());
            }
            if let Some(org) = &self.influx_org {
                cache.insert("sink.influx.org".to_string(), org.clone().into());
            }
            if let Some(bucket) = &self.influx_bucket {
                cache.insert("sink.influx.bucket".to_string(), bucket.clone().into());
            }
            if let Some(token) = &self.influx_token {
                cache.insert("sink.influx.token".to_string(), token.clone().into());
            }
            if self.persist {
                cache.insert("persistence.enabled".to_string(), true.into());
            }
            if let Some(path) = &self.persistence_path {
                cache.insert("persistence.path".to_string(), path.display().to_string().into());
            }
            if let Some(certificate) = &self.certificate {
                cache.insert("tls.certificate".to_string(), certificate.display().to_string().into());
            }
            if let Some(private_key) = &self.private_key {
                cache.insert("tls.private_key".to_string(), private_key.display().to_string().into());
            }
            Ok(cache)
        }
    }
}

pub fn version() -> String {
    let author = clap::crate_authors!();
    let version = clap::crate_version!();
    let config_dir_path = crate::get_config_dir().display().to_string();
    let data_dir_path = crate::get_data_dir().display().to_string();

    format!(
        "\
{version}
Authors: {author}

Config directory: {config_dir_path}
Data directory: {data_dir_path}"
    )
}
