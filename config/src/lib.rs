#[macro_use]
extern crate tracing;

mod args;
pub mod duration;

pub use args::Args;
use directories::ProjectDirs;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    net::SocketAddr,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use strum::{
    Display,
    EnumString,
};

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");

const DATA_DIR_ENV: &str = "NODE_METRICS_DATA";
const CONFIG_DIR_ENV: &str = "NODE_METRICS_CONFIG_DIR";

lazy_static::lazy_static! {
    static ref PROJECT_DIRS: Option<ProjectDirs> =
        ProjectDirs::from("io", "node-metrics", "node-metrics-collector");
}

/// Default home of the persistence mirror.
pub fn get_data_dir() -> PathBuf {
    resolve_dir(DATA_DIR_ENV, ProjectDirs::data_local_dir, ".data")
}

/// Directory searched for `config.yaml`.
pub fn get_config_dir() -> PathBuf {
    resolve_dir(CONFIG_DIR_ENV, ProjectDirs::config_local_dir, ".config")
}

fn resolve_dir(env_key: &str, project_dir: fn(&ProjectDirs) -> &Path, fallback: &str) -> PathBuf {
    std::env::var_os(env_key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| PROJECT_DIRS.as_ref().map(|dirs| project_dir(dirs).to_path_buf()))
        .unwrap_or_else(|| Path::new(".").join(fallback))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing)]
    data_dir: PathBuf,
    #[serde(default, skip_serializing)]
    config_dir: PathBuf,
    pub listen_address: SocketAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// How long a sample stays visible after it was received.
    #[serde(with = "duration")]
    pub retention: Duration,
    /// How often stale nodes are dropped from the store.
    #[serde(with = "duration")]
    pub sweep_interval: Duration,
    pub leader: LeaderConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

#[derive(Debug, Default, Clone, Copy, Display, EnumString, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LeaderMode {
    /// Ask `docker node ls` whether this host is the Swarm leader.
    #[default]
    Docker,
    /// Always accept writes.
    Always,
    /// Never accept writes, e.g. a read-only replica.
    Never,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaderConfig {
    #[serde(default)]
    pub mode: LeaderMode,
    /// Defaults to the system hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(with = "duration")]
    pub poll_interval: Duration,
    #[serde(with = "duration")]
    pub timeout: Duration,
    /// Ask the oracle on every write instead of trusting the background watch.
    #[serde(default = "default_true")]
    pub per_request: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub influx: Option<InfluxSettings>,
    #[serde(with = "duration", default = "default_sink_timeout")]
    pub timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            influx: None,
            timeout: default_sink_timeout(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfluxSettings {
    pub url: url::Url,
    pub org: String,
    pub bucket: String,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(default = "default_measurement")]
    pub measurement: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(with = "duration", default = "default_debounce")]
    pub debounce: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            debounce: default_debounce(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_debounce() -> Duration {
    Duration::from_secs(1)
}

fn default_measurement() -> String {
    "node_metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        serde_yml::from_str(DEFAULT_CONFIG).expect("Failed to parse default config")
    }
}

impl Config {
    /// Layer the embedded defaults, `config.yaml` in the config directory,
    /// the file passed with `--config` and finally the command line.
    pub fn new(args: Args) -> Result<Self, config::ConfigError> {
        let data_dir = get_data_dir();
        let config_dir = get_config_dir();
        let mut builder = config::Config::builder()
            .set_default("data_dir", data_dir.display().to_string())?
            .set_default("config_dir", config_dir.display().to_string())?
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml));

        let config_files = [("config.yaml", config::FileFormat::Yaml)];

        for (file, format) in &config_files {
            let source = config::File::from(config_dir.join(file))
                .format(*format)
                .required(false);
            builder = builder.add_source(source);
        }

        if let Some(path) = &args.config {
            debug!(path = %path.display(), "reading explicit configuration file");
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        builder = builder.add_source(args);

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;

        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.retention.is_zero() {
            return Err(config::ConfigError::Message("retention must be greater than zero".into()));
        }
        if self.sweep_interval.is_zero() || self.leader.poll_interval.is_zero() {
            return Err(config::ConfigError::Message(
                "sweep_interval and leader.poll_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Location of the on-disk mirror.
    pub fn persistence_path(&self) -> PathBuf {
        self.persistence
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("metrics.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write as _;

    #[test]
    fn directory_override_comes_from_the_environment() {
        let key = "NODE_METRICS_TEST_DIR_OVERRIDE";
        std::env::set_var(key, "/srv/node-metrics");
        assert_eq!(
            resolve_dir(key, ProjectDirs::data_local_dir, ".data"),
            PathBuf::from("/srv/node-metrics")
        );

        std::env::remove_var(key);
        assert_ne!(
            resolve_dir(key, ProjectDirs::data_local_dir, ".data"),
            PathBuf::from("/srv/node-metrics")
        );
    }

    #[test]
    fn embedded_defaults_parse() {
        let config = Config::default();
        assert_eq!(config.listen_address, "0.0.0.0:6969".parse().unwrap());
        assert_eq!(config.retention, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.leader.mode, LeaderMode::Docker);
        assert_eq!(config.leader.timeout, Duration::from_secs(3));
        assert!(config.leader.per_request);
        assert_eq!(config.sink.influx, None);
        assert_eq!(config.sink.timeout, Duration::from_secs(5));
        assert!(!config.persistence.enabled);
    }

    #[test]
    fn args_override_files() {
        let dir = temp_dir::TempDir::new().unwrap();
        let path = dir.path().join("override.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "retention: 10m\nleader:\n  mode: always\n  poll_interval: 1s\n  timeout: 1s").unwrap();

        let args = Args {
            config: Some(path),
            retention: Some("90s".to_string()),
            influx_url: Some("http://influx:8086".to_string()),
            influx_org: Some("ops".to_string()),
            influx_bucket: Some("nodes".to_string()),
            persist: true,
            ..Args::default()
        };
        let config = Config::new(args).unwrap();

        assert_eq!(config.retention, Duration::from_secs(90));
        assert_eq!(config.leader.mode, LeaderMode::Always);
        assert_eq!(config.leader.poll_interval, Duration::from_secs(1));
        let influx = config.sink.influx.as_ref().unwrap();
        assert_eq!(influx.bucket, "nodes");
        assert_eq!(influx.measurement, "node_metrics");
        assert!(config.persistence.enabled);
        assert_eq!(config.persistence_path(), config.data_dir().join("metrics.json"));
    }

    #[test]
    fn zero_retention_is_rejected() {
        let args = Args {
            retention: Some("0s".to_string()),
            ..Args::default()
        };
        assert!(Config::new(args).is_err());
    }

    #[test]
    fn leader_mode_parses_case_insensitively() {
        assert_eq!("Never".parse::<LeaderMode>().unwrap(), LeaderMode::Never);
        assert_eq!(LeaderMode::Always.to_string(), "always");
    }
}
