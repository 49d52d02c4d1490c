use crate::{
    error::{
        Error,
        Result,
    },
    normalize::{
        round_to,
        PERCENT_PRECISION,
        RATE_PRECISION,
    },
    sample::Sample,
};
use futures::future::BoxFuture;
use reqwest::{
    header::{
        AUTHORIZATION,
        CONTENT_TYPE,
    },
    Client as HttpClient,
};
use std::time::Duration;
use url::Url;

/// Best-effort forwarding of normalized samples to long-term storage.
pub trait MetricSink: Send + Sync {
    /// Forward one sample. Errors are reported, never retried.
    fn forward<'a>(&'a self, sample: &'a Sample) -> BoxFuture<'a, Result<()>>;

    /// Get the name of this sink
    fn name(&self) -> &'static str;
}

/// Used when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricSink for NoopSink {
    fn forward<'a>(&'a self, _sample: &'a Sample) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxConfig {
    pub url: Url,
    pub org: String,
    pub bucket: String,
    pub token: Option<String>,
    pub measurement: String,
}

/// Writes samples to an InfluxDB v2 endpoint in line protocol.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    config: InfluxConfig,
    write_url: Url,
    http_client: HttpClient,
    timeout: Duration,
}

impl InfluxSink {
    pub fn new(config: InfluxConfig, http_client: HttpClient, timeout: Duration) -> Result<Self> {
        let mut write_url = config
            .url
            .join("api/v2/write")
            .map_err(|e| Error::SinkUnavailable(format!("invalid sink url: {e}")))?;
        write_url
            .query_pairs_mut()
            .append_pair("org", &config.org)
            .append_pair("bucket", &config.bucket)
            .append_pair("precision", "s");

        Ok(Self {
            config,
            write_url,
            http_client,
            timeout,
        })
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    /// Render one sample as a line-protocol record with second precision.
    pub fn line(&self, sample: &Sample) -> String {
        format!(
            "{},node={},role={} cpu={},mem={},net_in={},net_out={},status=\"{}\" {}",
            escape_key(&self.config.measurement),
            escape_key(&sample.source_id),
            escape_key(&sample.role),
            round_to(sample.cpu, PERCENT_PRECISION),
            round_to(sample.mem, PERCENT_PRECISION),
            round_to(sample.net_in, RATE_PRECISION),
            round_to(sample.net_out, RATE_PRECISION),
            escape_string(&sample.status),
            sample.timestamp.timestamp(),
        )
    }
}

impl MetricSink for InfluxSink {
    fn forward<'a>(&'a self, sample: &'a Sample) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut request = self
                .http_client
                .post(self.write_url.clone())
                .timeout(self.timeout)
                .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(self.line(sample));
            if let Some(token) = &self.config.token {
                request = request.header(AUTHORIZATION, format!("Token {token}"));
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::SinkUnavailable(e.without_url().to_string()))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(Error::SinkUnavailable(format!("sink answered {status}")))
            }
        })
    }

    fn name(&self) -> &'static str {
        "influxdb"
    }
}

/// Measurement names, tag keys and tag values escape commas, spaces and
/// equals signs.
fn escape_key(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// String field values escape double quotes and backslashes.
fn escape_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sink() -> InfluxSink {
        let config = InfluxConfig {
            url: "http://influx:8086/".parse().unwrap(),
            org: "ops".to_string(),
            bucket: "nodes".to_string(),
            token: Some("secret".to_string()),
            measurement: "node_metrics".to_string(),
        };
        InfluxSink::new(config, HttpClient::new(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn renders_line_protocol() {
        let sample = Sample {
            cpu: 12.3456,
            mem: 50.0,
            net_in: 0.12345,
            net_out: 2.0,
            status: "ok".to_string(),
            role: "manager".to_string(),
            ..Sample::new("n1", "2025-01-01T00:00:00Z".parse().unwrap())
        };

        assert_eq!(
            sink().line(&sample),
            "node_metrics,node=n1,role=manager cpu=12.35,mem=50,net_in=0.123,net_out=2,status=\"ok\" 1735689600"
        );
    }

    #[test]
    fn escapes_tags_and_strings() {
        let sample = Sample {
            status: "say \"hi\"".to_string(),
            role: "a=b".to_string(),
            ..Sample::new("rack 1,n1", "2025-01-01T00:00:00Z".parse().unwrap())
        };

        let line = sink().line(&sample);
        assert!(line.starts_with("node_metrics,node=rack\\ 1\\,n1,role=a\\=b "));
        assert!(line.contains("status=\"say \\\"hi\\\"\""));
    }

    #[test]
    fn builds_write_url() {
        assert_eq!(
            sink().write_url().as_str(),
            "http://influx:8086/api/v2/write?org=ops&bucket=nodes&precision=s"
        );
    }

    #[tokio::test]
    async fn unreachable_sink_is_unavailable() {
        let config = InfluxConfig {
            url: "http://127.0.0.1:9/".parse().unwrap(),
            org: "ops".to_string(),
            bucket: "nodes".to_string(),
            token: None,
            measurement: "node_metrics".to_string(),
        };
        let sink = InfluxSink::new(config, HttpClient::new(), Duration::from_secs(2)).unwrap();
        let err = sink.forward(&Sample::new("n1", chrono::Utc::now())).await.unwrap_err();
        assert_eq!(err.reason(), "sink_unavailable");
    }
}
