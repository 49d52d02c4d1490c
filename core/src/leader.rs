//! Leadership: who is allowed to write.
//!
//! The oracle itself is external (Docker Swarm in production). This module
//! wraps it with a timeout, fails closed, and caches the last answer in an
//! atomic flag that a background watch keeps fresh.

use crate::error::{
    Error,
    Result,
};
use futures::future::BoxFuture;
use std::{
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};
use tokio::{
    process::Command,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Answers whether this process is currently the authorized writer.
pub trait LeaderOracle: Send + Sync {
    fn is_authorized(&self) -> BoxFuture<'_, Result<bool>>;

    /// Get the name of this oracle
    fn name(&self) -> &'static str;
}

/// Always answers the same thing. Used for single-node setups and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticOracle(pub bool);

impl LeaderOracle for StaticOracle {
    fn is_authorized(&self) -> BoxFuture<'_, Result<bool>> {
        let answer = self.0;
        Box::pin(async move { Ok(answer) })
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Asks the Docker CLI whether this host is the Swarm leader.
#[derive(Debug, Clone)]
pub struct DockerSwarmOracle {
    hostname: String,
}

impl DockerSwarmOracle {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// `docker node ls` output is one `<hostname> <manager status>` pair per
    /// line; the leader's status reads `Leader`.
    pub fn is_leader_in(&self, node_list: &str) -> bool {
        node_list.lines().any(|line| {
            let mut parts = line.split_whitespace();
            parts.next() == Some(self.hostname.as_str()) && parts.any(|status| status == "Leader")
        })
    }
}

impl LeaderOracle for DockerSwarmOracle {
    fn is_authorized(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let output = Command::new("docker")
                .args(["node", "ls", "--format", "{{.Hostname}} {{.ManagerStatus}}"])
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| Error::OracleFailure(format!("failed to run docker: {e}")))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::OracleFailure(format!(
                    "docker node ls exited with {}: {}",
                    output.status,
                    stderr.trim()
                )));
            }

            Ok(self.is_leader_in(&String::from_utf8_lossy(&output.stdout)))
        })
    }

    fn name(&self) -> &'static str {
        "docker-swarm"
    }
}

const HOSTNAME_FILES: &[&str] = &["/proc/sys/kernel/hostname", "/etc/hostname"];

/// The system hostname: `$HOSTNAME`, then the kernel's view, then
/// `"localhost"`.
pub fn hostname() -> String {
    let from_files = HOSTNAME_FILES.iter().map(|path| std::fs::read_to_string(path).ok());
    first_hostname(std::iter::once(std::env::var("HOSTNAME").ok()).chain(from_files))
}

fn first_hostname(candidates: impl IntoIterator<Item = Option<String>>) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Cached, timeout-bounded view of a [`LeaderOracle`].
#[derive(Clone)]
pub struct LeaderStatus {
    oracle: Arc<dyn LeaderOracle>,
    timeout: Duration,
    leader: Arc<AtomicBool>,
}

impl std::fmt::Debug for LeaderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderStatus")
            .field("oracle", &self.oracle.name())
            .field("timeout", &self.timeout)
            .field("leader", &self.is_leader())
            .finish()
    }
}

impl LeaderStatus {
    pub fn new(oracle: Arc<dyn LeaderOracle>, timeout: Duration) -> Self {
        Self {
            oracle,
            timeout,
            leader: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Last known answer. `false` until the first check completes.
    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::Acquire)
    }

    /// Ask the oracle now. Failures and timeouts count as "not leader".
    #[instrument(level = "trace", skip(self), fields(oracle = self.oracle.name()))]
    pub async fn check(&self) -> bool {
        let authorized = match tokio::time::timeout(self.timeout, self.oracle.is_authorized()).await {
            Ok(Ok(authorized)) => authorized,
            Ok(Err(err)) => {
                warn!(%err, reason = err.reason(), "leader check failed, treating as follower");
                false
            }
            Err(_) => {
                let err = Error::OracleFailure(format!("no answer within {:?}", self.timeout));
                warn!(%err, reason = err.reason(), "leader check timed out, treating as follower");
                false
            }
        };

        let was = self.leader.swap(authorized, Ordering::AcqRel);
        match (was, authorized) {
            (false, true) => info!("this node is now the leader, accepting metrics"),
            (true, false) => info!("this node lost leadership, rejecting metrics"),
            _ => {}
        }
        authorized
    }

    /// Re-check leadership every `every` until cancelled. Startup never
    /// waits on this.
    pub fn spawn_watch(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let status = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        status.check().await;
                    }
                }
            }
            debug!("leader watch stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingOracle;

    impl LeaderOracle for FailingOracle {
        fn is_authorized(&self) -> BoxFuture<'_, Result<bool>> {
            Box::pin(async { Err(Error::OracleFailure("boom".into())) })
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct HangingOracle;

    impl LeaderOracle for HangingOracle {
        fn is_authorized(&self) -> BoxFuture<'_, Result<bool>> {
            Box::pin(futures::future::pending())
        }

        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    #[test]
    fn hostname_takes_the_first_non_blank_candidate() {
        let candidates = [None, Some("  \n".to_string()), Some("manager-1\n".to_string()), Some("other".to_string())];
        assert_eq!(first_hostname(candidates), "manager-1");
        assert_eq!(first_hostname([None::<String>, None]), "localhost");
        assert!(!hostname().is_empty());
    }

    #[test]
    fn parses_docker_node_list() {
        let oracle = DockerSwarmOracle::new("manager-1");
        let output = "manager-1 Leader\nmanager-2 Reachable\nworker-1 \n";
        assert!(oracle.is_leader_in(output));
        assert!(!DockerSwarmOracle::new("manager-2").is_leader_in(output));
        assert!(!DockerSwarmOracle::new("worker-1").is_leader_in(output));
        assert!(!DockerSwarmOracle::new("manager").is_leader_in(output));
        assert!(!oracle.is_leader_in(""));
    }

    #[test]
    fn hostname_is_not_empty() {
        assert!(!hostname().is_empty());
    }

    #[tokio::test]
    async fn check_updates_the_cached_flag() {
        let status = LeaderStatus::new(Arc::new(StaticOracle(true)), Duration::from_secs(1));
        assert!(!status.is_leader());
        assert!(status.check().await);
        assert!(status.is_leader());
    }

    #[tokio::test]
    async fn failures_fail_closed() {
        let status = LeaderStatus::new(Arc::new(FailingOracle), Duration::from_secs(1));
        status.leader.store(true, Ordering::Release);
        assert!(!status.check().await);
        assert!(!status.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_fail_closed() {
        let status = LeaderStatus::new(Arc::new(HangingOracle), Duration::from_secs(3));
        assert!(!status.check().await);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_stops_on_cancel() {
        let status = LeaderStatus::new(Arc::new(StaticOracle(true)), Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let handle = status.spawn_watch(Duration::from_secs(5), cancel.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(status.is_leader());

        cancel.cancel();
        handle.await.unwrap();
    }
}
