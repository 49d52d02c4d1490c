//! Optional JSON mirror of the store on local disk.
//!
//! A broken mirror never stops the service: load failures leave the store
//! empty, write failures are logged and the next change tries again.

use crate::{
    error::{
        Error,
        Result,
    },
    sample::{
        AuxEntry,
        Sample,
    },
    store::MetricStore,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// On-disk layout of the mirror.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorState {
    #[serde(default)]
    pub samples: BTreeMap<String, Vec<Sample>>,
    #[serde(default)]
    pub containers: BTreeMap<String, Vec<AuxEntry>>,
}

#[derive(Debug, Clone)]
pub struct Mirror {
    path: PathBuf,
    store: MetricStore,
}

impl Mirror {
    pub fn new(path: impl Into<PathBuf>, store: MetricStore) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the mirror into the store. A missing file is not an error.
    pub async fn load(&self) -> Result<usize> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::PersistenceFailure(format!("cannot read mirror: {e}"))),
        };
        let state: MirrorState = serde_json::from_slice(&bytes)
            .map_err(|e| Error::PersistenceFailure(format!("corrupt mirror: {e}")))?;

        self.store.restore(state.samples, state.containers);
        Ok(self.store.source_count())
    }

    /// Load, or start empty if the mirror cannot be used.
    pub async fn load_or_start_empty(&self) {
        match self.load().await {
            Ok(sources) => info!(path = %self.path.display(), sources, "restored metrics from mirror"),
            Err(err) => warn!(path = %self.path.display(), reason = err.reason(), %err, "starting with an empty store"),
        }
    }

    /// Write the current store contents, replacing the previous mirror
    /// atomically.
    pub async fn save(&self) -> Result<()> {
        let state = MirrorState {
            samples: self.store.history(None),
            containers: self.store.all_aux(),
        };
        let json = serde_json::to_vec(&state).map_err(|e| Error::PersistenceFailure(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::PersistenceFailure(format!("cannot create mirror directory: {e}")))?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::PersistenceFailure(format!("cannot write mirror: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::PersistenceFailure(format!("cannot replace mirror: {e}")))?;
        Ok(())
    }

    async fn save_or_warn(&self) {
        if let Err(err) = self.save().await {
            warn!(path = %self.path.display(), reason = err.reason(), %err, "continuing in memory only");
        }
    }

    /// Save after store changes, at most once per `debounce`, and once more
    /// on cancellation.
    pub fn spawn(self, debounce: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let mut revisions = self.store.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = revisions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(debounce) => {}
                        }
                        revisions.mark_unchanged();
                        self.save_or_warn().await;
                    }
                }
            }
            self.save_or_warn().await;
            debug!(path = %self.path.display(), "mirror writer stopped");
        })
    }
}
