//! The rolling per-node window and the container cache.
//!
//! Locking is per source: an outer `RwLock` guards the map of windows and
//! every window has its own `Mutex`. Lock order is always outer before inner.
//! Appends release the outer lock before touching a window; the sweeper holds
//! the outer write lock while it removes emptied windows and marks them
//! retired, so an append that raced with the removal retries on a fresh one.

use crate::{
    clock::Clock,
    sample::{
        AuxEntry,
        Sample,
    },
};
use chrono::{
    DateTime,
    TimeDelta,
    Utc,
};
use std::{
    collections::{
        BTreeMap,
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        RwLock,
        RwLockReadGuard,
        RwLockWriteGuard,
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct SourceWindow {
    samples: VecDeque<Sample>,
    retired: bool,
}

impl SourceWindow {
    fn evict(&mut self, cutoff: DateTime<Utc>) {
        while self.samples.front().is_some_and(|s| s.timestamp <= cutoff) {
            self.samples.pop_front();
        }
    }
}

type Slot = Arc<Mutex<SourceWindow>>;

/// Thread-safe, time-bounded sample storage. Cloning is cheap and shares the
/// underlying state.
#[derive(Debug, Clone)]
pub struct MetricStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    retention: TimeDelta,
    clock: Arc<dyn Clock>,
    windows: RwLock<HashMap<String, Slot>>,
    aux: RwLock<HashMap<String, Vec<AuxEntry>>>,
    revision: watch::Sender<u64>,
}

impl MetricStore {
    pub fn new(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
                clock,
                windows: Default::default(),
                aux: Default::default(),
                revision,
            }),
        }
    }

    pub fn retention(&self) -> Duration {
        self.inner.retention.to_std().unwrap_or(Duration::MAX)
    }

    /// Current reading of the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn cutoff(&self) -> DateTime<Utc> {
        self.now()
            .checked_sub_signed(self.inner.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Receives a new revision number after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    fn slot(&self, source_id: &str) -> Slot {
        if let Some(slot) = read(&self.inner.windows).get(source_id) {
            return slot.clone();
        }
        write(&self.inner.windows)
            .entry(source_id.to_string())
            .or_default()
            .clone()
    }

    /// Append a sample to its source's window and evict what has aged out
    /// there. A timestamp older than the window's tail is raised to the tail
    /// so the window stays sorted.
    pub fn append(&self, mut sample: Sample) {
        let cutoff = self.cutoff();
        loop {
            let slot = self.slot(&sample.source_id);
            let mut window = lock(&slot);
            if window.retired {
                continue;
            }
            window.evict(cutoff);
            if let Some(tail) = window.samples.back() {
                if sample.timestamp < tail.timestamp {
                    sample.timestamp = tail.timestamp;
                }
            }
            trace!(node = %sample.source_id, len = window.samples.len() + 1, "appending sample");
            window.samples.push_back(sample);
            break;
        }
        self.bump();
    }

    pub fn latest(&self, source_id: &str) -> Option<Sample> {
        let cutoff = self.cutoff();
        let slot = read(&self.inner.windows).get(source_id).cloned()?;
        let mut window = lock(&slot);
        window.evict(cutoff);
        window.samples.back().cloned()
    }

    /// Latest sample of every source that still has one.
    pub fn snapshot(&self) -> BTreeMap<String, Sample> {
        let cutoff = self.cutoff();
        read(&self.inner.windows)
            .iter()
            .filter_map(|(source_id, slot)| {
                let mut window = lock(slot);
                window.evict(cutoff);
                window.samples.back().cloned().map(|s| (source_id.clone(), s))
            })
            .collect()
    }

    /// Retained window per source, oldest first. With `source_id` set, at
    /// most that one source is returned.
    pub fn history(&self, source_id: Option<&str>) -> BTreeMap<String, Vec<Sample>> {
        let cutoff = self.cutoff();
        let windows = read(&self.inner.windows);
        let collect = |source_id: &String, slot: &Slot| {
            let mut window = lock(slot);
            window.evict(cutoff);
            if window.samples.is_empty() {
                return None;
            }
            let samples: Vec<Sample> = window.samples.iter().cloned().collect();
            Some((source_id.clone(), samples))
        };

        match source_id {
            Some(id) => windows
                .get_key_value(id)
                .and_then(|(source_id, slot)| collect(source_id, slot))
                .into_iter()
                .collect(),
            None => windows
                .iter()
                .filter_map(|(source_id, slot)| collect(source_id, slot))
                .collect(),
        }
    }

    /// Replace the container breakdown of a source. Never time-evicted.
    pub fn set_aux(&self, source_id: &str, entries: Vec<AuxEntry>) {
        write(&self.inner.aux).insert(source_id.to_string(), entries);
        self.bump();
    }

    pub fn aux(&self, source_id: &str) -> Option<Vec<AuxEntry>> {
        read(&self.inner.aux).get(source_id).cloned()
    }

    pub fn all_aux(&self) -> BTreeMap<String, Vec<AuxEntry>> {
        read(&self.inner.aux)
            .iter()
            .map(|(source_id, entries)| (source_id.clone(), entries.clone()))
            .collect()
    }

    /// Evict aged-out samples across all sources and drop emptied windows.
    /// Returns how many sources were removed.
    pub fn sweep(&self) -> usize {
        let cutoff = self.cutoff();
        let mut windows = write(&self.inner.windows);
        let before = windows.len();
        windows.retain(|_, slot| {
            let mut window = lock(slot);
            window.evict(cutoff);
            if window.samples.is_empty() {
                window.retired = true;
                false
            } else {
                true
            }
        });
        let removed = before - windows.len();
        drop(windows);

        if removed > 0 {
            debug!(removed, "swept stale sources");
            self.bump();
        }
        removed
    }

    /// Run [`MetricStore::sweep`] every `every` until cancelled.
    pub fn spawn_sweeper(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        store.sweep();
                    }
                }
            }
            debug!("sweeper stopped");
        })
    }

    /// Replace the whole store contents, e.g. from a persisted mirror.
    /// Samples that already aged out are dropped.
    pub fn restore(&self, samples: BTreeMap<String, Vec<Sample>>, aux: BTreeMap<String, Vec<AuxEntry>>) {
        let cutoff = self.cutoff();
        let mut windows = write(&self.inner.windows);
        for slot in windows.values() {
            lock(slot).retired = true;
        }
        windows.clear();
        for (source_id, mut list) in samples {
            list.sort_by_key(|s| s.timestamp);
            let mut window = SourceWindow {
                samples: list
                    .into_iter()
                    .map(|mut s| {
                        s.source_id.clone_from(&source_id);
                        s
                    })
                    .collect(),
                retired: false,
            };
            window.evict(cutoff);
            if !window.samples.is_empty() {
                windows.insert(source_id, Arc::new(Mutex::new(window)));
            }
        }
        drop(windows);

        *write(&self.inner.aux) = aux.into_iter().collect();
        self.bump();
    }

    /// Number of sources currently holding a window, stale or not.
    pub fn source_count(&self) -> usize {
        read(&self.inner.windows).len()
    }

    /// Number of samples held across all windows, stale or not.
    pub fn sample_count(&self) -> usize {
        read(&self.inner.windows)
            .values()
            .map(|slot| lock(slot).samples.len())
            .sum()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
