use chrono::{
    DateTime,
    Utc,
};
use std::sync::{
    Arc,
    Mutex,
    PoisonError,
};

/// Source of wall-clock readings. Injected so that eviction can be tested
/// without sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wraps another clock and never hands out a reading earlier than the last
/// one. Ingestion timestamps come from here so that windows stay sorted even
/// when the wall clock steps backwards.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    inner: Arc<dyn Clock>,
    last: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl MonotonicClock {
    pub fn new(inner: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            last: Default::default(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let reading = self.inner.now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let now = match *last {
            Some(prev) if prev > reading => prev,
            _ => reading,
        };
        *last = Some(now);
        now
    }
}
