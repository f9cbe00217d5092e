//! One cancellable timer per concern, plus last-request-wins sequencing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
    Search,
    Location,
    Filters,
}

impl Concern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Location => "location",
            Self::Filters => "filters",
        }
    }
}

/// At most one pending timer exists per concern at any instant.
///
/// Scheduling replaces the pending timer. Cancelling only stops a timer that
/// has not fired yet; work it already started runs to completion.
#[derive(Debug, Default)]
pub struct Debouncer {
    timers: Mutex<HashMap<Concern, JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, concern: Concern, delay: Duration, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timers.remove(&concern) {
            previous.abort();
        }
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detached so a later cancel cannot abort the work itself.
            tokio::spawn(work);
        });
        timers.insert(concern, timer);
    }

    /// Returns true when a timer was still pending.
    pub fn cancel(&self, concern: Concern) -> bool {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        match timers.remove(&concern) {
            Some(timer) => {
                let pending = !timer.is_finished();
                timer.abort();
                pending
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, timer) in timers.drain() {
            timer.abort();
        }
    }

    pub fn is_pending(&self, concern: Concern) -> bool {
        let timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers.get(&concern).is_some_and(|timer| !timer.is_finished())
    }
}

/// Monotonic request numbers; only the latest issued result may be applied.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    latest: AtomicU64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, seq: u64) -> bool {
        self.current() == seq
    }
}
