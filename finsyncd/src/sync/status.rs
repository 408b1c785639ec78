use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_sync_attempt: Option<i64>,
    pub last_successful_sync: Option<i64>,
    pub pending_count: usize,
    pub failed_count: usize,
    pub sync_progress: f64,
    pub error: Option<String>,
}

/// Partial status change. Outer `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatusUpdate {
    pub is_syncing: Option<bool>,
    pub last_sync_attempt: Option<Option<i64>>,
    pub last_successful_sync: Option<Option<i64>>,
    pub pending_count: Option<usize>,
    pub failed_count: Option<usize>,
    pub sync_progress: Option<f64>,
    pub error: Option<Option<String>>,
}

impl SyncStatusUpdate {
    fn apply(self, status: &mut SyncStatus) {
        if let Some(value) = self.is_syncing {
            status.is_syncing = value;
        }
        if let Some(value) = self.last_sync_attempt {
            status.last_sync_attempt = value;
        }
        if let Some(value) = self.last_successful_sync {
            status.last_successful_sync = match (status.last_successful_sync, value) {
                (Some(previous), Some(next)) => Some(previous.max(next)),
                (_, next) => next,
            };
        }
        if let Some(value) = self.pending_count {
            status.pending_count = value;
        }
        if let Some(value) = self.failed_count {
            status.failed_count = value;
        }
        if let Some(value) = self.sync_progress {
            status.sync_progress = if value.is_finite() {
                value.clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
        if let Some(value) = self.error {
            status.error = value;
        }
    }
}

type Listener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

/// Process-wide observable sync status. Shared through `Arc`; listeners are
/// called synchronously, in registration order, after every change.
#[derive(Default)]
pub struct SyncStatusTracker {
    state: Mutex<SyncStatus>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
}

/// Handle returned by [`SyncStatusTracker::add_sync_status_listener`].
#[must_use = "dropping the subscription keeps the listener registered; call unsubscribe to remove it"]
pub struct Subscription {
    tracker: Weak<SyncStatusTracker>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(tracker) = self.tracker.upgrade() {
            lock(&tracker.listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

impl SyncStatusTracker {
    pub fn new(initial: SyncStatus) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(initial),
            ..Self::default()
        })
    }

    pub fn snapshot(&self) -> SyncStatus {
        lock(&self.state).clone()
    }

    pub fn add_sync_status_listener<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, Arc::new(listener)));
        Subscription {
            tracker: Arc::downgrade(self),
            id,
        }
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn update(&self, patch: SyncStatusUpdate) -> SyncStatus {
        let snapshot = {
            let mut state = lock(&self.state);
            patch.apply(&mut state);
            state.clone()
        };
        self.notify(&snapshot);
        snapshot
    }

    pub fn replace(&self, status: SyncStatus) -> SyncStatus {
        *lock(&self.state) = status.clone();
        self.notify(&status);
        status
    }

    fn notify(&self, snapshot: &SyncStatus) {
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
