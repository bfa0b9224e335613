use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned when a listener is added. Needed to remove it again.
///
/// IDs are unique within the process, across all registries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuild an ID previously obtained from [`ListenerId::get()`].
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread-safe, ordered collection of listeners.
///
/// Listeners are stored behind an [`Arc`] so that [`snapshot()`](Self::snapshot)
/// can hand them out without holding the lock. That lets a listener add or
/// remove listeners while it is being notified.
pub struct ListenerRegistry<L: ?Sized> {
    listeners: Mutex<Vec<(ListenerId, Arc<L>)>>,
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, Arc<L>)>> {
        // Listeners never run under the lock, so a poisoned Vec is intact.
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a listener and return its ID.
    pub fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId::next();
        self.lock().push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if no listener has this ID.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        match listeners.iter().position(|(i, _)| *i == id) {
            Some(pos) => {
                listeners.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Remove every listener. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut listeners = self.lock();
        let count = listeners.len();
        listeners.clear();
        count
    }

    /// Copy out the current listeners in the order they were added.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.lock().iter().map(|(_, l)| l.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
