use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub type ListenerId = u64;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered callback list shared by the hub and the widget cache.
///
/// Callbacks run outside the internal lock, so a listener may attach or
/// detach listeners (including itself) while being notified.
pub struct ListenerSet<T> {
    inner: Mutex<Registry<T>>,
}

struct Registry<T> {
    next_id: ListenerId,
    entries: Vec<(ListenerId, Callback<T>)>,
}

impl<T> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Registry {
                next_id: 1,
                entries: Vec::new(),
            }),
        }
    }

    pub fn attach<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push((id, Arc::new(listener)));
        id
    }

    pub fn detach(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|(entry_id, _)| *entry_id != id);
        inner.entries.len() != before
    }

    /// Calls every listener in attach order, returning how many were called.
    pub fn notify(&self, value: &T) -> usize {
        let snapshot: Vec<Callback<T>> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in &snapshot {
            callback(value);
        }

        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Detaches its listener when dropped.
#[must_use = "the listener is detached as soon as the guard is dropped"]
pub struct ListenerGuard<T> {
    id: ListenerId,
    set: Weak<ListenerSet<T>>,
}

impl<T> ListenerGuard<T> {
    pub(crate) fn new(id: ListenerId, set: &Arc<ListenerSet<T>>) -> Self {
        Self {
            id,
            set: Arc::downgrade(set),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Detaches now instead of on drop.
    pub fn detach(self) {}
}

impl<T> Drop for ListenerGuard<T> {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.detach(self.id);
        }
    }
}

impl<T> core::fmt::Debug for ListenerGuard<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ListenerGuard").field("id", &self.id).finish()
    }
}
