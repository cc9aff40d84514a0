//! Observable collections with coalesced change notification.
//!
//! `ObservableSet` notifies subscribers after mutations. A reconciliation
//! pass that touches many items opens an explicit [`ObservableSet::batch`]
//! scope: mutations inside the scope mark it dirty and exactly one
//! notification fires when the scope closes. The batching boundary is
//! deterministic (no timers), which is what makes it testable.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving
/// notifications, drop it to unsubscribe.
pub struct Subscription<T: Clone + PartialEq> {
    set: Weak<ObservableSet<T>>,
    id: usize,
}

impl<T: Clone + PartialEq> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.unsubscribe(self.id);
        }
    }
}

/// A mutable set of items that notifies subscribers on change.
///
/// Thread-safe; wrap in `Arc` to enable subscriptions. Items are kept in
/// insertion order so lookups that depend on registration order (folder
/// prefix lookup) stay deterministic.
pub struct ObservableSet<T: Clone + PartialEq> {
    items: RwLock<Vec<T>>,
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn() + Send + Sync>)>>,
    next_id: AtomicUsize,
    batch_depth: AtomicUsize,
    batch_dirty: AtomicBool,
}

impl<T: Clone + PartialEq> Default for ObservableSet<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            batch_depth: AtomicUsize::new(0),
            batch_dirty: AtomicBool::new(false),
        }
    }
}

impl<T: Clone + PartialEq> ObservableSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current items in insertion order.
    pub fn items(&self) -> Vec<T> {
        self.items.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|i| i == item)
    }

    /// First item matching the predicate, in insertion order.
    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|i| pred(i))
            .cloned()
    }

    /// Add an item if not already present. Returns whether it was added.
    pub fn add(&self, item: T) -> bool {
        let added = {
            let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
            if items.iter().any(|i| *i == item) {
                false
            } else {
                items.push(item);
                true
            }
        };
        if added {
            self.changed();
        }
        added
    }

    /// Remove an item. Returns whether it was present.
    pub fn delete(&self, item: &T) -> bool {
        let removed = {
            let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
            let before = items.len();
            items.retain(|i| i != item);
            items.len() != before
        };
        if removed {
            self.changed();
        }
        removed
    }

    /// Remove all items.
    pub fn clear(&self) {
        let had_items = {
            let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
            let had = !items.is_empty();
            items.clear();
            had
        };
        if had_items {
            self.changed();
        }
    }

    /// Subscribe to change notifications. Returns a `Subscription` that
    /// unsubscribes on drop. Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            set: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // Use try_write to avoid deadlock if Drop runs during panic unwinding
        // while a read lock is held (e.g., during notify).
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Open a batch scope. Mutations inside the scope are coalesced into at
    /// most one notification, fired when the returned guard drops.
    pub fn batch(&self) -> BatchGuard<'_, T> {
        self.batch_depth.fetch_add(1, Ordering::SeqCst);
        BatchGuard { set: self }
    }

    /// Notify subscribers unconditionally (outside any batch scope).
    pub fn notify(&self) {
        self.changed();
    }

    fn changed(&self) {
        if self.batch_depth.load(Ordering::SeqCst) > 0 {
            self.batch_dirty.store(true, Ordering::SeqCst);
        } else {
            self.notify_now();
        }
    }

    fn notify_now(&self) {
        // Clone the callback list to prevent deadlock if a callback
        // subscribes or mutates the set.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback();
        }
    }
}

/// Guard for an open batch scope; closing the scope flushes one
/// notification if anything changed inside it.
pub struct BatchGuard<'a, T: Clone + PartialEq> {
    set: &'a ObservableSet<T>,
}

impl<T: Clone + PartialEq> Drop for BatchGuard<'_, T> {
    fn drop(&mut self) {
        if self.set.batch_depth.fetch_sub(1, Ordering::SeqCst) == 1
            && self.set.batch_dirty.swap(false, Ordering::SeqCst)
        {
            self.set.notify_now();
        }
    }
}
