// src/core/service/listeners.rs

//! Listener fan-out for configuration events. The listener list is
//! copy-on-write: notification walks an immutable snapshot, so listeners
//! may unsubscribe (even during a notification) without invalidating the
//! traversal, and no lock is held while user code runs.

use crate::core::change::NomadChange;
use crate::core::model::cluster::Cluster;
use crate::core::model::context::NodeContext;
use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

/// Receives configuration lifecycle events. All methods default to no-ops
/// so implementors only override what they care about.
pub trait DynamicConfigListener: Send + Sync {
    /// A change took effect in the live process.
    fn on_new_runtime_configuration(&self, context: &NodeContext, change: &NomadChange) {
        let _ = (context, change);
    }

    /// A change committed but only applies after restart.
    fn on_new_upcoming_configuration(&self, context: &NodeContext, change: &NomadChange) {
        let _ = (context, change);
    }

    /// The node joined a cluster.
    fn on_activation(&self, cluster: &Cluster) {
        let _ = cluster;
    }
}

#[derive(Clone)]
struct ListenerEntry {
    id: u64,
    listener: Arc<dyn DynamicConfigListener>,
}

#[derive(Default)]
pub struct ListenerRegistry {
    entries: RwLock<Arc<Vec<ListenerEntry>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        registry: &Arc<Self>,
        listener: Arc<dyn DynamicConfigListener>,
    ) -> ListenerHandle {
        let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = registry.entries.write();
        let mut next = entries.as_ref().clone();
        next.push(ListenerEntry { id, listener });
        *entries = Arc::new(next);
        ListenerHandle {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    fn remove(&self, id: u64) {
        let mut entries = self.entries.write();
        let mut next = entries.as_ref().clone();
        next.retain(|e| e.id != id);
        *entries = Arc::new(next);
    }

    /// Calls `f` on every registered listener, in registration order, with
    /// no lock held. A listener that panics is logged and skipped; it does
    /// not abort the loop.
    pub(crate) fn notify(&self, f: impl Fn(&dyn DynamicConfigListener)) {
        let snapshot = self.entries.read().clone();
        for entry in snapshot.iter() {
            if catch_unwind(AssertUnwindSafe(|| f(entry.listener.as_ref()))).is_err() {
                error!(
                    "A configuration listener panicked and was skipped (listener id {}).",
                    entry.id
                );
            }
        }
    }

}

/// A registration handle. Dropping it (or calling `release`) removes the
/// listener.
pub struct ListenerHandle {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl ListenerHandle {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
