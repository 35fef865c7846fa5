//! The watch registry: the single, process-wide, authoritative store of active watches.
//!
//! The registry lock is held only for `O(1)` (or `O(children)`) bookkeeping; it is never held
//! across a kernel syscall, and per §5 of the design it is never held at the same time as the
//! signal-map or timer lock (a thread holds at most one of the three, optionally followed by the
//! event-queue lock).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::watch::{Descriptor, Watch};

/// Descriptors below this value are reserved for [`crate::WatchKind::Signal`] watches, whose
/// descriptor is always exactly the signal number (`NSIG` is well under 1024 on every supported
/// platform).
const FIRST_DESCRIPTOR: Descriptor = 1024;

pub(crate) struct Registry {
    watches: Mutex<HashMap<Descriptor, Arc<Watch>>>,
    next: AtomicI32,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Registry {
            watches: Mutex::new(HashMap::new()),
            next: AtomicI32::new(FIRST_DESCRIPTOR),
        }
    }

    /// Allocate the next monotonically increasing, never-reused descriptor.
    pub(crate) fn allocate_descriptor(&self) -> Descriptor {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Link a fully-constructed watch into the registry.
    pub(crate) fn insert(&self, watch: Arc<Watch>) {
        self.watches.lock().unwrap().insert(watch.descriptor(), watch);
    }

    /// Look up a live watch by descriptor.
    pub(crate) fn lookup(&self, descriptor: Descriptor) -> Option<Arc<Watch>> {
        self.watches.lock().unwrap().get(&descriptor).cloned()
    }

    /// Whether `descriptor` still names a live watch.
    ///
    /// Used by the event queue to drop events belonging to a watch that was cancelled while the
    /// event was in flight, without needing to mutate queued events in place.
    pub(crate) fn is_live(&self, descriptor: Descriptor) -> bool {
        self.watches.lock().unwrap().contains_key(&descriptor)
    }

    /// Remove `descriptor` and every watch transitively parented on it.
    ///
    /// Returns `None` if `descriptor` was never live (the caller should treat this as
    /// [`crate::CancelError::NotFound`]).
    pub(crate) fn remove_with_children(&self, descriptor: Descriptor) -> Option<Vec<Arc<Watch>>> {
        let mut watches = self.watches.lock().unwrap();
        let root = watches.remove(&descriptor)?;

        let mut removed = vec![root];
        let mut frontier = vec![descriptor];
        while let Some(parent) = frontier.pop() {
            let children: Vec<Descriptor> = watches
                .iter()
                .filter(|(_, w)| w.parent() == Some(parent))
                .map(|(d, _)| *d)
                .collect();
            for child in children {
                if let Some(w) = watches.remove(&child) {
                    frontier.push(child);
                    removed.push(w);
                }
            }
        }

        Some(removed)
    }

    /// A snapshot of every currently live descriptor.
    ///
    /// Used by [`crate::shutdown`] to drain the registry; the snapshot may be stale by the time
    /// the caller acts on it; that's fine; cancelling an already-cancelled descriptor is a no-op.
    pub(crate) fn descriptors(&self) -> Vec<Descriptor> {
        self.watches.lock().unwrap().keys().copied().collect()
    }

    /// The number of watches currently live. Exposed for tests.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.watches.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::mask::Mask;
    use crate::watch::{Watch, WatchKind};

    use super::Registry;

    fn fd_watch(descriptor: i32, parent: Option<i32>) -> Arc<Watch> {
        Arc::new(Watch::new(
            descriptor,
            WatchKind::Fd(descriptor),
            Mask::READ,
            None,
            parent,
        ))
    }

    #[test]
    fn descriptors_start_at_1024_and_never_repeat() {
        let registry = Registry::new();
        let first = registry.allocate_descriptor();
        let second = registry.allocate_descriptor();
        assert_eq!(first, 1024);
        assert_eq!(second, 1025);
    }

    #[test]
    fn lookup_and_is_live_reflect_insertion() {
        let registry = Registry::new();
        let descriptor = registry.allocate_descriptor();
        assert!(!registry.is_live(descriptor));

        registry.insert(fd_watch(descriptor, None));
        assert!(registry.is_live(descriptor));
        assert_eq!(registry.lookup(descriptor).unwrap().descriptor(), descriptor);
    }

    #[test]
    fn remove_with_children_removes_the_whole_subtree() {
        let registry = Registry::new();
        let parent = registry.allocate_descriptor();
        let child = registry.allocate_descriptor();
        let grandchild = registry.allocate_descriptor();

        registry.insert(fd_watch(parent, None));
        registry.insert(fd_watch(child, Some(parent)));
        registry.insert(fd_watch(grandchild, Some(child)));
        assert_eq!(registry.len(), 3);

        let removed = registry.remove_with_children(parent).unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn remove_with_children_on_unknown_descriptor_returns_none() {
        let registry = Registry::new();
        assert!(registry.remove_with_children(1024).is_none());
    }

    #[test]
    fn descriptors_snapshots_the_live_set() {
        let registry = Registry::new();
        let a = registry.allocate_descriptor();
        let b = registry.allocate_descriptor();
        registry.insert(fd_watch(a, None));
        registry.insert(fd_watch(b, None));

        let mut descriptors = registry.descriptors();
        descriptors.sort();
        assert_eq!(descriptors, vec![a, b]);
    }
}
