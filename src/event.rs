//! The global event queue and its producer/consumer synchronisation.
//!
//! All backend, timer and signal threads are producers; [`crate::event_wait`] and the
//! [`Dispatcher`] worker pool are the two supported consumers.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use log::trace;

use crate::mask::Mask;
use crate::registry::Registry;
use crate::watch::Watch;

/// A delivery record: the watch that fired, and the conditions observed.
///
/// For `Vnode` events concerning an entry within a watched directory, `name` carries the
/// filename; it is `None` for every other kind, and for `Vnode` events about the watched path
/// itself.
#[derive(Debug, Clone)]
pub struct Event {
    watch: Arc<Watch>,
    mask: Mask,
    name: Option<String>,
}

impl Event {
    pub(crate) fn new(watch: Arc<Watch>, mask: Mask) -> Self {
        Event {
            watch,
            mask,
            name: None,
        }
    }

    pub(crate) fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The watch this event concerns.
    pub fn watch(&self) -> &Watch {
        &self.watch
    }

    /// The conditions that fired.
    pub fn mask(&self) -> Mask {
        self.mask
    }

    /// The directory entry name associated with this event, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// The global FIFO of pending events, protected by a mutex/condvar pair.
///
/// This mirrors the C library's `STAILQ` of events guarded by a mutex and woken via a counting
/// semaphore; a `Condvar` plays the role of the semaphore here.
pub(crate) struct EventQueue {
    inner: Mutex<VecDeque<Event>>,
    ready: Condvar,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        EventQueue {
            inner: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    /// Push an event onto the tail of the queue and wake one waiting consumer.
    pub(crate) fn push(&self, event: Event) {
        trace!("enqueueing {:?} for {}", event.mask, event.watch);
        let mut queue = self.inner.lock().unwrap();
        queue.push_back(event);
        self.ready.notify_one();
    }

    /// Block until an event is available, then pop it.
    ///
    /// Events whose watch is no longer live in `registry` are silently dropped (this is the
    /// "invalidate on cancel" policy applied at the consumer rather than at cancellation time;
    /// see [`crate::registry::Registry::cancel`]).
    pub(crate) fn pop_blocking(&self, registry: &Registry) -> Event {
        loop {
            let mut queue = self.inner.lock().unwrap();
            while queue.is_empty() {
                queue = self.ready.wait(queue).unwrap();
            }
            let event = queue.pop_front().unwrap();
            drop(queue);

            if registry.is_live(event.watch.descriptor()) {
                return event;
            }
            trace!(
                "dropping stale event for cancelled watch {}",
                event.watch.descriptor()
            );
        }
    }
}

/// Runs [`crate::event_wait`] in a loop across a pool of worker threads, invoking each watch's
/// callback as events are dequeued.
///
/// Sized to the detected CPU count by default, matching the distilled spec's "N equals the CPU
/// count"; override with [`Dispatcher::with_workers`].
pub struct Dispatcher {
    workers: usize,
}

impl Dispatcher {
    /// A dispatcher sized to the number of available CPUs (falling back to 1 if detection
    /// fails).
    pub fn new() -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Dispatcher { workers }
    }

    /// A dispatcher with an explicit worker-pool size.
    pub fn with_workers(workers: usize) -> Self {
        Dispatcher {
            workers: workers.max(1),
        }
    }

    /// Spawn the worker pool and block the calling thread forever.
    ///
    /// Each worker repeatedly calls [`crate::event_wait`] and invokes the returned event's
    /// callback, if any. There is no ordering guarantee across workers: the public API does not
    /// promise FIFO-per-watch in dispatch mode.
    pub fn run(self) -> ! {
        let mut handles = Vec::with_capacity(self.workers.saturating_sub(1));
        for _ in 1..self.workers {
            handles.push(thread::spawn(dispatch_loop));
        }
        dispatch_loop();
        unreachable!("dispatch_loop never returns")
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new()
    }
}

fn dispatch_loop() -> ! {
    loop {
        let event = crate::event_wait();
        crate::dispatch_one(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::mask::Mask;
    use crate::registry::Registry;
    use crate::watch::{Watch, WatchKind};

    use super::{Event, EventQueue};

    fn fd_watch(descriptor: i32) -> Arc<Watch> {
        Arc::new(Watch::new(descriptor, WatchKind::Fd(descriptor), Mask::READ, None, None))
    }

    #[test]
    fn pop_blocking_returns_events_in_fifo_order() {
        let registry = Registry::new();
        let queue = EventQueue::new();

        let a = fd_watch(registry.allocate_descriptor());
        let b = fd_watch(registry.allocate_descriptor());
        registry.insert(a.clone());
        registry.insert(b.clone());

        queue.push(Event::new(a.clone(), Mask::READ));
        queue.push(Event::new(b.clone(), Mask::WRITE));

        assert_eq!(queue.pop_blocking(&registry).watch().descriptor(), a.descriptor());
        assert_eq!(queue.pop_blocking(&registry).watch().descriptor(), b.descriptor());
    }

    #[test]
    fn pop_blocking_drops_events_for_cancelled_watches() {
        let registry = Registry::new();
        let queue = EventQueue::new();

        let stale = fd_watch(registry.allocate_descriptor());
        let live = fd_watch(registry.allocate_descriptor());
        registry.insert(stale.clone());
        registry.insert(live.clone());

        queue.push(Event::new(stale.clone(), Mask::READ));
        registry.remove_with_children(stale.descriptor());
        queue.push(Event::new(live.clone(), Mask::READ));

        let event = queue.pop_blocking(&registry);
        assert_eq!(event.watch().descriptor(), live.descriptor());
    }

    #[test]
    fn with_name_is_only_set_when_given() {
        let watch = fd_watch(1024);
        let event = Event::new(watch, Mask::CREATE);
        assert_eq!(event.name(), None);

        let named = event.with_name("child.log");
        assert_eq!(named.name(), Some("child.log"));
    }
}
