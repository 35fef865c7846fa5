//! `inotify`-backed notification for `Vnode` watches.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use log::{trace, warn};

use crate::event::{Event, EventQueue};
use crate::mask::Mask;
use crate::registry::Registry;
use crate::watch::Descriptor;

/// `inotify_event` plus its variable-length name can be up to this many bytes; matches the
/// buffer size used by the original C library.
const INOTIFY_BUFFER_SIZE: usize = 4096;

pub(crate) struct InotifyBackend {
    inner: Mutex<Inotify>,
    by_descriptor: Mutex<HashMap<Descriptor, WatchDescriptor>>,
    by_wd: Mutex<HashMap<WatchDescriptor, Descriptor>>,
}

impl InotifyBackend {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(InotifyBackend {
            inner: Mutex::new(Inotify::init()?),
            by_descriptor: Mutex::new(HashMap::new()),
            by_wd: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn install(&self, descriptor: Descriptor, path: &Path, mask: Mask) -> io::Result<()> {
        let mut watch_mask = WatchMask::DONT_FOLLOW;
        if mask.contains(Mask::ATTRIB) {
            watch_mask |= WatchMask::ATTRIB;
        }
        if mask.contains(Mask::MODIFY) {
            watch_mask |= WatchMask::MODIFY;
        }
        if mask.contains(Mask::CREATE) {
            watch_mask |= WatchMask::CREATE;
        }
        if mask.contains(Mask::DELETE) {
            watch_mask |= WatchMask::DELETE | WatchMask::DELETE_SELF;
        }
        if mask.contains(Mask::ONESHOT) {
            watch_mask |= WatchMask::ONESHOT;
        }

        let wd = self.inner.lock().unwrap().add_watch(path, watch_mask)?;
        self.by_descriptor
            .lock()
            .unwrap()
            .insert(descriptor, wd.clone());
        self.by_wd.lock().unwrap().insert(wd, descriptor);
        Ok(())
    }

    pub(crate) fn remove(&self, descriptor: Descriptor) -> io::Result<()> {
        let wd = self.by_descriptor.lock().unwrap().remove(&descriptor);
        if let Some(wd) = wd {
            self.by_wd.lock().unwrap().remove(&wd);
            self.inner.lock().unwrap().rm_watch(wd)?;
        }
        Ok(())
    }

    fn resolve(&self, wd: &WatchDescriptor) -> Option<Descriptor> {
        self.by_wd.lock().unwrap().get(wd).copied()
    }
}

pub(crate) fn spawn_loop(
    backend: Arc<InotifyBackend>,
    registry: Arc<Registry>,
    queue: Arc<EventQueue>,
) {
    thread::Builder::new()
        .name("pnotify-inotify".into())
        .spawn(move || inotify_loop(&backend, &registry, &queue))
        .expect("failed to spawn inotify thread");
}

fn inotify_loop(backend: &InotifyBackend, registry: &Registry, queue: &EventQueue) -> ! {
    let mut buffer = [0u8; INOTIFY_BUFFER_SIZE];
    loop {
        let events = {
            let mut inner = backend.inner.lock().unwrap();
            match inner.read_events_blocking(&mut buffer) {
                Ok(events) => events.collect::<Vec<_>>(),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => panic!("inotify read_events_blocking failed: {}", error),
            }
        };

        for raw in events {
            if raw.mask.contains(EventMask::IGNORED) {
                continue;
            }

            let Some(descriptor) = backend.resolve(&raw.wd) else {
                trace!("inotify event for unknown watch descriptor");
                continue;
            };
            let Some(watch) = registry.lookup(descriptor) else {
                continue;
            };

            let mut mask = Mask::empty();
            if raw.mask.contains(EventMask::ATTRIB) {
                mask |= Mask::ATTRIB;
            }
            if raw.mask.contains(EventMask::MODIFY) {
                mask |= Mask::MODIFY;
            }
            if raw.mask.contains(EventMask::CREATE) {
                mask |= Mask::CREATE;
            }
            if raw.mask.contains(EventMask::DELETE) || raw.mask.contains(EventMask::DELETE_SELF) {
                mask |= Mask::DELETE;
            }

            if mask.is_empty() {
                continue;
            }

            let oneshot = watch.mask().contains(Mask::ONESHOT);
            let mut event = Event::new(watch, mask);
            if !raw.mask.contains(EventMask::DELETE_SELF) {
                if let Some(name) = raw.name {
                    event = event.with_name(name.to_string_lossy());
                }
            }
            queue.push(event);

            if oneshot {
                if let Err(error) = backend.remove(descriptor) {
                    warn!("failed to remove oneshot watch {}: {}", descriptor, error);
                }
                registry.remove_with_children(descriptor);
            }
        }
    }
}
