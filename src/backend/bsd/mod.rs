//! BSD backend: a single `kqueue` services both `Fd` and `Vnode` watches, with directory
//! watches additionally routed through the [`directory`] diff engine.

mod directory;

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use kqueue::{EventData, EventFilter, FilterFlag, Ident, Vnode};
use log::{trace, warn};

use crate::event::{Event, EventQueue};
use crate::mask::Mask;
use crate::registry::Registry;
use crate::watch::{Descriptor, Watch, WatchKind};

use self::directory::DirectoryDiffer;
use super::Backend as BackendTrait;

pub(crate) struct Backend {
    inner: Mutex<kqueue::Watcher>,
    by_fd: Mutex<HashMap<RawFd, Descriptor>>,
    by_path: Mutex<HashMap<PathBuf, Descriptor>>,
    directories: DirectoryDiffer,
    queue: Arc<EventQueue>,
    registry: Arc<Registry>,
}

impl Backend {
    pub(crate) fn new(queue: Arc<EventQueue>, registry: Arc<Registry>) -> io::Result<Arc<Self>> {
        let inner = kqueue::Watcher::new().map_err(io::Error::from)?;
        let backend = Arc::new(Backend {
            inner: Mutex::new(inner),
            by_fd: Mutex::new(HashMap::new()),
            by_path: Mutex::new(HashMap::new()),
            directories: DirectoryDiffer::new(),
            queue,
            registry,
        });
        spawn_loop(backend.clone());
        Ok(backend)
    }

    fn vnode_flags(mask: Mask, is_directory: bool) -> FilterFlag {
        let mut flags = FilterFlag::empty();
        if mask.contains(Mask::ATTRIB) {
            flags |= FilterFlag::NOTE_ATTRIB;
        }
        if mask.contains(Mask::DELETE) {
            flags |= FilterFlag::NOTE_DELETE;
        }
        // A directory's own `Modify` is never delivered to the caller; `NOTE_WRITE` on a
        // directory fd is instead the trigger for a diff pass that synthesises `Create`/`Delete`
        // events for its children (see `directory.rs`). Regular files still report it directly.
        if is_directory {
            flags |= FilterFlag::NOTE_WRITE;
        } else if mask.contains(Mask::MODIFY) {
            flags |= FilterFlag::NOTE_WRITE | FilterFlag::NOTE_EXTEND | FilterFlag::NOTE_TRUNCATE;
        }
        flags
    }

    /// Register a single vnode with the kernel and, if it is a directory, take the initial
    /// listing snapshot. `has_parent` is `true` for a watch auto-created by a directory's diff
    /// pass; per the de-duplication rule such a watch never asks for `NOTE_DELETE` itself, since
    /// the parent directory's next diff pass will report the entry's disappearance by name.
    fn install_vnode(
        &self,
        descriptor: Descriptor,
        path: &Path,
        mask: Mask,
        has_parent: bool,
    ) -> io::Result<()> {
        let is_directory = path.is_dir();
        let mut flags = Self::vnode_flags(mask, is_directory);
        if has_parent {
            flags = flags & !FilterFlag::NOTE_DELETE;
        }

        {
            let mut inner = self.inner.lock().unwrap();
            inner
                .add_filename(path, EventFilter::EVFILT_VNODE, flags)
                .map_err(io::Error::from)?;
            inner.watch().map_err(io::Error::from)?;
        }

        self.by_path
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), descriptor);
        if is_directory {
            self.directories.snapshot(descriptor, path)?;
        }
        Ok(())
    }

    /// Auto-add a child watch for a regular file that just appeared in a watched directory,
    /// when the directory watch's own mask requests file-level conditions (`Attrib`/`Modify`).
    /// Mirrors `original_source`'s recursive `pn_add_watch` call from the directory diff path.
    fn add_child_watch(&self, parent: Descriptor, path: &Path, parent_mask: Mask) {
        let mask = parent_mask & (Mask::ATTRIB | Mask::MODIFY);
        if mask.is_empty() {
            return;
        }

        let descriptor = self.registry.allocate_descriptor();
        match self.install_vnode(descriptor, path, mask, true) {
            Ok(()) => {
                let watch = Arc::new(Watch::new(
                    descriptor,
                    WatchKind::Vnode(path.to_path_buf()),
                    mask,
                    None,
                    Some(parent),
                ));
                self.registry.insert(watch);
            }
            Err(error) => warn!(
                "failed to auto-watch directory entry {}: {}",
                path.display(),
                error
            ),
        }
    }

    /// Tear down a child watch auto-created for a directory entry that just disappeared, if one
    /// exists. A no-op if the entry was never individually watched (no file-level conditions
    /// were requested).
    fn remove_child_watch(&self, parent: Descriptor, path: &Path) {
        let Some(descriptor) = self.by_path.lock().unwrap().get(path).copied() else {
            return;
        };
        let Some(watch) = self.registry.lookup(descriptor) else {
            return;
        };
        if watch.parent() != Some(parent) {
            return;
        }
        if let Err(error) = self.remove(&watch) {
            warn!("failed to remove child watch for {}: {}", path.display(), error);
        }
        self.registry.remove_with_children(descriptor);
    }
}

impl super::Backend for Backend {
    fn install(&self, watch: Arc<Watch>) -> io::Result<()> {
        match watch.kind() {
            WatchKind::Fd(fd) => {
                let mut inner = self.inner.lock().unwrap();
                if watch.mask().contains(Mask::READ) {
                    inner
                        .add_fd(*fd, EventFilter::EVFILT_READ, FilterFlag::empty())
                        .map_err(io::Error::from)?;
                }
                if watch.mask().contains(Mask::WRITE) {
                    inner
                        .add_fd(*fd, EventFilter::EVFILT_WRITE, FilterFlag::empty())
                        .map_err(io::Error::from)?;
                }
                inner.watch().map_err(io::Error::from)?;
                drop(inner);
                self.by_fd.lock().unwrap().insert(*fd, watch.descriptor());
            }
            WatchKind::Vnode(path) => {
                self.install_vnode(
                    watch.descriptor(),
                    path,
                    watch.mask(),
                    watch.parent().is_some(),
                )?;
            }
            WatchKind::Timer(_) | WatchKind::Signal(_) => {
                unreachable!("timer and signal watches never reach a kernel-event backend")
            }
        }
        Ok(())
    }

    fn remove(&self, watch: &Watch) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match watch.kind() {
            WatchKind::Fd(fd) => {
                self.by_fd.lock().unwrap().remove(fd);
                let _ = inner.remove_fd(*fd, EventFilter::EVFILT_READ);
                let _ = inner.remove_fd(*fd, EventFilter::EVFILT_WRITE);
            }
            WatchKind::Vnode(path) => {
                self.by_path.lock().unwrap().remove(path);
                self.directories.forget(watch.descriptor());
                let _ = inner.remove_filename(path, EventFilter::EVFILT_VNODE);
            }
            WatchKind::Timer(_) | WatchKind::Signal(_) => {
                unreachable!("timer and signal watches never reach a kernel-event backend")
            }
        }
        Ok(())
    }
}

fn spawn_loop(backend: Arc<Backend>) {
    thread::Builder::new()
        .name("pnotify-kqueue".into())
        .spawn(move || kqueue_loop(&backend))
        .expect("failed to spawn kqueue thread");
}

fn kqueue_loop(backend: &Backend) -> ! {
    loop {
        let event = {
            let mut inner = backend.inner.lock().unwrap();
            inner.poll(None)
        };
        let Some(event) = event else { continue };
        handle(backend, event);
    }
}

fn handle(backend: &Backend, event: kqueue::Event) {
    let descriptor = match &event.ident {
        Ident::Fd(fd) => backend.by_fd.lock().unwrap().get(fd).copied(),
        Ident::Filename(_, path) => backend
            .by_path
            .lock()
            .unwrap()
            .get(Path::new(path))
            .copied(),
        _ => None,
    };
    let Some(descriptor) = descriptor else {
        trace!("kqueue event for unknown identity {:?}", event.ident);
        return;
    };
    let Some(watch) = backend.registry.lookup(descriptor) else {
        return;
    };

    match event.filter {
        EventFilter::EVFILT_READ => backend.queue.push(Event::new(watch.clone(), Mask::READ)),
        EventFilter::EVFILT_WRITE => backend.queue.push(Event::new(watch.clone(), Mask::WRITE)),
        EventFilter::EVFILT_VNODE => handle_vnode(backend, descriptor, &watch, &event.data),
        _ => {}
    }

    if watch.mask().contains(Mask::ONESHOT) {
        if let Err(error) = backend.remove(&watch) {
            warn!("failed to remove oneshot watch {}: {}", watch, error);
        }
        backend.registry.remove_with_children(descriptor);
    }
}

fn handle_vnode(
    backend: &Backend,
    descriptor: Descriptor,
    watch: &Arc<Watch>,
    data: &EventData,
) {
    let EventData::Vnode(note) = data else { return };

    let path = match watch.kind() {
        WatchKind::Vnode(path) => path.clone(),
        _ => return,
    };

    match note {
        Vnode::Write if path.is_dir() => match backend.directories.diff(descriptor, &path) {
            Ok((created, deleted)) => {
                for (name, is_file) in created {
                    backend
                        .queue
                        .push(Event::new(watch.clone(), Mask::CREATE).with_name(name.clone()));
                    if is_file {
                        backend.add_child_watch(descriptor, &path.join(&name), watch.mask());
                    }
                }
                for name in deleted {
                    backend
                        .queue
                        .push(Event::new(watch.clone(), Mask::DELETE).with_name(name.clone()));
                    backend.remove_child_watch(descriptor, &path.join(&name));
                }
            }
            Err(error) => warn!("failed to diff directory {}: {}", path.display(), error),
        },
        Vnode::Write | Vnode::Extend | Vnode::Truncate => {
            backend.queue.push(Event::new(watch.clone(), Mask::MODIFY))
        }
        Vnode::Attrib => backend.queue.push(Event::new(watch.clone(), Mask::ATTRIB)),
        // `NOTE_DELETE` on the directory's own vnode (as opposed to one of its children,
        // reported through the diff pass above) is fatal for this watch: there is no more
        // directory to diff against.
        Vnode::Delete if backend.directories.is_directory(descriptor) => {
            backend.queue.push(Event::new(watch.clone(), Mask::ERROR))
        }
        Vnode::Delete => backend.queue.push(Event::new(watch.clone(), Mask::DELETE)),
        _ => {}
    }
}
