//! Linux backend: `epoll` for `Fd` watches, `inotify` for `Vnode` watches.

mod epoll;
mod inotify;

use std::io;
use std::sync::Arc;

use crate::event::EventQueue;
use crate::registry::Registry;
use crate::watch::{Watch, WatchKind};

pub(crate) struct Backend {
    epoll: Arc<epoll::EpollBackend>,
    inotify: Arc<inotify::InotifyBackend>,
}

impl Backend {
    pub(crate) fn new(queue: Arc<EventQueue>, registry: Arc<Registry>) -> io::Result<Arc<Self>> {
        let epoll = Arc::new(epoll::EpollBackend::new()?);
        let inotify = Arc::new(inotify::InotifyBackend::new()?);

        epoll::spawn_loop(epoll.clone(), registry.clone(), queue.clone());
        inotify::spawn_loop(inotify.clone(), registry, queue);

        Ok(Arc::new(Backend { epoll, inotify }))
    }
}

impl super::Backend for Backend {
    fn install(&self, watch: Arc<Watch>) -> io::Result<()> {
        match watch.kind() {
            WatchKind::Fd(fd) => self.epoll.install(watch.descriptor(), *fd, watch.mask()),
            WatchKind::Vnode(path) => self.inotify.install(watch.descriptor(), path, watch.mask()),
            WatchKind::Timer(_) | WatchKind::Signal(_) => {
                unreachable!("timer and signal watches never reach a kernel-event backend")
            }
        }
    }

    fn remove(&self, watch: &Watch) -> io::Result<()> {
        match watch.kind() {
            WatchKind::Fd(_) => self.epoll.remove(watch.descriptor()),
            WatchKind::Vnode(_) => self.inotify.remove(watch.descriptor()),
            WatchKind::Timer(_) | WatchKind::Signal(_) => {
                unreachable!("timer and signal watches never reach a kernel-event backend")
            }
        }
    }
}
