//! `epoll`-backed readiness notification for `Fd` watches.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::{BorrowedFd, RawFd};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{trace, warn};
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::event::{Event, EventQueue};
use crate::mask::Mask;
use crate::registry::Registry;
use crate::watch::Descriptor;

/// Events dequeued per `epoll_wait(2)` call, matching the original library's batch size.
const MAX_BATCH: usize = 100;

pub(crate) struct EpollBackend {
    epoll: Epoll,
    fds: Mutex<HashMap<Descriptor, RawFd>>,
}

impl EpollBackend {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(io::Error::from)?;
        Ok(EpollBackend {
            epoll,
            fds: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn install(&self, descriptor: Descriptor, fd: RawFd, mask: Mask) -> io::Result<()> {
        let mut flags = EpollFlags::EPOLLET;
        if mask.contains(Mask::READ) {
            flags |= EpollFlags::EPOLLIN;
        }
        if mask.contains(Mask::WRITE) {
            flags |= EpollFlags::EPOLLOUT;
        }

        let event = EpollEvent::new(flags, descriptor as u64);
        // SAFETY: `fd` is owned by the caller's `Watch` for at least as long as the watch is
        // registered, which outlives this call; epoll only borrows it for the `add`.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.epoll.add(borrowed, event).map_err(io::Error::from)?;

        self.fds.lock().unwrap().insert(descriptor, fd);
        Ok(())
    }

    pub(crate) fn remove(&self, descriptor: Descriptor) -> io::Result<()> {
        let fd = self.fds.lock().unwrap().remove(&descriptor);
        if let Some(fd) = fd {
            // SAFETY: see `install`; the fd is still open until the caller closes it.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            self.epoll.delete(borrowed).map_err(io::Error::from)?;
        }
        Ok(())
    }
}

pub(crate) fn spawn_loop(backend: Arc<EpollBackend>, registry: Arc<Registry>, queue: Arc<EventQueue>) {
    thread::Builder::new()
        .name("pnotify-epoll".into())
        .spawn(move || epoll_loop(&backend, &registry, &queue))
        .expect("failed to spawn epoll thread");
}

fn epoll_loop(backend: &EpollBackend, registry: &Registry, queue: &EventQueue) -> ! {
    let mut events = [EpollEvent::new(EpollFlags::empty(), 0); MAX_BATCH];
    loop {
        let n = match backend.epoll.wait(&mut events, EpollTimeout::NONE) {
            Ok(n) => n,
            Err(nix::Error::EINTR) => continue,
            Err(error) => panic!("epoll_wait failed: {}", error),
        };

        for raw in &events[..n] {
            let descriptor = raw.data() as Descriptor;
            let Some(watch) = registry.lookup(descriptor) else {
                trace!("epoll event for unknown descriptor {}", descriptor);
                continue;
            };

            let flags = raw.events();
            let mut mask = Mask::empty();
            if flags.contains(EpollFlags::EPOLLIN) {
                mask |= Mask::READ;
            }
            if flags.contains(EpollFlags::EPOLLOUT) {
                mask |= Mask::WRITE;
            }
            if flags.contains(EpollFlags::EPOLLHUP) || flags.contains(EpollFlags::EPOLLRDHUP) {
                mask |= Mask::CLOSE;
            }
            if flags.contains(EpollFlags::EPOLLERR) {
                mask |= Mask::ERROR;
            }

            if mask.is_empty() {
                continue;
            }

            let oneshot = watch.mask().contains(Mask::ONESHOT);
            queue.push(Event::new(watch, mask));

            if oneshot {
                if let Err(error) = backend.remove(descriptor) {
                    warn!("failed to remove oneshot watch {}: {}", descriptor, error);
                }
                registry.remove_with_children(descriptor);
            }
        }
    }
}
