//! Platform-specific kernel-event backends.
//!
//! Each target OS gets its own module implementing the same small [`Backend`] surface; the
//! [`imp`] alias (set by `cfg`) picks the right one for the build target, mirroring the rest of
//! the crate's platform-conditional modules.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod bsd;

#[cfg(target_os = "linux")]
use self::linux as imp;

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
use self::bsd as imp;

use std::io;
use std::sync::Arc;

use crate::event::EventQueue;
use crate::registry::Registry;
use crate::watch::Watch;

/// The operations the platform-independent core needs from a kernel-event backend.
///
/// A `Backend` owns whatever kernel objects (epoll/inotify fds, a kqueue fd, ...) it needs and
/// runs its own dedicated thread(s) pushing translated [`crate::Event`]s onto the shared queue;
/// `install`/`remove` only do the synchronous bookkeeping of registering or unregistering a
/// single watch.
pub(crate) trait Backend: Send + Sync {
    /// Register `watch` (an `Fd` or `Vnode` watch; `Timer` and `Signal` never reach a backend)
    /// with the kernel and start delivering matching events to `queue`.
    fn install(&self, watch: Arc<Watch>) -> io::Result<()>;

    /// Unregister a previously-installed watch. A no-op, not an error, if the watch's kernel
    /// state is already gone (e.g. the underlying fd was closed out from under us).
    fn remove(&self, watch: &Watch) -> io::Result<()>;
}

pub(crate) fn new(queue: Arc<EventQueue>, registry: Arc<Registry>) -> io::Result<Arc<dyn Backend>> {
    Ok(imp::Backend::new(queue, registry)?)
}
