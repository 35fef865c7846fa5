//! The signal translator: turns selected POSIX signal deliveries into `Signal` events instead
//! of letting them run their default disposition.
//!
//! On process start every thread has every signal blocked (see [`mask_all_signals`]), so no
//! signal is ever delivered asynchronously; instead a single dedicated thread calls `sigwait(2)`
//! in a loop and translates whatever it receives, either into an event for a registered watch or
//! into the library's default policy for signals nobody asked to watch.

use std::collections::HashMap;
use std::os::raw::c_int;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{error, trace, warn};

use crate::event::{Event, EventQueue};
use crate::mask::Mask;
use crate::watch::Watch;

/// The signal-number to watch map, guarded by its own lock.
///
/// Per the lock-ordering discipline, this lock is never held at the same time as the registry
/// or timer lock.
pub(crate) struct SignalMap {
    watches: Mutex<HashMap<c_int, Arc<Watch>>>,
}

impl SignalMap {
    pub(crate) fn new() -> Self {
        SignalMap {
            watches: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, signum: c_int, watch: Arc<Watch>) {
        self.watches.lock().unwrap().insert(signum, watch);
    }

    pub(crate) fn remove(&self, signum: c_int) {
        self.watches.lock().unwrap().remove(&signum);
    }

    fn get(&self, signum: c_int) -> Option<Arc<Watch>> {
        self.watches.lock().unwrap().get(&signum).cloned()
    }
}

/// Block every signal in the calling thread.
///
/// Every thread the library spawns afterwards inherits this mask, so `SIGALRM` and every
/// watched signal only ever arrive synchronously, via the relevant `sigwait` loop. Must be
/// called once, before any other thread is spawned.
pub(crate) fn mask_all_signals() {
    // SAFETY: `set` is fully initialized by `sigfillset` before use, and the old-mask pointer
    // is null, which `pthread_sigmask` explicitly allows.
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigfillset(&mut set);
        let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
        if rc != 0 {
            panic!(
                "pthread_sigmask(SIG_BLOCK) failed: {}",
                std::io::Error::from_raw_os_error(rc)
            );
        }
    }
}

pub(crate) fn spawn_loop(queue: Arc<EventQueue>, signal_map: Arc<SignalMap>) {
    thread::Builder::new()
        .name("pnotify-signal".into())
        .spawn(move || signal_loop(&queue, &signal_map))
        .expect("failed to spawn signal thread");
}

fn signal_loop(queue: &EventQueue, signal_map: &SignalMap) -> ! {
    loop {
        let signum = wait_for_any_signal_except_alarm();
        trace!("caught signal {}", signum);

        match signal_map.get(signum) {
            Some(watch) => queue.push(Event::new(watch, Mask::SIGNAL)),
            None => default_signal_handler(signum),
        }
    }
}

fn wait_for_any_signal_except_alarm() -> c_int {
    // SAFETY: `set` is fully initialized before use and `signum` is a valid out-parameter.
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigfillset(&mut set);
        libc::sigdelset(&mut set, libc::SIGALRM);

        let mut signum: c_int = 0;
        let rc = libc::sigwait(&set, &mut signum);
        if rc != 0 {
            warn!(
                "sigwait failed: {}",
                std::io::Error::from_raw_os_error(rc)
            );
            return 0;
        }
        signum
    }
}

/// The disposition applied to a signal with no registered watch.
///
/// `SIGCHLD` is ignored (reaping is the caller's concern), `SIGINT`/`SIGTERM` terminate the
/// process cleanly, and everything else is treated as fatal, matching the C library's
/// `default_signal_handler`.
fn default_signal_handler(signum: c_int) {
    match signum {
        libc::SIGCHLD => trace!("ignoring unwatched SIGCHLD"),
        libc::SIGINT | libc::SIGTERM => {
            error!("caught signal {} with no watch, exiting", signum);
            std::process::exit(1);
        }
        _ => {
            error!(
                "caught signal {} with no watch and no default handler, aborting",
                signum
            );
            std::process::exit(254);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::mask::Mask;
    use crate::watch::{Watch, WatchKind};

    use super::SignalMap;

    #[test]
    fn insert_get_remove_round_trip() {
        let map = SignalMap::new();
        let watch = Arc::new(Watch::new(
            libc::SIGUSR1,
            WatchKind::Signal(libc::SIGUSR1),
            Mask::SIGNAL,
            None,
            None,
        ));

        assert!(map.get(libc::SIGUSR1).is_none());

        map.insert(libc::SIGUSR1, watch.clone());
        assert_eq!(map.get(libc::SIGUSR1).unwrap().descriptor(), libc::SIGUSR1);

        map.remove(libc::SIGUSR1);
        assert!(map.get(libc::SIGUSR1).is_none());
    }
}
