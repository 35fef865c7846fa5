//! The timer wheel: interval timers driven by a 1-second periodic alarm.
//!
//! A timer watch's descriptor lives in the main [`crate::registry::Registry`] like any other
//! watch; this module only tracks *when* each one next expires. The alarm
//! (`setitimer(2)`/`SIGALRM`) is armed when the timer set transitions from empty to non-empty
//! and disarmed when it empties, so that a process with no timers never receives a spurious
//! `SIGALRM`.

use std::collections::HashMap;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{trace, warn};

use crate::event::{Event, EventQueue};
use crate::mask::Mask;
use crate::registry::Registry;
use crate::watch::{Descriptor, Watch};

struct TimerEntry {
    watch: Arc<Watch>,
    interval: u64,
    expires_at: u64,
}

pub(crate) struct TimerWheel {
    entries: Mutex<HashMap<Descriptor, TimerEntry>>,
    armed: AtomicBool,
}

impl TimerWheel {
    pub(crate) fn new() -> Self {
        TimerWheel {
            entries: Mutex::new(HashMap::new()),
            armed: AtomicBool::new(false),
        }
    }

    /// Arm the timer, resetting its expiry to `interval` seconds from now.
    pub(crate) fn add(&self, watch: Arc<Watch>, interval: u64) {
        let interval = interval.max(1);
        let descriptor = watch.descriptor();
        let expires_at = now() + interval;

        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            descriptor,
            TimerEntry {
                watch,
                interval,
                expires_at,
            },
        );
        if entries.len() == 1 {
            arm_alarm();
            self.armed.store(true, Ordering::SeqCst);
        }
    }

    /// Remove a timer watch, disarming the alarm if none remain.
    pub(crate) fn remove(&self, descriptor: Descriptor) {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(&descriptor);
        if entries.is_empty() && self.armed.swap(false, Ordering::SeqCst) {
            disarm_alarm();
        }
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_secs()
}

fn arm_alarm() {
    trace!("arming 1-second SIGALRM interval");
    set_itimer(1, 1);
}

fn disarm_alarm() {
    trace!("disarming SIGALRM interval, timer set is empty");
    set_itimer(0, 0);
}

fn set_itimer(interval_secs: i64, value_secs: i64) {
    let itimer = libc::itimerval {
        it_interval: libc::timeval {
            tv_sec: interval_secs,
            tv_usec: 0,
        },
        it_value: libc::timeval {
            tv_sec: value_secs,
            tv_usec: 0,
        },
    };
    // SAFETY: `itimer` is a valid, fully-initialized `itimerval` and the old-value pointer is
    // null, which `setitimer(2)` explicitly allows.
    let rc = unsafe { libc::setitimer(libc::ITIMER_REAL, &itimer, std::ptr::null_mut()) };
    if rc != 0 {
        warn!(
            "setitimer(2) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

pub(crate) fn spawn_loop(queue: Arc<EventQueue>, wheel: Arc<TimerWheel>, registry: Arc<Registry>) {
    thread::Builder::new()
        .name("pnotify-timer".into())
        .spawn(move || timer_loop(&queue, &wheel, &registry))
        .expect("failed to spawn timer thread");
}

fn timer_loop(queue: &EventQueue, wheel: &TimerWheel, registry: &Registry) -> ! {
    loop {
        wait_for_alarm();
        trace!("checking timer wheel");

        let now = now();
        let mut to_cancel = Vec::new();

        {
            let mut entries = wheel.entries.lock().unwrap();
            let expired: Vec<Descriptor> = entries
                .iter()
                .filter(|(_, entry)| now >= entry.expires_at)
                .map(|(descriptor, _)| *descriptor)
                .collect();

            for descriptor in expired {
                let oneshot = {
                    let entry = entries.get(&descriptor).unwrap();
                    queue.push(Event::new(entry.watch.clone(), Mask::TIMEOUT));
                    entry.watch.mask().contains(Mask::ONESHOT)
                };

                if oneshot {
                    entries.remove(&descriptor);
                    to_cancel.push(descriptor);
                } else if let Some(entry) = entries.get_mut(&descriptor) {
                    entry.expires_at = now + entry.interval;
                }
            }

            if entries.is_empty() && wheel.armed.swap(false, Ordering::SeqCst) {
                disarm_alarm();
            }
        }

        // Finish tearing down oneshot timers' registry entries. This must happen with the
        // timer lock released, since a thread may hold at most one of the registry, signal-map
        // and timer locks at a time.
        for descriptor in to_cancel {
            registry.remove_with_children(descriptor);
        }
    }
}

fn wait_for_alarm() {
    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGALRM);
    }
    let mut signum: c_int = 0;
    // SAFETY: `set` and `signum` are both valid, correctly-sized out-parameters.
    let rc = unsafe { libc::sigwait(&set, &mut signum) };
    if rc != 0 {
        warn!(
            "sigwait(SIGALRM) failed: {}",
            std::io::Error::from_raw_os_error(rc)
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::TimerWheel;

    // Deliberately does not exercise `add`: it arms a real `setitimer(2)` alarm, which is only
    // safe once `crate::signal::mask_all_signals` has run on every thread in the process (see
    // `crate::init`). A plain unit test can't guarantee that for the whole test binary.
    #[test]
    fn new_wheel_starts_empty_and_disarmed() {
        let wheel = TimerWheel::new();
        assert!(wheel.entries.lock().unwrap().is_empty());
        assert!(!wheel.armed.load(Ordering::SeqCst));
    }

    #[test]
    fn remove_of_unknown_descriptor_is_a_no_op() {
        let wheel = TimerWheel::new();
        wheel.remove(1024);
        assert!(wheel.entries.lock().unwrap().is_empty());
        assert!(!wheel.armed.load(Ordering::SeqCst));
    }
}
