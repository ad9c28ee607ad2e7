//! Wake primitives that let producers interrupt a waiting event loop.
//!
//! The task queue itself never notifies anybody. After pushing a task, a
//! producer raises the loop's [`Signal`]; the loop, blocked in
//! [`Signal::wait`], wakes up and drains the queue. Since a drain always
//! empties the queue, signals may coalesce: a loop that is notified ten times
//! while busy only needs to wake once.
use std::{
    io,
    sync::{
        atomic::{AtomicU8, Ordering::*},
        Mutex, PoisonError,
    },
    thread::{self, Thread},
    time::{Duration, Instant},
};

#[cfg(target_os = "linux")]
mod eventfd;
#[cfg(target_os = "linux")]
pub use self::eventfd::EventFd;

#[cfg(test)]
mod tests;

/// A wake primitive used by an event loop.
///
/// Implementations must be level-triggered or counting: a notification
/// raised while nobody is waiting must make the next [`wait`] return
/// immediately.
///
/// [`wait`]: Signal::wait
pub trait Signal: Send + Sync {
    /// Wake the loop, or make its next wait return immediately.
    ///
    /// This is called by producers, from any thread. It must not wait for
    /// the loop to make progress.
    fn notify(&self) -> io::Result<()>;

    /// Block until notified, or until `timeout` elapses.
    ///
    /// This is only ever called by the loop's own thread. Returns `true` if a
    /// notification was consumed, and `false` if the wait timed out. Any
    /// number of notifications raised since the last wait are consumed
    /// together.
    fn wait(&self, timeout: Option<Duration>) -> io::Result<bool>;
}

/// A [`Signal`] that parks the waiting thread.
///
/// Notifying a `ThreadSignal` that nobody is waiting on just sets a flag, so
/// it never makes a system call unless the loop is actually parked.
///
/// Waking a parked loop takes a lock on the waiting thread's handle, since
/// the loop may wait from a different thread each time. Only the one
/// notifier that observes the loop parked takes it, and the waiter only
/// holds it to record which thread it is, so the lock is never held across
/// a park.
#[derive(Debug, Default)]
pub struct ThreadSignal {
    state: AtomicU8,
    /// The thread that is (or last was) waiting.
    waiter: Mutex<Option<Thread>>,
}

const EMPTY: u8 = 0;
const NOTIFIED: u8 = 1;
const PARKED: u8 = 2;

// === impl ThreadSignal ===

impl ThreadSignal {
    /// Returns a new signal with no notification pending.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            waiter: Mutex::new(None),
        }
    }

    fn register_waiter(&self) {
        let mut waiter = self.waiter.lock().unwrap_or_else(PoisonError::into_inner);
        let current = thread::current();
        match *waiter {
            Some(ref thread) if thread.id() == current.id() => {}
            _ => *waiter = Some(current),
        }
    }

    fn unpark_waiter(&self) {
        let waiter = self.waiter.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ref thread) = *waiter {
            thread.unpark();
        }
    }

    /// Consume a notification, if one is pending.
    #[inline]
    fn take_notification(&self) -> bool {
        self.state
            .compare_exchange(NOTIFIED, EMPTY, Acquire, Relaxed)
            .is_ok()
    }
}

impl Signal for ThreadSignal {
    fn notify(&self) -> io::Result<()> {
        if self.state.swap(NOTIFIED, Release) == PARKED {
            self.unpark_waiter();
        }
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        if self.take_notification() {
            return Ok(true);
        }

        // The waiter must be registered before we advertise that we're
        // parked, or a notifier could see `PARKED` and find nobody to unpark.
        self.register_waiter();
        if self
            .state
            .compare_exchange(EMPTY, PARKED, Acquire, Acquire)
            .is_err()
        {
            // notified in the meantime.
            let took = self.take_notification();
            debug_assert!(took, "only the waiter may consume a notification");
            return Ok(true);
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    thread::park_timeout(deadline - now);
                }
                None => thread::park(),
            }

            if self.take_notification() {
                return Ok(true);
            }
            // spurious wakeup; park again.
        }

        // Timed out. Stop advertising that we're parked, unless a notifier
        // beat us to it.
        match self.state.compare_exchange(PARKED, EMPTY, Acquire, Acquire) {
            Ok(_) => Ok(false),
            Err(_) => Ok(self.take_notification()),
        }
    }
}
