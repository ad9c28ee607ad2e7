//! The bridge between producer threads and a single event-loop thread.
//!
//! An [`EventLoop`] owns the consumer side of a [`TaskQueue`] and a
//! [`Signal`]. Any number of [`Handle`]s, on any threads, push tasks onto the
//! queue and then raise the signal. The loop thread waits on the signal, and
//! whenever it wakes, *drains* the queue: it pops every task that is
//! currently available, in FIFO order, and runs it.
//!
//! Since each drain empties the queue, notifications raised while the loop
//! is busy may coalesce into a single wakeup without losing any tasks.
//!
//! # Examples
//!
//! ```
//! use hyphae::EventLoop;
//! use std::thread;
//!
//! let mut event_loop = EventLoop::new();
//! let handle = event_loop.handle();
//!
//! let producer = thread::spawn(move || {
//!     for i in 0..10 {
//!         handle.spawn(move || println!("task {i}")).unwrap();
//!     }
//!     handle.close();
//! });
//!
//! // runs tasks until the handle closes the loop.
//! event_loop.run().unwrap();
//! producer.join().unwrap();
//! ```
use crate::{
    error::{Error, PushError},
    signal::{Signal, ThreadSignal},
    task::{self, TaskRef},
    Task, TaskQueue,
};
use rhizome::mpsc_queue::OwnedConsumer;
use std::{
    cell::Cell,
    fmt,
    io,
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering::*},
        Arc,
    },
    thread,
    time::Duration,
};


/// Runs tasks pushed from any thread on a single thread.
///
/// See the [module-level documentation](self) for details.
///
/// An `EventLoop` may be moved to another thread, but it is not `Sync`:
/// only the thread that currently owns it can drain its queue.
pub struct EventLoop<S: Signal = ThreadSignal> {
    consumer: OwnedConsumer<Task>,
    shared: Arc<Shared<S>>,
    config: Config,
    /// Set if the last tick stopped before the queue was drained, so the
    /// next turn must not wait for a notification.
    has_remaining: bool,
    _not_sync: PhantomData<Cell<()>>,
}

/// A cloneable handle that pushes tasks onto an [`EventLoop`].
///
/// Handles are `Send` and `Sync`, and may outlive the loop itself; pushing
/// through a handle whose loop has been closed or dropped returns the task
/// in [`PushError::Closed`].
pub struct Handle<S: Signal = ThreadSignal> {
    queue: Arc<TaskQueue>,
    shared: Arc<Shared<S>>,
}

/// Configures an [`EventLoop`].
#[derive(Debug, Clone)]
pub struct Builder {
    config: Config,
}

/// Metrics recorded during one drain of an [`EventLoop`]'s queue.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct Tick {
    /// The number of tasks run on this tick.
    pub executed: usize,

    /// `true` if the tick stopped because it reached the drain budget, so
    /// more tasks may still be queued.
    ///
    /// A budget that exactly empties the queue also sets this, in which
    /// case the next tick runs nothing.
    pub has_remaining: bool,

    /// The number of tasks pushed since the last tick.
    pub pushed: usize,

    /// The number of times the loop's signal was raised since the last tick.
    ///
    /// This counts notifications, not wakeups: any number of them may have
    /// been coalesced into one wakeup.
    pub notified: usize,
}

struct Shared<S> {
    signal: S,
    closed: AtomicBool,
    pushed: AtomicUsize,
    notified: AtomicUsize,
}

#[derive(Copy, Clone, Debug)]
struct Config {
    name: &'static str,
    budget: usize,
    wait_timeout: Option<Duration>,
}

// === impl EventLoop ===

impl EventLoop {
    /// Returns a new event loop that parks its thread while waiting.
    #[must_use]
    pub fn new() -> Self {
        Builder::new().build()
    }

    /// Returns a [`Builder`] for configuring a new event loop.
    #[must_use]
    pub fn builder() -> Builder {
        Builder::new()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Signal> EventLoop<S> {
    /// Returns a new event loop that waits on `signal`.
    #[must_use]
    pub fn with_signal(signal: S) -> Self {
        Builder::new().build_with_signal(signal)
    }

    fn from_config(config: Config, signal: S) -> Self {
        let consumer = Arc::new(task::queue()).consume_owned();
        debug!(
            event_loop = config.name,
            budget = config.budget,
            wait_timeout = ?config.wait_timeout,
            "new event loop"
        );
        Self {
            consumer,
            shared: Arc::new(Shared {
                signal,
                closed: AtomicBool::new(false),
                pushed: AtomicUsize::new(0),
                notified: AtomicUsize::new(0),
            }),
            config,
            has_remaining: false,
            _not_sync: PhantomData,
        }
    }

    /// Returns a new [`Handle`] for pushing tasks onto this loop.
    #[must_use]
    pub fn handle(&self) -> Handle<S> {
        Handle {
            queue: self.consumer.queue().clone(),
            shared: self.shared.clone(),
        }
    }

    /// Returns this loop's wake signal.
    ///
    /// This is useful when the loop thread also waits on other event
    /// sources, such as registering an [`EventFd`](crate::EventFd) with an
    /// existing `poll` set.
    #[must_use]
    pub fn signal(&self) -> &S {
        &self.shared.signal
    }

    /// Drains the queue once, running up to the configured budget of tasks
    /// in FIFO order.
    ///
    /// This never blocks. If a producer is in the middle of pushing a task,
    /// the tick stops at that task rather than waiting for it: the producer
    /// notifies the loop once its push completes, so the task is run on a
    /// later tick.
    ///
    /// # Panics
    ///
    /// If a task panics, the panic propagates out of `tick` after that task
    /// has been removed from the queue and disposed of. The loop remains
    /// usable, and the next [`turn`](Self::turn) will not wait before
    /// draining whatever is left.
    pub fn tick(&mut self) -> Tick {
        in_debug_span!("tick", event_loop = self.config.name);

        // if a task panics, the queue may not have been drained.
        self.has_remaining = true;
        let drain = self.consumer.drain_n_with(self.config.budget, |task| {
            trace!(?task, "run");
            task.run();
        });
        self.has_remaining = drain.has_remaining;

        let tick = Tick {
            executed: drain.popped,
            has_remaining: drain.has_remaining,
            pushed: self.shared.pushed.swap(0, Relaxed),
            notified: self.shared.notified.swap(0, Relaxed),
        };
        debug!(
            tick.executed,
            tick.has_remaining,
            tick.pushed,
            tick.notified,
            linked_pending = drain.inconsistent
        );
        tick
    }

    /// Waits until the loop is notified, or `timeout` elapses, and then
    /// [ticks](Self::tick).
    ///
    /// If `timeout` is `None`, this waits indefinitely. The wait is skipped
    /// if the previous tick left tasks in the queue, or if the loop has been
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signal`] if waiting on the signal failed.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<Tick, Error> {
        if !self.has_remaining && !self.is_closed() {
            let _notified = self.shared.signal.wait(timeout)?;
            trace!(notified = _notified, "woke up");
        }
        Ok(self.tick())
    }

    /// Runs tasks until the loop is [closed](Handle::close).
    ///
    /// Once the loop is closed, every task that was pushed before it closed
    /// is run before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signal`] if waiting on the signal failed. Tasks
    /// still in the queue are not lost; they may be run by calling `run`,
    /// `turn` or `tick` again, or when the loop is dropped.
    pub fn run(&mut self) -> Result<(), Error> {
        in_debug_span!("run", event_loop = self.config.name);
        debug!("event loop running");

        while !self.is_closed() {
            self.turn(self.config.wait_timeout)?;
        }

        let _executed = self.drain_closed();
        debug!(executed = _executed, "event loop closed");
        Ok(())
    }

    /// Closes the loop. Returns `true` if this call closed it.
    ///
    /// See [`Handle::close`].
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    /// Returns `true` if the loop has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Acquire)
    }

    /// Runs everything left in the queue after the loop closed, waiting out
    /// any push that is still in progress.
    fn drain_closed(&mut self) -> usize {
        self.has_remaining = true;
        let mut executed = 0;
        while let Some(task) = self.consumer.pop() {
            trace!(?task, "run");
            executed += 1;
            task.run();
        }
        self.has_remaining = false;
        executed
    }
}

impl<S: Signal> Drop for EventLoop<S> {
    fn drop(&mut self) {
        self.shared.close();
        // don't run more user code if we're already unwinding; the tasks
        // are disposed of once the last handle drops the queue.
        if thread::panicking() {
            warn!(event_loop = self.config.name, "event loop dropped while panicking");
            return;
        }
        let _executed = self.drain_closed();
        trace!(event_loop = self.config.name, executed = _executed, "event loop dropped");
    }
}

impl<S: Signal + fmt::Debug> fmt::Debug for EventLoop<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.config.name)
            .field("budget", &self.config.budget)
            .field("wait_timeout", &self.config.wait_timeout)
            .field("has_remaining", &self.has_remaining)
            .field("shared", &self.shared)
            .finish()
    }
}

// === impl Handle ===

impl<S: Signal> Handle<S> {
    /// Pushes `task` onto the loop's queue, then notifies the loop.
    ///
    /// Tasks pushed through the same handle, or from the same thread, run in
    /// the order they were pushed.
    ///
    /// The push onto the queue is lock-free and never waits for the loop.
    /// Waking the loop depends on its [`Signal`]: an [`EventFd`](crate::EventFd)
    /// is one `write`, while a [`ThreadSignal`](crate::ThreadSignal) that
    /// finds the loop parked briefly locks the parked thread's handle to
    /// unpark it.
    ///
    /// # Errors
    ///
    /// - [`PushError::Closed`] with the rejected task if the loop has been
    ///   closed.
    /// - [`PushError::Signal`] if the task was queued but the loop's signal
    ///   failed.
    pub fn push(&self, task: TaskRef) -> Result<(), PushError> {
        if self.is_closed() {
            return Err(PushError::Closed(task));
        }

        self.queue.push(task);
        self.shared.pushed.fetch_add(1, Relaxed);
        // the loop may only be woken once the push has completed.
        self.shared.notify().map_err(PushError::Signal)
    }

    /// Allocates a task that runs `f`, and [pushes](Self::push) it.
    ///
    /// # Errors
    ///
    /// The same as [`Handle::push`]. If the loop is closed, the rejected
    /// task is returned unrun; dropping it drops `f`.
    pub fn spawn<F>(&self, f: F) -> Result<(), PushError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(TaskRef::from_fn(f))
    }

    /// Closes the loop, and wakes it if it is waiting.
    ///
    /// After the loop is closed, pushes fail with [`PushError::Closed`], and
    /// [`EventLoop::run`] returns once it has run every task pushed before
    /// the loop closed.
    ///
    /// Returns `true` if this call closed the loop, or `false` if it was
    /// already closed.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    /// Returns `true` if the loop has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Acquire)
    }
}

impl<S: Signal> Clone for Handle<S> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<S: Signal + fmt::Debug> fmt::Debug for Handle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("queue", &format_args!("{:p}", self.queue))
            .field("shared", &self.shared)
            .finish()
    }
}

// === impl Shared ===

impl<S: Signal> Shared<S> {
    fn notify(&self) -> io::Result<()> {
        self.notified.fetch_add(1, Relaxed);
        self.signal.notify()
    }

    fn close(&self) -> bool {
        if self.closed.swap(true, AcqRel) {
            return false;
        }
        debug!("closing event loop");
        if let Err(_error) = self.notify() {
            warn!(error = %_error, "failed to wake event loop while closing");
        }
        true
    }
}

impl<S: fmt::Debug> fmt::Debug for Shared<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("signal", &self.signal)
            .field("closed", &self.closed.load(Acquire))
            .field("pushed", &self.pushed.load(Relaxed))
            .field("notified", &self.notified.load(Relaxed))
            .finish()
    }
}

// === impl Builder ===

impl Builder {
    /// The default number of tasks run on each tick.
    pub const DEFAULT_DRAIN_BUDGET: usize = 256;

    /// Returns a builder with the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            config: Config {
                name: "event-loop",
                budget: Self::DEFAULT_DRAIN_BUDGET,
                wait_timeout: None,
            },
        }
    }

    /// Sets the name used for the loop in diagnostics.
    #[must_use]
    pub const fn name(self, name: &'static str) -> Self {
        Self {
            config: Config { name, ..self.config },
        }
    }

    /// Sets the maximum number of tasks run on each [tick].
    ///
    /// Bounding a tick keeps the loop responsive to its other event sources
    /// while producers push faster than tasks run. A budget of zero means
    /// the queue is always drained completely.
    ///
    /// [tick]: EventLoop::tick
    #[must_use]
    pub const fn drain_budget(self, budget: usize) -> Self {
        let budget = if budget == 0 { usize::MAX } else { budget };
        Self {
            config: Config { budget, ..self.config },
        }
    }

    /// Sets how long [`EventLoop::run`] waits for a notification before
    /// ticking anyway. By default, it waits indefinitely.
    #[must_use]
    pub const fn wait_timeout(self, timeout: Duration) -> Self {
        Self {
            config: Config {
                wait_timeout: Some(timeout),
                ..self.config
            },
        }
    }

    /// Builds an event loop that parks its thread while waiting.
    #[must_use]
    pub fn build(self) -> EventLoop {
        self.build_with_signal(ThreadSignal::new())
    }

    /// Builds an event loop that waits on `signal`.
    #[must_use]
    pub fn build_with_signal<S: Signal>(self, signal: S) -> EventLoop<S> {
        EventLoop::from_config(self.config, signal)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
