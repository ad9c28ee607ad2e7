//! An intrusive, lock-free, multi-producer single-consumer queue.
//!
//! Based on [Dmitry Vyukov's intrusive MPSC queue][vyukov].
//!
//! # The linked-pending window
//!
//! A push is two steps: the producer atomically swaps itself in as the new
//! `head`, and then writes a pointer to itself into the previous head's
//! `next` link. Between those two steps the new node is *linked-pending*:
//! it is reachable from `head`, but not yet from `tail`. A consumer that
//! walks into that gap cannot tell how long it will last (usually a few
//! instructions, unless the producer is preempted), so the non-blocking
//! [`try_pop`] reports [`TryPopError::Inconsistent`] rather than pretending
//! the queue is empty. [`pop`] spins through the gap with an exponential
//! backoff. Consumers that are woken by the producer after its push
//! completes (such as an event loop) can simply stop, and pick the node up
//! on their next wakeup.
//!
//! [vyukov]: http://www.1024cores.net/home/lock-free-algorithms/queues/intrusive-mpsc-node-based-queue
//! [`try_pop`]: MpscQueue::try_pop
//! [`pop`]: MpscQueue::pop

use crate::{
    loom::{
        cell::UnsafeCell,
        sync::atomic::{AtomicBool, AtomicPtr, Ordering::*},
    },
    util::{non_null, Backoff, CachePadded},
    Linked,
};
#[cfg(debug_assertions)]
use crate::loom::sync::atomic::AtomicU8;
use core::{
    cell::Cell,
    fmt,
    marker::{PhantomData, PhantomPinned},
    ptr::{self, NonNull},
};

#[cfg(all(test, not(loom)))]
mod tests;

#[cfg(all(test, loom))]
mod loom;

/// An intrusive, lock-free, multi-producer single-consumer queue.
///
/// Any number of threads may [`push`] nodes concurrently. Nodes are popped
/// by a single consumer, oldest first. Nodes pushed by the same thread are
/// popped in the order they were pushed; nodes pushed by different threads
/// are popped in the order their pushes published them.
///
/// The consumer role is exclusive. It is either taken for the duration of a
/// single [`try_pop`] or [`pop`] call, or reserved for longer by a
/// [`Consumer`] (or, with the `alloc` feature, an [`OwnedConsumer`]) handle.
///
/// The queue does not allocate. Every node embeds its own [`Links`], and the
/// queue owns one extra *stub* node, which it keeps linked whenever it needs
/// a placeholder so that no pointer reachable from `head` is ever null.
///
/// [`push`]: Self::push
/// [`try_pop`]: Self::try_pop
/// [`pop`]: Self::pop
pub struct MpscQueue<T: Linked<Links<T>>> {
    /// The most recently pushed node, or the stub. Swapped by every push.
    head: CachePadded<AtomicPtr<T>>,

    /// The oldest node that has not been popped yet. Consumer only.
    tail: CachePadded<UnsafeCell<*mut T>>,

    /// Set while some thread holds the consumer role.
    has_consumer: CachePadded<AtomicBool>,

    stub: NonNull<T>,

    /// `true` if the stub was borrowed from a `static` and must not be
    /// converted back into a `T::Handle` on drop.
    stub_is_static: bool,
}

/// A handle that holds the exclusive right to pop nodes from an
/// [`MpscQueue`].
///
/// Reserving the consumer role once and popping many nodes through it
/// avoids acquiring the role on every [`MpscQueue::try_pop`] call.
///
/// This type is returned by [`MpscQueue::consume`] and
/// [`MpscQueue::try_consume`]. The role is released when the `Consumer` is
/// dropped.
///
/// A `Consumer` is also an [`Iterator`] over the nodes currently in the
/// queue.
///
/// A `Consumer` may be sent to another thread, but it is not `Sync`: only
/// one thread at a time may pop through it.
///
/// ```compile_fail
/// use rhizome::{mpsc_queue::{Consumer, Links}, Linked};
///
/// fn assert_sync<S: Sync>() {}
///
/// fn consumer_is_sync<T: Linked<Links<T>> + Send>() {
///     assert_sync::<Consumer<'static, T>>();
/// }
/// ```
pub struct Consumer<'q, T: Linked<Links<T>>> {
    q: &'q MpscQueue<T>,
    _not_sync: PhantomData<Cell<()>>,
}

/// Links to other nodes in an [`MpscQueue`].
///
/// A type that wants to be pushed onto an [`MpscQueue`] embeds a `Links`
/// and returns a pointer to it from its [`Linked::links`] implementation.
/// The queue is the only thing that ever touches a node's `Links`.
pub struct Links<T> {
    /// The next (newer) node in the queue.
    next: AtomicPtr<T>,

    /// Tracks whether the node is queued, for catching double pushes in
    /// debug builds.
    #[cfg(debug_assertions)]
    state: AtomicU8,

    /// Links must always be `!Unpin`, so that they never receive LLVM
    /// `noalias` annotations; see also
    /// https://github.com/rust-lang/rust/issues/63818.
    _unpin: PhantomPinned,
}

/// Errors returned by [`MpscQueue::try_pop`] and [`Consumer::try_pop`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TryPopError {
    /// The queue is empty.
    Empty,

    /// A producer has published a node but not yet linked it to its
    /// predecessor. This resolves as soon as that producer's push returns.
    Inconsistent,

    /// Another thread currently holds the consumer role.
    Busy,
}

/// The outcome of a bounded drain.
///
/// Returned by [`Consumer::drain_n_with`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub struct Drain {
    /// How many nodes were popped and handed to the drain's callback.
    pub popped: usize,

    /// `true` if the drain stopped because it reached its limit, so that more
    /// nodes may still be queued.
    pub has_remaining: bool,

    /// `true` if the drain stopped at a linked-pending node.
    ///
    /// The node will become visible as soon as the producer pushing it
    /// finishes its push.
    pub inconsistent: bool,
}

#[cfg(debug_assertions)]
mod state {
    pub(super) const UNLINKED: u8 = 0;
    pub(super) const QUEUED: u8 = 1;
    pub(super) const STUB: u8 = 2;
}

#[inline(always)]
unsafe fn links<'a, T: Linked<Links<T>>>(node: NonNull<T>) -> &'a Links<T> {
    T::links(node).as_ref()
}

// === impl MpscQueue ===

impl<T: Linked<Links<T>>> MpscQueue<T> {
    /// Returns a new queue, using `T::Handle::default()` as the stub node.
    pub fn new() -> Self
    where
        T::Handle: Default,
    {
        Self::new_with_stub(Default::default())
    }

    /// Returns a new queue, using the provided node as the stub.
    ///
    /// The stub is owned by the queue, and dropped along with it. It is never
    /// popped.
    pub fn new_with_stub(stub: T::Handle) -> Self {
        let stub = T::into_ptr(stub);

        #[cfg(debug_assertions)]
        unsafe {
            links(stub).state.store(state::STUB, Release);
        }
        let ptr = stub.as_ptr();

        Self {
            head: CachePadded(AtomicPtr::new(ptr)),
            tail: CachePadded(UnsafeCell::new(ptr)),
            has_consumer: CachePadded(AtomicBool::new(false)),
            stub,
            stub_is_static: false,
        }
    }

    /// Returns a new queue that uses a `static` node as its stub.
    ///
    /// This is a `const fn`, so the queue itself may be a `static`. The stub
    /// should be constructed with [`Links::new_stub`], so that debug builds
    /// can tell it apart from ordinary nodes.
    ///
    /// # Safety
    ///
    /// The stub must never be used by any other queue, and must never be
    /// pushed onto this one.
    #[cfg(not(loom))]
    pub const unsafe fn new_with_static_stub(stub: &'static T) -> Self {
        let ptr = stub as *const T as *mut T;
        Self {
            head: CachePadded(AtomicPtr::new(ptr)),
            tail: CachePadded(UnsafeCell::new(ptr)),
            has_consumer: CachePadded(AtomicBool::new(false)),
            stub: NonNull::new_unchecked(ptr),
            stub_is_static: true,
        }
    }

    /// Push a node onto the queue.
    ///
    /// This never blocks and never fails. The node becomes the newest node
    /// in the queue; it will be popped after every node whose push completed
    /// its head exchange before this one.
    ///
    /// Pushing does not notify anybody. If a consumer is waiting for work,
    /// waking it is up to the caller.
    ///
    /// # Panics
    ///
    /// In debug builds, if `node` is already queued (here or in another
    /// queue), or is a queue's stub.
    #[track_caller]
    pub fn push(&self, node: T::Handle) {
        let node = T::into_ptr(node);

        #[cfg(debug_assertions)]
        unsafe {
            let state = links(node).state.swap(state::QUEUED, AcqRel);
            assert!(
                state == state::UNLINKED,
                "pushed a node that is {}; a node may only be pushed while unlinked",
                if state == state::STUB {
                    "a queue's stub"
                } else {
                    "already queued"
                },
            );
        }

        self.push_inner(node)
    }

    #[inline]
    fn push_inner(&self, node: NonNull<T>) {
        unsafe {
            // Safety: nobody else can observe `node` until the swap below
            // publishes it.
            links(node).next.store(ptr::null_mut(), Relaxed);
        }

        let node = node.as_ptr();
        let prev = self.head.swap(node, AcqRel);
        test_trace!(?node, ?prev, "push: swapped head");

        // `node` is now linked-pending until its predecessor points at it.
        unsafe {
            // Safety: `head` always points at a live node (the stub, if
            // nothing else), so `prev` is non-null. The consumer will not
            // hand out `prev` until this store makes its `next` non-null.
            links(non_null(prev)).next.store(node, Release);
        }
    }

    /// Try to pop the oldest node, without waiting.
    ///
    /// This acquires the consumer role for the duration of the call.
    ///
    /// # Returns
    ///
    /// - `Ok(T::Handle)` if a node was popped
    /// - [`TryPopError::Empty`] if there are no nodes in the queue
    /// - [`TryPopError::Inconsistent`] if the next node is linked-pending
    /// - [`TryPopError::Busy`] if another thread holds the consumer role
    pub fn try_pop(&self) -> Result<T::Handle, TryPopError> {
        if !self.try_lock_consumer() {
            return Err(TryPopError::Busy);
        }

        let res = unsafe {
            // Safety: we hold the consumer role.
            self.try_pop_unchecked()
        };

        self.has_consumer.store(false, Release);
        res
    }

    /// Pop the oldest node.
    ///
    /// If the next node is linked-pending, or another thread holds the
    /// consumer role, this spins with an exponential backoff until that
    /// resolves. Returns `None` only if the queue is empty.
    pub fn pop(&self) -> Option<T::Handle> {
        let mut boff = Backoff::new();
        loop {
            match self.try_pop() {
                Ok(node) => return Some(node),
                Err(TryPopError::Empty) => return None,
                Err(_) => boff.spin(),
            }
        }
    }

    /// Reserve the consumer role until the returned [`Consumer`] is dropped.
    ///
    /// If another thread holds the role, this spins until it is released.
    pub fn consume(&self) -> Consumer<'_, T> {
        self.lock_consumer();
        Consumer {
            q: self,
            _not_sync: PhantomData,
        }
    }

    /// Reserve the consumer role until the returned [`Consumer`] is dropped,
    /// or return `None` if another thread holds it.
    pub fn try_consume(&self) -> Option<Consumer<'_, T>> {
        if self.try_lock_consumer() {
            Some(Consumer {
                q: self,
                _not_sync: PhantomData,
            })
        } else {
            None
        }
    }

    /// Try to pop the oldest node, without acquiring the consumer role.
    ///
    /// # Returns
    ///
    /// - `Ok(T::Handle)` if a node was popped
    /// - [`TryPopError::Empty`] if there are no nodes in the queue
    /// - [`TryPopError::Inconsistent`] if the next node is linked-pending
    ///
    /// # Safety
    ///
    /// This is a multi-producer, *single-consumer* queue. The caller must
    /// guarantee that no other thread is popping from the queue.
    pub unsafe fn try_pop_unchecked(&self) -> Result<T::Handle, TryPopError> {
        self.tail.with_mut(|tail| {
            let mut tail_node = NonNull::new(*tail).ok_or(TryPopError::Empty)?;
            let mut next = links(tail_node).next.load(Acquire);

            // The stub is never handed out; step over it.
            if tail_node == self.stub {
                let next_node = match NonNull::new(next) {
                    Some(next_node) => next_node,
                    // a producer has swapped the head off of the stub, but
                    // not linked the stub to its node yet.
                    None if self.head.load(Acquire) != self.stub.as_ptr() => {
                        return Err(TryPopError::Inconsistent)
                    }
                    None => return Err(TryPopError::Empty),
                };
                *tail = next;
                tail_node = next_node;
                next = links(next_node).next.load(Acquire);
            }

            // The common case: `tail_node` has a successor, so nobody will
            // write to its links again.
            if !next.is_null() {
                *tail = next;
                return Ok(self.unlink(tail_node));
            }

            // `tail_node` is the last linked node. If it isn't also the head,
            // some producer has swapped the head but not yet linked its node.
            let head = self.head.load(Acquire);
            if tail_node.as_ptr() != head {
                test_trace!(?tail_node, ?head, "pop: linked-pending");
                return Err(TryPopError::Inconsistent);
            }

            // `tail_node` is the only node. Put the stub behind it, so that
            // it has a successor and can be handed out.
            self.push_inner(self.stub);

            next = links(tail_node).next.load(Acquire);
            if next.is_null() {
                // A producer swapped the head between our load and the stub
                // push, and has not linked `tail_node` to its node yet.
                test_trace!(?tail_node, "pop: lost race with a producer");
                return Err(TryPopError::Inconsistent);
            }

            *tail = next;
            Ok(self.unlink(tail_node))
        })
    }

    /// Pop the oldest node, spinning through linked-pending windows, without
    /// acquiring the consumer role.
    ///
    /// Returns `None` if the queue is empty.
    ///
    /// # Safety
    ///
    /// This is a multi-producer, *single-consumer* queue. The caller must
    /// guarantee that no other thread is popping from the queue.
    pub unsafe fn pop_unchecked(&self) -> Option<T::Handle> {
        let mut boff = Backoff::new();
        loop {
            match self.try_pop_unchecked() {
                Ok(node) => return Some(node),
                Err(TryPopError::Empty) => return None,
                Err(TryPopError::Inconsistent) => boff.spin(),
                Err(TryPopError::Busy) => {
                    unreachable!("try_pop_unchecked never returns `Busy`!")
                }
            }
        }
    }

    /// Pop up to `limit` nodes, passing each to `f`, without acquiring the
    /// consumer role.
    ///
    /// Each node is unlinked from the queue *before* `f` sees it, so `f` may
    /// do anything with it, including panicking or pushing it again.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that no other thread is popping from the
    /// queue.
    pub unsafe fn drain_n_unchecked(
        &self,
        limit: usize,
        mut f: impl FnMut(T::Handle),
    ) -> Drain {
        let mut drain = Drain {
            popped: 0,
            has_remaining: false,
            inconsistent: false,
        };
        while drain.popped < limit {
            match self.try_pop_unchecked() {
                Ok(node) => {
                    drain.popped += 1;
                    f(node);
                }
                Err(TryPopError::Inconsistent) => {
                    drain.inconsistent = true;
                    return drain;
                }
                Err(_) => return drain,
            }
        }
        drain.has_remaining = true;
        drain
    }

    /// # Safety
    ///
    /// `node` must have just been unlinked by the consumer.
    #[inline]
    unsafe fn unlink(&self, node: NonNull<T>) -> T::Handle {
        #[cfg(debug_assertions)]
        {
            let state = links(node).state.swap(state::UNLINKED, AcqRel);
            debug_assert_eq!(state, state::QUEUED, "popped a node that was not queued");
        }
        test_trace!(?node, "pop");
        T::from_ptr(node)
    }

    #[inline]
    fn lock_consumer(&self) {
        let mut boff = Backoff::new();
        while !self.try_lock_consumer() {
            while self.has_consumer.load(Relaxed) {
                boff.spin();
            }
        }
    }

    #[inline]
    fn try_lock_consumer(&self) -> bool {
        self.has_consumer
            .compare_exchange(false, true, AcqRel, Acquire)
            .is_ok()
    }
}

impl<T: Linked<Links<T>>> Drop for MpscQueue<T> {
    fn drop(&mut self) {
        let mut current = self.tail.with_mut(|tail| unsafe {
            // Safety: `drop` has `&mut self`, so nobody else is consuming.
            *tail
        });
        while let Some(node) = NonNull::new(current) {
            unsafe {
                let links = links(node);
                let next = links.next.load(Acquire);

                // The stub may be linked in the middle of the list; it is
                // dropped once, below.
                if node != self.stub {
                    #[cfg(debug_assertions)]
                    links.state.store(state::UNLINKED, Release);
                    drop(T::from_ptr(node));
                }

                current = next;
            }
        }

        if !self.stub_is_static {
            unsafe {
                drop(T::from_ptr(self.stub));
            }
        }
    }
}

impl<T> fmt::Debug for MpscQueue<T>
where
    T: Linked<Links<T>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpscQueue")
            .field("head", &format_args!("{:p}", self.head.load(Acquire)))
            // only the consumer may read the tail.
            .field("tail", &format_args!("..."))
            .field("stub", &self.stub)
            .field("has_consumer", &self.has_consumer.load(Acquire))
            .finish()
    }
}

impl<T> Default for MpscQueue<T>
where
    T: Linked<Links<T>>,
    T::Handle: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<T> Send for MpscQueue<T>
where
    T: Send + Linked<Links<T>>,
    T::Handle: Send,
{
}
unsafe impl<T: Send + Linked<Links<T>>> Sync for MpscQueue<T> {}

// === impl Consumer ===

impl<T: Linked<Links<T>>> Consumer<'_, T> {
    /// Try to pop the oldest node, without waiting.
    ///
    /// Returns [`TryPopError::Empty`] or [`TryPopError::Inconsistent`], but
    /// never [`TryPopError::Busy`].
    #[inline]
    pub fn try_pop(&self) -> Result<T::Handle, TryPopError> {
        debug_assert!(self.q.has_consumer.load(Acquire));
        unsafe {
            // Safety: we hold the consumer role.
            self.q.try_pop_unchecked()
        }
    }

    /// Pop the oldest node, spinning through linked-pending windows.
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    pub fn pop(&self) -> Option<T::Handle> {
        debug_assert!(self.q.has_consumer.load(Acquire));
        unsafe {
            // Safety: we hold the consumer role.
            self.q.pop_unchecked()
        }
    }

    /// Pop every node that is currently available, oldest first, passing
    /// each one to `f`. Returns how many nodes were popped.
    ///
    /// This stops when the queue is empty or the next node is
    /// linked-pending; it never waits.
    #[inline]
    pub fn drain_with(&self, f: impl FnMut(T::Handle)) -> usize {
        self.drain_n_with(usize::MAX, f).popped
    }

    /// Like [`drain_with`](Self::drain_with), but pops at most `limit` nodes.
    #[inline]
    pub fn drain_n_with(&self, limit: usize, f: impl FnMut(T::Handle)) -> Drain {
        debug_assert!(self.q.has_consumer.load(Acquire));
        unsafe {
            // Safety: we hold the consumer role.
            self.q.drain_n_unchecked(limit, f)
        }
    }
}

impl<T: Linked<Links<T>>> Iterator for Consumer<'_, T> {
    type Item = T::Handle;

    fn next(&mut self) -> Option<Self::Item> {
        self.pop()
    }
}

impl<T: Linked<Links<T>>> Drop for Consumer<'_, T> {
    fn drop(&mut self) {
        self.q.has_consumer.store(false, Release);
    }
}

impl<T> fmt::Debug for Consumer<'_, T>
where
    T: Linked<Links<T>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail = self.q.tail.with(|tail| unsafe {
            // Safety: the consumer may read the tail.
            *tail
        });
        f.debug_struct("Consumer")
            .field("head", &format_args!("{:p}", self.q.head.load(Acquire)))
            .field("tail", &format_args!("{:p}", tail))
            .finish()
    }
}

// === impl Links ===

impl<T> Links<T> {
    /// Returns new, unlinked links.
    #[cfg(not(loom))]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            #[cfg(debug_assertions)]
            state: AtomicU8::new(state::UNLINKED),
            _unpin: PhantomPinned,
        }
    }

    /// Returns links for a node that will be used as a queue's stub.
    ///
    /// This is only different from [`Links::new`] in debug builds, where
    /// it lets the queue catch the stub being pushed as an ordinary node.
    #[cfg(not(loom))]
    #[must_use]
    pub const fn new_stub() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            #[cfg(debug_assertions)]
            state: AtomicU8::new(state::STUB),
            _unpin: PhantomPinned,
        }
    }

    #[cfg(loom)]
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            #[cfg(debug_assertions)]
            state: AtomicU8::new(state::UNLINKED),
            _unpin: PhantomPinned,
        }
    }

    #[cfg(loom)]
    #[must_use]
    pub fn new_stub() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            #[cfg(debug_assertions)]
            state: AtomicU8::new(state::STUB),
            _unpin: PhantomPinned,
        }
    }

    /// Returns `true` if the node owning these links is currently in a queue.
    ///
    /// This is only tracked in debug builds; release builds always return
    /// `false`.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        #[cfg(debug_assertions)]
        {
            self.state.load(Acquire) == state::QUEUED
        }
        #[cfg(not(debug_assertions))]
        {
            false
        }
    }
}

impl<T> Default for Links<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Links<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Links");
        s.field("next", &format_args!("{:p}", self.next.load(Relaxed)));
        #[cfg(debug_assertions)]
        s.field("state", &self.state.load(Relaxed));
        s.finish()
    }
}

feature! {
    #![feature = "alloc"]

    use alloc::sync::Arc;

    /// An owned handle that holds the exclusive right to pop nodes from an
    /// `Arc`ed [`MpscQueue`].
    ///
    /// This is the [`Consumer`] for consumers that live longer than a single
    /// scope, such as an event loop that owns the consumer side of its task
    /// queue for its whole lifetime. It is returned by
    /// [`MpscQueue::consume_owned`] and [`MpscQueue::try_consume_owned`].
    ///
    /// Like a [`Consumer`], an `OwnedConsumer` is `Send` but not `Sync`.
    ///
    /// ```compile_fail
    /// use rhizome::{mpsc_queue::{Links, OwnedConsumer}, Linked};
    ///
    /// fn assert_sync<S: Sync>() {}
    ///
    /// fn owned_consumer_is_sync<T: Linked<Links<T>> + Send>() {
    ///     assert_sync::<OwnedConsumer<T>>();
    /// }
    /// ```
    pub struct OwnedConsumer<T: Linked<Links<T>>> {
        q: Arc<MpscQueue<T>>,
        _not_sync: PhantomData<Cell<()>>,
    }

    impl<T: Linked<Links<T>>> OwnedConsumer<T> {
        /// Try to pop the oldest node, without waiting.
        ///
        /// Returns [`TryPopError::Empty`] or [`TryPopError::Inconsistent`],
        /// but never [`TryPopError::Busy`].
        #[inline]
        pub fn try_pop(&self) -> Result<T::Handle, TryPopError> {
            debug_assert!(self.q.has_consumer.load(Acquire));
            unsafe {
                // Safety: we hold the consumer role.
                self.q.try_pop_unchecked()
            }
        }

        /// Pop the oldest node, spinning through linked-pending windows.
        ///
        /// Returns `None` if the queue is empty.
        #[inline]
        pub fn pop(&self) -> Option<T::Handle> {
            debug_assert!(self.q.has_consumer.load(Acquire));
            unsafe {
                // Safety: we hold the consumer role.
                self.q.pop_unchecked()
            }
        }

        /// Pop every node that is currently available, oldest first,
        /// passing each one to `f`. Returns how many nodes were popped.
        #[inline]
        pub fn drain_with(&self, f: impl FnMut(T::Handle)) -> usize {
            self.drain_n_with(usize::MAX, f).popped
        }

        /// Like [`drain_with`](Self::drain_with), but pops at most `limit`
        /// nodes.
        #[inline]
        pub fn drain_n_with(&self, limit: usize, f: impl FnMut(T::Handle)) -> Drain {
            debug_assert!(self.q.has_consumer.load(Acquire));
            unsafe {
                // Safety: we hold the consumer role.
                self.q.drain_n_unchecked(limit, f)
            }
        }

        /// Returns the queue this consumer pops from.
        #[inline]
        #[must_use]
        pub fn queue(&self) -> &Arc<MpscQueue<T>> {
            &self.q
        }
    }

    impl<T: Linked<Links<T>>> Drop for OwnedConsumer<T> {
        fn drop(&mut self) {
            self.q.has_consumer.store(false, Release);
        }
    }

    impl<T: Linked<Links<T>>> fmt::Debug for OwnedConsumer<T> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let tail = self.q.tail.with(|tail| unsafe {
                // Safety: the consumer may read the tail.
                *tail
            });
            f.debug_struct("OwnedConsumer")
                .field("head", &format_args!("{:p}", self.q.head.load(Acquire)))
                .field("tail", &format_args!("{:p}", tail))
                .finish()
        }
    }

    impl<T: Linked<Links<T>>> MpscQueue<T> {
        /// Reserve the consumer role until the returned [`OwnedConsumer`] is
        /// dropped.
        ///
        /// If another thread holds the role, this spins until it is released.
        pub fn consume_owned(self: Arc<Self>) -> OwnedConsumer<T> {
            self.lock_consumer();
            OwnedConsumer {
                q: self,
                _not_sync: PhantomData,
            }
        }

        /// Reserve the consumer role until the returned [`OwnedConsumer`] is
        /// dropped, or return `None` if another thread holds it.
        pub fn try_consume_owned(self: Arc<Self>) -> Option<OwnedConsumer<T>> {
            if self.try_lock_consumer() {
                Some(OwnedConsumer {
                    q: self,
                    _not_sync: PhantomData,
                })
            } else {
                None
            }
        }
    }
}
