//! Units of deferred work, and the handles that carry them through a
//! [`TaskQueue`](crate::TaskQueue).
//!
//! A [`Task`] is a callback, an opaque context pointer passed to that
//! callback, and the intrusive links used by the queue. The queue never
//! allocates a `Task`: the caller provides its storage, which can live on
//! the heap, in a `static`, in a pool, or on the stack of a thread that is
//! guaranteed to outlive the task's stay in the queue.
//!
//! While it is outside of a queue, a task is owned by a [`TaskRef`].
//! Running a `TaskRef` invokes the callback exactly once, and then *disposes*
//! of the task: it calls the task's dispose hook, if it has one. Tasks in
//! caller-managed storage usually have no dispose hook, and the caller
//! reclaims the storage whenever it knows the task has run. Tasks created
//! from closures by [`TaskRef::from_fn`] use the hook to free their own
//! allocation.
use rhizome::{mpsc_queue::Links, Linked};
use std::{
    cell::Cell,
    fmt,
    marker::PhantomPinned,
    pin::Pin,
    ptr::{self, NonNull},
};

/// A task's callback. It is passed the task's context pointer.
///
/// Plain `fn(*mut ())` items coerce to this type.
pub type Callback = unsafe fn(context: *mut ());

/// A task's dispose hook. It is passed a pointer to the task itself, after
/// the task has run or when it is discarded without running.
pub type Dispose = unsafe fn(task: NonNull<Task>);

/// A unit of deferred work.
///
/// See the [module-level documentation](self) for details.
#[repr(C)]
pub struct Task {
    /// The task's links in the queue.
    ///
    /// # Safety
    ///
    /// This MUST be the first field in this struct, for the
    /// [`Linked::links`] implementation to be sound.
    links: Links<Task>,
    callback: Callback,
    context: *mut (),
    dispose: Option<Dispose>,
    _pin: PhantomPinned,
}

/// An owning handle to a [`Task`] that is not currently queued.
///
/// Pushing a `TaskRef` hands the task to the queue; popping it hands it
/// back. [`TaskRef::run`] invokes the task's callback and disposes of it.
/// Dropping a `TaskRef` without running it disposes of the task without
/// invoking the callback.
pub struct TaskRef(NonNull<Task>);

/// A task that owns a closure, allocated by [`TaskRef::from_fn`].
#[repr(C)]
struct Closure<F> {
    /// # Safety
    ///
    /// This MUST be the first field, so that a pointer to the `Task` is also a
    /// pointer to the `Closure`.
    task: Task,
    f: Cell<Option<F>>,
}

// Safety: a `Task`'s context is only dereferenced by its callback, on the
// thread that runs it. Every `TaskRef` constructor requires that it be sound
// to run the task on another thread.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}
unsafe impl Send for TaskRef {}

// === impl Task ===

impl Task {
    /// Returns a new task that will call `callback(context)` when it runs.
    #[must_use]
    pub const fn new(callback: Callback, context: *mut ()) -> Self {
        Self {
            links: Links::new(),
            callback,
            context,
            dispose: None,
            _pin: PhantomPinned,
        }
    }

    /// Returns a new task that will call `callback(context)` when it runs,
    /// and then `dispose` with a pointer to itself.
    ///
    /// `dispose` is also called if the task is discarded without running,
    /// such as when it is still queued when its queue is dropped.
    #[must_use]
    pub const fn with_dispose(callback: Callback, context: *mut (), dispose: Dispose) -> Self {
        Self {
            links: Links::new(),
            callback,
            context,
            dispose: Some(dispose),
            _pin: PhantomPinned,
        }
    }

    /// Returns a task for use as a queue's stub node.
    ///
    /// A stub is never run. Pair it with
    /// [`MpscQueue::new_with_static_stub`](rhizome::MpscQueue::new_with_static_stub)
    /// to build a [`TaskQueue`](crate::TaskQueue) in a `static`.
    #[must_use]
    pub const fn new_stub() -> Self {
        Self {
            links: Links::new_stub(),
            callback: Self::stub_callback,
            context: ptr::null_mut(),
            dispose: None,
            _pin: PhantomPinned,
        }
    }

    /// Returns the context pointer this task's callback will be passed.
    #[inline]
    #[must_use]
    pub fn context(&self) -> *mut () {
        self.context
    }

    /// Returns `true` if this task is currently in a queue.
    ///
    /// This is only tracked in debug builds; release builds always return
    /// `false`.
    #[inline]
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.links.is_queued()
    }

    unsafe fn stub_callback(_: *mut ()) {
        unreachable!("a queue's stub task must never be run!")
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("callback", &(self.callback as *const ()))
            .field("context", &self.context)
            .field("has_dispose", &self.dispose.is_some())
            .field("links", &self.links)
            .finish()
    }
}

unsafe impl Linked<Links<Task>> for Task {
    type Handle = TaskRef;

    fn into_ptr(task: TaskRef) -> NonNull<Task> {
        let ptr = task.0;
        // the queue owns the task now; don't dispose of it.
        std::mem::forget(task);
        ptr
    }

    unsafe fn from_ptr(ptr: NonNull<Task>) -> TaskRef {
        TaskRef(ptr)
    }

    unsafe fn links(ptr: NonNull<Task>) -> NonNull<Links<Task>> {
        // Safety: `Task` is `repr(C)`, and the links are its first field.
        ptr.cast()
    }
}

// === impl TaskRef ===

impl TaskRef {
    /// Wraps a pointer to a caller-owned task.
    ///
    /// # Safety
    ///
    /// - `task` must point to a live [`Task`] that will neither move nor be
    ///   deallocated until this `TaskRef` (and whatever queue it is pushed
    ///   onto) has run or disposed of it.
    /// - No other `TaskRef` to the same task may exist until then.
    /// - It must be sound to invoke the task's callback with its context on
    ///   whichever thread runs it.
    #[inline]
    #[must_use]
    pub unsafe fn from_raw(task: NonNull<Task>) -> Self {
        Self(task)
    }

    /// Wraps a pinned, caller-owned task.
    ///
    /// # Safety
    ///
    /// The same requirements as [`TaskRef::from_raw`] apply. In particular,
    /// the pin only guarantees the task won't *move*; the caller must also
    /// keep it alive until it has run.
    #[inline]
    #[must_use]
    pub unsafe fn from_pin(task: Pin<&Task>) -> Self {
        Self(NonNull::from(task.get_ref()))
    }

    /// Wraps a task stored in a `static`.
    ///
    /// # Safety
    ///
    /// No other `TaskRef` to the same task may exist until this one has run
    /// or been disposed of, and it must be sound to invoke the task's
    /// callback on whichever thread runs it.
    #[inline]
    #[must_use]
    pub unsafe fn from_static(task: &'static Task) -> Self {
        Self(NonNull::from(task))
    }

    /// Allocates a new task that runs `f`.
    ///
    /// The task frees itself once it has run, or when it is discarded
    /// without running.
    #[must_use]
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        unsafe fn call<F: FnOnce()>(context: *mut ()) {
            let closure = &*(context as *const Closure<F>);
            if let Some(f) = closure.f.take() {
                f()
            }
        }

        unsafe fn free<F>(task: NonNull<Task>) {
            drop(Box::from_raw(task.cast::<Closure<F>>().as_ptr()));
        }

        let closure = Box::new(Closure {
            task: Task::with_dispose(call::<F>, ptr::null_mut(), free::<F>),
            f: Cell::new(Some(f)),
        });
        let ptr = NonNull::from(Box::leak(closure));
        unsafe {
            // Safety: we just leaked the box, so nobody else can see it yet.
            (*ptr.as_ptr()).task.context = ptr.as_ptr().cast();
        }
        Self(ptr.cast())
    }

    /// Allocates a task for use as a queue's stub node.
    pub(crate) fn new_stub() -> Self {
        unsafe fn free(task: NonNull<Task>) {
            drop(Box::from_raw(task.as_ptr()));
        }

        let mut stub = Box::new(Task::new_stub());
        stub.dispose = Some(free);
        Self(NonNull::from(Box::leak(stub)))
    }

    /// Invokes the task's callback, then disposes of the task.
    ///
    /// If the callback panics, the task is still disposed of as the panic
    /// unwinds.
    pub fn run(self) {
        let task = unsafe {
            // Safety: a `TaskRef`'s task is live until it is disposed of,
            // which happens when `self` is dropped at the end of this method.
            self.0.as_ref()
        };
        unsafe {
            // Safety: `TaskRef`'s constructors require that the callback may
            // be invoked on this thread.
            (task.callback)(task.context);
        }
    }

    /// Returns a raw pointer to the task.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> NonNull<Task> {
        self.0
    }
}

impl Drop for TaskRef {
    fn drop(&mut self) {
        let dispose = unsafe { self.0.as_ref() }.dispose;
        if let Some(dispose) = dispose {
            unsafe {
                // Safety: this is the only handle to the task, and it is
                // going away.
                dispose(self.0)
            }
        }
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskRef").field(&self.0).finish()
    }
}

impl fmt::Pointer for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.0, f)
    }
}

/// Returns a new, empty [`TaskQueue`](crate::TaskQueue), with an allocated
/// stub task.
#[must_use]
pub fn queue() -> crate::TaskQueue {
    crate::TaskQueue::new_with_stub(TaskRef::new_stub())
}
