#![cfg_attr(docsrs, doc = include_str!("../README.md"))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(docsrs, deny(missing_docs))]
#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(test)]
extern crate std;

#[macro_use]
pub(crate) mod util;

pub mod mpsc_queue;

#[doc(inline)]
pub use mpsc_queue::MpscQueue;

pub(crate) mod loom;

use core::ptr::NonNull;

/// Trait implemented by types which can be nodes in an intrusive queue.
///
/// To be pushed onto an [`MpscQueue`], a type must contain a
/// [`mpsc_queue::Links`] value, which holds the queue's link to the next
/// node. The queue never allocates: the storage for each node is provided
/// by the caller, and travels through the queue as a [`Self::Handle`].
///
/// # Safety
///
/// This is unsafe to implement because it's the implementation's
/// responsibility to ensure that implementors are valid intrusive nodes. In
/// particular:
///
/// - A node **must** stay pinned in memory for as long as it is in a queue.
///   While a node is queued, it may not be moved or deallocated.
/// - The type implementing this trait **must not** implement [`Unpin`].
/// - Additional requirements for individual methods are documented on those
///   methods.
///
/// Breaking any of these rules corrupts the queue.
pub unsafe trait Linked<L> {
    /// The handle that owns a node while it is outside of a queue.
    ///
    /// When a `Handle` is dropped, it is responsible for disposing of the
    /// node it owns (or for doing nothing, if the node's storage is owned
    /// elsewhere).
    type Handle;

    /// Convert a [`Self::Handle`] into a raw pointer to `Self`, taking
    /// ownership of it.
    fn into_ptr(r: Self::Handle) -> NonNull<Self>;

    /// Convert a raw pointer to `Self` back into an owning [`Self::Handle`].
    ///
    /// # Safety
    ///
    /// - It must be valid to construct a [`Self::Handle`] from `ptr`.
    /// - `ptr` must point to a live instance of `Self`.
    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle;

    /// Return the links of the node pointed to by `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live instance of `Self`.
    unsafe fn links(ptr: NonNull<Self>) -> NonNull<L>;
}
