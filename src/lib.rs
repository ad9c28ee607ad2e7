#![cfg_attr(docsrs, doc = include_str!("../README.md"))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(docsrs, deny(missing_docs))]

#[macro_use]
pub(crate) mod trace;

pub mod error;
pub mod event_loop;
pub mod signal;
pub mod task;

#[doc(inline)]
pub use self::{
    error::{Error, PushError},
    event_loop::{Builder, EventLoop, Handle, Tick},
    signal::{Signal, ThreadSignal},
    task::{Task, TaskRef},
};

#[cfg(target_os = "linux")]
#[doc(inline)]
pub use self::signal::EventFd;

/// The queue that carries [`Task`]s from producers to an event loop.
pub type TaskQueue = rhizome::MpscQueue<Task>;
