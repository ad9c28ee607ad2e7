//! Errors returned by the event loop and its handles.
use crate::TaskRef;
use std::io;

/// An error returned by an [`EventLoop`](crate::EventLoop).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The event loop has been closed.
    #[error("the event loop is closed")]
    Closed,

    /// The event loop's wake signal failed.
    #[error("the event loop's wake signal failed")]
    Signal(#[from] io::Error),
}

/// An error returned by [`Handle::push`](crate::Handle::push).
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The event loop has been closed, so the task was not queued.
    ///
    /// The rejected task is returned, so it may be run or disposed of
    /// elsewhere.
    #[error("the event loop is closed")]
    Closed(TaskRef),

    /// The task was queued, but waking the event loop failed.
    ///
    /// The task will still run the next time the loop drains its queue,
    /// but that may not happen until something else wakes it.
    #[error("the task was queued, but the event loop's wake signal failed")]
    Signal(#[source] io::Error),
}

impl PushError {
    /// Returns the rejected task, if the task was not queued.
    #[must_use]
    pub fn into_task(self) -> Option<TaskRef> {
        match self {
            Self::Closed(task) => Some(task),
            Self::Signal(_) => None,
        }
    }

    /// Returns `true` if the task was rejected because the loop is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl From<PushError> for Error {
    fn from(error: PushError) -> Self {
        match error {
            PushError::Closed(_) => Self::Closed,
            PushError::Signal(error) => Self::Signal(error),
        }
    }
}
