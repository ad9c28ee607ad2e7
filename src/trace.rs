//! `tracing` macros that compile to nothing when the `tracing` feature is
//! disabled.
#![cfg_attr(not(test), allow(unused_macros))]

macro_rules! event {
    ($level:expr, $($arg:tt)+) => {
        #[cfg(any(feature = "tracing", test))]
        {
            use tracing::Level;
            tracing::event!($level, $($arg)+)
        }
    };
}

macro_rules! in_span {
    ($level:expr, $($arg:tt)+) => {
        #[cfg(any(feature = "tracing", test))]
        let _span = {
            use tracing::Level;
            tracing::span!($level, $($arg)+).entered()
        };
    };
}

macro_rules! trace {
    ($($arg:tt)+) => {
        event!(Level::TRACE, $($arg)+)
    };
}

macro_rules! debug {
    ($($arg:tt)+) => {
        event!(Level::DEBUG, $($arg)+)
    };
}

macro_rules! warn {
    ($($arg:tt)+) => {
        event!(Level::WARN, $($arg)+)
    };
}

macro_rules! in_debug_span {
    ($($arg:tt)+) => {
        in_span!(Level::DEBUG, $($arg)+)
    };
}

/// Installs a `tracing` subscriber that logs everything to the test output,
/// for the current thread, until the returned guard is dropped.
#[cfg(test)]
pub(crate) fn trace_init() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::util::SubscriberInitExt;
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .set_default()
}
