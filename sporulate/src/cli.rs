use crate::term::OutputOptions;
use std::{fmt, time::Duration};

#[derive(Debug, clap::Parser)]
#[command(
    name = "sporulate",
    version,
    about = "pushes tasks onto a hyphae event loop from many threads, and checks that every one ran exactly once and in order"
)]
pub struct Options {
    /// How many producer threads push tasks.
    #[clap(short, long, env = "SPORULATE_PRODUCERS", default_value_t = 2)]
    pub producers: usize,

    /// How many tasks each producer pushes.
    #[clap(short, long, env = "SPORULATE_TASKS", default_value_t = 1000)]
    pub tasks: usize,

    /// Drain the loop on a fixed interval, in microseconds, instead of
    /// waiting for its signal.
    ///
    /// With an interval of zero, the loop sleeps on its signal and drains
    /// whenever a producer wakes it.
    #[clap(
        short = 'i',
        long = "drain-interval-us",
        env = "SPORULATE_DRAIN_INTERVAL_US",
        default_value_t = 0
    )]
    pub drain_interval_us: u64,

    /// The most tasks the loop runs per drain. Zero means unbounded.
    #[clap(
        short,
        long,
        env = "SPORULATE_BUDGET",
        default_value_t = hyphae::Builder::DEFAULT_DRAIN_BUDGET
    )]
    pub budget: usize,

    /// Which wake signal the event loop waits on.
    #[clap(
        short,
        long,
        env = "SPORULATE_SIGNAL",
        value_enum,
        default_value_t = SignalKind::Thread
    )]
    pub signal: SignalKind,

    #[clap(flatten)]
    pub output: OutputOptions,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, clap::ValueEnum)]
#[clap(rename_all = "lower")]
pub enum SignalKind {
    /// Park the loop's thread.
    Thread,
    /// Poll a Linux eventfd.
    Eventfd,
}

// === impl Options ===

impl Options {
    /// Returns the drain interval, or `None` if the loop should wait on its
    /// signal.
    pub fn drain_interval(&self) -> Option<Duration> {
        if self.drain_interval_us == 0 {
            None
        } else {
            Some(Duration::from_micros(self.drain_interval_us))
        }
    }

    pub fn total_tasks(&self) -> usize {
        self.producers.saturating_mul(self.tasks)
    }
}

// === impl SignalKind ===

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Thread => "thread",
            Self::Eventfd => "eventfd",
        })
    }
}
