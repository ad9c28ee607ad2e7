//! The concurrent-producer scenario.
use crate::{
    cli::Options,
    term::{style, ColorMode, OwoColorize, Stream},
};
use color_eyre::eyre::{eyre, Result, WrapErr};
use hyphae::{EventLoop, Signal};
use std::{
    fmt,
    sync::{Arc, Barrier, Mutex},
    thread,
    time::{Duration, Instant},
};

/// What the loop ran, in the order it ran it: `(producer, sequence number)`.
type Log = Arc<Mutex<Vec<(usize, usize)>>>;

#[derive(Debug)]
pub struct Report {
    pub expected: usize,
    pub executed: usize,
    pub verdict: Verdict,
    pub ticks: usize,
    pub notified: usize,
    pub elapsed: Duration,
    pub push: PushStats,
}

/// Violations found when checking the log.
#[derive(Debug, Default)]
pub struct Verdict {
    /// Tasks that were pushed but never ran.
    pub lost: usize,
    /// Tasks that ran more than once.
    pub duplicated: usize,
    /// Tasks that ran before an earlier task from the same producer.
    pub out_of_order: usize,
}

/// How long `Handle::spawn` took, across every producer.
#[derive(Debug, Default, Clone)]
pub struct PushStats {
    pub count: usize,
    pub total: Duration,
    pub max: Duration,
}

/// Runs the scenario: `opts.producers` threads each push `opts.tasks`
/// tasks, while the loop drains them on this thread.
pub fn run<S: Signal + fmt::Debug + 'static>(opts: &Options, signal: S) -> Result<Report> {
    let mut event_loop = EventLoop::builder()
        .name("sporulate")
        .drain_budget(opts.budget)
        .build_with_signal(signal);
    tracing::debug!(?event_loop);

    let log = Log::new(Mutex::new(Vec::with_capacity(opts.total_tasks())));
    let barrier = Arc::new(Barrier::new(opts.producers + 1));
    let mut producers = Vec::with_capacity(opts.producers);
    for producer in 0..opts.producers {
        let handle = event_loop.handle();
        let log = log.clone();
        let barrier = barrier.clone();
        let tasks = opts.tasks;
        let thread = thread::Builder::new()
            .name(format!("producer-{producer}"))
            .spawn(move || -> Result<PushStats, hyphae::Error> {
                let mut stats = PushStats::default();
                barrier.wait();
                for seq in 0..tasks {
                    let log = log.clone();
                    let start = Instant::now();
                    handle.spawn(move || {
                        if let Ok(mut log) = log.lock() {
                            log.push((producer, seq));
                        }
                    })?;
                    stats.record(start.elapsed());
                }
                Ok(stats)
            })
            .with_context(|| format!("spawning producer {producer}"))?;
        producers.push(thread);
    }

    // once every producer is done, close the loop so that it stops.
    let closer = {
        let handle = event_loop.handle();
        thread::Builder::new()
            .name("closer".into())
            .spawn(move || -> Result<PushStats> {
                let mut stats = PushStats::default();
                let mut failed = None;
                for (producer, thread) in producers.into_iter().enumerate() {
                    match thread.join() {
                        Ok(Ok(producer_stats)) => stats.merge(&producer_stats),
                        Ok(Err(error)) => {
                            let error = eyre!(error).wrap_err(format!("producer {producer} failed"));
                            failed.get_or_insert(error);
                        }
                        Err(_) => {
                            failed.get_or_insert(eyre!("producer {producer} panicked"));
                        }
                    }
                }
                handle.close();
                match failed {
                    Some(error) => Err(error),
                    None => Ok(stats),
                }
            })
            .context("spawning closer thread")?
    };

    tracing::info!(
        "running {} producers x {} tasks",
        opts.producers,
        opts.tasks
    );
    let start = Instant::now();
    barrier.wait();

    let mut ticks = 0;
    let mut notified = 0;
    while !event_loop.is_closed() {
        let tick = match opts.drain_interval() {
            Some(interval) => {
                thread::sleep(interval);
                event_loop.tick()
            }
            None => event_loop.turn(None).context("waiting on the event loop")?,
        };
        ticks += 1;
        notified += tick.notified;
        tracing::trace!(?tick);
    }
    // runs whatever was pushed before the loop closed.
    event_loop.run().context("draining the closed event loop")?;
    let elapsed = start.elapsed();

    let push = closer
        .join()
        .map_err(|_| eyre!("closer thread panicked"))??;

    let log = log
        .lock()
        .map_err(|_| eyre!("a task panicked while recording itself"))?;
    let verdict = Verdict::check(&log, opts.producers, opts.tasks);
    tracing::info!("finished in {elapsed:?}");

    Ok(Report {
        expected: opts.total_tasks(),
        executed: log.len(),
        verdict,
        ticks,
        notified,
        elapsed,
        push,
    })
}

// === impl Verdict ===

impl Verdict {
    pub fn check(log: &[(usize, usize)], producers: usize, tasks: usize) -> Self {
        let mut verdict = Self::default();
        let mut seen = vec![vec![false; tasks]; producers];
        let mut next = vec![0; producers];
        for &(producer, seq) in log {
            if std::mem::replace(&mut seen[producer][seq], true) {
                verdict.duplicated += 1;
                continue;
            }
            if seq < next[producer] {
                verdict.out_of_order += 1;
            }
            next[producer] = next[producer].max(seq + 1);
        }
        verdict.lost = seen.iter().flatten().filter(|&&seen| !seen).count();
        verdict
    }

    pub fn is_ok(&self) -> bool {
        self.lost == 0 && self.duplicated == 0 && self.out_of_order == 0
    }
}

// === impl PushStats ===

impl PushStats {
    fn record(&mut self, latency: Duration) {
        self.count += 1;
        self.total += latency;
        self.max = self.max.max(latency);
    }

    fn merge(&mut self, other: &Self) {
        self.count += other.count;
        self.total += other.total;
        self.max = self.max.max(other.max);
    }

    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / self.count as u128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

// === impl Report ===

impl Report {
    pub fn print(&self, color: ColorMode) {
        let bold = color.style_for(Stream::Stdout, style().bold());
        let good = color.style_for(Stream::Stdout, style().green().bold());
        let bad = color.style_for(Stream::Stdout, style().red().bold());
        let count = |n: usize| {
            let style = if n == 0 { good } else { bad };
            n.style(style).to_string()
        };

        println!("{}", "results".style(bold));
        println!("  executed:      {} / {}", self.executed, self.expected);
        println!("  lost:          {}", count(self.verdict.lost));
        println!("  duplicated:    {}", count(self.verdict.duplicated));
        println!("  out of order:  {}", count(self.verdict.out_of_order));
        println!("  ticks:         {}", self.ticks);
        println!("  notifications: {}", self.notified);
        println!("  elapsed:       {:?}", self.elapsed);
        println!(
            "  push latency:  mean {:?}, max {:?}",
            self.push.mean(),
            self.push.max
        );
        if self.verdict.is_ok() {
            println!("{}", "every task ran exactly once, in order".style(good));
        } else {
            println!("{}", "ordering or delivery was violated".style(bad));
        }
    }
}
