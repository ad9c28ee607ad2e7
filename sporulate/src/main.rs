use clap::Parser;
use color_eyre::eyre::{bail, Result};

mod cli;
mod scenario;
mod term;
mod trace;

use cli::{Options, SignalKind};

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = Options::parse();
    opts.output.init()?;

    tracing::debug!(
        opts.producers,
        opts.tasks,
        opts.drain_interval_us,
        opts.budget,
        %opts.signal,
        "sporulate configuration"
    );

    let report = match opts.signal {
        SignalKind::Thread => scenario::run(&opts, hyphae::ThreadSignal::new())?,
        #[cfg(target_os = "linux")]
        SignalKind::Eventfd => {
            use color_eyre::eyre::WrapErr;
            let signal = hyphae::EventFd::new().context("creating an eventfd")?;
            scenario::run(&opts, signal)?
        }
        #[cfg(not(target_os = "linux"))]
        SignalKind::Eventfd => {
            use color_eyre::{eyre::eyre, Help};
            return Err(eyre!("the eventfd signal is only available on Linux"))
                .suggestion("use `--signal thread` instead");
        }
    };

    report.print(opts.output.color);

    if !report.verdict.is_ok() {
        bail!(
            "{} lost, {} duplicated, {} out of order",
            report.verdict.lost,
            report.verdict.duplicated,
            report.verdict.out_of_order
        );
    }

    Ok(())
}
