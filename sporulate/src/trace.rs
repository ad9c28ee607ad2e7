use crate::term::{style, ColorMode, OutputOptions, OwoColorize, Stream, Style};
use color_eyre::eyre::WrapErr;
use heck::TitleCase;
use std::fmt::{self, Write};
use tracing::{field::Field, Event, Level, Subscriber};
use tracing_subscriber::{
    field::Visit,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
    EnvFilter,
};

impl OutputOptions {
    pub fn trace_init(&self) -> color_eyre::Result<()> {
        use tracing_subscriber::prelude::*;

        let filter = self
            .log
            .parse::<EnvFilter>()
            .with_context(|| format!("invalid log filter {:?}", self.log))?;
        let fmt = tracing_subscriber::fmt::layer()
            .event_format(TagFormatter {
                palette: Palette::new(self.color),
            })
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(fmt)
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()?;
        Ok(())
    }
}

/// Formats `INFO` messages that start with a short verb ("running 2
/// producers") as a right-aligned, colored tag followed by the rest of the
/// message. Every other event gets a level prefix. Structured fields follow
/// the message as dimmed `name=value` pairs.
#[derive(Debug)]
struct TagFormatter {
    palette: Palette,
}

/// Splits an event into its message and its other fields.
#[derive(Default)]
struct Collect {
    message: Option<String>,
    fields: String,
}

#[derive(Debug)]
struct Palette {
    error: Style,
    warn: Style,
    info: Style,
    debug: Style,
    trace: Style,
    bold: Style,
    dimmed: Style,
}

const TAG_WIDTH: usize = 12;

impl<S, N> FormatEvent<S, N> for TagFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut collect = Collect::default();
        event.record(&mut collect);

        let level = *event.metadata().level();
        let message = collect.message.as_deref().unwrap_or("");
        match split_tag(message).filter(|_| level == Level::INFO) {
            Some((tag, rest)) => write!(
                writer,
                "{:>width$} {}",
                tag.to_title_case().style(self.palette.info),
                rest,
                width = TAG_WIDTH
            )?,
            None => {
                let (name, style) = self.palette.level(level);
                write!(
                    writer,
                    "{}{} {}",
                    name.style(style),
                    ":".style(self.palette.bold),
                    message.style(self.palette.bold)
                )?;
            }
        }

        if !collect.fields.is_empty() {
            write!(writer, " {}", collect.fields.style(self.palette.dimmed))?;
        }
        writer.write_char('\n')
    }
}

/// Returns the leading word of `message` and the rest of it, if the word is
/// short enough to be right-aligned as a tag.
fn split_tag(message: &str) -> Option<(&str, &str)> {
    message
        .split_once(' ')
        .filter(|(tag, _)| !tag.is_empty() && tag.len() <= TAG_WIDTH)
}

// === impl Collect ===

impl Visit for Collect {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_owned());
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={:?}", field.name(), value);
    }
}

// === impl Palette ===

impl Palette {
    fn new(colors: ColorMode) -> Self {
        let paint = |style: Style| colors.style_for(Stream::Stderr, style);
        Self {
            error: paint(style().red().bold()),
            warn: paint(style().yellow().bold()),
            info: paint(style().green().bold()),
            debug: paint(style().blue().bold()),
            trace: paint(style().purple().bold()),
            bold: paint(style().bold()),
            dimmed: paint(style().dimmed()),
        }
    }

    fn level(&self, level: Level) -> (&'static str, Style) {
        match level {
            Level::ERROR => ("error", self.error),
            Level::WARN => ("warning", self.warn),
            Level::INFO => ("info", self.info),
            Level::DEBUG => ("debug", self.debug),
            Level::TRACE => ("trace", self.trace),
        }
    }
}
