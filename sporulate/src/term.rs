use clap::{ArgGroup, Args, ValueEnum};
use std::fmt;

pub use owo_colors::{style, OwoColorize, Style};

const ARG_GROUP: &str = "output-opts";

#[derive(Debug, Args)]
#[command(
    next_help_heading = "Output Options",
    group = ArgGroup::new(ARG_GROUP).multiple(true),
)]
pub struct OutputOptions {
    /// When to color the report and log output.
    #[clap(
        long,
        env = "SPORULATE_COLOR",
        value_enum,
        default_value_t = ColorMode::Auto,
        global = true,
        group = ARG_GROUP,
    )]
    pub color: ColorMode,

    /// Configures logging, as an `EnvFilter` directive.
    ///
    /// `hyphae=debug` logs every tick of the event loop.
    #[clap(
        short,
        long,
        env = "RUST_LOG",
        default_value = "sporulate=info,warn",
        global = true,
        group = ARG_GROUP,
    )]
    pub log: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
#[clap(rename_all = "lower")]
pub enum ColorMode {
    /// Color each output stream only if it is a terminal.
    Auto,
    /// Always color output.
    Always,
    /// Never color output.
    Never,
}

/// The streams sporulate writes to. The report goes to stdout and logs go
/// to stderr, so each is colored on its own.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stream {
    Stdout,
    Stderr,
}

// === impl OutputOptions ===

impl OutputOptions {
    pub fn init(&self) -> color_eyre::Result<()> {
        self.trace_init()
    }
}

// === impl ColorMode ===

impl ColorMode {
    /// Returns `true` if output written to `stream` should be colored.
    pub fn colors(self, stream: Stream) -> bool {
        match self {
            ColorMode::Auto => atty::is(stream.into()),
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }

    /// Returns `style` if `stream` is colored, or a plain style if not.
    pub fn style_for(self, stream: Stream, style: Style) -> Style {
        if self.colors(stream) {
            style
        } else {
            Style::new()
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            ColorMode::Auto => "auto",
            ColorMode::Always => "always",
            ColorMode::Never => "never",
        })
    }
}

// === impl Stream ===

impl From<Stream> for atty::Stream {
    fn from(stream: Stream) -> Self {
        match stream {
            Stream::Stdout => atty::Stream::Stdout,
            Stream::Stderr => atty::Stream::Stderr,
        }
    }
}
