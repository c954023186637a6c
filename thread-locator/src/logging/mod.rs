//! Logging setup.
//!
//! `RUST_LOG` takes precedence over [`DEFAULT_LOG_FILTER`]; `--verbose` and
//! `--quiet` replace both. Timestamps are rendered in local time.

use chrono::Local;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "thread_locator=info,imageboard_api=info";

/// Timer formatting timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Verbosity selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (_, true) => Verbosity::Quiet,
            (true, false) => Verbosity::Verbose,
            (false, false) => Verbosity::Normal,
        }
    }

    fn filter(self) -> EnvFilter {
        match self {
            Verbosity::Quiet => EnvFilter::new("error"),
            Verbosity::Verbose => EnvFilter::new("thread_locator=debug,imageboard_api=debug"),
            Verbosity::Normal => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        }
    }
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_logging(verbosity: Verbosity, json: bool) -> crate::Result<()> {
    let registry = tracing_subscriber::registry().with(verbosity.filter());

    let result = if json {
        registry
            .with(fmt::layer().json().with_timer(LocalTimer))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_timer(LocalTimer)
                    .with_target(verbosity == Verbosity::Verbose),
            )
            .try_init()
    };

    result.map_err(|e| crate::Error::Other(format!("Failed to initialize logging: {}", e)))
}
