//! Log output for the bottler CLI.
//!
//! Logs go to stderr so stdout carries only results (bottle blocks, file
//! names and dry-run commands). Every run gets a correlation id.

use std::sync::OnceLock;
pub use tracing::Level;
use tracing::Subscriber;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

/// Crates whose events are shown at the configured level.
const LOG_TARGETS: [&str; 6] = [
    "bottler",
    "bottler_cli",
    "bottler_core",
    "bottler_spec",
    "bottler_keg",
    "bottler_oci",
];

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Multi-line, for people
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event, with span context
    Json,
}

/// `--log-level` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Everything
    Trace,
    /// Per-file relocation and scan detail
    Debug,
    /// Pipeline milestones
    Info,
    /// Skipped packages and leftover install locations (default)
    Warn,
    /// Errors only
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Logging setup for one run.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format.
    pub format: LogFormat,
    /// Level for bottler's own crates when `RUST_LOG` is unset.
    pub level: Level,
    /// Filter directive used instead of `RUST_LOG` and `level`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: Level::WARN,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Filter directive enabling `level` for every bottler crate.
    #[must_use]
    pub fn default_directive(&self) -> String {
        let level = self.level.as_str().to_lowercase();
        LOG_TARGETS.map(|target| format!("{target}={level}")).join(",")
    }

    fn env_filter(&self) -> miette::Result<EnvFilter> {
        let filter = match &self.filter {
            Some(directive) => EnvFilter::try_new(directive),
            None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(self.default_directive())),
        };
        filter.map_err(|e| miette::miette!("Invalid log filter: {e}"))
    }
}

static RUN_ID: OnceLock<Uuid> = OnceLock::new();

/// Id attached to every command span of this process.
pub fn correlation_id() -> Uuid {
    *RUN_ID.get_or_init(Uuid::new_v4)
}

fn stderr_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => layer.pretty().with_target(true).boxed(),
        LogFormat::Compact => layer.compact().with_target(false).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter does not parse or a subscriber is already
/// installed.
pub fn init_tracing(config: &LogConfig) -> miette::Result<()> {
    tracing_subscriber::registry()
        .with(stderr_layer(config.format))
        .with(config.env_filter()?)
        .try_init()
        .map_err(|e| miette::miette!("Could not install log subscriber: {e}"))?;

    tracing::info!(
        correlation_id = %correlation_id(),
        version = env!("CARGO_PKG_VERSION"),
        "bottler started"
    );
    Ok(())
}

/// Span wrapping one command, tagged with the run's correlation id.
#[macro_export]
macro_rules! command_span {
    ($command:expr) => {
        tracing::info_span!(
            "command",
            command = %$command,
            correlation_id = %$crate::tracing::correlation_id(),
            started = %chrono::Utc::now().to_rfc3339(),
        )
    };
}
