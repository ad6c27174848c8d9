//! Logging bootstrap for SWAP services
//!
//! Console output always; an optional daily-rolling file next to it.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::error::{Error, Result};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs: `timestamp [LEVEL] target: message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] swapgw::gateway: Node 05 discovered`
struct BracketedLevelFormat {
    with_target: bool,
}

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        if self.with_target {
            write!(writer, "{}: ", event.metadata().target())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file writer flushing for the life of the process
static FILE_GUARD: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();

/// Logging section of a service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level applied to the service's own targets when `RUST_LOG` is unset
    pub level: String,
    /// Directory for the rolling log file
    pub log_dir: PathBuf,
    /// Write a daily-rolling log file in addition to the console
    pub file: bool,
    /// JSON lines in the log file instead of the bracketed format
    pub json: bool,
    /// ANSI colours on the console
    pub color: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            file: false,
            json: false,
            color: true,
        }
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise `info,<service>=<level>`
pub fn build_filter(service_name: &str, level: &str) -> Result<EnvFilter> {
    if let Ok(env_str) = std::env::var("RUST_LOG") {
        if !env_str.is_empty() {
            return EnvFilter::try_new(&env_str)
                .map_err(|e| Error::logging(format!("Invalid RUST_LOG '{}': {}", env_str, e)));
        }
    }
    let directive = default_directive(service_name, level);
    EnvFilter::try_new(&directive)
        .map_err(|e| Error::logging(format!("Invalid log level '{}': {}", level, e)))
}

fn default_directive(service_name: &str, level: &str) -> String {
    // Crate targets use underscores
    let target = service_name.replace('-', "_");
    format!("info,{}={},swap_link={}", target, level, level)
}

/// Initialise the global subscriber for `service_name`
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(service_name, &config.level)?;

    let console_layer = fmt::layer()
        .with_ansi(config.color)
        .event_format(BracketedLevelFormat { with_target: false })
        .boxed();

    let file_layer = if config.file {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender =
            tracing_appender::rolling::daily(&config.log_dir, format!("{}.log", service_name));
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        let slot = FILE_GUARD.get_or_init(|| Mutex::new(None));
        match slot.lock() {
            Ok(mut slot) => *slot = Some(guard),
            Err(poisoned) => *poisoned.into_inner() = Some(guard),
        }

        let layer = if config.json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(BracketedLevelFormat { with_target: true })
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::logging(format!("Failed to install subscriber: {}", e)))
}
