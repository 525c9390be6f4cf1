//! Tracing setup for the library and the CLI.
//!
//! Sessions open an `info_span!("session", id, order)`, so every instrument
//! and dataset event below it carries the session id. This module installs
//! the global subscriber that prints them:
//!
//! - `Pretty` for interactive terminals
//! - `Compact` single-line output (the CLI default)
//! - `Json` lines for log collectors
//!
//! `RUST_LOG` takes precedence over the configured level.
//!
//! # Example
//! ```no_run
//! use iv_sweep::{config::IvConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IvConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!(component = "cli", "Application started");
//! # Ok(())
//! # }
//! ```

use crate::config::IvConfig;
use crate::error::{AppResult, IvError};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Log line layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Multi-line, colored
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Subscriber options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Most verbose level printed when `RUST_LOG` is unset
    pub level: Level,
    /// Line layout
    pub format: OutputFormat,
    /// Also log span open and close (session start and end)
    pub with_span_events: bool,
    /// Source file and line on each event
    pub with_file_and_line: bool,
    /// ANSI colors; only the pretty layout uses them
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl TracingConfig {
    /// Options at `level` with the compact layout
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::default(),
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }

    /// Options from `application.log_level`
    pub fn from_config(config: &IvConfig) -> AppResult<Self> {
        parse_log_level(&config.application.log_level).map(Self::new)
    }

    /// Set the line layout
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Log span open and close
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.with_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn format_layer(&self) -> BoxedLayer {
        let base = fmt::layer()
            .with_span_events(self.span_events())
            .with_file(self.with_file_and_line)
            .with_line_number(self.with_file_and_line);

        match self.format {
            OutputFormat::Pretty => base.pretty().with_ansi(self.with_ansi).boxed(),
            OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
            OutputFormat::Json => base.json().with_current_span(true).boxed(),
        }
    }
}

/// Install the subscriber described by `application.log_level`
pub fn init_from_config(config: &IvConfig) -> AppResult<()> {
    init(TracingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// Returns `Ok(())` without changes when a subscriber is already installed,
/// e.g. by a test harness or an embedding host.
pub fn init(config: TracingConfig) -> AppResult<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    tracing_subscriber::registry()
        .with(config.format_layer().with_filter(filter))
        .try_init()
        .map_err(|e| IvError::Internal(format!("tracing init failed: {}", e)))
}

/// Parse `trace`, `debug`, `info`, `warn` or `error` (any case)
pub fn parse_log_level(level: &str) -> AppResult<Level> {
    Level::from_str(level.trim()).map_err(|_| {
        IvError::Validation(format!(
            "invalid log level '{}', expected trace, debug, info, warn or error",
            level
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("Debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level(" WARN ").unwrap(), Level::WARN);
        assert!(matches!(
            parse_log_level("verbose"),
            Err(IvError::Validation(_))
        ));
    }

    #[test]
    fn level_comes_from_application_section() {
        let mut config = IvConfig::default();
        config.application.log_level = "debug".to_string();
        let tracing_config = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::DEBUG);
        assert_eq!(tracing_config.format, OutputFormat::Compact);
    }

    #[test]
    fn builder_sets_fields() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Json)
            .with_span_events(true)
            .with_ansi(false);

        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.span_events(), FmtSpan::NEW | FmtSpan::CLOSE);
        assert!(!config.with_ansi);
    }
}
