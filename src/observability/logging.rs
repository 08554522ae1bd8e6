//! Structured logging configuration.

use crate::config::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Default filter directive when nothing else is configured.
const DEFAULT_FILTER: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name; anything other than `json` is pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Event filter.
    pub filter: EnvFilter,
    /// Output format.
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Builds logging configuration from config settings.
    ///
    /// The filter comes from the settings, then `RUST_LOG`, then `info`. An
    /// unparseable directive falls back to the default.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>) -> Self {
        let directive = settings
            .and_then(|s| s.filter.clone())
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let format = settings
            .and_then(|s| s.format.as_deref())
            .map(LogFormat::parse)
            .unwrap_or_default();
        Self { filter, format }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::from_settings(None)
    }
}
