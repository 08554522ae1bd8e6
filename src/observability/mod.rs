//! Observability: structured logging and metrics.
//!
//! The library itself only emits `tracing` events and `metrics` samples.
//! Embedding applications call [`init`] once to install a subscriber and,
//! optionally, a Prometheus recorder.

mod logging;
mod metrics;

pub use logging::{LogFormat, LoggingConfig};
pub use metrics::{MetricsConfig, install_prometheus};

use crate::config::MemoryConfig;
use crate::{Error, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Full observability configuration.
#[derive(Debug)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl ObservabilityConfig {
    /// Builds observability configuration from the memory config and env.
    #[must_use]
    pub fn from_memory_config(config: &MemoryConfig) -> Self {
        Self {
            logging: LoggingConfig::from_settings(Some(&config.logging)),
            metrics: MetricsConfig::from_env(),
        }
    }
}

/// Handle for installed observability components.
#[derive(Debug, Default)]
pub struct ObservabilityHandle {
    /// Prometheus handle, when metrics are enabled.
    pub prometheus: Option<PrometheusHandle>,
}

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Initializes logging and metrics for the process.
///
/// # Errors
///
/// Returns an error if observability has already been initialized or if a
/// global subscriber or recorder is already installed.
pub fn init(config: ObservabilityConfig) -> Result<ObservabilityHandle> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "observability already initialized".to_string(),
        });
    }

    let prometheus = install_prometheus(&config.metrics)?;

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(true),
                )
                .with(config.logging.filter)
                .try_init()
                .map_err(init_error)?;
        },
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().pretty().with_target(true))
                .with(config.logging.filter)
                .try_init()
                .map_err(init_error)?;
        },
    }

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "failed to mark observability initialized".to_string(),
        })?;

    tracing::debug!(format = ?config.logging.format, "Observability initialized");
    Ok(ObservabilityHandle { prometheus })
}

/// Initializes observability from a memory config with env overrides.
///
/// # Errors
///
/// See [`init`].
pub fn init_from_config(config: &MemoryConfig) -> Result<ObservabilityHandle> {
    init(ObservabilityConfig::from_memory_config(config))
}

#[allow(clippy::needless_pass_by_value)]
fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: e.to_string(),
    }
}
