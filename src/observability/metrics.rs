//! Prometheus metrics.

use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Metrics configuration.
#[derive(Debug, Clone, Default)]
pub struct MetricsConfig {
    /// Whether to install a recorder at all.
    pub enabled: bool,
    /// Address for the scrape endpoint; `None` installs the recorder only.
    pub listen_addr: Option<SocketAddr>,
}

impl MetricsConfig {
    /// Builds metrics configuration from `GROMOZEKA_MEMORY_METRICS_*` env vars.
    #[must_use]
    pub fn from_env() -> Self {
        let enabled = std::env::var("GROMOZEKA_MEMORY_METRICS_ENABLED")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(false);
        let listen_addr = std::env::var("GROMOZEKA_MEMORY_METRICS_ADDR")
            .ok()
            .and_then(|v| v.parse().ok());
        Self {
            enabled,
            listen_addr,
        }
    }
}

/// Installs the Prometheus recorder, optionally with an HTTP listener.
///
/// Returns `None` when metrics are disabled. With a listener the exporter
/// must be installed from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed or the
/// listener cannot bind.
pub fn install_prometheus(config: &MetricsConfig) -> Result<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let builder = PrometheusBuilder::new();
    let handle = match config.listen_addr {
        Some(addr) => install_listener(builder.with_http_listener(addr))?,
        None => builder
            .install_recorder()
            .map_err(|e| Error::failed("metrics_recorder_install", e))?,
    };

    tracing::debug!(listen_addr = ?config.listen_addr, "Prometheus metrics installed");
    Ok(Some(handle))
}

fn install_listener(builder: PrometheusBuilder) -> Result<PrometheusHandle> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| Error::failed("metrics_listener_install", e))?;
    let (recorder, exporter) = {
        let _guard = runtime.enter();
        builder
            .build()
            .map_err(|e| Error::failed("metrics_exporter_build", e))?
    };
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| Error::failed("metrics_recorder_install", e))?;
    runtime.spawn(exporter);
    Ok(handle)
}
