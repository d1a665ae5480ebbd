//! Metrics for Turnstile.
//!
//! Library crates create their instruments through [`metrics`] whether or not [`init`] ran.
//! Until an exporter is installed, the OpenTelemetry global no-op meter swallows every
//! recording, so instruments must be created after [`init`] to be exported.

pub mod metrics;

use config::TelemetryConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;

/// Keeps the metrics pipeline alive. Dropping it exports what is left and shuts it down.
pub struct TelemetryGuard {
    provider: Option<SdkMeterProvider>,
}

impl TelemetryGuard {
    /// Whether recordings are pushed to a collector.
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }

    /// Push everything recorded so far. Does nothing when export is disabled.
    pub fn force_flush(&self) -> anyhow::Result<()> {
        let Some(provider) = &self.provider else {
            return Ok(());
        };

        provider
            .force_flush()
            .map_err(|e| anyhow::anyhow!("failed to flush metrics: {e}"))
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            log::warn!("Failed to shut down the metrics exporter: {e}");
        }
    }
}

/// Install the OTLP metrics pipeline when `config` enables it.
///
/// Must run inside a Tokio runtime when export is enabled.
pub fn init(config: &TelemetryConfig) -> anyhow::Result<TelemetryGuard> {
    let Some(export) = config.metrics_export() else {
        log::debug!("Metrics export is disabled");
        return Ok(TelemetryGuard { provider: None });
    };

    let provider = metrics::exporting_provider(config, export)?;
    opentelemetry::global::set_meter_provider(provider.clone());

    log::info!(
        "Exporting metrics for '{}' to {} every {:?}",
        config.service_name(),
        export.collector_endpoint(),
        export.interval
    );

    Ok(TelemetryGuard {
        provider: Some(provider),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_export_installs_nothing() {
        let guard = init(&TelemetryConfig::default()).unwrap();

        assert!(!guard.is_exporting());
        assert!(guard.force_flush().is_ok());
    }
}
