//! Metrics export configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;
use url::Url;

const DEFAULT_SERVICE_NAME: &str = "turnstile";

/// Telemetry configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Reported as `service.name`. Defaults to `turnstile`.
    pub service_name: Option<String>,
    /// Extra resource attributes attached to every exported metric.
    pub resource_attributes: BTreeMap<String, String>,
    /// OTLP export of the rate limiter metrics.
    pub metrics: MetricsExportConfig,
}

impl TelemetryConfig {
    /// Service name reported with every metric.
    pub fn service_name(&self) -> &str {
        self.service_name.as_deref().unwrap_or(DEFAULT_SERVICE_NAME)
    }

    /// The metrics export settings, if export is enabled.
    pub fn metrics_export(&self) -> Option<&MetricsExportConfig> {
        Some(&self.metrics).filter(|metrics| metrics.enabled)
    }
}

/// Where and how often metrics are pushed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsExportConfig {
    /// Push metrics to an OTLP collector. When disabled, instruments record into a no-op meter.
    pub enabled: bool,
    /// Transport to the collector.
    pub protocol: OtlpProtocol,
    /// Collector URL. Defaults to the standard local endpoint of the protocol.
    pub endpoint: Option<Url>,
    /// Deadline for one export request.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Time between two exports.
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
}

impl Default for MetricsExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            protocol: OtlpProtocol::default(),
            endpoint: None,
            timeout: Duration::from_secs(10),
            interval: Duration::from_secs(10),
        }
    }
}

impl MetricsExportConfig {
    /// The configured collector URL, or the default one for the protocol.
    pub fn collector_endpoint(&self) -> &str {
        match &self.endpoint {
            Some(url) => url.as_str(),
            None => self.protocol.default_endpoint(),
        }
    }
}

/// OTLP transport.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    /// gRPC (default)
    #[default]
    Grpc,
    /// HTTP with protobuf bodies
    Http,
}

impl OtlpProtocol {
    /// Collector endpoint of a local OpenTelemetry collector for this transport.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            OtlpProtocol::Grpc => "http://localhost:4317",
            OtlpProtocol::Http => "http://localhost:4318/v1/metrics",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_disabled_by_default() {
        let config = TelemetryConfig::default();

        assert!(config.metrics_export().is_none());
        assert_eq!(config.service_name(), "turnstile");
    }

    #[test]
    fn endpoint_follows_the_protocol() {
        let config: TelemetryConfig = toml::from_str(
            r#"
            [metrics]
            enabled = true
            protocol = "http"
        "#,
        )
        .unwrap();

        let metrics = config.metrics_export().unwrap();
        assert_eq!(metrics.collector_endpoint(), "http://localhost:4318/v1/metrics");
    }

    #[test]
    fn full_metrics_export() {
        let toml = r#"
            service_name = "edge-limiter"

            [resource_attributes]
            region = "eu-west-1"

            [metrics]
            enabled = true
            endpoint = "http://collector:4317"
            timeout = "2s"
            interval = "30s"
        "#;

        let config: TelemetryConfig = toml::from_str(toml).unwrap();
        let metrics = config.metrics_export().unwrap();

        assert_eq!(config.service_name(), "edge-limiter");
        assert_eq!(config.resource_attributes.get("region").map(String::as_str), Some("eu-west-1"));
        assert_eq!(metrics.collector_endpoint(), "http://collector:4317/");

        insta::assert_debug_snapshot!((metrics.protocol, metrics.timeout, metrics.interval), @r"
        (
            Grpc,
            2s,
            30s,
        )
        ");
    }

    #[test]
    fn unknown_exporter_field_is_rejected() {
        let result = toml::from_str::<TelemetryConfig>(
            r#"
            [metrics]
            batch_size = 10
        "#,
        );

        assert!(result.is_err());
    }
}
