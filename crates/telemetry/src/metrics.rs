//! Instruments and the OTLP export pipeline.

mod names;
mod recorder;

pub use names::*;
pub use opentelemetry::metrics::{Counter, Histogram};
pub use recorder::Recorder;

use anyhow::Context;
use config::{MetricsExportConfig, OtlpProtocol, TelemetryConfig};
use opentelemetry::KeyValue;
use opentelemetry::metrics::Meter;
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

const SCOPE: &str = "turnstile";

/// Bucket boundaries in milliseconds for evaluation latency. In-memory evaluations fall in
/// the sub-millisecond buckets, Redis round-trips in the low milliseconds, and the top
/// buckets reach the default one second response timeout.
pub const EVALUATION_DURATION_BOUNDARIES: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0,
];

/// Meter owning every Turnstile instrument.
pub fn meter() -> Meter {
    opentelemetry::global::meter(SCOPE)
}

/// Histogram of [`RATE_LIMIT_EVALUATION_DURATION`].
pub fn evaluation_duration() -> Histogram<f64> {
    meter()
        .f64_histogram(RATE_LIMIT_EVALUATION_DURATION)
        .with_description("Duration of one bucket evaluation, including the storage round-trip")
        .with_unit("ms")
        .with_boundaries(EVALUATION_DURATION_BOUNDARIES.to_vec())
        .build()
}

/// Counter of [`RATE_LIMIT_POOL_IDLE_CLOSED`].
pub fn pool_idle_closed() -> Counter<u64> {
    meter()
        .u64_counter(RATE_LIMIT_POOL_IDLE_CLOSED)
        .with_description("Pooled Redis connections closed after sitting idle")
        .build()
}

pub(crate) fn exporting_provider(
    config: &TelemetryConfig,
    export: &MetricsExportConfig,
) -> anyhow::Result<SdkMeterProvider> {
    let endpoint = export.collector_endpoint();

    let exporter = match export.protocol {
        OtlpProtocol::Grpc => MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(export.timeout)
            .build(),
        OtlpProtocol::Http => MetricExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .with_timeout(export.timeout)
            .build(),
    }
    .with_context(|| format!("failed to create the {:?} metrics exporter for {endpoint}", export.protocol))?;

    let reader = PeriodicReader::builder(exporter).with_interval(export.interval).build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource(config))
        .with_reader(reader)
        .build())
}

fn resource(config: &TelemetryConfig) -> Resource {
    let attributes = config
        .resource_attributes
        .iter()
        .map(|(key, value)| KeyValue::new(key.clone(), value.clone()));

    Resource::builder()
        .with_service_name(config.service_name().to_string())
        .with_attributes(attributes)
        .build()
}
