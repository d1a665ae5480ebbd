//! Turnstile configuration structures to map the turnstile.toml configuration.

#![deny(missing_docs)]

mod loader;
mod rate_limit;
mod telemetry;

use std::path::Path;

pub use rate_limit::*;
use serde::Deserialize;
pub use telemetry::{MetricsExportConfig, OtlpProtocol, TelemetryConfig};

/// Main configuration structure for Turnstile.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates the values that cannot be checked while deserializing.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.rate_limits.validate()
    }

    /// Settings that are valid but probably not what the operator wants, one message each.
    ///
    /// Loading does not log these; the caller reports them once its logger is installed.
    pub fn warnings(&self) -> Vec<String> {
        loader::warnings(self)
    }
}
