//! Rate limiting configuration structures.

use std::ops::RangeInclusive;
use std::time::Duration;

use duration_str::deserialize_option_duration;
use secrecy::SecretString;
use serde::Deserialize;

/// Allowed multiples of a quota duration for the idle expiry of a bucket record.
pub const EXPIRY_MULTIPLIERS: RangeInclusive<u32> = 2..=5;

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Idle buckets expire after this many quota durations without a call.
    #[serde(default = "default_expiry_multiplier")]
    pub expiry_multiplier: u32,
    /// How wait-time buckets hand out future slots.
    #[serde(default)]
    pub reservation: Reservation,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            expiry_multiplier: default_expiry_multiplier(),
            reservation: Reservation::default(),
        }
    }
}

impl RateLimitConfig {
    /// Checks the values serde cannot express as types.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !EXPIRY_MULTIPLIERS.contains(&self.expiry_multiplier) {
            anyhow::bail!(
                "rate_limits.expiry_multiplier must be between {} and {}, got {}",
                EXPIRY_MULTIPLIERS.start(),
                EXPIRY_MULTIPLIERS.end(),
                self.expiry_multiplier
            );
        }

        if let StorageConfig::Redis(redis) = &self.storage
            && redis.password.is_none()
            && redis.username.is_some()
        {
            anyhow::bail!("rate_limits.storage.username requires a password");
        }

        Ok(())
    }
}

fn default_expiry_multiplier() -> u32 {
    2
}

/// Slot booking policy for wait-time buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reservation {
    /// Only a caller whose slot is available right now books the next one.
    /// Everybody else is told how long until the booked slot and has to come back.
    #[default]
    Guarded,
    /// Every caller books the next free slot and is told how long until it starts.
    Queued,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (default). Buckets are only shared within one process.
    #[default]
    Memory,
    /// Redis storage with configuration.
    Redis(Box<RedisConfig>),
}

/// Redis storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Key prefix for all bucket records.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: Option<String>,
    /// Response timeout for one bucket evaluation.
    #[serde(
        default = "default_response_timeout",
        deserialize_with = "deserialize_option_duration"
    )]
    pub response_timeout: Option<Duration>,
    /// User sent with `AUTH` when a connection is dialed.
    pub username: Option<String>,
    /// Password sent with `AUTH` when a connection is dialed.
    pub password: Option<SecretString>,
}

fn default_key_prefix() -> Option<String> {
    Some("turnstile:".to_string())
}

fn default_response_timeout() -> Option<Duration> {
    Some(Duration::from_secs(1))
}

/// Redis connection pool configuration. Omitted fields keep their default values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections, idle and active.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout for the health check run when a connection is borrowed.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
    /// Connections unused for longer than this are closed.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub idle_timeout: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(5)),
            timeout_wait: Some(Duration::from_secs(5)),
            timeout_recycle: Some(Duration::from_secs(300)),
            idle_timeout: Some(Duration::from_secs(240)),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Enable TLS (automatically enabled for rediss:// URLs).
    pub enabled: bool,
    /// Allow insecure connections (skip certificate validation).
    pub insecure: Option<bool>,
    /// Path to CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<String>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            pool: RedisPoolConfig::default(),
            tls: None,
            key_prefix: default_key_prefix(),
            response_timeout: default_response_timeout(),
            username: None,
            password: None,
        }
    }
}
