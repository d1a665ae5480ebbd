//! Storage backends for bucket records.

use std::time::Duration;

use config::StorageConfig;

use crate::bucket::{BucketState, Decision, Mode};
use crate::request::BucketRequest;

pub mod memory;
pub mod redis;
mod redis_pool;

pub use self::memory::InMemoryStorage;
pub use self::redis::RedisStorage;

/// Trait for bucket storage backends.
///
/// An implementation must run the whole read-refill-consume-write sequence of
/// [`RateLimitStorage::evaluate`] as one unit that no other evaluation of the same key can
/// interleave with. Evaluations of different keys must not wait on each other.
#[allow(async_fn_in_trait)]
pub trait RateLimitStorage: Send + Sync {
    /// Atomically evaluate one request against its bucket.
    async fn evaluate(&self, request: &BucketRequest) -> Result<Decision, StorageError>;

    /// Read the current state of a bucket without changing it. Expired buckets read as `None`.
    async fn snapshot(&self, key: &str, mode: Mode) -> Result<Option<BucketState>, StorageError>;
}

/// Storage backend selected by configuration.
pub enum Storage {
    /// Process-local buckets.
    Memory(InMemoryStorage),
    /// Buckets shared through Redis.
    Redis(RedisStorage),
}

impl Storage {
    /// Create the backend described by the configuration.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        match config {
            StorageConfig::Memory => Ok(Storage::Memory(InMemoryStorage::new())),
            StorageConfig::Redis(redis_config) => Ok(Storage::Redis(RedisStorage::new(redis_config).await?)),
        }
    }

    /// Backend name used in logs and metric attributes.
    pub fn backend(&self) -> &'static str {
        match self {
            Storage::Memory(_) => "memory",
            Storage::Redis(_) => "redis",
        }
    }
}

impl From<InMemoryStorage> for Storage {
    fn from(storage: InMemoryStorage) -> Self {
        Storage::Memory(storage)
    }
}

impl From<RedisStorage> for Storage {
    fn from(storage: RedisStorage) -> Self {
        Storage::Redis(storage)
    }
}

impl RateLimitStorage for Storage {
    async fn evaluate(&self, request: &BucketRequest) -> Result<Decision, StorageError> {
        match self {
            Storage::Memory(storage) => storage.evaluate(request).await,
            Storage::Redis(storage) => storage.evaluate(request).await,
        }
    }

    async fn snapshot(&self, key: &str, mode: Mode) -> Result<Option<BucketState>, StorageError> {
        match self {
            Storage::Memory(storage) => storage.snapshot(key, mode).await,
            Storage::Redis(storage) => storage.snapshot(key, mode).await,
        }
    }
}

/// Errors that can occur in storage backends.
///
/// All of them are transport failures from the caller's point of view. No variant is
/// retried here; retry policy belongs to the caller or to the pool.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The store could not be reached or the connection broke.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No pooled connection became available in time.
    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    /// The round-trip took longer than the configured response timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The store rejected or failed the command.
    #[error("Query error: {0}")]
    Query(String),

    /// Internal storage error.
    #[error("Storage error: {0}")]
    Internal(String),
}
