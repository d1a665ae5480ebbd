//! Redis-based bucket storage.
//!
//! Every evaluation is a single `EVALSHA` of `bucket.lua`. Redis runs scripts one at a
//! time, which gives the read-refill-consume-write sequence the atomicity it needs across
//! any number of processes, and the script reads the server's `TIME` so all callers agree
//! on the clock.

use std::future::Future;
use std::time::Duration;

use config::{RedisConfig, Reservation};
use deadpool::managed::{PoolError, TimeoutType};
use redis::{RedisError, RedisResult, Script};
use tokio_util::sync::DropGuard;

use super::redis_pool::{self, Pool};
use super::{RateLimitStorage, StorageError};
use crate::bucket::{BucketState, Decision, MAX_BURST_PERMITS, Mode};
use crate::request::BucketRequest;

const BUCKET_SCRIPT: &str = include_str!("bucket.lua");

const STORED_PERMITS: &str = "stored_permits";
const NEXT_FREE_TICKET_MICROS: &str = "next_free_ticket_micros";

/// Redis-based bucket storage implementation.
pub struct RedisStorage {
    pool: Pool,
    script: Script,
    key_prefix: String,
    response_timeout: Option<Duration>,
    _idle_reaper: Option<DropGuard>,
}

impl RedisStorage {
    /// Create a new Redis storage instance and check that the server answers.
    pub async fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let pool = redis_pool::create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        let mut conn = pool.get().await.map_err(pool_error)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to ping Redis server: {e}")))?;

        drop(conn);

        let idle_reaper = config
            .pool
            .idle_timeout
            .map(|idle_timeout| redis_pool::spawn_idle_reaper(pool.clone(), idle_timeout));

        log::debug!("Redis bucket storage ready");

        Ok(Self {
            pool,
            script: Script::new(BUCKET_SCRIPT),
            key_prefix: config.key_prefix.clone().unwrap_or_default(),
            response_timeout: config.response_timeout,
            _idle_reaper: idle_reaper,
        })
    }

    fn record_key(&self, mode: Mode, key: &str) -> String {
        format!("{}{mode}:{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<deadpool::managed::Object<redis_pool::Manager>, StorageError> {
        self.pool.get().await.map_err(pool_error)
    }

    /// Runs one command round-trip under the response timeout.
    async fn round_trip<T>(&self, query: impl Future<Output = RedisResult<T>>) -> Result<T, StorageError> {
        let result = match self.response_timeout {
            Some(limit) => tokio::time::timeout(limit, query)
                .await
                .map_err(|_| StorageError::Timeout(limit))?,
            None => query.await,
        };

        result.map_err(redis_error)
    }
}

impl RateLimitStorage for RedisStorage {
    async fn evaluate(&self, request: &BucketRequest) -> Result<Decision, StorageError> {
        let key = self.record_key(request.mode(), request.key());
        let quota = request.quota();
        let ttl_millis = u64::try_from(request.ttl().as_millis()).unwrap_or(u64::MAX).max(1);

        let reservation = match request.reservation() {
            Reservation::Guarded => "guarded",
            Reservation::Queued => "queued",
        };

        let mut conn = self.connection().await?;

        let reply: i64 = self
            .round_trip(
                self.script
                    .key(&key)
                    .arg(quota.duration_micros())
                    .arg(quota.limit())
                    .arg(request.permits())
                    .arg(request.mode().as_str())
                    .arg(reservation)
                    .arg(ttl_millis)
                    .arg(MAX_BURST_PERMITS as u64)
                    .invoke_async(&mut *conn),
            )
            .await?;

        let decision = match request.mode() {
            Mode::WaitTime => Decision::Wait(Duration::from_micros(u64::try_from(reply).unwrap_or(0))),
            Mode::Admission if reply == 1 => Decision::Admitted,
            Mode::Admission => Decision::Rejected,
        };

        log::debug!("Bucket '{key}' evaluated in Redis: {decision:?}");

        Ok(decision)
    }

    async fn snapshot(&self, key: &str, mode: Mode) -> Result<Option<BucketState>, StorageError> {
        let key = self.record_key(mode, key);
        let mut conn = self.connection().await?;

        let (stored_permits, next_free_ticket_micros): (Option<f64>, Option<f64>) = self
            .round_trip(
                redis::cmd("HMGET")
                    .arg(&key)
                    .arg(STORED_PERMITS)
                    .arg(NEXT_FREE_TICKET_MICROS)
                    .query_async(&mut *conn),
            )
            .await?;

        Ok(stored_permits
            .zip(next_free_ticket_micros)
            .map(|(stored_permits, next_free_ticket_micros)| BucketState {
                stored_permits,
                next_free_ticket_micros,
            }))
    }
}

fn pool_error(error: PoolError<RedisError>) -> StorageError {
    match error {
        PoolError::Timeout(TimeoutType::Wait) => {
            StorageError::PoolExhausted("no Redis connection became available in time".to_string())
        }
        PoolError::Timeout(kind) => StorageError::Connection(format!("Redis connection {kind:?} timed out")),
        PoolError::Backend(e) => StorageError::Connection(e.to_string()),
        PoolError::Closed => StorageError::Connection("Redis connection pool is closed".to_string()),
        other => StorageError::Internal(other.to_string()),
    }
}

fn redis_error(error: RedisError) -> StorageError {
    if error.is_io_error() || error.is_connection_dropped() || error.is_connection_refusal() {
        StorageError::Connection(error.to_string())
    } else {
        StorageError::Query(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_wait_timeout_means_exhausted() {
        let error = pool_error(PoolError::Timeout(TimeoutType::Wait));
        assert!(matches!(error, StorageError::PoolExhausted(_)));

        let error = pool_error(PoolError::Timeout(TimeoutType::Create));
        assert!(matches!(error, StorageError::Connection(_)));

        let error = pool_error(PoolError::Closed);
        assert!(matches!(error, StorageError::Connection(_)));
    }

    #[test]
    fn script_uses_the_same_field_names() {
        assert!(BUCKET_SCRIPT.contains(STORED_PERMITS));
        assert!(BUCKET_SCRIPT.contains(NEXT_FREE_TICKET_MICROS));
    }
}
