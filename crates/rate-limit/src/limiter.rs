//! The rate limiter facade.

use std::sync::Arc;
use std::time::Duration;

use config::{RateLimitConfig, Reservation};
use telemetry::metrics::{self, Histogram, Recorder};

use crate::bucket::{BucketState, Decision, Mode, Quota};
use crate::error::RateLimitError;
use crate::request::BucketRequest;
use crate::storage::{RateLimitStorage, Storage};

/// Evaluates token buckets against a configured storage backend.
///
/// Construct it once and clone it where needed; clones share the backend and its
/// connection pool.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Storage,
    reservation: Reservation,
    expiry_multiplier: u32,
    evaluation_duration: Histogram<f64>,
}

impl RateLimiter {
    /// Create a rate limiter with the storage backend described by the configuration.
    pub async fn new(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        config
            .validate()
            .map_err(|e| RateLimitError::InvalidArgument(e.to_string()))?;

        let storage = Storage::from_config(&config.storage).await?;

        log::info!("Rate limiter initialized with {} storage", storage.backend());

        Ok(Self::with_storage(storage, config))
    }

    /// Create a rate limiter around an already constructed backend.
    ///
    /// The storage section of `config` is ignored.
    pub fn with_storage(storage: impl Into<Storage>, config: &RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage: storage.into(),
                reservation: config.reservation,
                expiry_multiplier: config.expiry_multiplier,
                evaluation_duration: metrics::evaluation_duration(),
            }),
        }
    }

    /// Name of the storage backend in use.
    pub fn backend(&self) -> &'static str {
        self.inner.storage.backend()
    }

    /// Build a request carrying this limiter's reservation policy and record expiry.
    pub fn request(
        &self,
        key: impl Into<String>,
        quota: Quota,
        permits: u32,
        mode: Mode,
    ) -> Result<BucketRequest, RateLimitError> {
        BucketRequest::builder()
            .key(key)
            .quota(quota)
            .permits(permits)
            .mode(mode)
            .reservation(self.inner.reservation)
            .expiry_multiplier(self.inner.expiry_multiplier)
            .build()
    }

    /// Take `required` permits from a bucket refilling `permits_per_duration` every
    /// `duration`, and return how long the caller has to wait before using them.
    ///
    /// Never rejects. A zero wait means the permits are usable right away.
    pub async fn take(
        &self,
        key: &str,
        duration: Duration,
        permits_per_duration: u32,
        required: u32,
    ) -> Result<Duration, RateLimitError> {
        let quota = Quota::new(permits_per_duration, duration)?;
        let request = self.request(key, quota, required, Mode::WaitTime)?;

        match self.evaluate(&request).await? {
            Decision::Wait(wait) => Ok(wait),
            Decision::Admitted | Decision::Rejected => Ok(Duration::ZERO),
        }
    }

    /// Try to take `required` permits from a bucket holding at most `limit` permits and
    /// refilling `limit` every `duration`.
    ///
    /// Returns `false` without consuming anything when not enough permits are stored.
    pub async fn allow(&self, key: &str, duration: Duration, limit: u32, required: u32) -> Result<bool, RateLimitError> {
        let quota = Quota::new(limit, duration)?;
        let request = self.request(key, quota, required, Mode::Admission)?;

        Ok(self.evaluate(&request).await? == Decision::Admitted)
    }

    /// Evaluate a prepared request.
    pub async fn evaluate(&self, request: &BucketRequest) -> Result<Decision, RateLimitError> {
        let mut recorder = Recorder::start(&self.inner.evaluation_duration);
        recorder.push_attribute("mode", request.mode().as_str());
        recorder.push_attribute("backend", self.backend());

        match self.inner.storage.evaluate(request).await {
            Ok(decision) => {
                log::debug!(
                    "Rate limit '{}' ({} permits, {}): {}",
                    request.key(),
                    request.permits(),
                    request.mode(),
                    decision.outcome()
                );

                recorder.push_attribute("outcome", decision.outcome());
                recorder.record();

                Ok(decision)
            }
            Err(e) => {
                log::warn!("Rate limit evaluation for '{}' failed: {e}", request.key());

                recorder.push_attribute("outcome", "error");
                recorder.record();

                Err(e.into())
            }
        }
    }

    /// Read the stored state of a bucket without changing it.
    pub async fn inspect(&self, key: &str, mode: Mode) -> Result<Option<BucketState>, RateLimitError> {
        if key.is_empty() {
            return Err(RateLimitError::invalid("bucket key must not be empty"));
        }

        Ok(self.inner.storage.snapshot(key, mode).await?)
    }
}
