//! Evaluation requests.

use std::time::Duration;

use config::{EXPIRY_MULTIPLIERS, Reservation};

use crate::bucket::{Mode, Quota};
use crate::error::RateLimitError;

/// One validated evaluation of a bucket.
#[derive(Debug, Clone)]
pub struct BucketRequest {
    key: String,
    quota: Quota,
    permits: u32,
    mode: Mode,
    reservation: Reservation,
    expiry_multiplier: u32,
}

impl BucketRequest {
    /// Create a new builder for a bucket request.
    pub fn builder() -> BucketRequestBuilder {
        BucketRequestBuilder::default()
    }

    /// Caller-chosen bucket identifier. Distinct keys are independent buckets.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Refill rate used for this evaluation.
    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// Permits this call wants to consume.
    pub fn permits(&self) -> u32 {
        self.permits
    }

    /// Decision policy.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Slot booking policy, only relevant in wait-time mode.
    pub fn reservation(&self) -> Reservation {
        self.reservation
    }

    /// How long the bucket record survives without being touched.
    pub fn ttl(&self) -> Duration {
        self.quota.duration().saturating_mul(self.expiry_multiplier)
    }
}

/// Builder for creating bucket requests.
#[derive(Debug, Default)]
pub struct BucketRequestBuilder {
    key: Option<String>,
    quota: Option<Quota>,
    permits: Option<u32>,
    mode: Mode,
    reservation: Reservation,
    expiry_multiplier: Option<u32>,
}

impl BucketRequestBuilder {
    /// Set the bucket key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the refill rate.
    pub fn quota(mut self, quota: Quota) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Set the number of permits to consume. Defaults to one.
    pub fn permits(mut self, permits: u32) -> Self {
        self.permits = Some(permits);
        self
    }

    /// Set the decision policy. Defaults to wait-time.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the slot booking policy. Defaults to guarded.
    pub fn reservation(mut self, reservation: Reservation) -> Self {
        self.reservation = reservation;
        self
    }

    /// Set the record expiry as a multiple of the quota duration. Defaults to two.
    pub fn expiry_multiplier(mut self, multiplier: u32) -> Self {
        self.expiry_multiplier = Some(multiplier);
        self
    }

    /// Validate and build the bucket request.
    pub fn build(self) -> Result<BucketRequest, RateLimitError> {
        let key = self.key.unwrap_or_default();

        if key.is_empty() {
            return Err(RateLimitError::invalid("bucket key must not be empty"));
        }

        let Some(quota) = self.quota else {
            return Err(RateLimitError::invalid("a quota is required"));
        };

        let permits = self.permits.unwrap_or(1);

        if permits == 0 {
            return Err(RateLimitError::invalid("required permits must be positive"));
        }

        let expiry_multiplier = self.expiry_multiplier.unwrap_or(*EXPIRY_MULTIPLIERS.start());

        if !EXPIRY_MULTIPLIERS.contains(&expiry_multiplier) {
            return Err(RateLimitError::invalid(format!(
                "expiry multiplier must be between {} and {}, got {expiry_multiplier}",
                EXPIRY_MULTIPLIERS.start(),
                EXPIRY_MULTIPLIERS.end()
            )));
        }

        Ok(BucketRequest {
            key,
            quota,
            permits,
            mode: self.mode,
            reservation: self.reservation,
            expiry_multiplier,
        })
    }
}
