//! Distributed token bucket rate limiting.
//!
//! A bucket is identified by a caller-chosen key and refills lazily at a fixed rate. Each
//! evaluation either reports how long the caller has to wait for its permits
//! ([`Mode::WaitTime`]) or admits or rejects the call outright ([`Mode::Admission`]).
//!
//! Buckets live in Redis, where a Lua script evaluates them atomically against the
//! server clock, or in process memory.

#![deny(missing_docs)]

mod bucket;
mod clock;
mod error;
mod limiter;
mod request;
mod storage;

pub use bucket::{BucketState, Decision, MAX_BURST_PERMITS, Mode, Quota};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::RateLimitError;
pub use limiter::RateLimiter;
pub use request::{BucketRequest, BucketRequestBuilder};
pub use storage::{InMemoryStorage, RateLimitStorage, RedisStorage, Storage, StorageError};
