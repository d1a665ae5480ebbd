//! In-memory bucket storage.
//!
//! Records live in a [`DashMap`]. An evaluation holds the map entry for the key while it
//! reads, refills, consumes and writes, so evaluations of one key are serialized while
//! keys on other shards proceed in parallel. Records carry their own expiry deadline and
//! read as absent once it has passed, mirroring the TTL of the Redis backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{RateLimitStorage, StorageError};
use crate::bucket::{self, BucketState, Decision, Mode};
use crate::clock::{Clock, SystemClock};
use crate::request::BucketRequest;

/// Expired records are swept once every this many evaluations.
const SWEEP_INTERVAL: u64 = 4096;

#[derive(Debug, Clone, Copy)]
struct Record {
    state: BucketState,
    expires_at_micros: u64,
}

impl Record {
    fn live_state(&self, now_micros: u64) -> Option<BucketState> {
        (self.expires_at_micros > now_micros).then_some(self.state)
    }
}

/// In-memory bucket storage implementation.
pub struct InMemoryStorage {
    records: DashMap<String, Record>,
    clock: Arc<dyn Clock>,
    evaluations: AtomicU64,
}

impl InMemoryStorage {
    /// Create a new in-memory storage instance using the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Create a new in-memory storage instance reading time from `clock`.
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            records: DashMap::new(),
            clock: Arc::new(clock),
            evaluations: AtomicU64::new(0),
        }
    }

    fn sweep_expired(&self, now_micros: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at_micros > now_micros);

        let removed = before.saturating_sub(self.records.len());

        if removed > 0 {
            log::debug!("Swept {removed} expired buckets from memory");
        }

        removed
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn record_key(mode: Mode, key: &str) -> String {
    format!("{mode}:{key}")
}

impl RateLimitStorage for InMemoryStorage {
    async fn evaluate(&self, request: &BucketRequest) -> Result<Decision, StorageError> {
        let now = self.clock.now_micros();
        let ttl = u64::try_from(request.ttl().as_micros()).unwrap_or(u64::MAX);
        let expires_at_micros = now.saturating_add(ttl);

        let decision = match self.records.entry(record_key(request.mode(), request.key())) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                let transition = bucket::evaluate(record.live_state(now), now, request);

                if let Some(state) = transition.next {
                    record.state = state;
                }

                record.expires_at_micros = expires_at_micros;
                transition.decision
            }
            Entry::Vacant(entry) => {
                let transition = bucket::evaluate(None, now, request);

                if let Some(state) = transition.next {
                    entry.insert(Record {
                        state,
                        expires_at_micros,
                    });
                }

                transition.decision
            }
        };

        log::debug!(
            "Bucket '{}' ({}) evaluated in memory: {decision:?}",
            request.key(),
            request.mode()
        );

        if self.evaluations.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.sweep_expired(now);
        }

        Ok(decision)
    }

    async fn snapshot(&self, key: &str, mode: Mode) -> Result<Option<BucketState>, StorageError> {
        let now = self.clock.now_micros();

        Ok(self
            .records
            .get(&record_key(mode, key))
            .and_then(|record| record.live_state(now)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use config::Reservation;

    use super::*;
    use crate::bucket::Quota;
    use crate::clock::ManualClock;

    const START: u64 = 1_700_000_000_000_000;

    fn request(key: &str, mode: Mode, limit: u32, seconds: u64, permits: u32) -> BucketRequest {
        BucketRequest::builder()
            .key(key)
            .quota(Quota::new(limit, Duration::from_secs(seconds)).unwrap())
            .permits(permits)
            .mode(mode)
            .reservation(Reservation::Guarded)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn admission_window() {
        let storage = InMemoryStorage::with_clock(ManualClock::starting_at(START));
        let request = request("client", Mode::Admission, 10, 10, 1);

        let mut decisions = Vec::new();

        for _ in 0..11 {
            decisions.push(storage.evaluate(&request).await.unwrap());
        }

        assert!(decisions[..10].iter().all(|d| *d == Decision::Admitted));
        assert_eq!(decisions[10], Decision::Rejected);

        let state = storage.snapshot("client", Mode::Admission).await.unwrap().unwrap();
        assert_eq!(state.stored_permits, 0.0);
    }

    #[tokio::test]
    async fn expired_bucket_behaves_like_a_new_one() {
        let clock = ManualClock::starting_at(START);
        let storage = InMemoryStorage::with_clock(clock.clone());

        let single = request("idle", Mode::WaitTime, 1, 1, 1);
        assert_eq!(storage.evaluate(&single).await.unwrap(), Decision::Wait(Duration::ZERO));

        // Default expiry is twice the duration.
        clock.advance(Duration::from_secs(10));
        assert_eq!(storage.snapshot("idle", Mode::WaitTime).await.unwrap(), None);

        // Without expiry nine idle seconds would have been stored as permits.
        let batch = request("idle", Mode::WaitTime, 1, 1, 5);
        assert_eq!(storage.evaluate(&batch).await.unwrap(), Decision::Wait(Duration::ZERO));

        let state = storage.snapshot("idle", Mode::WaitTime).await.unwrap().unwrap();
        assert_eq!(state.stored_permits, 0.0);
        assert_eq!(state.next_free_ticket_micros, (START + 15_000_000) as f64);
    }

    #[tokio::test]
    async fn touching_a_bucket_refreshes_its_expiry() {
        let clock = ManualClock::starting_at(START);
        let storage = InMemoryStorage::with_clock(clock.clone());
        let request = request("busy", Mode::Admission, 100, 1, 1);

        for _ in 0..5 {
            storage.evaluate(&request).await.unwrap();
            clock.advance(Duration::from_millis(1500));
        }

        assert!(storage.snapshot("busy", Mode::Admission).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn keys_and_modes_are_independent() {
        let storage = InMemoryStorage::with_clock(ManualClock::starting_at(START));

        let a = request("a", Mode::Admission, 1, 60, 1);
        let b = request("b", Mode::Admission, 1, 60, 1);
        let a_wait = request("a", Mode::WaitTime, 1, 60, 1);

        assert_eq!(storage.evaluate(&a).await.unwrap(), Decision::Admitted);
        assert_eq!(storage.evaluate(&a).await.unwrap(), Decision::Rejected);
        assert_eq!(storage.evaluate(&b).await.unwrap(), Decision::Admitted);
        assert_eq!(storage.evaluate(&a_wait).await.unwrap(), Decision::Wait(Duration::ZERO));

        let b_state = storage.snapshot("b", Mode::Admission).await.unwrap().unwrap();
        assert_eq!(b_state.stored_permits, 0.0);

        assert!(storage.snapshot("c", Mode::Admission).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_never_overspend() {
        let storage = Arc::new(InMemoryStorage::with_clock(ManualClock::starting_at(START)));
        let request = request("shared", Mode::Admission, 25, 60, 1);

        let mut handles = Vec::new();

        for _ in 0..100 {
            let storage = storage.clone();
            let request = request.clone();

            handles.push(tokio::spawn(async move { storage.evaluate(&request).await.unwrap() }));
        }

        let mut admitted = 0;

        for handle in handles {
            if handle.await.unwrap() == Decision::Admitted {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 25);
    }

    #[tokio::test]
    async fn sweep_drops_only_expired_records() {
        let clock = ManualClock::starting_at(START);
        let storage = InMemoryStorage::with_clock(clock.clone());

        storage.evaluate(&request("short", Mode::Admission, 1, 1, 1)).await.unwrap();
        storage.evaluate(&request("long", Mode::Admission, 1, 60, 1)).await.unwrap();

        clock.advance(Duration::from_secs(5));

        assert_eq!(storage.sweep_expired(clock.now_micros()), 1);
        assert!(storage.records.contains_key("admission:long"));
        assert!(!storage.records.contains_key("admission:short"));
    }
}
