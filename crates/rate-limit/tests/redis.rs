//! Runs against a real Redis server. Set `REDIS_URL` to enable, for example
//! `REDIS_URL=redis://localhost:6379/0`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use config::{RateLimitConfig, RedisConfig, Reservation, StorageConfig};
use rate_limit::{Mode, RateLimitError, RateLimiter, RedisStorage, StorageError};

static NEXT_PREFIX: AtomicUsize = AtomicUsize::new(0);

fn redis_config() -> Option<RedisConfig> {
    let url = std::env::var("REDIS_URL").ok()?;
    let n = NEXT_PREFIX.fetch_add(1, Ordering::Relaxed);

    Some(RedisConfig {
        url,
        key_prefix: Some(format!("turnstile-test:{}:{n}:", std::process::id())),
        ..RedisConfig::default()
    })
}

async fn limiter(reservation: Reservation) -> Option<RateLimiter> {
    let redis = redis_config()?;

    let config = RateLimitConfig {
        storage: StorageConfig::Redis(Box::new(redis)),
        reservation,
        ..RateLimitConfig::default()
    };

    Some(RateLimiter::new(&config).await.unwrap())
}

#[tokio::test]
async fn admits_ten_then_rejects() {
    let Some(limiter) = limiter(Reservation::Guarded).await else {
        return;
    };

    assert_eq!(limiter.backend(), "redis");

    for _ in 0..10 {
        assert!(limiter.allow("client", Duration::from_secs(10), 10, 1).await.unwrap());
    }

    assert!(!limiter.allow("client", Duration::from_secs(10), 10, 1).await.unwrap());

    let state = limiter.inspect("client", Mode::Admission).await.unwrap().unwrap();
    assert!(state.stored_permits < 1.0);
}

#[tokio::test]
async fn queued_burst_waits_grow_by_one_interval() {
    let Some(limiter) = limiter(Reservation::Queued).await else {
        return;
    };

    let mut waits = Vec::new();

    for _ in 0..5 {
        waits.push(limiter.take("burst", Duration::from_secs(1), 1, 1).await.unwrap());
    }

    assert_eq!(waits[0], Duration::ZERO);

    for (i, wait) in waits.iter().enumerate().skip(1) {
        let expected = Duration::from_secs(i as u64);
        assert!(*wait <= expected, "wait {i} was {wait:?}");
        assert!(expected - *wait < Duration::from_millis(200), "wait {i} was {wait:?}");
    }
}

#[tokio::test]
async fn guarded_caller_is_served_after_sleeping_its_wait() {
    let Some(limiter) = limiter(Reservation::Guarded).await else {
        return;
    };

    let quota = (Duration::from_secs(1), 10);

    assert_eq!(limiter.take("sleepy", quota.0, quota.1, 1).await.unwrap(), Duration::ZERO);

    let wait = limiter.take("sleepy", quota.0, quota.1, 1).await.unwrap();
    assert!(wait > Duration::ZERO && wait <= Duration::from_millis(100), "wait was {wait:?}");

    tokio::time::sleep(wait).await;

    assert_eq!(limiter.take("sleepy", quota.0, quota.1, 1).await.unwrap(), Duration::ZERO);
}

#[tokio::test]
async fn state_keeps_full_precision() {
    let Some(limiter) = limiter(Reservation::Guarded).await else {
        return;
    };

    // A third of a second per permit has no exact decimal representation.
    assert_eq!(limiter.take("precise", Duration::from_secs(1), 3, 1).await.unwrap(), Duration::ZERO);

    // Fourteen significant digits would round the anchor to a whole hundred microseconds.
    let state = limiter.inspect("precise", Mode::WaitTime).await.unwrap().unwrap();
    let anchor = state.next_free_ticket_micros;

    assert!(anchor.fract() > 0.0, "anchor was {anchor}");
}

#[tokio::test]
async fn idle_bucket_expires() {
    let Some(limiter) = limiter(Reservation::Guarded).await else {
        return;
    };

    assert!(limiter.allow("idle", Duration::from_millis(500), 1, 1).await.unwrap());
    assert!(limiter.inspect("idle", Mode::Admission).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert!(limiter.inspect("idle", Mode::Admission).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_bucket() {
    let Some(limiter) = limiter(Reservation::Guarded).await else {
        return;
    };

    let mut handles = Vec::new();

    for _ in 0..50 {
        let limiter = limiter.clone();

        handles.push(tokio::spawn(async move {
            limiter.allow("shared", Duration::from_secs(60), 10, 1).await.unwrap()
        }));
    }

    let mut admitted = 0;

    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 10);
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    if std::env::var("REDIS_URL").is_err() {
        return;
    }

    let mut config = RedisConfig {
        url: "redis://127.0.0.1:1/0".to_string(),
        ..RedisConfig::default()
    };

    config.pool.timeout_create = Some(Duration::from_millis(200));
    config.pool.timeout_wait = Some(Duration::from_millis(200));

    let Err(error) = RedisStorage::new(&config).await else {
        unreachable!("nothing listens on port 1");
    };

    assert!(matches!(
        error,
        StorageError::Connection(_) | StorageError::PoolExhausted(_)
    ));
    assert!(RateLimitError::from(error).is_transport());
}
