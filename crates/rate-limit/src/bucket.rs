//! The token bucket state machine.
//!
//! A bucket is two numbers: the permits currently stored and a time anchor in
//! microseconds. Refill is computed lazily from the time elapsed since the anchor, so no
//! background task ever touches a bucket. Both storage backends run [`evaluate`] (the Redis
//! backend through an equivalent Lua script) inside a per-key critical section.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use config::Reservation;

use crate::error::RateLimitError;
use crate::request::BucketRequest;

/// Ceiling for stored permits in wait-time mode, standing in for an unbounded burst.
pub const MAX_BURST_PERMITS: f64 = 100_000_000.0;

/// Decision policy of a bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Never rejects. Tells the caller how long to wait before the permits are usable.
    #[default]
    WaitTime,
    /// Admits the call if enough permits are stored right now, rejects it otherwise.
    Admission,
}

impl Mode {
    /// Short name used in storage keys and metric attributes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::WaitTime => "wait",
            Mode::Admission => "admission",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refill rate of a bucket: `limit` permits per `duration`.
///
/// Quotas are not persisted. Every evaluation carries its own, so changing the quota of a
/// key takes effect on the next call and reinterprets whatever is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    limit: NonZeroU32,
    duration: Duration,
}

impl Quota {
    /// Creates a quota of `limit` permits per `duration`.
    pub fn new(limit: u32, duration: Duration) -> Result<Self, RateLimitError> {
        let limit = NonZeroU32::new(limit).ok_or_else(|| RateLimitError::invalid("limit must be positive"))?;

        if duration.as_micros() == 0 {
            return Err(RateLimitError::invalid(
                "duration must be at least one microsecond",
            ));
        }

        Ok(Self { limit, duration })
    }

    /// Permits produced per duration. In admission mode this is also the bucket capacity.
    pub fn limit(&self) -> u32 {
        self.limit.get()
    }

    /// Length of the refill window.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Length of the refill window in microseconds.
    pub fn duration_micros(&self) -> u64 {
        u64::try_from(self.duration.as_micros()).unwrap_or(u64::MAX)
    }

    /// Microseconds needed to produce one permit.
    pub fn stable_interval_micros(&self) -> f64 {
        self.duration_micros() as f64 / f64::from(self.limit.get())
    }

    /// Upper bound of stored permits for the given mode.
    pub fn capacity(&self, mode: Mode) -> f64 {
        match mode {
            Mode::WaitTime => MAX_BURST_PERMITS,
            Mode::Admission => f64::from(self.limit.get()),
        }
    }
}

/// Persisted state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Permits available right now, within `[0, capacity]`.
    pub stored_permits: f64,
    /// Wait-time mode: the moment the next caller can be served without waiting.
    /// Admission mode: the moment of the last refill.
    pub next_free_ticket_micros: f64,
}

impl BucketState {
    /// State of a key that has never been seen, or whose record expired.
    pub fn initial(mode: Mode, quota: &Quota, now_micros: f64) -> Self {
        let stored_permits = match mode {
            Mode::WaitTime => 0.0,
            Mode::Admission => quota.capacity(mode),
        };

        Self {
            stored_permits,
            next_free_ticket_micros: now_micros,
        }
    }

    /// Converts the time elapsed since the anchor into permits and moves the anchor to `now`.
    fn refill(&mut self, now_micros: f64, stable_interval_micros: f64, capacity: f64) {
        if now_micros > self.next_free_ticket_micros {
            let new_permits = (now_micros - self.next_free_ticket_micros) / stable_interval_micros;
            self.stored_permits += new_permits;
            self.next_free_ticket_micros = now_micros;
        }

        // The quota may have shrunk since the last call.
        self.stored_permits = self.stored_permits.clamp(0.0, capacity);
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait-time mode: how long the caller has to wait. Zero means serve immediately.
    Wait(Duration),
    /// Admission mode: the permits were consumed.
    Admitted,
    /// Admission mode: not enough permits, nothing was consumed.
    Rejected,
}

impl Decision {
    /// Label used for the `outcome` metric attribute.
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Wait(wait) if wait.is_zero() => "immediate",
            Decision::Wait(_) => "delayed",
            Decision::Admitted => "admitted",
            Decision::Rejected => "rejected",
        }
    }
}

/// Result of applying one request to a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Transition {
    pub decision: Decision,
    /// State to persist. `None` leaves the stored record as it is.
    pub next: Option<BucketState>,
}

/// Applies one refill-then-consume step.
///
/// Must run inside the per-key critical section of the storage backend, between reading
/// `previous` and writing back [`Transition::next`].
pub(crate) fn evaluate(previous: Option<BucketState>, now_micros: u64, request: &BucketRequest) -> Transition {
    let now = now_micros as f64;
    let mode = request.mode();
    let quota = request.quota();
    let interval = quota.stable_interval_micros();

    let mut state = previous.unwrap_or_else(|| BucketState::initial(mode, quota, now));
    state.refill(now, interval, quota.capacity(mode));

    let permits = f64::from(request.permits());

    match mode {
        Mode::Admission => {
            let decision = if state.stored_permits >= permits {
                state.stored_permits -= permits;
                Decision::Admitted
            } else {
                Decision::Rejected
            };

            Transition {
                decision,
                next: Some(state),
            }
        }
        Mode::WaitTime => {
            let moment_available = state.next_free_ticket_micros;
            let spend = permits.min(state.stored_permits);
            let wait_micros = (permits - spend) * interval;

            // With the guard only a caller whose slot is available now books the next one.
            let book = moment_available == now || request.reservation() == Reservation::Queued;

            let next = book.then(|| BucketState {
                stored_permits: state.stored_permits - spend,
                next_free_ticket_micros: moment_available + wait_micros,
            });

            // Rounded up: a caller sleeping the returned wait must not arrive before its slot,
            // or the guard would serve it without a booking.
            let wait = (moment_available - now).max(0.0).ceil() as u64;

            Transition {
                decision: Decision::Wait(Duration::from_micros(wait)),
                next,
            }
        }
    }
}
