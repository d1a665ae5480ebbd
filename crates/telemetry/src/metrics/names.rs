//! Metric names emitted by Turnstile.

/// Duration of one bucket evaluation in milliseconds, with `mode`, `backend` and `outcome`
/// attributes. The histogram count doubles as the evaluation counter.
pub const RATE_LIMIT_EVALUATION_DURATION: &str = "rate_limit.evaluation.duration";

/// Number of connections dropped by the Redis pool idle reaper.
pub const RATE_LIMIT_POOL_IDLE_CLOSED: &str = "rate_limit.pool.idle_closed";
