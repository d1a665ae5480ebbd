use std::time::{Duration, Instant};

use anyhow::Context;
use rate_limit::{Decision, Mode, Quota, RateLimiter};

use crate::args::{BenchArgs, BucketArgs, Command, InspectArgs};

pub(crate) async fn run(command: Command, limiter: &RateLimiter) -> anyhow::Result<()> {
    match command {
        Command::Take(args) => take(limiter, args).await,
        Command::Allow(args) => allow(limiter, args).await,
        Command::Inspect(args) => inspect(limiter, args).await,
        Command::Bench(args) => bench(limiter, args).await,
    }
}

async fn take(limiter: &RateLimiter, args: BucketArgs) -> anyhow::Result<()> {
    let wait = limiter
        .take(&args.key, args.duration, args.limit, args.permits)
        .await
        .with_context(|| format!("failed to take permits from '{}'", args.key))?;

    println!("{}", wait.as_micros());

    Ok(())
}

async fn allow(limiter: &RateLimiter, args: BucketArgs) -> anyhow::Result<()> {
    let admitted = limiter
        .allow(&args.key, args.duration, args.limit, args.permits)
        .await
        .with_context(|| format!("failed to evaluate '{}'", args.key))?;

    println!("{}", if admitted { "admitted" } else { "rejected" });

    Ok(())
}

async fn inspect(limiter: &RateLimiter, args: InspectArgs) -> anyhow::Result<()> {
    match limiter.inspect(&args.key, args.mode.into()).await? {
        Some(state) => println!(
            "stored_permits={} next_free_ticket_micros={}",
            state.stored_permits, state.next_free_ticket_micros
        ),
        None => println!("absent"),
    }

    Ok(())
}

#[derive(Debug, Default)]
struct Tally {
    immediate: usize,
    delayed: usize,
    admitted: usize,
    rejected: usize,
    errors: usize,
}

impl Tally {
    fn count(&mut self, result: Result<Decision, rate_limit::RateLimitError>) {
        match result {
            Ok(Decision::Wait(wait)) if wait.is_zero() => self.immediate += 1,
            Ok(Decision::Wait(_)) => self.delayed += 1,
            Ok(Decision::Admitted) => self.admitted += 1,
            Ok(Decision::Rejected) => self.rejected += 1,
            Err(e) => {
                log::debug!("Benchmark call failed: {e}");
                self.errors += 1;
            }
        }
    }

    fn merge(&mut self, other: Tally) {
        self.immediate += other.immediate;
        self.delayed += other.delayed;
        self.admitted += other.admitted;
        self.rejected += other.rejected;
        self.errors += other.errors;
    }

    fn total(&self) -> usize {
        self.immediate + self.delayed + self.admitted + self.rejected + self.errors
    }
}

async fn bench(limiter: &RateLimiter, args: BenchArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.concurrency > 0, "concurrency must be positive");

    let mode = Mode::from(args.mode);
    let request = limiter.request(&args.key, Quota::new(args.limit, args.duration)?, 1, mode)?;

    log::info!(
        "Running {} {mode} evaluations against '{}' with {} callers on {} storage",
        args.iterations,
        args.key,
        args.concurrency,
        limiter.backend()
    );

    let started = Instant::now();
    let mut workers = Vec::with_capacity(args.concurrency);

    for worker in 0..args.concurrency {
        let calls = args.iterations / args.concurrency + usize::from(worker < args.iterations % args.concurrency);
        let limiter = limiter.clone();
        let request = request.clone();

        workers.push(tokio::spawn(async move {
            let mut tally = Tally::default();

            for _ in 0..calls {
                tally.count(limiter.evaluate(&request).await);
            }

            tally
        }));
    }

    let mut tally = Tally::default();

    for worker in workers {
        tally.merge(worker.await.context("benchmark worker panicked")?);
    }

    let elapsed = started.elapsed();

    println!("{}", report(&tally, elapsed));

    Ok(())
}

fn report(tally: &Tally, elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();
    let throughput = if seconds > 0.0 { tally.total() as f64 / seconds } else { 0.0 };

    format!(
        "calls={} elapsed={elapsed:?} throughput={throughput:.0}/s immediate={} delayed={} admitted={} rejected={} errors={}",
        tally.total(),
        tally.immediate,
        tally.delayed,
        tally.admitted,
        tally.rejected,
        tally.errors
    )
}
