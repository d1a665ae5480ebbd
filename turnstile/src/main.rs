use args::Args;
use clap::Parser;
use rate_limit::RateLimiter;

mod args;
mod commands;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args);

    let config = args.config()?;

    for warning in config.warnings() {
        log::warn!("{warning}");
    }

    let telemetry = telemetry::init(&config.telemetry)?;
    let limiter = RateLimiter::new(&config.rate_limits).await?;

    let result = commands::run(args.command, &limiter).await;

    if let Err(e) = telemetry.force_flush() {
        log::warn!("{e}");
    }

    if let Err(e) = result {
        log::error!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}
