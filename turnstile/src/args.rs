use std::{borrow::Cow, fmt, io::IsTerminal, path::PathBuf, str::FromStr, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use config::Config;
use logforth::filter::EnvFilter;
use rate_limit::Mode;

#[derive(Debug, Parser)]
#[command(name = "Turnstile", version, long_about = concat!("Turnstile v", env!("CARGO_PKG_VERSION")))]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short, env = "TURNSTILE_CONFIG_PATH", default_value = "./turnstile.toml")]
    pub config: PathBuf,
    /// Set the logging level
    #[arg(long = "log", env = "TURNSTILE_LOG", default_value_t = LogLevel::default())]
    pub log_level: LogLevel,
    /// Set the style of log output
    #[arg(long, env = "TURNSTILE_LOG_STYLE", default_value_t = LogStyle::default())]
    pub log_style: LogStyle,
    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    pub fn config(&self) -> anyhow::Result<Config> {
        let config = if self.config.exists() {
            Config::load(&self.config)?
        } else {
            Config::default()
        };

        Ok(config)
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Take permits and print how long to wait before using them
    Take(BucketArgs),
    /// Try to take permits and print whether the call was admitted
    Allow(BucketArgs),
    /// Print the stored state of a bucket
    Inspect(InspectArgs),
    /// Hammer one bucket with concurrent calls and report throughput
    Bench(BenchArgs),
}

#[derive(Debug, clap::Args)]
pub struct BucketArgs {
    /// Bucket key
    pub key: String,
    /// Permits produced per duration
    #[arg(long)]
    pub limit: u32,
    /// Refill window, e.g. `1s`, `60s`, `1h`
    #[arg(long, value_parser = parse_duration)]
    pub duration: Duration,
    /// Permits this call consumes
    #[arg(long, default_value_t = 1)]
    pub permits: u32,
}

#[derive(Debug, clap::Args)]
pub struct InspectArgs {
    /// Bucket key
    pub key: String,
    /// Which bucket of the key to read
    #[arg(long, value_enum, default_value_t = ModeArg::Wait)]
    pub mode: ModeArg,
}

#[derive(Debug, clap::Args)]
pub struct BenchArgs {
    /// Bucket key
    pub key: String,
    /// Permits produced per duration
    #[arg(long, default_value_t = 1000)]
    pub limit: u32,
    /// Refill window
    #[arg(long, value_parser = parse_duration, default_value = "1s")]
    pub duration: Duration,
    /// Total number of calls
    #[arg(long, default_value_t = 10_000)]
    pub iterations: usize,
    /// Number of concurrent callers
    #[arg(long, default_value_t = 16)]
    pub concurrency: usize,
    /// Which decision policy to exercise
    #[arg(long, value_enum, default_value_t = ModeArg::Wait)]
    pub mode: ModeArg,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Wait-time buckets (`take`)
    Wait,
    /// Admission buckets (`allow`)
    Admission,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Wait => Mode::WaitTime,
            ModeArg::Admission => Mode::Admission,
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    duration_str::parse(value).map_err(|e| e.to_string())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogStyle {
    /// Colorized text, used as the default with TTY output
    Color,
    /// Standard text, used as the default with non-TTY output
    Text,
    /// JSON objects
    Json,
}

impl Default for LogStyle {
    fn default() -> Self {
        if std::io::stderr().is_terminal() {
            LogStyle::Color
        } else {
            LogStyle::Text
        }
    }
}

impl AsRef<str> for LogStyle {
    fn as_ref(&self) -> &str {
        match self {
            LogStyle::Color => "color",
            LogStyle::Text => "text",
            LogStyle::Json => "json",
        }
    }
}

impl fmt::Display for LogStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogLevel {
    /// Disable logging
    Off,
    /// Only log errors
    Error,
    /// Log errors, and warnings
    #[default]
    Warn,
    /// Log errors, warnings, and info messages
    Info,
    /// Log errors, warnings, info, and debug messages
    Debug,
    /// Log errors, warnings, info, debug, and trace messages
    Trace,
}

impl LogLevel {
    pub fn env_filter(self) -> EnvFilter {
        let filter_str = match self {
            LogLevel::Off => Cow::Borrowed("off"),
            // Third-party crates stay at warn, workspace crates follow the selected level.
            level => Cow::Owned(format!(
                "warn,turnstile={level},rate_limit={level},config={level},telemetry={level}"
            )),
        };

        EnvFilter::from_str(&filter_str).expect("These all are valid env filters.")
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn take_arguments() {
        let args = Args::try_parse_from(["turnstile", "take", "user:1", "--limit", "10", "--duration", "1m"]).unwrap();

        let Command::Take(bucket) = args.command else {
            unreachable!("expected take");
        };

        assert_eq!(bucket.key, "user:1");
        assert_eq!(bucket.limit, 10);
        assert_eq!(bucket.duration, Duration::from_secs(60));
        assert_eq!(bucket.permits, 1);
    }

    #[test]
    fn bench_defaults() {
        let args = Args::try_parse_from(["turnstile", "bench", "load"]).unwrap();

        let Command::Bench(bench) = args.command else {
            unreachable!("expected bench");
        };

        assert_eq!(bench.iterations, 10_000);
        assert_eq!(bench.concurrency, 16);
        assert_eq!(bench.duration, Duration::from_secs(1));
        assert_eq!(Mode::from(bench.mode), Mode::WaitTime);
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let result = Args::try_parse_from(["turnstile", "allow", "k", "--limit", "1", "--duration", "soon"]);
        assert!(result.is_err());
    }
}
