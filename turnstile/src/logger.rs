use jiff::{Zoned, tz::TimeZone};
use log::{Level, Record};
use logforth::{
    append::Stderr,
    layout::{JsonLayout, Layout},
};

use crate::args::{Args, LogStyle};

/// One line per record: UTC timestamp, level, emitting module, message.
#[derive(Debug, Clone, Copy)]
struct LineLayout {
    color: bool,
}

impl LineLayout {
    fn level(&self, level: Level) -> String {
        if !self.color {
            return format!("{level:>5}");
        }

        let code = match level {
            Level::Error => 31,
            Level::Warn => 33,
            Level::Info => 32,
            Level::Debug => 34,
            Level::Trace => 35,
        };

        format!("\x1b[{code}m{level:>5}\x1b[0m")
    }
}

impl Layout for LineLayout {
    fn format(
        &self,
        record: &Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let timestamp = Zoned::now()
            .with_time_zone(TimeZone::UTC)
            .strftime("%Y-%m-%dT%H:%M:%S%.6fZ");

        let line = format!(
            "{timestamp} {}  {}: {}",
            self.level(record.level()),
            record.target(),
            record.args()
        );

        Ok(line.into_bytes())
    }
}

/// Logs go to stderr; stdout carries command results only.
pub(super) fn init(args: &Args) {
    let color = match args.log_style {
        LogStyle::Color => Some(true),
        LogStyle::Text => Some(false),
        LogStyle::Json => None,
    };

    logforth::builder()
        .dispatch(|d| {
            let d = d.filter(args.log_level.env_filter());

            match color {
                Some(color) => d.append(Stderr::default().with_layout(LineLayout { color })),
                None => d.append(Stderr::default().with_layout(JsonLayout::default())),
            }
        })
        .apply();
}
