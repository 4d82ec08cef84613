use core::fmt::Result as FmtResult;
use std::io::IsTerminal as _;

use anyhow::Result;
use chrono::{Local, SecondsFormat};
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{format::Writer, time::FormatTime},
    EnvFilter,
};

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, writer: &mut Writer) -> FmtResult {
        write!(
            writer,
            "[{}]",
            Local::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }
}

/// Initializes the global logger. All application code logs through the `log`
/// macros; `tracing-subscriber`'s `log` bridge turns those records into
/// events for the fmt layer set up here. `RUST_LOG` overrides `level` when
/// set.
pub fn initialize_logger(level: log::LevelFilter) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(into_level_filter(level).into())
        .from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LocalTimer)
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    Ok(())
}

const fn into_level_filter(level: log::LevelFilter) -> LevelFilter {
    match level {
        log::LevelFilter::Off => LevelFilter::OFF,
        log::LevelFilter::Error => LevelFilter::ERROR,
        log::LevelFilter::Warn => LevelFilter::WARN,
        log::LevelFilter::Info => LevelFilter::INFO,
        log::LevelFilter::Debug => LevelFilter::DEBUG,
        log::LevelFilter::Trace => LevelFilter::TRACE,
    }
}
