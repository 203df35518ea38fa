//! Console and general-log tracing setup.

use anyhow::Context;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter level for a `-v` count.
pub fn level_for(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize tracing.
///
/// Events go to stderr and, when `general_log` is set, are appended to that
/// file without ANSI colours after a run separator line. `RUST_LOG` overrides
/// the level derived from `verbose`.
pub fn init(verbose: u8, general_log: Option<&Path>) -> anyhow::Result<()> {
    let level = level_for(verbose);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("glsync={level},glsync_migrate={level}").into());

    let file_layer = match general_log {
        Some(path) => {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            writeln!(file, "------------ {} ------------", chrono::Local::now())?;

            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}
