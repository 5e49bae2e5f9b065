// ============================================================
// Layer 6 — Log Sink
// ============================================================
// One process-wide tracing subscriber per run.
//
//   train     → console + <run dir>/log.log
//   gen-list  → console only
//
// Both sinks share the same local-time stamp format
// (`20250101-12:00:00 message`) so the file can be diffed
// against what was seen on screen.

use anyhow::{Context, Result};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

pub const LOG_FILE_NAME: &str = "log.log";

const TIME_FORMAT: &str = "%Y%m%d-%H:%M:%S";

fn env_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env().add_directive("facetrain=info".parse()?))
}

/// Console-only sink for short utility commands.
pub fn init_console() -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(fmt::layer().with_target(false).with_timer(ChronoLocal::new(TIME_FORMAT.to_string())))
        .try_init()
        .context("Logging was already initialised")?;
    Ok(())
}

/// Console plus a log file inside `output_dir`. Returns the log file path.
pub fn init_log(output_dir: &Path) -> Result<PathBuf> {
    let log_path = output_dir.join(LOG_FILE_NAME);
    let file = File::create(&log_path)
        .with_context(|| format!("Cannot create log file '{}'", log_path.display()))?;

    let console_layer = fmt::layer()
        .with_target(false)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()));
    let file_layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_writer(Arc::new(file));

    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Logging was already initialised")?;

    Ok(log_path)
}
