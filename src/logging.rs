// Log sink configuration

use anyhow::{Context, Result, anyhow};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` is honored for other crates; the configured level always
/// applies to this crate. With `file` set, logs are appended there without
/// ANSI colors.
pub fn configure(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("unit_server={}", settings.level.as_filter()).parse()?)
        .add_directive(format!("tower_http={}", settings.level.as_filter()).parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match &settings.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.try_init(),
    };

    installed.map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}
