//! Logging
//!
//! Installs the tracing subscriber for a run: filtered diagnostics on
//! stderr plus one plain-text file per level under the configured log
//! directory.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{Error, Result};

/// Per-level log files, each receiving exactly one level
pub const LOG_FILES: [(&str, Level); 3] = [
    ("error.log", Level::ERROR),
    ("notice.log", Level::WARN),
    ("info.log", Level::INFO),
];

/// Where and how much to log
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Directory receiving the level files
    pub dir: PathBuf,
    /// Filter for stderr when `RUST_LOG` is unset
    pub console_level: String,
    /// Whether `info.log` is written at all
    pub advanced_log: bool,
}

impl LogSettings {
    /// Level files this run writes to
    pub fn files(&self) -> impl Iterator<Item = (&'static str, Level)> + '_ {
        LOG_FILES
            .into_iter()
            .filter(|(_, level)| self.advanced_log || *level != Level::INFO)
    }
}

fn open_log(dir: &Path, name: &str) -> Result<Mutex<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(name))?;
    Ok(Mutex::new(file))
}

/// Initialize logging for the process
pub fn init(settings: &LogSettings) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| settings.console_level.as_str().into());

    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let mut files = Vec::with_capacity(LOG_FILES.len());
    for (name, level) in settings.files() {
        let layer = fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(open_log(&settings.dir, name)?)
            .with_filter(filter_fn(move |meta| *meta.level() == level))
            .boxed();
        files.push(layer);
    }

    tracing_subscriber::registry()
        .with(stderr)
        .with(files)
        .try_init()
        .map_err(|e| Error::Internal(format!("failed to initialize logging: {}", e)))
}
