//! Tracing subscriber initialization for the `fbs` binary.
//!
//! Filter priority (highest first): `FBS_LOG`, `RUST_LOG`, then
//! `[logging].filter` from the config. Logs go to stderr and, when
//! `[logging].dir` is set, are also appended to a per-run file named
//! `<index>_<run-label>_<host>.log`.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

fn build_env_filter(default: &str) -> EnvFilter {
    if let Ok(directives) = std::env::var("FBS_LOG") {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::try_new(default).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Host name for log file names, "localhost" when the OS will not say.
pub fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// `<dir>/<index>_<run-label>_<host>.log`, with path separators in the label
/// replaced so that a dataset path never creates subdirectories.
pub fn log_file_path(dir: &Path, index: &str, run_label: &str, host: &str) -> PathBuf {
    let label: String = run_label
        .chars()
        .map(|c| if c == '/' || c.is_whitespace() { '_' } else { c })
        .collect();
    dir.join(format!("{}_{}_{}.log", index, label.trim_matches('_'), host))
}

/// Install the global subscriber. `run_log` is `(index, run_label)` for
/// commands that should also write a per-run log file.
pub fn init_logging(config: &LoggingConfig, run_log: Option<(&str, &str)>) -> Result<()> {
    let filter = build_env_filter(&config.filter);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_target(false)
        .compact();

    let file_layer = match (&config.dir, run_log) {
        (Some(dir), Some((index, label))) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let path = log_file_path(dir, index, label, &host_name());
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(())
}
