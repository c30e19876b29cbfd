//! Logging and tracing configuration
//!
//! stdout belongs to the DAP stream, so logs go to:
//! 1. stderr (editors show adapter stderr in their output panel)
//! 2. a log file at `~/.local/share/soldb-dap/logs/adapter.log`
//! 3. the diagnostics side-channel, when a client is connected
//!
//! Log level controlled by `RUST_LOG`, default is DEBUG for this crate.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;
use crate::diagnostics::DiagnosticsSink;

/// Log file name inside the log directory
const LOG_FILE: &str = "adapter.log";

/// Keeps the non-blocking file writer alive; drop it last
pub struct LogGuard {
    _file: Option<WorkerGuard>,
    /// Path of the log file, if file logging is active
    pub log_file: Option<PathBuf>,
}

/// Initialize tracing for the adapter process
pub fn init(log_to_file: bool, diagnostics: Option<DiagnosticsSink>) -> LogGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("soldb_dap=debug,info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .compact();

    let (file_layer, file_guard, log_file) = match log_to_file.then(open_log_file).flatten() {
        Some((file, path)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard), Some(path))
        }
        None => (None, None, None),
    };

    // Diagnostics readers want plain narration, one event per line
    let diagnostics_layer = diagnostics.map(|sink| {
        fmt::layer()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_target(false)
            .with_level(false)
            .without_time()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .with(diagnostics_layer)
        .init();

    LogGuard {
        _file: file_guard,
        log_file,
    }
}

fn open_log_file() -> Option<(std::fs::File, PathBuf)> {
    let dir = paths::ensure_log_dir().ok().flatten()?;
    let path = dir.join(LOG_FILE);
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => Some((file, path)),
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            None
        }
    }
}
