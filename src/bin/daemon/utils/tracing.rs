//! Tracing Utilities Module
//!
//! Diagnostic logging for the chat hub daemon: console output plus a
//! non-blocking trace file. This is independent from the activity log that
//! the operator flushes on demand.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Once, OnceLock};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static WORKER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static INIT: Once = Once::new();

/// Initializes the tracing subscriber with file and console output.
///
/// Only the first call has an effect. If the trace file cannot be opened the
/// daemon keeps logging to stdout alone.
pub fn setup_tracing(trace_path: &Path) {
    INIT.call_once(|| {
        // Configure stdout layer for console output
        let stdout_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_filter(env_filter());

        let file_layer = match OpenOptions::new().append(true).create(true).open(trace_path) {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                // The guard flushes buffered lines on drop, so it lives as long as the process
                let _ = WORKER_GUARD.set(guard);
                Some(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_filter(env_filter()),
                )
            }
            Err(e) => {
                eprintln!("Cannot open trace file {}: {}", trace_path.display(), e);
                None
            }
        };

        let _ = tracing_subscriber::registry()
            .with(file_layer)
            .with(stdout_layer)
            .try_init();
    });
}

/// Filter from `RUST_LOG`, defaulting to info level if not set
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
