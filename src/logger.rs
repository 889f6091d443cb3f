//! Process-wide logging sink.
//!
//! Severity levels and colorization are delegated to `tracing`; message
//! indentation is computed by the [`Session`](crate::session::Session),
//! which owns the nesting state.

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Message severities understood by the sink.
///
/// `tracing` has no level above ERROR, so `Critical` is emitted there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

static INIT: Once = Once::new();

/// Install the process-wide sink.
///
/// Every `Session` calls this; only the first call per process has any
/// effect. Verbosity honors `RUST_LOG`, defaulting to `debug`.
pub fn init() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .without_time(),
            )
            .try_init();
    });
}

/// Emit one line at `severity`. Indentation is already part of `message`.
pub(crate) fn emit(severity: Severity, message: &str) {
    match severity {
        Severity::Debug => tracing::debug!("{message}"),
        Severity::Info => tracing::info!("{message}"),
        Severity::Warning => tracing::warn!("{message}"),
        Severity::Error | Severity::Critical => tracing::error!("{message}"),
    }
}
