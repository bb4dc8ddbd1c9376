//! Tracing setup for hosts embedding the analyzer.
//!
//! The crate only emits `tracing` events. Walk and translation spans live under
//! the `reanal::analysis` and `reanal::ir` targets, so
//! `RUST_LOG=reanal::analysis::cfg=trace` prints every decoded op.

use std::sync::Once;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INSTALLED: Once = Once::new();

const DEFAULT_DIRECTIVE: &str = "info";

/// Output flavour for [`init_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install a global subscriber once; later calls are no-ops.
///
/// A subscriber already set by the host wins silently.
pub fn init_with(format: LogFormat) {
    INSTALLED.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
        let registry = tracing_subscriber::registry().with(filter);
        let installed = match format {
            LogFormat::Pretty => registry
                .with(
                    fmt::layer()
                        .with_span_events(FmtSpan::CLOSE)
                        .with_thread_ids(true)
                        .with_line_number(true),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_span_events(FmtSpan::CLOSE)
                        .with_current_span(true)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .try_init(),
        };
        if installed.is_ok() {
            tracing::info!(?format, "reanal logging ready");
        }
    });
}

/// Human-readable output.
pub fn init_tracing() {
    init_with(LogFormat::Pretty);
}

/// One JSON object per event.
pub fn init_tracing_json() {
    init_with(LogFormat::Json);
}

/// Debug-level span for one analysis step, e.g. `span_trace!("walk", entry = addr)`.
#[macro_export]
macro_rules! span_trace {
    ($name:expr) => {
        tracing::debug_span!($name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::debug_span!($name, $($field)*)
    };
}

/// Emit a warning for an error value and hand it back unchanged.
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let err = $err;
        tracing::warn!(error = %err, "analysis step failed");
        err
    }};
    ($err:expr, $ctx:expr) => {{
        let err = $err;
        tracing::warn!(error = %err, context = $ctx, "analysis step failed");
        err
    }};
}
