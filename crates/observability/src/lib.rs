//! Process-wide tracing setup shared by every tillerp entry point.

/// Tracing configuration (filters, formatter).
pub mod tracing;

pub use tracing::LogFormat;

/// Initialize process-wide observability (JSON logs, `RUST_LOG` filter, default `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::Json, "info");
}
