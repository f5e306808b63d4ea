//! Process-wide logging setup shared by the binaries.

/// Initialize tracing/logging for the process (see [`tracing::init`]).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filter, output format).
pub mod tracing;
