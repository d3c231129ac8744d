//! Logging setup and crate-local logging macros.
//!
//! The macros forward to `tracing` under a fixed target so the realtime
//! client can be filtered independently of the host application.

use tracing_subscriber::EnvFilter;

/// Target used by every `log_*!` macro in this crate.
pub const TARGET: &str = "alertdesk_client";

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Returns `false` if a global subscriber already exists.
pub fn init(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init()
        .is_ok()
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        ::tracing::info!(target: $crate::logging::TARGET, $($arg)*)
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        ::tracing::error!(target: $crate::logging::TARGET, $($arg)*)
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        ::tracing::warn!(target: $crate::logging::TARGET, $($arg)*)
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        ::tracing::debug!(target: $crate::logging::TARGET, $($arg)*)
    };
}
