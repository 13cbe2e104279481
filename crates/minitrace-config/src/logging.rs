//! Structured logging utilities for MiniTrace components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use minitrace_config::{log_trace_info, log_dump_warn};
//!
//! log_trace_info!("Session started", classes = 412);
//! log_dump_warn!("Failed to open coverage file", path = tracing::field::display(path.display()));
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const TRACE: &'static str = "TRACE";
    pub const DUMP: &'static str = "DUMP";
    pub const FILTER: &'static str = "FILTER";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === TRACE (session lifecycle) logging macros ===

#[macro_export]
macro_rules! log_trace_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = $crate::logging::Component::TRACE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_trace_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::TRACE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_trace_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::TRACE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_trace_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::TRACE, $($key = $value,)* $msg)
    };
}

// === DUMP logging macros ===

#[macro_export]
macro_rules! log_dump_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::DUMP, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_dump_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::DUMP, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_dump_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::DUMP, $($key = $value,)* $msg)
    };
}

// === FILTER logging macros ===

#[macro_export]
macro_rules! log_filter_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::FILTER, $($key = $value,)* $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// `MINITRACE_LOG` wins over `RUST_LOG`, which wins over `level`.
/// Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("MINITRACE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    // A host may already have installed a subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
