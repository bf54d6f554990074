//! Conditional tracing macros
//!
//! These macros wrap tracing calls so the crates compile without the `tracing`
//! feature. They expand through a hidden re-export, which lets dependent crates
//! log without naming `tracing` in their own manifests.

/// Log at warn level, only when tracing feature is enabled
#[cfg(feature = "tracing")]
#[macro_export]
macro_rules! trace_warn {
    ($($arg:tt)*) => {
        $crate::__tracing::warn!($($arg)*)
    };
}

/// Log at warn level, no-op when tracing feature is disabled
#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! trace_warn {
    ($($arg:tt)*) => {};
}

/// Log at debug level, only when tracing feature is enabled
#[cfg(feature = "tracing")]
#[macro_export]
macro_rules! trace_debug {
    ($($arg:tt)*) => {
        $crate::__tracing::debug!($($arg)*)
    };
}

/// Log at debug level, no-op when tracing feature is disabled
#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! trace_debug {
    ($($arg:tt)*) => {};
}

/// Log at trace level, only when tracing feature is enabled
#[cfg(feature = "tracing")]
#[macro_export]
macro_rules! trace_trace {
    ($($arg:tt)*) => {
        $crate::__tracing::trace!($($arg)*)
    };
}

/// Log at trace level, no-op when tracing feature is disabled
#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! trace_trace {
    ($($arg:tt)*) => {};
}
