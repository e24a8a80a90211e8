// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros for convenient logging
//
// Each macro evaluates to the `Result` of the underlying `Logger` call.

/// Log a message with emergency severity
///
/// # Examples
/// ```ignore
/// log_emergency!(logger, "System is down");
/// ```
#[macro_export]
macro_rules! log_emergency {
    ($logger:expr, $msg:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::log_kv!($logger, $crate::logging::Severity::Emergency, $msg $(, $key => $value)*)
    };
}

/// Log a message with alert severity
#[macro_export]
macro_rules! log_alert {
    ($logger:expr, $msg:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::log_kv!($logger, $crate::logging::Severity::Alert, $msg $(, $key => $value)*)
    };
}

/// Log a message with critical severity
#[macro_export]
macro_rules! log_critical {
    ($logger:expr, $msg:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::log_kv!($logger, $crate::logging::Severity::Critical, $msg $(, $key => $value)*)
    };
}

/// Log a message with error severity
///
/// # Examples
/// ```ignore
/// log_error!(logger, "Failed to open output", "path" => path.display().to_string());
/// ```
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $msg:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::log_kv!($logger, $crate::logging::Severity::Error, $msg $(, $key => $value)*)
    };
}

/// Log a message with warning severity
#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $msg:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::log_kv!($logger, $crate::logging::Severity::Warning, $msg $(, $key => $value)*)
    };
}

/// Log a message with notice severity
#[macro_export]
macro_rules! log_notice {
    ($logger:expr, $msg:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::log_kv!($logger, $crate::logging::Severity::Notice, $msg $(, $key => $value)*)
    };
}

/// Log a message with info severity
///
/// # Examples
/// ```ignore
/// log_info!(logger, "Adapter ready", "name" => "stdout");
/// ```
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $msg:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::log_kv!($logger, $crate::logging::Severity::Info, $msg $(, $key => $value)*)
    };
}

/// Log a message with debug severity
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $msg:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::log_kv!($logger, $crate::logging::Severity::Debug, $msg $(, $key => $value)*)
    };
}

/// Log a message with key-value pairs
///
/// Values are anything convertible into [`Value`](crate::logging::Value).
/// Attributes are only built when the severity is enabled.
///
/// # Examples
/// ```ignore
/// log_kv!(logger, Severity::Info, "Batch written",
///         "adapter" => "file", "records" => 128u64);
/// ```
#[macro_export]
macro_rules! log_kv {
    ($logger:expr, $severity:expr, $msg:expr $(, $key:expr => $value:expr)* $(,)?) => {{
        let logger = &$logger;
        let severity: $crate::logging::Severity = $severity;
        if logger.enabled(severity) {
            let attrs: ::std::vec::Vec<$crate::logging::Attr> =
                ::std::vec![$($crate::logging::Attr::new($key, $value)),*];
            logger.log(severity, &$msg, &attrs)
        } else {
            ::std::result::Result::<(), $crate::logging::LogError>::Ok(())
        }
    }};
}
