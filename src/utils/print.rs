//! Logging macros tagging every line with the identity of the routing node.

use std::sync::OnceLock;

use env_logger::Env;

/// Identity of the local routing node, printed as the prefix of every log
/// line. Set at most once per process.
pub static ME: OnceLock<String> = OnceLock::new();

/// Sets the log prefix identity. Returns false if it was already set.
pub fn set_log_identity(me: impl Into<String>) -> bool {
    ME.set(me.into()).is_ok()
}

/// Current log prefix identity, `-` if never set.
pub fn log_identity() -> &'static str {
    ME.get().map_or("-", |me| me.as_str())
}

/// Log a message at given level, prefixed by the routing node identity.
#[doc(hidden)]
#[macro_export]
macro_rules! pf_log {
    ($level:ident, $($fmt_args:tt)*) => {
        log::$level!(
            "({}) {}",
            $crate::log_identity(),
            format!($($fmt_args)*)
        )
    };
}

/// Log TRACE message, e.g. `pf_trace!("ranks {:?}", ranks)`.
#[macro_export]
macro_rules! pf_trace {
    ($($fmt_args:tt)*) => { $crate::pf_log!(trace, $($fmt_args)*) };
}

/// Log DEBUG message.
#[macro_export]
macro_rules! pf_debug {
    ($($fmt_args:tt)*) => { $crate::pf_log!(debug, $($fmt_args)*) };
}

/// Log INFO message.
#[macro_export]
macro_rules! pf_info {
    ($($fmt_args:tt)*) => { $crate::pf_log!(info, $($fmt_args)*) };
}

/// Log WARN message.
#[macro_export]
macro_rules! pf_warn {
    ($($fmt_args:tt)*) => { $crate::pf_log!(warn, $($fmt_args)*) };
}

/// Log ERROR message.
#[macro_export]
macro_rules! pf_error {
    ($($fmt_args:tt)*) => { $crate::pf_log!(error, $($fmt_args)*) };
}

/// Initialize `env_logger` with INFO as default level, if not yet done.
pub fn logger_init() {
    let _ =
        env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .try_init();
}

/// Logs the message at ERROR and evaluates to `Err(ShardRouteError::Msg)`
/// carrying the same text, e.g.
/// `return logged_err!("copy of {} staged in builder of {}", a, b);`.
#[macro_export]
macro_rules! logged_err {
    ($($fmt_args:tt)*) => {
        {
            $crate::pf_error!($($fmt_args)*);
            Err($crate::ShardRouteError::msg(format!($($fmt_args)*)))
        }
    };
}
