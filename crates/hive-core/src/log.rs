//! Leveled stderr logging for hive
//!
//! Thread-safe, optionally-flushing log macros with a per-thread request-id
//! scope. Worker threads set the scope from the `X-Request-ID` header before
//! running a handler; every line logged while the scope is set carries a
//! `[rid ...]` prefix so concurrent request logs can be correlated.
//!
//! # Environment Variables
//!
//! - `HIVE_LOG_LEVEL=<level>` - 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//! - `HIVE_LOG_FLUSH=1` - flush stderr after each line (debugging crashes)

use std::cell::RefCell;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log levels (matches common conventions)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static REQUEST_ID: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Initialize logging from environment variables.
///
/// Called automatically on first log; call explicitly for deterministic
/// startup ordering.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    let flush = crate::env::env_get_bool("HIVE_LOG_FLUSH", false);
    FLUSH_ENABLED.store(flush, Ordering::Relaxed);

    if let Ok(val) = std::env::var("HIVE_LOG_LEVEL") {
        let level = match val.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Info,
        };
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn set_log_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level as u8 <= log_level() as u8
}

/// Enter a request-id scope on the current thread. All lines logged until
/// `clear_request_scope` carry the id.
pub fn set_request_scope(id: &str) {
    REQUEST_ID.with(|r| *r.borrow_mut() = Some(id.to_string()));
}

/// Leave the request-id scope.
pub fn clear_request_scope() {
    REQUEST_ID.with(|r| *r.borrow_mut() = None);
}

/// Current request id, if a scope is active.
pub fn request_scope() -> Option<String> {
    REQUEST_ID.with(|r| r.borrow().clone())
}

/// Internal: leveled write with optional rid prefix, one locked line.
#[doc(hidden)]
pub fn _hlog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} ", level.prefix());
    REQUEST_ID.with(|r| {
        if let Some(id) = r.borrow().as_deref() {
            let _ = write!(handle, "[rid {}] ", id);
        }
    });
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

/// Error level log (always shown unless logging is off)
#[macro_export]
macro_rules! herror {
    ($($arg:tt)*) => {{
        $crate::log::_hlog_impl(
            $crate::log::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

/// Warning level log
#[macro_export]
macro_rules! hwarn {
    ($($arg:tt)*) => {{
        $crate::log::_hlog_impl(
            $crate::log::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

/// Info level log
#[macro_export]
macro_rules! hinfo {
    ($($arg:tt)*) => {{
        $crate::log::_hlog_impl(
            $crate::log::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

/// Debug level log
#[macro_export]
macro_rules! hdebug {
    ($($arg:tt)*) => {{
        $crate::log::_hlog_impl(
            $crate::log::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! htrace {
    ($($arg:tt)*) => {{
        $crate::log::_hlog_impl(
            $crate::log::LogLevel::Trace,
            format_args!($($arg)*)
        );
    }};
}
