//! Kernel-style print macros for evio
//!
//! Thread-safe, optionally-flushing debug output to stderr.
//!
//! # Environment Variables
//!
//! - `EVIO_FLUSH_EPRINT=1` - Flush stderr after each print (useful for debugging crashes)
//! - `EVIO_LOG_LEVEL=<level>` - Set log level: 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//!
//! # Usage
//!
//! ```ignore
//! use evio_core::{edebug, einfo, ewarn, eerror};
//!
//! edebug!("source registered: {}", token);
//! einfo!("loop started");
//! ewarn!("stale token {}", token);
//! eerror!("poll failed: {}", err);
//! ```

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

// Global configuration (initialized once)
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize logging from environment variables
///
/// Called automatically on first log, but can be called explicitly for
/// deterministic initialization.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    if let Ok(val) = std::env::var("EVIO_FLUSH_EPRINT") {
        let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }

    if let Ok(val) = std::env::var("EVIO_LOG_LEVEL") {
        if let Ok(level) = val.parse::<u8>() {
            LOG_LEVEL.store(level.min(5), Ordering::Relaxed);
        }
    }
}

/// Set the log level programmatically (overrides environment).
pub fn set_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Current log level.
pub fn level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Whether messages at `level` should be printed.
#[inline]
pub fn enabled(at: LogLevel) -> bool {
    at <= level() && at != LogLevel::Off
}

#[doc(hidden)]
pub fn log_line(at: LogLevel, args: std::fmt::Arguments<'_>) {
    if !enabled(at) {
        return;
    }
    let stderr = std::io::stderr();
    let mut lock = stderr.lock();
    let _ = writeln!(lock, "{} {}", at.prefix(), args);
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = lock.flush();
    }
}

#[macro_export]
macro_rules! eerror {
    ($($arg:tt)*) => {
        $crate::elog::log_line($crate::elog::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! ewarn {
    ($($arg:tt)*) => {
        $crate::elog::log_line($crate::elog::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! einfo {
    ($($arg:tt)*) => {
        $crate::elog::log_line($crate::elog::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! edebug {
    ($($arg:tt)*) => {
        $crate::elog::log_line($crate::elog::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! etrace {
    ($($arg:tt)*) => {
        $crate::elog::log_line($crate::elog::LogLevel::Trace, format_args!($($arg)*))
    };
}
