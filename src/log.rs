//! File logging to `~/.foreman/foreman.log`.
//!
//! The log is truncated on startup and appended to through the `flog!`
//! macro family. Debug entries are written only when the `--debug` flag or
//! `FOREMAN_DEBUG=1` is set; everything at INFO and above is always kept.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Log levels, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

struct Logger {
    path: PathBuf,
    max_level: LogLevel,
}

impl Logger {
    fn new(path: PathBuf, max_level: LogLevel) -> Self {
        Self { path, max_level }
    }

    fn write(&self, level: LogLevel, msg: &str) {
        if level > self.max_level {
            return;
        }
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
        }
    }
}

/// Whether `FOREMAN_DEBUG` asks for debug logging.
pub fn env_debug() -> bool {
    std::env::var("FOREMAN_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Set up the log file, truncating the previous run's contents.
///
/// Best-effort: without a home directory logging stays disabled and every
/// macro call is a no-op. Call once at startup, before any `flog!`.
pub fn init(debug: bool) {
    let max_level = if debug || env_debug() {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    if let Some(dir) = dirs::home_dir().map(|h| h.join(".foreman")) {
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("foreman.log");
        let _ = std::fs::write(&path, "");
        let _ = LOGGER.set(Logger::new(path, max_level));
    }
}

/// Append one entry; no-op before `init` or above the configured level.
pub fn write(level: LogLevel, msg: &str) {
    if let Some(logger) = LOGGER.get() {
        logger.write(level, msg);
    }
}

/// Log at INFO level.
#[macro_export]
macro_rules! flog {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Info, &format!($($arg)*))
    };
}

/// Log at ERROR level.
#[macro_export]
macro_rules! flog_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Error, &format!($($arg)*))
    };
}

/// Log at WARN level.
#[macro_export]
macro_rules! flog_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Warn, &format!($($arg)*))
    };
}

/// Log at DEBUG level; filtered out unless debug logging is on.
#[macro_export]
macro_rules! flog_debug {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Debug, &format!($($arg)*))
    };
}
