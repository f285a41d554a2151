//! Simple logging module.

use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};

/// Log level for filtering messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Debug => write!(f, "DEBUG"),
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERROR"),
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Warn as u8);

/// Initialize the logger with the given level.
pub fn init(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Returns true if the given level should be logged.
///
/// Call sites that format expensive messages (the per-instruction execution
/// trace) should check this before building the message.
#[inline]
pub fn enabled(level: Level) -> bool {
    level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Logs a message at the given level.
pub fn log(level: Level, message: &str) {
    if enabled(level) {
        eprintln!("[{:5}] {}", level, message);
    }
}

/// Logs a debug-level message.
pub fn debug(message: &str) {
    log(Level::Debug, message);
}

/// Logs an info-level message.
pub fn info(message: &str) {
    log(Level::Info, message);
}

/// Logs a warning-level message.
pub fn warn(message: &str) {
    log(Level::Warn, message);
}

/// Logs an error-level message.
pub fn error(message: &str) {
    log(Level::Error, message);
}
