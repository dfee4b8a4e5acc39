// Unified logger - forwards to the `log` facade and optionally persists to file
//
// Usage (no handle needed, from any module):
//      ulog_info!("[opq-ws] Connected");
//      ulog_warn!("[opq-send] Send failed: {}", err);
//
// The host application installs the `log` backend. Persistence is opt-in:
// after `init_log_dir(dir)`, every line is also appended to
// `<dir>/opqbot-{YYYY-MM-DD}.log`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn to_log_level(self) -> log::Level {
        match self {
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

static LOG_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Enable file persistence. Call once at startup; later calls are ignored.
pub fn init_log_dir(dir: impl Into<PathBuf>) {
    if LOG_DIR.set(dir.into()).is_err() {
        log::warn!("Log directory already initialized");
    }
}

/// Default log directory (~/.opqbot/logs/)
pub fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".opqbot")
        .join("logs")
}

fn log_file_path(dir: &Path, date: &str) -> PathBuf {
    dir.join(format!("opqbot-{}.log", date))
}

fn format_line(timestamp: &str, level: LogLevel, message: &str) -> String {
    format!("{} [{}] {}\n", timestamp, level.as_str(), message)
}

/// Append one line to today's log file in `dir`
fn persist_log(dir: &Path, level: LogLevel, message: &str) {
    if let Err(e) = fs::create_dir_all(dir) {
        log::error!("Failed to create logs directory: {}", e);
        return;
    }

    let now = chrono::Local::now();
    let path = log_file_path(dir, &now.format("%Y-%m-%d").to_string());
    let line = format_line(&now.to_rfc3339(), level, message);

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(mut file) => {
            if let Err(e) = file.write_all(line.as_bytes()) {
                log::error!("Failed to write to log file: {}", e);
            }
        }
        Err(e) => {
            log::error!("Failed to open log file: {}", e);
        }
    }
}

/// Log through the `log` facade and, when initialized, to the log file.
pub fn unified_log(level: LogLevel, message: String) {
    log::log!(target: "opqbot", level.to_log_level(), "{}", message);
    if let Some(dir) = LOG_DIR.get() {
        persist_log(dir, level, &message);
    }
}

/// Usage: ulog_info!("[module] message {}", arg);
#[macro_export]
macro_rules! ulog_info {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Info, format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ulog_warn {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Warn, format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ulog_error {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Error, format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ulog_debug {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Debug, format!($($arg)*));
    }};
}
