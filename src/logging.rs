use crate::error::SyncError;

/// Log level definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// JSON record forwarded to whichever `log` backend the host installed.
pub fn log_record(level: LogLevel, message: &str) -> serde_json::Value {
    serde_json::json!({
        "level": level.as_str(),
        "message": message,
        "timestamp": jiff::Zoned::now().to_string()
    })
}

/// Send a log message through the `log` facade
pub fn send_log(level: LogLevel, message: &str) {
    let record = log_record(level, message);
    log::log!(target: "costume_sync", level.as_log_level(), "{}", record);
}

/// Log SyncError with automatic error-level logging
pub fn log_sync_error(error: &SyncError, context: Option<&str>) {
    let message = match context {
        Some(ctx) => format!("{}: {}", ctx, error),
        None => error.to_string(),
    };

    send_log(LogLevel::Error, &message);
}

/// Convenience macros for logging
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Debug, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Error, &format!($($arg)*))
    };
}

/// Result extension for convenient error logging
pub trait ResultExt<T, E> {
    fn log_error(self, context: Option<&str>) -> Self;
}

impl<T> ResultExt<T, SyncError> for Result<T, SyncError> {
    fn log_error(self, context: Option<&str>) -> Self {
        if let Err(ref error) = self {
            log_sync_error(error, context);
        }
        self
    }
}
