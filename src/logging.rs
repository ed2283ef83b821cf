//! Structured suite logging.
//!
//! Scenario progress, warnings and text attachments (sidebar dumps, student
//! lists, export summaries) flow through [`SuiteLogger`]. Records carry a
//! category and optional JSON payload so an external sink can collect them;
//! without one they are forwarded to the `log` facade.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category used for text attachments.
pub const ATTACHMENT_CATEGORY: &str = "attachment";

/// Convenience alias for external logging callbacks.
pub type LogCallback = Arc<dyn Fn(&SuiteLogRecord) + Send + Sync + 'static>;

/// How chatty the suite logger is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Minimal,
    Medium,
    Detailed,
}

impl Verbosity {
    /// Map a repeated `-v` flag count onto a verbosity.
    pub fn from_occurrences(count: u8) -> Self {
        match count {
            0 => Verbosity::Medium,
            _ => Verbosity::Detailed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }
}

#[derive(Clone)]
pub struct LogConfig {
    pub verbose: Verbosity,
    pub external_logger: Option<LogCallback>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbose: Verbosity::Medium,
            external_logger: None,
        }
    }
}

impl LogConfig {
    pub fn new(verbose: Verbosity) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level <= LogLevel::Warn || level.as_u8() <= self.verbose.as_u8() + 1
    }
}

/// Record severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// Structured log entry shared with external callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuiteLogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

impl SuiteLogRecord {
    pub fn new(
        message: impl Into<String>,
        level: LogLevel,
        category: Option<String>,
        auxiliary: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            category,
            auxiliary,
        }
    }
}

/// Forward a record to the `log` facade under the `nawat_e2e` target.
pub fn default_log_handler(record: &SuiteLogRecord) {
    let level = log::Level::from(record.level);
    match &record.category {
        Some(category) => log::log!(target: "nawat_e2e", level, "[{category}] {}", record.message),
        None => log::log!(target: "nawat_e2e", level, "{}", record.message),
    }
    if let Some(aux) = &record.auxiliary {
        if !aux.is_null() {
            log::log!(target: "nawat_e2e", level, "    {aux}");
        }
    }
}

pub struct SuiteLogger {
    config: LogConfig,
    default_handler: LogCallback,
}

impl fmt::Debug for SuiteLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuiteLogger")
            .field("verbosity", &self.config.verbose)
            .field("external_logger", &self.config.external_logger.is_some())
            .finish()
    }
}

impl Default for SuiteLogger {
    fn default() -> Self {
        Self::with_config(LogConfig::default())
    }
}

impl SuiteLogger {
    pub fn with_config(config: LogConfig) -> Self {
        Self {
            config,
            default_handler: Arc::new(default_log_handler),
        }
    }

    pub fn new(verbose: Verbosity) -> Self {
        Self::with_config(LogConfig::new(verbose))
    }

    pub fn set_external_logger(&mut self, logger: Option<LogCallback>) {
        self.config.external_logger = logger;
    }

    pub fn log(
        &self,
        message: impl Into<String>,
        level: LogLevel,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        if !self.config.should_log(level) {
            return;
        }

        let record =
            SuiteLogRecord::new(message, level, category.map(|c| c.to_string()), auxiliary);

        if let Some(callback) = &self.config.external_logger {
            callback(&record);
        } else {
            (self.default_handler)(&record);
        }
    }

    pub fn error(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Error, category, auxiliary);
    }

    pub fn warn(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Warn, category, auxiliary);
    }

    pub fn info(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Info, category, auxiliary);
    }

    pub fn debug(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Debug, category, auxiliary);
    }

    /// Record a named text attachment.
    pub fn attach(&self, name: &str, body: impl Into<String>) {
        self.log(
            name,
            LogLevel::Info,
            Some(ATTACHMENT_CATEGORY),
            Some(Value::String(body.into())),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capturing(verbose: Verbosity) -> (SuiteLogger, Arc<Mutex<Vec<SuiteLogRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&records);
        let callback: LogCallback = Arc::new(move |record| {
            capture.lock().unwrap().push(record.clone());
        });
        let mut logger = SuiteLogger::new(verbose);
        logger.set_external_logger(Some(callback));
        (logger, records)
    }

    #[test]
    fn respects_verbosity() {
        let logger = SuiteLogger::new(Verbosity::Minimal);
        assert!(logger.config.should_log(LogLevel::Error));
        assert!(logger.config.should_log(LogLevel::Warn));
        assert!(!logger.config.should_log(LogLevel::Info));
        assert!(!logger.config.should_log(LogLevel::Debug));

        let logger = SuiteLogger::new(Verbosity::Medium);
        assert!(logger.config.should_log(LogLevel::Info));
        assert!(!logger.config.should_log(LogLevel::Debug));

        let logger = SuiteLogger::new(Verbosity::Detailed);
        assert!(logger.config.should_log(LogLevel::Debug));
    }

    #[test]
    fn external_logger_is_invoked() {
        let (logger, records) = capturing(Verbosity::Detailed);

        logger.info("hello", Some("login"), None);
        logger.debug("noisy", None, None);

        let values = records.lock().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].message, "hello");
        assert_eq!(values[0].category.as_deref(), Some("login"));
        assert_eq!(values[0].level, LogLevel::Info);
        assert_eq!(values[1].level, LogLevel::Debug);
    }

    #[test]
    fn attachments_carry_their_body() {
        let (logger, records) = capturing(Verbosity::Medium);

        logger.attach("Export Results", "Format: XLSX\nFile Size: 4096 bytes");

        let values = records.lock().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].message, "Export Results");
        assert_eq!(values[0].category.as_deref(), Some(ATTACHMENT_CATEGORY));
        assert_eq!(
            values[0].auxiliary.as_ref().and_then(Value::as_str),
            Some("Format: XLSX\nFile Size: 4096 bytes")
        );
    }

    #[test]
    fn verbosity_from_flag_count() {
        assert_eq!(Verbosity::from_occurrences(0), Verbosity::Medium);
        assert_eq!(Verbosity::from_occurrences(3), Verbosity::Detailed);
    }
}
