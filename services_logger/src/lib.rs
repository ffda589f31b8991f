//! # Logger Service
//!
//! This crate implements structured logging.
//!
//! ## Philosophy
//!
//! Logging is explicit and structured, not text-based or printf-style.
//! An entry is a message plus key/value fields; rendering to text happens
//! only at the edge (stderr), and tests query entries directly.

use core_types::PortId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational messages
    Info,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// A structured log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Port of the emitting server (if known)
    pub source: Option<PortId>,
    /// Log message
    pub message: String,
    /// Structured fields
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    /// Creates a new log entry
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            source: None,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    /// Sets the source port
    pub fn with_source(mut self, source: PortId) -> Self {
        self.source = Some(source);
        self
    }

    /// Adds a field to the log entry
    pub fn with_field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    /// Returns the value of a field
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.level)?;
        if let Some(source) = self.source {
            write!(f, " {}:", source)?;
        }
        write!(f, " {}", self.message)?;
        for (key, value) in &self.fields {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Logger configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    /// Entries below this level are discarded
    pub min_level: LogLevel,
    /// Echo accepted entries to stderr
    pub echo_stderr: bool,
    /// Number of most recent entries kept in memory
    pub history_capacity: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            echo_stderr: false,
            history_capacity: 1024,
        }
    }
}

struct LoggerInner {
    config: LoggerConfig,
    source: Option<PortId>,
    history: Mutex<VecDeque<LogEntry>>,
}

/// Thread-safe structured logger
///
/// Clones share configuration and history.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Self {
        Self::build(config, None)
    }

    fn build(config: LoggerConfig, source: Option<PortId>) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                config,
                source,
                history: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Creates a logger that stamps every entry with `source`
    pub fn for_source(config: LoggerConfig, source: PortId) -> Self {
        Self::build(config, Some(source))
    }

    /// Returns whether entries at `level` are kept
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.inner.config.min_level
    }

    /// Records an entry
    pub fn log(&self, mut entry: LogEntry) {
        if !self.enabled(entry.level) {
            return;
        }
        if entry.source.is_none() {
            entry.source = self.inner.source;
        }
        if self.inner.config.echo_stderr {
            eprintln!("{}", entry);
        }
        let capacity = self.inner.config.history_capacity;
        if capacity == 0 {
            return;
        }
        let mut history = self
            .inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if history.len() == capacity {
            history.pop_front();
        }
        history.push_back(entry);
    }

    /// Returns a copy of the retained entries, oldest first
    pub fn history(&self) -> Vec<LogEntry> {
        self.lock_history().iter().cloned().collect()
    }

    /// Counts retained entries at `level`
    pub fn count(&self, level: LogLevel) -> usize {
        self.lock_history()
            .iter()
            .filter(|entry| entry.level == level)
            .count()
    }

    /// Returns whether a retained entry has exactly this message
    pub fn has_message(&self, message: &str) -> bool {
        self.lock_history()
            .iter()
            .any(|entry| entry.message == message)
    }

    pub fn clear(&self) {
        self.lock_history().clear();
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, VecDeque<LogEntry>> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debug_logger(capacity: usize) -> Logger {
        Logger::new(LoggerConfig {
            min_level: LogLevel::Debug,
            echo_stderr: false,
            history_capacity: capacity,
        })
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_log_entry_creation() {
        let entry = LogEntry::new(LogLevel::Info, "test message");
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.message, "test message");
        assert!(entry.source.is_none());
        assert!(entry.fields.is_empty());
    }

    #[test]
    fn test_log_entry_with_fields() {
        let entry = LogEntry::info("pipe created")
            .with_field("resource", 3)
            .with_field("capacity", "4096");

        assert_eq!(entry.fields.len(), 2);
        assert_eq!(entry.field("resource"), Some("3"));
        assert_eq!(entry.field("missing"), None);
        assert_eq!(entry.to_string(), "[INFO] pipe created resource=3 capacity=4096");
    }

    #[test]
    fn test_logger_filters_by_level() {
        let logger = Logger::default();
        logger.log(LogEntry::debug("hidden"));
        logger.log(LogEntry::warn("shown"));

        assert!(!logger.enabled(LogLevel::Debug));
        assert!(!logger.has_message("hidden"));
        assert!(logger.has_message("shown"));
        assert_eq!(logger.count(LogLevel::Warn), 1);
    }

    #[test]
    fn test_logger_history_is_bounded() {
        let logger = debug_logger(2);
        logger.log(LogEntry::debug("one"));
        logger.log(LogEntry::debug("two"));
        logger.log(LogEntry::debug("three"));

        let messages: Vec<String> = logger.history().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["two".to_string(), "three".to_string()]);

        logger.clear();
        assert!(logger.history().is_empty());
    }

    #[test]
    fn test_logger_stamps_source() {
        let port = PortId::new();
        let logger = Logger::for_source(LoggerConfig::default(), port);
        let clone = logger.clone();
        clone.log(LogEntry::error("boom"));

        let history = logger.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].source, Some(port));
    }

    #[test]
    fn test_level_deserializes_lowercase() {
        let level: LogLevel = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(level, LogLevel::Warn);
    }
}
