//! Accumulated, timestamped migration log
//!
//! Every entry is also emitted through `tracing`, so the log doubles as the
//! operator-facing record of a snapshot or migrate call.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct MigrationLog {
    entries: Vec<LogEntry>,
}

impl MigrationLog {
    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.push(LogLevel::Warn, message);
    }

    fn push(&mut self, level: LogLevel, message: String) {
        self.entries.push(LogEntry {
            time: Utc::now(),
            level,
            message,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Drain the accumulated entries
    pub fn take(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_accumulate_until_taken() {
        let mut log = MigrationLog::default();
        log.info("Snapshot process starting");
        log.warn("There was a problem connecting to the database");

        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.entries()[1].level, LogLevel::Warn);
        assert!(log.entries()[0].time <= log.entries()[1].time);
        assert!(log.contains("problem connecting"));

        let taken = log.take();
        assert_eq!(taken.len(), 2);
        assert!(log.entries().is_empty());
    }
}
