/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;

/// Severity of a [`LogRecord`], ordered from least to most important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum LogLevel {
    #[default]
    Trace,
    Debug,
    Info,
    /// Anything that was written to the protocol output.
    Output,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    /// Uppercase name of this level, as it appears in the log file.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Output => "OUTPUT",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single entry in the [`LogBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    /// Creates a new record stamped with the current time.
    pub fn new(level: LogLevel, message: impl fmt::Display) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for LogRecord {
    /// Formats this record as a line of the log file, without the trailing newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] ({}): {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.level,
            self.message
        )
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<LogRecord>,
    min_level: LogLevel,
}

/// Ordered, in-memory log of everything the engine did.
///
/// Cloning a [`LogBuffer`] yields another handle to the same records.
/// Records below the minimum level are dropped on arrival.
/// The buffer is written to a file in the system's temp directory on shutdown.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<Inner>>,
}

impl LogBuffer {
    /// Creates an empty buffer that retains records at or above `min_level`.
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                records: Vec::with_capacity(1024),
                min_level,
            })),
        }
    }

    /// A record can't be left half-written, so a poisoned lock is still usable.
    #[inline(always)]
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `record`, unless it is below the minimum level.
    pub fn push(&self, record: LogRecord) {
        let mut inner = self.lock();
        if record.level >= inner.min_level {
            inner.records.push(record);
        }
    }

    /// Records `message` at `level`.
    #[inline(always)]
    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        self.push(LogRecord::new(level, message));
    }

    pub fn trace(&self, message: impl fmt::Display) {
        self.log(LogLevel::Trace, message)
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message)
    }

    pub fn output(&self, message: impl fmt::Display) {
        self.log(LogLevel::Output, message)
    }

    pub fn warning(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warning, message)
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message)
    }

    pub fn fatal(&self, message: impl fmt::Display) {
        self.log(LogLevel::Fatal, message)
    }

    /// Number of records retained.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Returns `true` if nothing has been retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of every record retained, in the order they arrived.
    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().records.clone()
    }

    /// Writes every retained record to `writer`, one per line.
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for record in self.lock().records.iter() {
            writeln!(writer, "{record}")?;
        }
        writer.flush()
    }

    /// Writes the log to a fresh file in the system's temp directory, returning its path.
    pub fn flush_to_temp_dir(&self) -> Result<PathBuf> {
        let name = format!(
            "{}-{}-{}.log",
            env!("CARGO_PKG_NAME"),
            Utc::now().timestamp_millis(),
            std::process::id()
        );
        let path = std::env::temp_dir().join(name);

        let file = File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        self.write_to(BufWriter::new(file))
            .with_context(|| format!("Failed to write log file {}", path.display()))?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        use LogLevel::*;
        let levels = [Trace, Debug, Info, Output, Warning, Error, Fatal];
        for pair in levels.windows(2) {
            assert!(pair[0] < pair[1], "{} should be below {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_level_parses_case_insensitively() {
        assert_eq!(LogLevel::from_str("WARNING", true), Ok(LogLevel::Warning));
        assert_eq!(LogLevel::from_str("output", true), Ok(LogLevel::Output));
        assert!(LogLevel::from_str("LOUD", true).is_err());
    }

    #[test]
    fn test_push_filters_below_min_level() {
        let logs = LogBuffer::new(LogLevel::Output);
        logs.trace("dropped");
        logs.info("dropped");
        logs.output("kept");
        logs.fatal("kept too");

        let records = logs.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, LogLevel::Output);
        assert_eq!(records[1].message, "kept too");
    }

    #[test]
    fn test_handles_share_records() {
        let logs = LogBuffer::new(LogLevel::Trace);
        let other = logs.clone();
        other.info("from a clone");
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn test_file_format() {
        let logs = LogBuffer::new(LogLevel::Trace);
        let timestamp = DateTime::parse_from_rfc3339("2024-03-01T12:30:45.123Z")
            .unwrap()
            .with_timezone(&Utc);
        logs.push(LogRecord {
            timestamp,
            level: LogLevel::Warning,
            message: String::from("Something odd"),
        });

        let mut out = Vec::new();
        logs.write_to(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[2024-03-01T12:30:45.123Z] (WARNING): Something odd\n"
        );
    }
}
