//! User-facing log output for the development server.
//!
//! [`Logger`] is a plain value handed to the server lifecycle and the
//! compiler adapter when they are constructed. Two servers in one process
//! can therefore log at different levels without touching shared state.
//!
//! Lines look like this (the timestamp only appears with `log_time`):
//!
//! ```text
//! [14:02:11] ℹ ｢serve｣: Project is running at http://localhost:8080
//! ```
//!
//! Internal diagnostics that are not meant for the user go through
//! `tracing` instead.

use crate::error::ConfigError;
use owo_colors::OwoColorize;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Log verbosity, ordered from most to least verbose.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Silent,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Silent => "silent",
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            LogLevel::Trace | LogLevel::Debug => "◆",
            LogLevel::Info => "ℹ",
            LogLevel::Warn => "⚠",
            LogLevel::Error | LogLevel::Silent => "✗",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "silent" => Ok(LogLevel::Silent),
            other => Err(ConfigError::InvalidValue {
                field: "logLevel".to_string(),
                value: other.to_string(),
                hint: "Must be one of trace, debug, info, warn, error, silent".to_string(),
            }),
        }
    }
}

/// Where formatted lines go.
#[derive(Clone)]
enum Sink {
    Stdout,
    Memory(Arc<Mutex<Vec<String>>>),
}

/// Named, level-filtered logger.
#[derive(Clone)]
pub struct Logger {
    name: String,
    level: LogLevel,
    timestamp: bool,
    color: bool,
    sink: Sink,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl Logger {
    /// Create a logger that writes to stdout.
    ///
    /// Colors follow [`should_use_colors`].
    pub fn new(level: LogLevel, timestamp: bool) -> Self {
        Self {
            name: "serve".to_string(),
            level,
            timestamp,
            color: should_use_colors(),
            sink: Sink::Stdout,
        }
    }

    /// Create a logger that records plain lines in memory.
    ///
    /// Returns the logger and a handle to the recorded lines.
    pub fn captured(level: LogLevel, timestamp: bool) -> (Self, LogCapture) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let logger = Self {
            name: "serve".to_string(),
            level,
            timestamp,
            color: false,
            sink: Sink::Memory(Arc::clone(&lines)),
        };
        (logger, LogCapture { lines })
    }

    /// Derive a logger with a different name sharing the same sink.
    pub fn named(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Whether a message at `level` would be written.
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.level != LogLevel::Silent && level != LogLevel::Silent && level >= self.level
    }

    pub fn trace(&self, message: impl fmt::Display) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }

    fn log(&self, level: LogLevel, message: impl fmt::Display) {
        if !self.enabled(level) {
            return;
        }

        let line = self.format_line(level, &message.to_string());
        match &self.sink {
            Sink::Stdout => println!("{}", line),
            Sink::Memory(lines) => lines.lock().push(line),
        }
    }

    /// Render one log line.
    pub fn format_line(&self, level: LogLevel, message: &str) -> String {
        let mut line = String::new();

        if self.timestamp {
            let now = chrono::Local::now().format("%H:%M:%S").to_string();
            line.push_str(&format!("[{}] ", now));
        }

        let tag = format!("｢{}｣", self.name);
        if self.color {
            let symbol = match level {
                LogLevel::Trace | LogLevel::Debug => level.symbol().dimmed().to_string(),
                LogLevel::Info => level.symbol().blue().bold().to_string(),
                LogLevel::Warn => level.symbol().yellow().bold().to_string(),
                LogLevel::Error | LogLevel::Silent => level.symbol().red().bold().to_string(),
            };
            line.push_str(&format!("{} {}: {}", symbol, tag.dimmed(), message));
        } else {
            line.push_str(&format!("{} {}: {}", level.symbol(), tag, message));
        }

        line
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LogLevel::Info, false)
    }
}

/// Lines recorded by a [`Logger::captured`] logger.
#[derive(Debug, Clone)]
pub struct LogCapture {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogCapture {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

/// Check if colored output should be enabled.
///
/// # Environment Variables
///
/// - `NO_COLOR`: If set, disables colors
/// - `FORCE_COLOR`: If set, forces colors even in non-TTY
pub fn should_use_colors() -> bool {
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    console::Term::stdout().features().colors_supported()
}
