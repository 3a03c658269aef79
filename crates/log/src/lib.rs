//! Process-wide logger: level and format switches, a stderr sink, and an
//! in-memory ring the terminal UI reads while stderr is hidden.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Debug,
        Level::Trace,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Error,
            2 => Self::Warn,
            4 => Self::Debug,
            5 => Self::Trace,
            _ => Self::Info,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static LOG_TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static LOG_STDERR_ENABLED: AtomicBool = AtomicBool::new(true);

static CAPTURE_ENABLED: AtomicBool = AtomicBool::new(false);
static CAPTURE_CAPACITY: AtomicUsize = AtomicUsize::new(0);
static CAPTURE: OnceLock<Mutex<VecDeque<CapturedLog>>> = OnceLock::new();

/// One record kept by the capture ring.
#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: i64,
    pub level: Level,
    pub target: &'static str,
    pub msg: String,
}

impl CapturedLog {
    /// `HH:MM:SS` in UTC, for narrow panels.
    pub fn clock(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.ts_ms)
            .map(|ts| ts.format("%H:%M:%S").to_string())
            .unwrap_or_default()
    }
}

pub fn init(config: LogConfig) {
    LOG_LEVEL.store(config.level as u8, Ordering::Relaxed);
    LOG_FORMAT.store(config.format as u8, Ordering::Relaxed);
    LOG_TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
}

pub fn set_stderr_enabled(enabled: bool) {
    LOG_STDERR_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        CAPTURE_ENABLED.store(false, Ordering::Relaxed);
        return;
    }
    CAPTURE_CAPACITY.store(capacity, Ordering::Relaxed);
    CAPTURE.get_or_init(|| Mutex::new(VecDeque::with_capacity(capacity.min(1024))));
    CAPTURE_ENABLED.store(true, Ordering::Relaxed);
}

/// The newest `limit` captured records, oldest first.
pub fn capture_snapshot(limit: usize) -> Vec<CapturedLog> {
    let Some(ring) = CAPTURE.get() else {
        return Vec::new();
    };
    let Ok(guard) = ring.lock() else {
        return Vec::new();
    };
    let start = guard.len().saturating_sub(limit);
    guard.iter().skip(start).cloned().collect()
}

pub fn enabled(level: Level) -> bool {
    level <= Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn log(
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
) {
    if !enabled(level) {
        return;
    }

    let now = Utc::now();
    let to_stderr = LOG_STDERR_ENABLED.load(Ordering::Relaxed);
    let to_capture = CAPTURE_ENABLED.load(Ordering::Relaxed);
    if !to_stderr && !to_capture {
        return;
    }
    let msg = args.to_string();

    if to_stderr {
        let rendered = match LOG_FORMAT.load(Ordering::Relaxed) {
            1 => json!({
                "ts_ms": now.timestamp_millis(),
                "level": level.as_str(),
                "target": target,
                "file": file,
                "line": line,
                "msg": msg,
            })
            .to_string(),
            _ => render_text(now, level, target, &msg),
        };
        let mut out = io::stderr().lock();
        let _ = writeln!(out, "{rendered}");
    }

    if to_capture {
        push_captured(CapturedLog {
            ts_ms: now.timestamp_millis(),
            level,
            target,
            msg,
        });
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

fn render_text(now: DateTime<Utc>, level: Level, target: &str, msg: &str) -> String {
    if LOG_TIMESTAMPS.load(Ordering::Relaxed) {
        format!(
            "{} {} {target}: {msg}",
            now.to_rfc3339_opts(SecondsFormat::Millis, true),
            level.as_str()
        )
    } else {
        format!("{} {target}: {msg}", level.as_str())
    }
}

fn push_captured(record: CapturedLog) {
    let Some(ring) = CAPTURE.get() else {
        return;
    };
    let Ok(mut guard) = ring.lock() else {
        return;
    };
    let cap = CAPTURE_CAPACITY.load(Ordering::Relaxed);
    guard.push_back(record);
    while guard.len() > cap {
        let _ = guard.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level() {
        assert_eq!(Level::parse("info"), Some(Level::Info));
        assert_eq!(Level::parse(" WARN "), Some(Level::Warn));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("trace"), Some(Level::Trace));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn parse_format() {
        assert_eq!(Format::parse("text"), Some(Format::Text));
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse("yaml"), None);
    }

    #[test]
    fn level_round_trips_through_atomic() {
        for level in Level::ALL {
            assert_eq!(Level::from_u8(level as u8), level);
        }
    }

    #[test]
    fn text_line_without_timestamp() {
        LOG_TIMESTAMPS.store(false, Ordering::Relaxed);
        let line = render_text(Utc::now(), Level::Warn, "bscwatch::poller", "stopped");
        LOG_TIMESTAMPS.store(true, Ordering::Relaxed);
        assert_eq!(line, "WARN bscwatch::poller: stopped");
    }

    #[test]
    fn clock_renders_utc() {
        let record = CapturedLog {
            ts_ms: 1_700_000_000_000,
            level: Level::Info,
            target: "t",
            msg: String::new(),
        };
        assert_eq!(record.clock(), "22:13:20");
    }
}
