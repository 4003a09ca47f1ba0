//! Line-oriented file logging for the relogin daemon.
//!
//! Every line carries a local timestamp and a level tag. Workflow code puts
//! the relogin key first in brackets (`[drone1] ...`) so one run can be
//! followed with grep.
//!
//! The level is resolved once at startup, highest priority first:
//! `--debug`, `RELOGIN_LOG=<level>`, `RELOGIN_DEBUG=1`, the `[log] level`
//! config entry, then INFO. Output goes to `~/.relogin/relogin.log` unless
//! `[log] file` points elsewhere; `serve` also mirrors lines to stderr.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::config::{expand_tilde, Config, LogConfig};
use crate::error::Error;

static SINK: OnceLock<Mutex<PathBuf>> = OnceLock::new();
static ECHO: AtomicBool = AtomicBool::new(false);
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static FORCED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(Error::InvalidInput(format!("unknown log level: {}", other))),
        }
    }
}

/// Level forced from the command line or environment, if any.
fn startup_override(debug_flag: bool) -> Option<LogLevel> {
    if debug_flag {
        return Some(LogLevel::Debug);
    }
    if let Some(level) = std::env::var("RELOGIN_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        return Some(level);
    }
    std::env::var("RELOGIN_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
        .then_some(LogLevel::Debug)
}

/// Start logging to the default file. Call once, before loading config.
pub fn init_with_debug(debug: bool) {
    let forced = startup_override(debug);
    FORCED.store(forced.is_some(), Ordering::SeqCst);
    set_level(forced.unwrap_or(LogLevel::Info));

    if let Ok(dir) = Config::relogin_dir() {
        let _ = std::fs::create_dir_all(&dir);
        let _ = SINK.set(Mutex::new(dir.join("relogin.log")));
    }
}

/// Apply the `[log]` section. A level forced at startup wins over the file.
pub fn configure(config: &LogConfig) -> crate::Result<()> {
    if let Some(level) = config.level.as_deref() {
        let level: LogLevel = level.parse()?;
        if !FORCED.load(Ordering::SeqCst) {
            set_level(level);
        }
    }
    if let Some(file) = config.file.as_deref() {
        let path = expand_tilde(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match SINK.get() {
            Some(sink) => {
                if let Ok(mut current) = sink.lock() {
                    *current = path;
                }
            }
            None => {
                let _ = SINK.set(Mutex::new(path));
            }
        }
    }
    Ok(())
}

/// Mirror log lines to stderr.
pub fn set_echo(enabled: bool) {
    ECHO.store(enabled, Ordering::SeqCst);
}

pub fn set_level(level: LogLevel) {
    LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn level() -> LogLevel {
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

fn format_line(level: LogLevel, msg: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    format!("{} {:<5} {}", timestamp, level.as_str(), msg)
}

pub fn log_at(level: LogLevel, msg: &str) {
    if level > self::level() {
        return;
    }
    let line = format_line(level, msg);

    if ECHO.load(Ordering::Relaxed) {
        eprintln!("{}", line);
    }

    let Some(sink) = SINK.get() else { return };
    let Ok(path) = sink.lock() else { return };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&*path) {
        let _ = writeln!(file, "{}", line);
    }
}

/// Log at INFO.
#[macro_export]
macro_rules! rlog {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! rlog_error {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! rlog_warn {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Warn, &format!($($arg)*))
    };
}

/// Log at DEBUG. Formatting is skipped entirely below that level, which
/// matters on the poll path.
#[macro_export]
macro_rules! rlog_debug {
    ($($arg:tt)*) => {
        if $crate::log::level() >= $crate::log::LogLevel::Debug {
            $crate::log::log_at($crate::log::LogLevel::Debug, &format!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! rlog_trace {
    ($($arg:tt)*) => {
        if $crate::log::level() >= $crate::log::LogLevel::Trace {
            $crate::log::log_at($crate::log::LogLevel::Trace, &format!($($arg)*))
        }
    };
}
