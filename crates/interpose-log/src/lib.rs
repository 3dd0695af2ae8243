//! Leveled logging for the `interpose` proxy engine.
//!
//! Messages carry their severity and the module path they were emitted from.
//! Output goes through a pluggable [`Sink`]; the default sink writes colored
//! lines to stderr, and [`MemorySink`] captures records for assertions.
//!
//! The minimum level can be set programmatically or read once from the
//! `INTERPOSE_LOG` environment variable.
//!
//! # Example
//!
//! ```
//! use interpose_log::{debug, info, warn, Level};
//!
//! interpose_log::set_level(Level::Debug);
//!
//! let name = "CompositionAopProxy_1";
//! info!("built proxy type {}", name);
//! debug!("slots: {:?}", [0, 1, 2]);
//! warn!("advisor list is frozen");
//! ```

use std::fmt::{self, Arguments};
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

/// Environment variable consulted by [`init_from_env`].
pub const ENV_VAR: &str = "INTERPOSE_LOG";

/// Severity of a log message.
///
/// Ordered from most severe (`Error`) to least severe (`Trace`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl Level {
    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    /// Returns the upper-case name of this level.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(raw: u8) -> Level {
        match raw {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a [`Level`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError {
    input: String,
}

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid log level: {:?}", self.input)
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for Level {
    type Err = ParseLevelError;

    /// Parses a level name, ignoring case and surrounding whitespace.
    ///
    /// ```
    /// use interpose_log::Level;
    ///
    /// assert_eq!("debug".parse::<Level>(), Ok(Level::Debug));
    /// assert!("loud".parse::<Level>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ERROR" => Ok(Level::Error),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            "TRACE" => Ok(Level::Trace),
            _ => Err(ParseLevelError {
                input: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Records and sinks
// ============================================================================

/// One formatted log message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub level: Level,
    /// Module path of the call site.
    pub target: String,
    pub message: String,
}

/// Destination for log records.
pub trait Sink: Send + Sync {
    fn write(&self, level: Level, target: &str, args: Arguments<'_>);
}

/// Writes colored lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl Sink for StderrSink {
    fn write(&self, level: Level, target: &str, args: Arguments<'_>) {
        const RESET: &str = "\x1b[0m";
        let color = level.color_code();
        let mut err = std::io::stderr().lock();
        // A failed write to stderr has nowhere better to go.
        let _ = writeln!(err, "{color}[{level}]{RESET} {target}: {args}");
    }
}

/// Keeps records in memory so tests can inspect them.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record captured so far.
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true if any captured record at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|r| r.level == level && r.message.contains(needle))
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Sink for MemorySink {
    fn write(&self, level: Level, target: &str, args: Arguments<'_>) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Record {
                level,
                target: target.to_string(),
                message: args.to_string(),
            });
    }
}

// ============================================================================
// Logger
// ============================================================================

/// A level filter plus a sink.
///
/// The process-wide instance is reached through [`get_logger`]; standalone
/// loggers are useful in tests.
pub struct Logger {
    level: AtomicU8,
    sink: RwLock<Option<Arc<dyn Sink>>>,
}

impl Logger {
    /// Creates a logger that writes to stderr until a sink is installed.
    pub const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
            sink: RwLock::new(None),
        }
    }

    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::SeqCst);
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Checks if a message at `level` passes the filter.
    pub fn enabled(&self, level: Level) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }

    /// Replaces the sink, returning the previous one.
    pub fn set_sink(&self, sink: Arc<dyn Sink>) -> Option<Arc<dyn Sink>> {
        self.sink
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(sink)
    }

    /// Restores the default stderr sink.
    pub fn reset_sink(&self) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Filters and forwards one message to the sink.
    pub fn log(&self, level: Level, target: &str, args: Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sink {
            Some(sink) => sink.write(level, target, args),
            None => StderrSink.write(level, target, args),
        }
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Returns the process-wide logger, created at `Level::Warn` on first use.
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Level::Warn))
}

/// Sets the minimum level of the global logger.
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Sets the minimum level of the global logger from a level name.
///
/// ```
/// interpose_log::set_level_from_str("trace").unwrap();
/// assert!(interpose_log::set_level_from_str("nope").is_err());
/// ```
pub fn set_level_from_str(s: &str) -> Result<(), ParseLevelError> {
    set_level(s.parse()?);
    Ok(())
}

/// Installs a sink on the global logger.
pub fn set_sink(sink: Arc<dyn Sink>) -> Option<Arc<dyn Sink>> {
    get_logger().set_sink(sink)
}

/// Applies `INTERPOSE_LOG` to the global logger if it is set.
///
/// Returns the level that was applied, or `None` when the variable is absent.
///
/// # Errors
///
/// Returns [`ParseLevelError`] if the variable holds an unknown level name.
pub fn init_from_env() -> Result<Option<Level>, ParseLevelError> {
    match std::env::var(ENV_VAR) {
        Ok(raw) => {
            let level: Level = raw.parse()?;
            set_level(level);
            Ok(Some(level))
        }
        Err(_) => Ok(None),
    }
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments<'_>) {
    get_logger().log(level, target, args);
}

/// Logs at an explicit level, tagging the record with the caller's module path.
///
/// ```
/// use interpose_log::{log, Level};
///
/// log!(level: Level::Info, "cache holds {} types", 3);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {{
        let level = $level;
        if $crate::get_logger().enabled(level) {
            $crate::__log_with_target(level, module_path!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Error, $($arg)*) };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Info, $($arg)*) };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Debug, $($arg)*) };
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Trace, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Debug < Level::Trace);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("error".parse::<Level>(), Ok(Level::Error));
        assert_eq!(" Warning ".parse::<Level>(), Ok(Level::Warn));
        assert_eq!("TRACE".parse::<Level>(), Ok(Level::Trace));
        let err = "verbose".parse::<Level>().unwrap_err();
        assert!(err.to_string().contains("verbose"));
    }

    #[test]
    fn test_logger_filters_below_level() {
        let logger = Logger::new(Level::Info);
        assert!(logger.enabled(Level::Warn));
        assert!(!logger.enabled(Level::Debug));

        logger.set_level(Level::Trace);
        assert!(logger.enabled(Level::Trace));
        assert_eq!(logger.level(), Level::Trace);
    }

    #[test]
    fn test_memory_sink_captures_enabled_records() {
        let logger = Logger::new(Level::Info);
        let sink = Arc::new(MemorySink::new());
        logger.set_sink(sink.clone());

        logger.log(Level::Info, "proxy::cache", format_args!("built {}", 1));
        logger.log(Level::Debug, "proxy::cache", format_args!("hidden"));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, "proxy::cache");
        assert_eq!(records[0].message, "built 1");
        assert!(sink.contains(Level::Info, "built"));
        assert!(!sink.contains(Level::Debug, "hidden"));

        sink.clear();
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_reset_sink_detaches_memory_sink() {
        let logger = Logger::new(Level::Trace);
        let sink = Arc::new(MemorySink::new());
        logger.set_sink(sink.clone());
        logger.reset_sink();
        logger.log(Level::Error, "t", format_args!("to stderr"));
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_macros_from_threads() {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                std::thread::spawn(move || {
                    trace!("thread {} trace", i);
                    debug!("thread {} debug", i);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
