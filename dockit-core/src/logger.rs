use std::sync::{Arc, OnceLock};

/// Receives log messages emitted by the crate.
///
/// Hosts implement this to route records into their own logging system.
/// With the `ffi` feature it is exported via `UniFFI` for foreign languages.
///
/// # Examples
///
/// ```rust
/// use dockit_core::logger::{LogLevel, Logger};
///
/// struct StderrLogger;
///
/// impl Logger for StderrLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         eprintln!("[{level:?}] {message}");
///     }
/// }
/// ```
///
/// ## Kotlin
///
/// ```kotlin
/// object DocKitLogBridge : Logger {
///     override fun log(level: LogLevel, message: String) {
///         Log.println(level.toAndroidPriority(), "DocKit", message)
///     }
/// }
///
/// setLogger(DocKitLogBridge) // once, at startup
/// ```
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait Logger: Sync + Send {
    /// Logs `message` at `level`.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LogLevel {
    /// Very detailed tracing.
    Trace,
    /// Debugging information.
    Debug,
    /// Progress of the application.
    Info,
    /// Potentially harmful situations.
    Warn,
    /// Failures the application may recover from.
    Error,
}

/// Forwards `log` records to the installed [`Logger`].
struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !should_forward(record.level(), record.module_path()) {
            return;
        }

        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(log_level(record.level()), format!("{}", record.args()));
        } else {
            eprintln!("Logger not set: {}", record.args());
        }
    }

    fn flush(&self) {}
}

/// Debug and trace records are only forwarded when they come from this crate.
fn should_forward(level: log::Level, module_path: Option<&str>) -> bool {
    let is_from_dockit = module_path.is_some_and(|path| path.starts_with("dockit"));
    let is_debug_or_trace = matches!(level, log::Level::Debug | log::Level::Trace);
    is_from_dockit || !is_debug_or_trace
}

const fn log_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Installs the process-wide logger.
///
/// Call once, before any logging occurs. Later calls are ignored with a
/// message on stderr, as is the case where another `log` implementation was
/// installed first.
#[cfg_attr(feature = "ffi", uniffi::export)]
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        eprintln!("Logger already set");
    }

    if let Err(e) = init_logger() {
        eprintln!("Failed to set logger: {e}");
    }
}

fn init_logger() -> Result<(), log::SetLoggerError> {
    static LOGGER: ForeignLogger = ForeignLogger;
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}
