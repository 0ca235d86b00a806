//! Structured logging for the site selection service
//!
//! Provides context-rich logging tagged with the emitting component and,
//! where relevant, the water-quality parameter being processed. Events go
//! through `tracing`; `init_logger` installs a console subscriber and can
//! also append to a log file for batch runs.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::Layer as _;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::model::WflowError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Parses a config value (`debug`, `info`, `warn`/`warning`, `error`).
    pub fn parse(value: &str) -> Option<LogLevel> {
        match value.to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Features,
    Surrogate,
    Selector,
    Evaluator,
    Config,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Features => write!(f, "FEAT"),
            Component::Surrogate => write!(f, "GP"),
            Component::Selector => write!(f, "OPT"),
            Component::Evaluator => write!(f, "EVAL"),
            Component::Config => write!(f, "CFG"),
            Component::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the parameter simply has too little data this run
    Expected,
    /// Unexpected failure - numerical breakdown or a broken artifact
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Level filter for the subscriber. A parseable `RUST_LOG` value wins over
/// the configured level.
fn env_filter(rust_log: Option<&str>, min_level: LogLevel) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::default().add_directive(min_level.filter().into()))
}

/// Install the global subscriber.
///
/// Console output goes to stderr so JSON written to stdout stays clean.
/// When `log_file` is set, every event is also appended there without ANSI
/// colors. Calling this more than once keeps the first subscriber.
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let console = if console_timestamps {
        console.boxed()
    } else {
        console.without_time().boxed()
    };

    let file_layer = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            ),
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", path, e);
                None
            }
        }
    });

    let rust_log = std::env::var("RUST_LOG").ok();
    let _ = tracing_subscriber::registry()
        .with(env_filter(rust_log.as_deref(), min_level))
        .with(console)
        .with(file_layer)
        .try_init();
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

fn emit(level: LogLevel, component: Component, parameter: Option<&str>, message: &str) {
    let component = component.to_string();
    let parameter = parameter.unwrap_or("-");
    match level {
        LogLevel::Debug => tracing::debug!(component = %component, parameter, "{}", message),
        LogLevel::Info => tracing::info!(component = %component, parameter, "{}", message),
        LogLevel::Warning => tracing::warn!(component = %component, parameter, "{}", message),
        LogLevel::Error => tracing::error!(component = %component, parameter, "{}", message),
    }
}

/// Log a general informational message
pub fn info(component: Component, parameter: Option<&str>, message: &str) {
    emit(LogLevel::Info, component, parameter, message);
}

/// Log a warning message
pub fn warn(component: Component, parameter: Option<&str>, message: &str) {
    emit(LogLevel::Warning, component, parameter, message);
}

/// Log an error message
pub fn error(component: Component, parameter: Option<&str>, message: &str) {
    emit(LogLevel::Error, component, parameter, message);
}

/// Log a debug message
pub fn debug(component: Component, parameter: Option<&str>, message: &str) {
    emit(LogLevel::Debug, component, parameter, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a per-parameter training failure
pub fn classify_training_failure(err: &WflowError) -> FailureType {
    match err {
        WflowError::TrainingData { reason, .. } => {
            // Optimizer breakdown is reported through the same variant but is
            // not something a quiet month explains.
            if reason.contains("restart") {
                FailureType::Unexpected
            } else {
                FailureType::Expected
            }
        }
        WflowError::Serialization(_) | WflowError::Io { .. } => FailureType::Unexpected,
        _ => FailureType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a training failure with automatic classification
pub fn log_training_failure(parameter: &str, operation: &str, err: &WflowError) {
    let failure_type = classify_training_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => warn(Component::Surrogate, Some(parameter), &message),
        FailureType::Unexpected => error(Component::Surrogate, Some(parameter), &message),
        FailureType::Unknown => warn(Component::Surrogate, Some(parameter), &message),
    }
}

// ---------------------------------------------------------------------------
// Training Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a multi-parameter training run
pub fn log_training_summary(total: usize, successful: usize, failed: usize) {
    let message = format!(
        "Training complete: {}/{} models trained, {} skipped",
        successful, total, failed
    );

    if failed == 0 {
        info(Component::Selector, None, &message);
    } else if successful == 0 {
        error(Component::Selector, None, &message);
    } else {
        warn(Component::Selector, None, &message);
    }
}
