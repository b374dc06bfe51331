//! Per-script log files with single-generation, size-triggered rotation.
//!
//! The [`LoggerProvider`] hands out one [`LoggerHandle`] per script name for
//! the lifetime of the process. Each call to [`LoggerProvider::logger`] first
//! checks the active `<script>.log`: when it has grown beyond the configured
//! threshold it is renamed to `<script>.bk.log` (overwriting any previous
//! backup) and a fresh handle is opened in append mode.
//!
//! Handles wrap a dedicated `tracing` dispatcher so script logs never mix with
//! the process telemetry written to stderr.
//!
//! Rotation is not coordinated across processes. Two CGI processes rotating
//! the same script concurrently may interleave their renames; this is an
//! accepted limitation of the process-per-request model.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use kagura_config::{Config, Layout, LogFormat};
use thiserror::Error;
use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::Subscriber;
use tracing_subscriber::fmt::time::UtcTime;

use crate::names::ScriptName;

/// Log key used for engine-level failures that have no trustworthy script.
pub const ENGINE_LOG_KEY: &str = "kagura";

/// Tracing target attached to every script log event.
pub(crate) const SCRIPT_LOG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::script");

/// Severity of a script log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Routine diagnostics, including rejected names.
    Debug,
    /// Request milestones.
    Info,
    /// Recoverable anomalies.
    Warn,
    /// Handler failures.
    Error,
    /// Failures caught only by the outermost guard.
    Fatal,
}

/// Errors raised while preparing script loggers.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The configured script log level is not recognised.
    #[error("invalid script log level '{value}'")]
    Level {
        /// Rejected level text.
        value: String,
    },
    /// The log directory could not be created.
    #[error("failed to prepare log directory '{path}': {source}")]
    Directory {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The active log file could not be inspected or renamed.
    #[error("failed to rotate log file '{path}': {source}")]
    Rotate {
        /// Active log path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The active log file could not be opened for appending.
    #[error("failed to open log file '{path}': {source}")]
    Open {
        /// Active log path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The handle cache lock was poisoned by a panicking thread.
    #[error("logger cache lock poisoned")]
    Poisoned,
}

/// Parses a script log level; `fatal` maps onto the `error` filter.
///
/// # Errors
///
/// Returns [`LoggerError::Level`] for unknown level names.
pub fn parse_level(value: &str) -> Result<LevelFilter, LoggerError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("fatal") {
        return Ok(LevelFilter::ERROR);
    }
    LevelFilter::from_str(trimmed).map_err(|_| LoggerError::Level {
        value: value.to_owned(),
    })
}

/// Renames `active` to `backup` when it is larger than `max_bytes`.
///
/// Returns `true` when a rotation happened. A missing active file is not an
/// error. Any existing backup is replaced.
///
/// # Errors
///
/// Returns the underlying I/O error when the file cannot be inspected or
/// renamed.
pub fn rotate_if_oversized(active: &Path, backup: &Path, max_bytes: u64) -> io::Result<bool> {
    match fs::metadata(active) {
        Ok(metadata) if metadata.len() > max_bytes => {
            fs::rename(active, backup)?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}

/// Append-mode logger bound to one script's log file.
#[derive(Clone)]
pub struct LoggerHandle {
    key: String,
    path: PathBuf,
    file: Arc<File>,
    dispatch: Dispatch,
}

impl fmt::Debug for LoggerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerHandle")
            .field("key", &self.key)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LoggerHandle {
    fn open(
        key: &str,
        path: PathBuf,
        level: LevelFilter,
        format: LogFormat,
    ) -> Result<Self, LoggerError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map(Arc::new)
            .map_err(|source| LoggerError::Open {
                path: path.clone(),
                source,
            })?;
        let dispatch = build_dispatch(Arc::clone(&file), level, format);
        Ok(Self {
            key: key.to_owned(),
            path,
            file,
            dispatch,
        })
    }

    /// Log key (the script name) this handle writes for.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    /// Active log file this handle appends to.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Returns `true` when both handles append through the same open file.
    #[must_use]
    pub fn shares_sink_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.file, &other.file)
    }

    /// Writes a debug entry.
    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Severity::Debug, message);
    }

    /// Writes an info entry.
    pub fn info(&self, message: impl fmt::Display) {
        self.log(Severity::Info, message);
    }

    /// Writes a warning entry.
    pub fn warn(&self, message: impl fmt::Display) {
        self.log(Severity::Warn, message);
    }

    /// Writes an error entry.
    pub fn error(&self, message: impl fmt::Display) {
        self.log(Severity::Error, message);
    }

    /// Writes a fatal entry (recorded at error level with `severity = "fatal"`).
    pub fn fatal(&self, message: impl fmt::Display) {
        self.log(Severity::Fatal, message);
    }

    /// Writes an entry at the given severity.
    pub fn log(&self, severity: Severity, message: impl fmt::Display) {
        let script = self.key.as_str();
        tracing::dispatcher::with_default(&self.dispatch, || match severity {
            Severity::Debug => {
                tracing::debug!(target: SCRIPT_LOG_TARGET, script, "{message}");
            }
            Severity::Info => {
                tracing::info!(target: SCRIPT_LOG_TARGET, script, "{message}");
            }
            Severity::Warn => {
                tracing::warn!(target: SCRIPT_LOG_TARGET, script, "{message}");
            }
            Severity::Error => {
                tracing::error!(target: SCRIPT_LOG_TARGET, script, "{message}");
            }
            Severity::Fatal => {
                tracing::error!(target: SCRIPT_LOG_TARGET, script, severity = "fatal", "{message}");
            }
        });
    }
}

fn build_dispatch(file: Arc<File>, level: LevelFilter, format: LogFormat) -> Dispatch {
    let builder = Subscriber::builder()
        .with_max_level(level)
        .with_writer(file)
        .with_ansi(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_timer(UtcTime::rfc_3339());

    match format {
        LogFormat::Json => Dispatch::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Dispatch::new(builder.compact().finish()),
    }
}

/// Process-scoped source of per-script loggers.
#[derive(Debug)]
pub struct LoggerProvider {
    layout: Layout,
    max_bytes: u64,
    level: LevelFilter,
    format: LogFormat,
    handles: Mutex<HashMap<String, LoggerHandle>>,
}

impl LoggerProvider {
    /// Creates a provider from the shared configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Level`] when `script_log_level` is invalid.
    pub fn new(config: &Config) -> Result<Self, LoggerError> {
        Ok(Self {
            layout: Layout::from_config(config),
            max_bytes: config.max_log_bytes(),
            level: parse_level(config.script_log_level())?,
            format: config.log_format(),
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the logger for `script`, rotating its file first if needed.
    ///
    /// Repeated calls for the same script return handles sharing one open
    /// file until a rotation replaces it.
    ///
    /// # Errors
    ///
    /// Returns a [`LoggerError`] when the directory, rotation or open fails.
    pub fn logger(&self, script: &ScriptName) -> Result<LoggerHandle, LoggerError> {
        self.logger_for_key(script.as_str())
    }

    /// Returns the engine's own logger, used by the fatal tier.
    ///
    /// # Errors
    ///
    /// Returns a [`LoggerError`] when the directory, rotation or open fails.
    pub fn engine_logger(&self) -> Result<LoggerHandle, LoggerError> {
        self.logger_for_key(ENGINE_LOG_KEY)
    }

    fn logger_for_key(&self, key: &str) -> Result<LoggerHandle, LoggerError> {
        let mut handles = self.handles.lock().map_err(|_| LoggerError::Poisoned)?;

        let log_dir = self.layout.log_dir();
        fs::create_dir_all(log_dir).map_err(|source| LoggerError::Directory {
            path: log_dir.to_path_buf(),
            source,
        })?;

        let active = self.layout.log_file(key);
        let backup = self.layout.backup_log_file(key);
        let rotated = rotate_if_oversized(&active, &backup, self.max_bytes).map_err(|source| {
            LoggerError::Rotate {
                path: active.clone(),
                source,
            }
        })?;
        if rotated {
            tracing::info!(
                target: SCRIPT_LOG_TARGET,
                script = key,
                backup = %backup.display(),
                "rotated script log"
            );
        }

        if !rotated && active.exists() {
            if let Some(handle) = handles.get(key) {
                return Ok(handle.clone());
            }
        }

        let handle = LoggerHandle::open(key, active, self.level, self.format)?;
        handles.insert(key.to_owned(), handle.clone());
        Ok(handle)
    }
}
