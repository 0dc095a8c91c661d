use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use glob::glob;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// # Logger Local Options
///
/// Where log events go and how verbose they are.
#[derive(Debug, Clone)]
pub struct LoggerLocalOptions {
    /// Print human readable events to stdout.
    pub use_tty: bool,
    /// Write JSON events to `<log_dir>/<app>-<timestamp>.log`.
    pub use_file: bool,
    /// Directory for log files. Defaults to `./logs`.
    pub log_dir: Option<PathBuf>,
    /// Filter directive used when `RUST_LOG` is not set, e.g. `info` or
    /// `lib_common=debug,info`.
    pub level: String,
}

impl Default for LoggerLocalOptions {
    fn default() -> Self {
        Self {
            use_tty: true,
            use_file: false,
            log_dir: None,
            level: "info".to_string(),
        }
    }
}

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The log directory could not be created.
    #[error("cannot create log directory {path}: {source}")]
    CreateDir {
        /// Directory that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The rotation pattern was rejected.
    #[error("invalid log rotation pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    /// The level directive could not be parsed.
    #[error("invalid log level '{level}': {source}")]
    Filter {
        /// The rejected directive.
        level: String,
        /// Parser error.
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    /// A global subscriber is already installed.
    #[error("logger already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Keeps the background file writer alive. Dropping it flushes and stops
/// file logging, so hold it until the process exits.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggerGuard {
    _file_writer: Option<WorkerGuard>,
    log_file: Option<PathBuf>,
}

impl LoggerGuard {
    /// The file events are written to, when file logging is on.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// # Logger Local
///
/// Installs the process-wide `tracing` subscriber: an optional console layer
/// and an optional JSON file layer behind a non-blocking writer, both under
/// one `EnvFilter`.
pub struct LoggerLocal;

impl LoggerLocal {
    /// Installs the subscriber for `app_name`.
    ///
    /// When file logging is enabled the log directory is created if needed and
    /// older files of the same application are rotated away, keeping only the
    /// most recent one next to the new file.
    pub fn init(app_name: &str, options: &LoggerLocalOptions) -> Result<LoggerGuard, LoggerError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&options.level).map_err(|source| LoggerError::Filter {
                level: options.level.clone(),
                source,
            })?,
        };

        let mut file_writer = None;
        let mut log_file = None;
        let file_layer = if options.use_file {
            let log_dir = options
                .log_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("logs"));
            std::fs::create_dir_all(&log_dir).map_err(|source| LoggerError::CreateDir {
                path: log_dir.clone(),
                source,
            })?;
            Self::rotate_logs(app_name, &log_dir)?;

            let file_name = Self::log_file_name(app_name);
            let (writer, guard) = non_blocking(rolling::never(&log_dir, &file_name));
            file_writer = Some(guard);
            log_file = Some(log_dir.join(file_name));

            Some(fmt::layer().with_ansi(false).with_writer(writer).json())
        } else {
            None
        };

        let console_layer = options
            .use_tty
            .then(|| fmt::layer().with_target(true).with_ansi(true));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| LoggerError::AlreadyInitialized(e.to_string()))?;

        tracing::info!(app = app_name, level = %options.level, file = ?log_file, "Logging initialized");

        Ok(LoggerGuard {
            _file_writer: file_writer,
            log_file,
        })
    }

    /// `<app_name>-<YYYYmmdd_HHMMSS>.log`, in local time.
    pub fn log_file_name(app_name: &str) -> String {
        format!("{}-{}.log", app_name, Local::now().format("%Y%m%d_%H%M%S"))
    }

    /// Deletes every log file of `app_name` in `log_dir` except the newest.
    /// File names sort chronologically, so newest means greatest name.
    ///
    /// Returns how many files were deleted. Files that cannot be removed are
    /// reported on stderr and skipped.
    pub fn rotate_logs(app_name: &str, log_dir: &Path) -> Result<usize, LoggerError> {
        let pattern = format!("{}/{}-*.log", log_dir.display(), app_name);
        let mut log_files: Vec<PathBuf> = glob(&pattern)?.filter_map(Result::ok).collect();

        log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

        let mut deleted = 0;
        for old_file in log_files.iter().skip(1) {
            match std::fs::remove_file(old_file) {
                Ok(()) => deleted += 1,
                Err(e) => eprintln!("Error deleting old log file {}: {}", old_file.display(), e),
            }
        }
        Ok(deleted)
    }
}
