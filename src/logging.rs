//! Logging infrastructure - structured tracing for the bridge
//!
//! Design: `tracing` events throughout, with:
//! - Per-target filtering (`handles`, `marshal`, `thunk`, `dispatch`, `ffi`)
//! - Compact or JSON console output
//! - Optional daily-rotated log file
//!
//! Hot paths log at `trace`, synthesis at `debug`, failures at `warn`/`error`.

use once_cell::sync::OnceCell;
use std::io;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

pub use tracing::{debug, error, info, trace, warn};

use crate::config::LoggingConfig;

static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Event targets used across the crate
pub const TARGETS: [&str; 5] = ["handles", "marshal", "thunk", "dispatch", "ffi"];

/// Keeps the background file writer flushing for the life of the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    /// Rotated daily; the file name is used as the prefix
    pub log_path: Option<PathBuf>,
    pub json_format: bool,
    /// Emit span enter/close events
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

fn parse_level(raw: &str) -> Level {
    match raw.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Start from the `[logging]` section of the bridge configuration
    pub fn from_settings(settings: &LoggingConfig) -> Self {
        Self {
            level: parse_level(&settings.level),
            log_path: settings.file.clone(),
            json_format: settings.json,
            show_spans: false,
        }
    }

    /// Apply `BRIDGE_LOG_LEVEL`, `BRIDGE_LOG_FILE`, `BRIDGE_LOG_JSON`, `BRIDGE_LOG_SPANS`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("BRIDGE_LOG_LEVEL") {
            self.level = parse_level(&level);
        }
        if let Ok(path) = std::env::var("BRIDGE_LOG_FILE") {
            self.log_path = Some(PathBuf::from(path));
        }
        if std::env::var_os("BRIDGE_LOG_JSON").is_some() {
            self.json_format = true;
        }
        if std::env::var_os("BRIDGE_LOG_SPANS").is_some() {
            self.show_spans = true;
        }
        self
    }

    /// Verbose config for debugging a host integration
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: Some(PathBuf::from("managed_bridge.log")),
            json_format: false,
            show_spans: true,
        }
    }
}

/// Initialize logging from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging once; later calls are no-ops
///
/// An already installed global subscriber (a host's own) is left in place.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let console = (!config.json_format).then(|| {
            fmt::layer()
                .compact()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone())
                .with_target(true)
                .with_thread_ids(cfg!(debug_assertions))
        });

        let json = config.json_format.then(|| {
            fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone())
                .with_current_span(true)
        });

        let file = config.log_path.as_deref().map(|path| {
            let (directory, prefix) = split_log_path(path);
            let appender = tracing_appender::rolling::daily(directory, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_span_events(span_events.clone())
        });

        let installed = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(json)
            .with(file)
            .try_init();

        if installed.is_ok() {
            debug!(target: "ffi", level = %config.level, json = config.json_format, "logging initialized");
        }
    });
}

/// Filter directives enabling `level` for the crate and each of its targets
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    std::iter::once("managed_bridge")
        .chain(TARGETS)
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

fn split_log_path(path: &Path) -> (PathBuf, PathBuf) {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("managed_bridge.log"));
    (directory, prefix)
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

/// Log a native entry point being called
#[inline]
pub fn log_ffi_call(function: &str, token: u64) {
    trace!(target: "ffi", event = "ffi_call", function, token, "entry point called");
}

/// Log an error returned across the C ABI
pub fn log_ffi_error(function: &str, code: i32, error: &dyn std::fmt::Display) {
    warn!(
        target: "ffi",
        event = "ffi_error",
        function,
        code,
        error = %error,
        "entry point failed"
    );
}
