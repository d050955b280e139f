//! Logging subsystem
//!
//! Structured logging via tracing with support for JSON (production) and
//! plaintext (development) output formats.
//!
//! # Log Targets
//!
//! Use these consistent target names across the codebase:
//! - `relay` - process lifecycle
//! - `http` - HTTP server
//! - `media` - media fetch pipeline and outbound requests
//! - `embed` - iframe sanitizer
//! - `config` - configuration loading
//! - `cache` - response cache and sweeper
//!
//! # Environment Variables
//!
//! - `MEDIA_RELAY_LOG` - Primary log level/filter (takes precedence)
//! - `RUST_LOG` - Fallback log level/filter
//! - `MEDIA_RELAY_DEV` - When set, use the development configuration
//!
//! # Examples
//!
//! ```no_run
//! use media_relay::logging::{init_logging, LogConfig, LogFormat, LogOutput};
//!
//! init_logging(LogConfig {
//!     format: LogFormat::Json,
//!     output: LogOutput::File("/var/log/media-relay.log".into()),
//!     default_level: tracing::Level::INFO,
//! }).unwrap();
//! ```

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Guard to track if logging has been initialized
static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for production (structured logs)
    Json,
    /// Human-readable plaintext for development
    #[default]
    Plaintext,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Write to a file at the given path
    File(PathBuf),
}

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Default log level when no env filter is set
    pub default_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

impl LogConfig {
    /// Plaintext to stdout, debug level
    pub fn development() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::DEBUG,
        }
    }

    /// JSON to stdout, info level
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }

    /// Pick the base configuration from `MEDIA_RELAY_DEV`, then apply the
    /// optional `logging` section of the config file on top.
    ///
    /// Recognised keys: `level`, `format` (`json` | `plaintext`), `file`.
    /// Unrecognised values are ignored and the base value kept.
    pub fn from_config(config: &Value) -> Self {
        let mut log_config = if std::env::var("MEDIA_RELAY_DEV").is_ok() {
            Self::development()
        } else {
            Self::production()
        };

        let Some(section) = config.get("logging") else {
            return log_config;
        };

        if let Some(level) = section
            .get("level")
            .and_then(Value::as_str)
            .and_then(|s| Level::from_str(s).ok())
        {
            log_config.default_level = level;
        }
        match section.get("format").and_then(Value::as_str) {
            Some("json") => log_config.format = LogFormat::Json,
            Some("plaintext") | Some("text") => log_config.format = LogFormat::Plaintext,
            _ => {}
        }
        if let Some(file) = section.get("file").and_then(Value::as_str) {
            log_config.output = LogOutput::File(PathBuf::from(file));
        }

        log_config
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to create log file: {0}")]
    FileCreation(#[from] io::Error),
    #[error("failed to parse log filter: {0}")]
    FilterParse(#[from] tracing_subscriber::filter::ParseError),
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("failed to initialize subscriber: {0}")]
    TryInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build an EnvFilter from environment variables or default level.
///
/// Checks MEDIA_RELAY_LOG first, then RUST_LOG, falling back to the default level.
fn build_env_filter(default_level: Level) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = std::env::var("MEDIA_RELAY_LOG") {
        return Ok(EnvFilter::try_new(filter)?);
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        return Ok(EnvFilter::try_new(filter)?);
    }

    let default_filter = format!(
        "{level},relay={level},http={level},media={level},embed={level},config={level},cache={level}",
        level = default_level.as_str().to_lowercase()
    );
    Ok(EnvFilter::try_new(default_filter)?)
}

fn make_writer(output: &LogOutput) -> Result<BoxMakeWriter, LoggingError> {
    Ok(match output {
        LogOutput::Stdout => BoxMakeWriter::new(io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(io::stderr),
        LogOutput::File(path) => BoxMakeWriter::new(Mutex::new(File::create(path)?)),
    })
}

/// Build the formatting layer for the given config.
fn build_layer(
    config: &LogConfig,
) -> Result<Box<dyn Layer<Registry> + Send + Sync + 'static>, LoggingError> {
    let filter = build_env_filter(config.default_level)?;
    let writer = make_writer(&config.output)?;
    let timer = UtcTime::rfc_3339();

    let layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_timer(timer)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        LogFormat::Plaintext => tracing_subscriber::fmt::layer()
            .with_timer(timer)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    };
    Ok(layer)
}

/// Initialize the logging subsystem with the given configuration.
///
/// This function should be called once at application startup. Subsequent calls
/// will return an error.
///
/// # Errors
///
/// Returns an error if:
/// - Logging has already been initialized
/// - The log file cannot be created (for file output)
/// - The environment filter is invalid
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    if INIT_GUARD.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }

    let layer = build_layer(&config)?;
    tracing_subscriber::registry().with(layer).try_init()?;
    Ok(())
}

/// Initialize logging for tests.
///
/// Plaintext, debug level. Silently ignores errors if a subscriber is already
/// installed, making it safe to call from multiple tests.
pub fn init_test_logging() {
    if let Ok(layer) = build_layer(&LogConfig::development()) {
        let _ = tracing_subscriber::registry().with(layer).try_init();
    }
}

/// Log target constants for consistent naming across the codebase
pub mod targets {
    /// Process lifecycle
    pub const RELAY: &str = "relay";
    /// HTTP server
    pub const HTTP: &str = "http";
    /// Media fetch pipeline
    pub const MEDIA: &str = "media";
    /// Iframe sanitizer
    pub const EMBED: &str = "embed";
    /// Configuration loading
    pub const CONFIG: &str = "config";
    /// Response cache
    pub const CACHE: &str = "cache";
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    /// Mutex to serialize tests that modify global state (env vars).
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Plaintext);
        assert_eq!(config.output, LogOutput::Stdout);
        assert_eq!(config.default_level, Level::INFO);
    }

    #[test]
    fn test_log_config_presets() {
        let dev = LogConfig::development();
        assert_eq!(dev.format, LogFormat::Plaintext);
        assert_eq!(dev.default_level, Level::DEBUG);

        let prod = LogConfig::production();
        assert_eq!(prod.format, LogFormat::Json);
        assert_eq!(prod.default_level, Level::INFO);
    }

    #[test]
    fn test_from_config_section() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::remove_var("MEDIA_RELAY_DEV");

        let config = serde_json::json!({
            "logging": { "level": "warn", "format": "plaintext", "file": "/tmp/relay.log" }
        });
        let log_config = LogConfig::from_config(&config);
        assert_eq!(log_config.default_level, Level::WARN);
        assert_eq!(log_config.format, LogFormat::Plaintext);
        assert_eq!(
            log_config.output,
            LogOutput::File(PathBuf::from("/tmp/relay.log"))
        );
    }

    #[test]
    fn test_from_config_dev_env() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::set_var("MEDIA_RELAY_DEV", "1");

        let log_config = LogConfig::from_config(&serde_json::json!({}));
        assert_eq!(log_config.format, LogFormat::Plaintext);
        assert_eq!(log_config.default_level, Level::DEBUG);

        std::env::remove_var("MEDIA_RELAY_DEV");
    }

    #[test]
    fn test_from_config_ignores_bad_level() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::remove_var("MEDIA_RELAY_DEV");

        let config = serde_json::json!({ "logging": { "level": "loud" } });
        assert_eq!(LogConfig::from_config(&config).default_level, Level::INFO);
    }

    #[test]
    fn test_env_filter_default() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::remove_var("MEDIA_RELAY_LOG");
        std::env::remove_var("RUST_LOG");

        assert!(build_env_filter(Level::INFO).is_ok());
    }

    #[test]
    fn test_env_filter_primary_var() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::set_var("MEDIA_RELAY_LOG", "media=debug,cache=trace");
        assert!(build_env_filter(Level::INFO).is_ok());
        std::env::remove_var("MEDIA_RELAY_LOG");
    }

    #[test]
    fn test_env_filter_rust_log_fallback() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::remove_var("MEDIA_RELAY_LOG");
        std::env::set_var("RUST_LOG", "warn");
        assert!(build_env_filter(Level::INFO).is_ok());
        std::env::remove_var("RUST_LOG");
    }

    #[test]
    fn test_env_filter_invalid_directive() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::set_var("MEDIA_RELAY_LOG", "media=notalevel");
        assert!(matches!(
            build_env_filter(Level::INFO),
            Err(LoggingError::FilterParse(_))
        ));
        std::env::remove_var("MEDIA_RELAY_LOG");
    }

    #[test]
    fn test_file_layer_creates_file() {
        let _lock = TEST_LOCK.lock().unwrap();
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        let config = LogConfig {
            format: LogFormat::Json,
            output: LogOutput::File(path.clone()),
            default_level: Level::INFO,
        };
        assert!(build_layer(&config).is_ok());
        assert!(path.exists());
    }

    #[test]
    fn test_file_layer_bad_path() {
        let config = LogConfig {
            format: LogFormat::Plaintext,
            output: LogOutput::File(PathBuf::from("/nonexistent/dir/relay.log")),
            default_level: Level::INFO,
        };
        assert!(matches!(
            build_layer(&config),
            Err(LoggingError::FileCreation(_))
        ));
    }

    #[test]
    fn test_targets_constants() {
        assert_eq!(targets::RELAY, "relay");
        assert_eq!(targets::MEDIA, "media");
        assert_eq!(targets::EMBED, "embed");
        assert_eq!(targets::CACHE, "cache");
    }

    #[test]
    fn test_logging_error_display() {
        let err = LoggingError::AlreadyInitialized;
        assert_eq!(err.to_string(), "logging already initialized");
    }
}
