//! Logging and observability
//!
//! Diagnostics are written to an append-mode log file rather than to the
//! terminal, because the interactive session owns the screen and the batch
//! mode reserves stdout and stderr for its result lines. The file defaults to
//! `./envpatch.log`. When it cannot be opened the tool keeps running and the
//! diagnostics are discarded.
//!
//! ## Environment Variables
//!
//! * `ENVPATCH_LOG_FILE` - Log file path, overridden by `--log-file`
//! * `ENVPATCH_LOG_FORMAT` - `json` for structured output, anything else for text
//! * `ENVPATCH_LOG` - Filter directives, takes precedence over `RUST_LOG`
//! * `RUST_LOG` - Standard Rust filter (used as fallback)

use anyhow::Result;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use std::io;
use tracing_subscriber::{
    fmt, fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

static INIT: Once = Once::new();

/// Log file used when neither `--log-file` nor `ENVPATCH_LOG_FILE` is given
pub const DEFAULT_LOG_FILE: &str = "envpatch.log";

/// Settings collected from the command line
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// `text` or `json`; falls back to `ENVPATCH_LOG_FORMAT`
    pub format: Option<String>,
    /// Explicit log file path; falls back to `ENVPATCH_LOG_FILE`
    pub file: Option<PathBuf>,
    /// Level used when no filter environment variable is set
    pub default_level: Option<String>,
}

/// Initialize logging from explicit options.
///
/// Subsequent calls are no-ops.
///
/// ```rust,no_run
/// use envpatch_core::logging::{self, LogOptions};
///
/// logging::init_with_options(&LogOptions {
///     format: Some("json".to_string()),
///     file: Some("/tmp/envpatch.log".into()),
///     default_level: Some("debug".to_string()),
/// })
/// .expect("Failed to initialize logging");
/// ```
pub fn init_with_options(options: &LogOptions) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter(options.default_level.as_deref());

        let env_format = std::env::var("ENVPATCH_LOG_FORMAT").ok();
        let effective_format = options
            .format
            .as_deref()
            .or(env_format.as_deref())
            .unwrap_or("text")
            .to_string();

        let path = resolve_log_file(options.file.as_deref());
        let writer = open_log_writer(&path);

        match effective_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_span_events(fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE)
                            .with_writer(writer),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .with_target(true)
                            .with_ansi(false)
                            .with_writer(writer),
                    )
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!(
            "Logging initialized with format: {} (file: {})",
            effective_format,
            path.display()
        );
    });

    Ok(())
}

/// Resolve the log file path: flag, then `ENVPATCH_LOG_FILE`, then the default
pub fn resolve_log_file(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    match std::env::var("ENVPATCH_LOG_FILE") {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_LOG_FILE),
    }
}

fn open_log_writer(path: &Path) -> BoxMakeWriter {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
        Err(err) => {
            eprintln!(
                "warning: cannot open log file {}: {}; diagnostics are discarded",
                path.display(),
                err
            );
            BoxMakeWriter::new(io::sink)
        }
    }
}

/// Create an EnvFilter: `ENVPATCH_LOG`, then `RUST_LOG`, then the given level, then `info`
fn create_env_filter(default_level: Option<&str>) -> EnvFilter {
    let fallback = || EnvFilter::new(default_level.unwrap_or("info"));

    if let Ok(spec) = std::env::var("ENVPATCH_LOG") {
        EnvFilter::try_new(&spec).unwrap_or_else(|_| fallback())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback())
    }
}

/// Check if logging has been initialized
pub fn is_initialized() -> bool {
    INIT.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests touching the process environment must not interleave
    static TEST_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_resolve_log_file_precedence() {
        let _guard = TEST_MUTEX.lock().unwrap();

        std::env::remove_var("ENVPATCH_LOG_FILE");
        assert_eq!(resolve_log_file(None), PathBuf::from(DEFAULT_LOG_FILE));

        std::env::set_var("ENVPATCH_LOG_FILE", "/tmp/from-env.log");
        assert_eq!(resolve_log_file(None), PathBuf::from("/tmp/from-env.log"));
        assert_eq!(
            resolve_log_file(Some(Path::new("/tmp/from-flag.log"))),
            PathBuf::from("/tmp/from-flag.log")
        );
        std::env::remove_var("ENVPATCH_LOG_FILE");
    }

    #[test]
    fn test_env_filter_with_env_vars() {
        let _guard = TEST_MUTEX.lock().unwrap();

        std::env::set_var("ENVPATCH_LOG", "trace");
        let _filter = create_env_filter(None);
        std::env::set_var("ENVPATCH_LOG", "invalid_spec_@@[");
        let _filter = create_env_filter(Some("debug"));
        std::env::remove_var("ENVPATCH_LOG");
    }

    #[test]
    fn test_unopenable_log_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-dir").join("envpatch.log");
        // Falls back to a sink instead of failing
        let _writer = open_log_writer(&missing);
        assert!(!missing.exists());
    }

    #[test]
    fn test_init_multiple_calls_safe() {
        let _guard = TEST_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let options = LogOptions {
            format: Some("json".to_string()),
            file: Some(dir.path().join("test.log")),
            default_level: None,
        };

        assert!(init_with_options(&options).is_ok());
        assert!(init_with_options(&options).is_ok());
        assert!(is_initialized());
    }
}
