//! # Logging
//!
//! Global logger setup on top of `env_logger`, plus key/value logging macros.
//!
//! ```ignore
//! use policy_kit::{log_info, logging};
//!
//! logging::init_global_logging()?;
//! log_info!("Connection opened", "target" => "ssh://host", "reused" => false);
//! // INFO policy_kit: Connection opened target=ssh://host reused=false
//! ```
//!
//! Warnings and errors are counted so the agent can print a short summary
//! when the run finishes.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};

static WARNINGS: AtomicUsize = AtomicUsize::new(0);
static ERRORS: AtomicUsize = AtomicUsize::new(0);

/// Logger that forwards to `env_logger` and counts warnings/errors
struct CountingLogger {
    inner: env_logger::Logger,
}

impl Log for CountingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        match record.level() {
            Level::Error => {
                ERRORS.fetch_add(1, Ordering::Relaxed);
            }
            Level::Warn => {
                WARNINGS.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        if self.inner.matches(record) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Error returned when the global logger cannot be installed
#[derive(Debug, thiserror::Error)]
#[error("failed to initialize logging: {0}")]
pub struct LoggingError(#[from] log::SetLoggerError);

/// Install the global logger, honoring `RUST_LOG` (default `warn`)
pub fn init_global_logging() -> Result<(), LoggingError> {
    init_with_level(None)
}

/// Install the global logger with an explicit level that overrides `RUST_LOG`
pub fn init_with_level(level: Option<LevelFilter>) -> Result<(), LoggingError> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.format_timestamp_millis();

    let inner = builder.build();
    let max_level = inner.filter();

    log::set_boxed_logger(Box::new(CountingLogger { inner }))?;
    log::set_max_level(max_level);
    Ok(())
}

/// Number of warnings logged so far
pub fn warning_count() -> usize {
    WARNINGS.load(Ordering::Relaxed)
}

/// Number of errors logged so far
pub fn error_count() -> usize {
    ERRORS.load(Ordering::Relaxed)
}

/// Print a cargo-style one-line summary of logged problems, if any
pub fn print_summary() {
    let warnings = warning_count();
    let errors = error_count();
    if warnings == 0 && errors == 0 {
        return;
    }
    eprintln!(
        "{}: {} warning{}, {} error{} emitted",
        if errors > 0 { "error" } else { "warning" },
        warnings,
        if warnings == 1 { "" } else { "s" },
        errors,
        if errors == 1 { "" } else { "s" }
    );
}

/// Render a message with `key=value` pairs
#[doc(hidden)]
pub fn format_fields(message: &str, fields: &[(&str, String)]) -> String {
    let mut out = String::from(message);
    for (key, value) in fields {
        out.push(' ');
        out.push_str(key);
        out.push('=');
        if value.contains(' ') {
            out.push('"');
            out.push_str(value);
            out.push('"');
        } else {
            out.push_str(value);
        }
    }
    out
}

#[macro_export]
macro_rules! log_debug {
    ($msg:expr $(, $key:expr => $value:expr)* $(,)?) => {
        ::log::debug!("{}", $crate::logging::format_fields($msg, &[$(($key, $value.to_string())),*]))
    };
}

#[macro_export]
macro_rules! log_info {
    ($msg:expr $(, $key:expr => $value:expr)* $(,)?) => {
        ::log::info!("{}", $crate::logging::format_fields($msg, &[$(($key, $value.to_string())),*]))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($msg:expr $(, $key:expr => $value:expr)* $(,)?) => {
        ::log::warn!("{}", $crate::logging::format_fields($msg, &[$(($key, $value.to_string())),*]))
    };
}

#[macro_export]
macro_rules! log_error {
    ($msg:expr $(, $key:expr => $value:expr)* $(,)?) => {
        ::log::error!("{}", $crate::logging::format_fields($msg, &[$(($key, $value.to_string())),*]))
    };
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_fields_quotes_values_with_spaces() {
        let line = format_fields(
            "Control finished",
            &[("id", "ssh-1".to_string()), ("title", "Allow only v2".to_string())],
        );
        assert_eq!(line, "Control finished id=ssh-1 title=\"Allow only v2\"");
    }

    #[test]
    fn test_format_fields_without_pairs() {
        assert_eq!(format_fields("Scan started", &[]), "Scan started");
    }
}
