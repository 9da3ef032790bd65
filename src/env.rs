//! Environment variables read by [`LoggingConfig::from_env`](crate::init::LoggingConfig::from_env).
//!
//! Every variable is optional; unset ones keep the defaults of
//! [`LoggingConfig::default`](crate::init::LoggingConfig).

/// Service name emitted as `app.name`.
pub const CLINIC_LOG_SERVICE_NAME_ENV: &str = "CLINIC_LOG_SERVICE_NAME";

/// Most verbose level that is captured: `trace`, `debug`, `info`, `warn`, `error`.
pub const CLINIC_LOG_LEVEL_ENV: &str = "CLINIC_LOG_LEVEL";

/// Sink target, e.g. `stdout://` or `file:///var/log/core/app.log?max_bytes=10485760&backups=5`.
pub const CLINIC_LOG_SINK_ENV: &str = "CLINIC_LOG_SINK";

/// Capacity of the record channel.
pub const CLINIC_LOG_CHANNEL_BUFFER_ENV: &str = "CLINIC_LOG_CHANNEL_BUFFER";

/// Records written per sink batch.
pub const CLINIC_LOG_BATCH_SIZE_ENV: &str = "CLINIC_LOG_BATCH_SIZE";

/// Longest wait before a partial batch is written, in milliseconds.
pub const CLINIC_LOG_FLUSH_INTERVAL_MS_ENV: &str = "CLINIC_LOG_FLUSH_INTERVAL_MS";

/// `true`/`false`: also print human-readable lines to stderr.
pub const CLINIC_LOG_STDOUT_ENV: &str = "CLINIC_LOG_STDOUT";

/// Read an environment variable, treating unset and empty the same.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
