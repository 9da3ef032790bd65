use crate::backend::{make_sink, parse_target, SinkTarget, SinkTargetError};
use crate::dispatch::Dispatcher;
use crate::env::{
    env_opt, CLINIC_LOG_BATCH_SIZE_ENV, CLINIC_LOG_CHANNEL_BUFFER_ENV, CLINIC_LOG_FLUSH_INTERVAL_MS_ENV,
    CLINIC_LOG_LEVEL_ENV, CLINIC_LOG_SERVICE_NAME_ENV, CLINIC_LOG_SINK_ENV, CLINIC_LOG_STDOUT_ENV,
};
use crate::layer::JsonLogLayer;
use crate::logger::Logger;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry};

/// Logging setup for one service.
///
/// **Fields**
/// - `service_name`: emitted as `app.name` on every record.
/// - `max_level`: most verbose level that is captured.
/// - `sink`: where finalized records go.
/// - `channel_buffer`: records queued before new ones are dropped.
/// - `batch_size`: records per sink batch.
/// - `flush_interval`: longest wait before a partial batch is written.
/// - `enable_stdout`: also stack a human-readable `fmt` layer on stderr.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub service_name: String,
    pub max_level: Level,
    pub sink: SinkTarget,
    pub channel_buffer: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub enable_stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: "core".to_string(),
            max_level: Level::INFO,
            sink: SinkTarget::default(),
            channel_buffer: 1024,
            batch_size: 128,
            flush_interval: Duration::from_secs(1),
            enable_stdout: false,
        }
    }
}

impl LoggingConfig {
    /// Defaults overridden by the `CLINIC_LOG_*` variables in [`crate::env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_opt)
    }

    /// Same as [`LoggingConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(name) = lookup(CLINIC_LOG_SERVICE_NAME_ENV) {
            config.service_name = name;
        }
        if let Some(level) = lookup(CLINIC_LOG_LEVEL_ENV) {
            config.max_level = Level::from_str(level.trim()).map_err(|_| ConfigError::InvalidLevel(level))?;
        }
        if let Some(target) = lookup(CLINIC_LOG_SINK_ENV) {
            config.sink = parse_target(target.trim())?;
        }
        if let Some(value) = lookup(CLINIC_LOG_CHANNEL_BUFFER_ENV) {
            config.channel_buffer = parse_number(CLINIC_LOG_CHANNEL_BUFFER_ENV, &value)?;
        }
        if let Some(value) = lookup(CLINIC_LOG_BATCH_SIZE_ENV) {
            config.batch_size = parse_number(CLINIC_LOG_BATCH_SIZE_ENV, &value)?;
        }
        if let Some(value) = lookup(CLINIC_LOG_FLUSH_INTERVAL_MS_ENV) {
            config.flush_interval = Duration::from_millis(parse_number(CLINIC_LOG_FLUSH_INTERVAL_MS_ENV, &value)?);
        }
        if let Some(value) = lookup(CLINIC_LOG_STDOUT_ENV) {
            config.enable_stdout = parse_bool(CLINIC_LOG_STDOUT_ENV, &value)?;
        }

        Ok(config)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Error type returned when reading [`LoggingConfig`] from the environment.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{key}: expected a non-negative integer, got {value:?}")]
    InvalidNumber { key: String, value: String },

    #[error("{key}: expected true or false, got {value:?}")]
    InvalidBool { key: String, value: String },

    #[error("unknown log level {0:?}")]
    InvalidLevel(String),

    #[error(transparent)]
    Sink(#[from] SinkTargetError),
}

/// Error type returned by the `init_logging*` functions.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("invalid logging configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot build log sink: {0}")]
    Sink(#[from] SinkTargetError),

    #[error("a global tracing subscriber is already installed")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// What the process keeps after initialization.
///
/// `logger` is the facade for direct calls; `worker` finishes once every
/// logger and layer clone is gone and the last batch is written.
pub struct LoggingHandle {
    pub logger: Arc<Logger>,
    pub worker: JoinHandle<()>,
}

/// Build the sink, dispatcher, logger and layer without installing anything.
///
/// Must be called from within a tokio runtime.
pub fn build_layer(config: &LoggingConfig) -> Result<(JsonLogLayer, LoggingHandle), InitError> {
    let sink = make_sink(&config.sink)?;
    let (dispatcher, worker) = Dispatcher::spawn(
        sink,
        config.channel_buffer,
        config.batch_size,
        config.flush_interval,
    );
    let logger = Arc::new(Logger::new(config.service_name.clone(), dispatcher));
    let layer = JsonLogLayer::new(Arc::clone(&logger), config.max_level);
    Ok((layer, LoggingHandle { logger, worker }))
}

/// Install the JSON logging layer as the global `tracing` subscriber.
///
/// **Effects**
///
/// Every `tracing` event in the process at or above `config.max_level`
/// is redacted, merged with the shared context of the emitting task or
/// thread, and written to `config.sink`. With `enable_stdout`, a plain
/// `fmt` layer on stderr is stacked on the same registry.
pub fn init_logging_with_config(config: LoggingConfig) -> Result<LoggingHandle, InitError> {
    let (layer, handle) = build_layer(&config)?;

    let console = config.enable_stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(LevelFilter::from_level(config.max_level))
    });
    let subscriber = Registry::default().with(layer).with(console);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(handle)
}

/// Initialize with defaults and the given service name.
pub fn init_logging(service_name: impl Into<String>) -> Result<LoggingHandle, InitError> {
    init_logging_with_config(LoggingConfig {
        service_name: service_name.into(),
        ..LoggingConfig::default()
    })
}

/// Initialize from the `CLINIC_LOG_*` environment variables.
pub fn init_logging_from_env() -> Result<LoggingHandle, InitError> {
    init_logging_with_config(LoggingConfig::from_env()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SinkKind;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = LoggingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.service_name, "core");
        assert_eq!(config.max_level, Level::INFO);
        assert_eq!(config.sink.kind, SinkKind::Stdout);
        assert!(!config.enable_stdout);
    }

    #[test]
    fn variables_override_defaults() {
        let config = LoggingConfig::from_lookup(lookup(&[
            (CLINIC_LOG_SERVICE_NAME_ENV, "frontend_api"),
            (CLINIC_LOG_LEVEL_ENV, "debug"),
            (CLINIC_LOG_SINK_ENV, "file:///var/log/core/app.log?max_bytes=2048&backups=2"),
            (CLINIC_LOG_BATCH_SIZE_ENV, "16"),
            (CLINIC_LOG_FLUSH_INTERVAL_MS_ENV, "250"),
            (CLINIC_LOG_STDOUT_ENV, "yes"),
        ]))
        .unwrap();

        assert_eq!(config.service_name, "frontend_api");
        assert_eq!(config.max_level, Level::DEBUG);
        assert_eq!(config.sink.kind, SinkKind::File);
        assert_eq!(config.sink.backups, 2);
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert!(config.enable_stdout);
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(matches!(
            LoggingConfig::from_lookup(lookup(&[(CLINIC_LOG_LEVEL_ENV, "loud")])),
            Err(ConfigError::InvalidLevel(_))
        ));
        assert!(matches!(
            LoggingConfig::from_lookup(lookup(&[(CLINIC_LOG_BATCH_SIZE_ENV, "-1")])),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            LoggingConfig::from_lookup(lookup(&[(CLINIC_LOG_STDOUT_ENV, "maybe")])),
            Err(ConfigError::InvalidBool { .. })
        ));
        assert!(matches!(
            LoggingConfig::from_lookup(lookup(&[(CLINIC_LOG_SINK_ENV, "carrier-pigeon://")])),
            Err(ConfigError::Sink(_))
        ));
    }

    #[tokio::test]
    async fn build_layer_wires_service_name() {
        let config = LoggingConfig {
            service_name: "study_api".to_string(),
            sink: SinkTarget::new(SinkKind::Noop),
            ..LoggingConfig::default()
        };
        let (layer, handle) = build_layer(&config).unwrap();
        assert_eq!(handle.logger.service_name(), "study_api");
        assert!(Arc::ptr_eq(layer.logger(), &handle.logger));
    }
}
