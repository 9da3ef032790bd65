use std::path::PathBuf;
use std::sync::Arc;

use crate::file_sink::RotatingFileSink;
use crate::memory_sink::NoopSink;
use crate::sink::LogSink;
use crate::stdout_sink::StdoutSink;

/// Sink implementations selectable from a target string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Noop,
    Stdout,
    File,
}

/// Parsed sink target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkTarget {
    pub kind: SinkKind,
    /// Log file for [`SinkKind::File`].
    pub path: Option<PathBuf>,
    /// Rotate once the file would reach this size; `0` disables rotation.
    pub max_bytes: u64,
    /// Number of rotated files kept next to the active one.
    pub backups: usize,
}

impl SinkTarget {
    pub fn new(kind: SinkKind) -> Self {
        SinkTarget {
            kind,
            path: None,
            max_bytes: 0,
            backups: 0,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        SinkTarget {
            path: Some(path.into()),
            ..SinkTarget::new(SinkKind::File)
        }
    }
}

impl Default for SinkTarget {
    fn default() -> Self {
        SinkTarget::new(SinkKind::Stdout)
    }
}

/// Parse a sink target string and infer the sink kind from its scheme.
///
/// Examples:
/// - "stdout://"
/// - "noop://"
/// - "file:///var/log/core/app.log"
/// - "file:///var/log/core/app.log?max_bytes=10485760&backups=5"
/// - "file://logs/app%20core.log" (relative, percent-encoded)
pub fn parse_target(target: &str) -> Result<SinkTarget, SinkTargetError> {
    let (scheme, rest) = target
        .split_once("://")
        .ok_or_else(|| SinkTargetError::UnknownScheme(target.to_string()))?;

    match scheme.to_ascii_lowercase().as_str() {
        "stdout" => Ok(SinkTarget::new(SinkKind::Stdout)),
        "noop" => Ok(SinkTarget::new(SinkKind::Noop)),
        "file" => parse_file_target(rest),
        other => Err(SinkTargetError::UnknownScheme(other.to_string())),
    }
}

fn parse_file_target(rest: &str) -> Result<SinkTarget, SinkTargetError> {
    let (raw_path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    if raw_path.is_empty() {
        return Err(SinkTargetError::MissingPath);
    }

    let path = urlencoding::decode(raw_path).map_err(|_| SinkTargetError::InvalidEncoding(raw_path.to_string()))?;
    let mut target = SinkTarget::file(path.into_owned());

    for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let invalid = || SinkTargetError::InvalidOption {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "max_bytes" => target.max_bytes = value.parse().map_err(|_| invalid())?,
            "backups" => target.backups = value.parse().map_err(|_| invalid())?,
            other => return Err(SinkTargetError::UnknownOption(other.to_string())),
        }
    }

    Ok(target)
}

/// Error type returned when parsing a sink target.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SinkTargetError {
    #[error("unknown or unsupported sink scheme: {0}")]
    UnknownScheme(String),

    #[error("file sink target has no path")]
    MissingPath,

    #[error("file sink path is not valid percent-encoded UTF-8: {0}")]
    InvalidEncoding(String),

    #[error("invalid value {value:?} for sink option {key}")]
    InvalidOption { key: String, value: String },

    #[error("unknown sink option: {0}")]
    UnknownOption(String),
}

/// Create the [`LogSink`] described by `target`.
///
/// File sinks open lazily, so this never touches the filesystem.
pub fn make_sink(target: &SinkTarget) -> Result<Arc<dyn LogSink>, SinkTargetError> {
    match target.kind {
        SinkKind::Noop => Ok(Arc::new(NoopSink) as Arc<dyn LogSink>),
        SinkKind::Stdout => Ok(Arc::new(StdoutSink::new()) as Arc<dyn LogSink>),
        SinkKind::File => {
            let path = target.path.clone().ok_or(SinkTargetError::MissingPath)?;
            let sink = RotatingFileSink::new(path).with_rotation(target.max_bytes, target.backups);
            Ok(Arc::new(sink) as Arc<dyn LogSink>)
        }
    }
}
