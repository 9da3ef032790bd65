use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::Level;

pub const DATE_CREATED: &str = "dateCreated";
pub const LEVEL: &str = "level";
pub const DURATION: &str = "duration";
pub const MESSAGE: &str = "message";
pub const REQUEST_ID: &str = "requestId";
pub const CUSTOMER: &str = "customer";
pub const APP: &str = "app";
pub const DATA: &str = "data";

/// The only keys allowed at the top level of a finalized record.
pub const RESERVED_KEYS: [&str; 8] = [
    DATE_CREATED,
    LEVEL,
    DURATION,
    MESSAGE,
    REQUEST_ID,
    CUSTOMER,
    APP,
    DATA,
];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// A log call as captured by the facade, before redaction and formatting.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub level: Level,
    /// Message with `{}` placeholders for `args`.
    pub message: String,
    pub args: Vec<Value>,
    /// Record fields supplied by the caller; extras live under `data`.
    pub fields: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub thread_name: String,
}

impl RawEvent {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            args: Vec::new(),
            fields: Map::new(),
            timestamp: Utc::now(),
            thread_name: current_thread_name(),
        }
    }

    /// `message` with each `{}` replaced by the next argument. Strings are
    /// inserted verbatim, other values as JSON; placeholders without an
    /// argument stay as they are.
    pub fn interpolated_message(&self) -> String {
        let mut out = String::with_capacity(self.message.len());
        let mut args = self.args.iter();
        let mut rest = self.message.as_str();

        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            match args.next() {
                Some(Value::String(text)) => out.push_str(text),
                Some(other) => out.push_str(&other.to_string()),
                None => out.push_str("{}"),
            }
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        out
    }
}

pub fn current_thread_name() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

/// `app` section of every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub name: String,
    pub thread_name: String,
}

/// A finalized record. Its fields are exactly the reserved top-level keys;
/// anything else lives in `data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub date_created: String,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<Value>,
    pub app: AppInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl LogRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn data_value(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(key))
    }
}
