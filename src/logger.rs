use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::Level;

use crate::context::{ContextStore, LocalContext};
use crate::dispatch::Dispatcher;
use crate::formatter::JsonFormatter;
use crate::record::{LogRecord, RawEvent, DATA};
use crate::redact::{RedactionFilter, Redactor};

/// Entry point for application code.
///
/// Every call goes through the same steps: extra fields are nested under
/// `data`, the redaction filter cleans arguments and `data`, and only then
/// does the formatter merge in the shared context, so ambient attributes
/// such as `requestId` are never run through the redaction rules.
///
/// ```no_run
/// use clinic_log::logger::Logger;
/// use serde_json::json;
///
/// let logger = Logger::detached("core");
/// let record = logger.record(
///     tracing::Level::INFO,
///     "Sending reminder to patient {}",
///     vec![json!("p-17")],
///     Some(json!({"email": "dev@x.com"})),
/// );
/// assert_eq!(record.data_value("email"), Some(&json!("***")));
/// ```
#[derive(Clone)]
pub struct Logger {
    redaction: RedactionFilter,
    formatter: JsonFormatter,
    context: Arc<dyn ContextStore>,
    output: Option<Dispatcher>,
}

impl Logger {
    /// Logger that ships every record through `output`.
    pub fn new(service_name: impl Into<String>, output: Dispatcher) -> Self {
        Self {
            output: Some(output),
            ..Self::detached(service_name)
        }
    }

    /// Logger without an output. [`Logger::record`] still builds records;
    /// [`Logger::log`] discards them.
    pub fn detached(service_name: impl Into<String>) -> Self {
        Self {
            redaction: RedactionFilter::default(),
            formatter: JsonFormatter::new(service_name),
            context: Arc::new(LocalContext),
            output: None,
        }
    }

    pub fn with_redactor(mut self, redactor: Arc<dyn Redactor>) -> Self {
        self.redaction = RedactionFilter::new(redactor);
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ContextStore>) -> Self {
        self.context = context;
        self
    }

    pub fn context(&self) -> &dyn ContextStore {
        self.context.as_ref()
    }

    pub fn service_name(&self) -> &str {
        self.formatter.service_name()
    }

    pub fn output(&self) -> Option<&Dispatcher> {
        self.output.as_ref()
    }

    /// Build the raw event for a call, nesting `extra` under `data`.
    /// A non-object `extra` is kept as `data.value`.
    pub fn make_event(&self, level: Level, message: &str, args: Vec<Value>, extra: Option<Value>) -> RawEvent {
        let mut event = RawEvent::new(level, message);
        event.args = args;
        if let Some(extra) = extra {
            let data = match extra {
                Value::Object(map) => map,
                other => Map::from_iter([("value".to_string(), other)]),
            };
            event.fields.insert(DATA.to_string(), Value::Object(data));
        }
        event
    }

    /// Redact, then format against the caller's shared context.
    pub fn process(&self, event: RawEvent) -> LogRecord {
        let event = self.redaction.filter(event);
        let shared = self.context.get();
        self.formatter.format(&event, &shared)
    }

    pub fn record(&self, level: Level, message: &str, args: Vec<Value>, extra: Option<Value>) -> LogRecord {
        self.process(self.make_event(level, message, args, extra))
    }

    /// Hand a finalized record to the output. Returns `false` if it was
    /// dropped.
    pub fn emit(&self, record: LogRecord) -> bool {
        match &self.output {
            Some(output) => output.dispatch(record),
            None => false,
        }
    }

    pub fn log(&self, level: Level, message: &str, args: Vec<Value>, extra: Option<Value>) -> bool {
        self.emit(self.record(level, message, args, extra))
    }

    pub fn debug(&self, message: &str, args: Vec<Value>, extra: Option<Value>) -> bool {
        self.log(Level::DEBUG, message, args, extra)
    }

    pub fn info(&self, message: &str, args: Vec<Value>, extra: Option<Value>) -> bool {
        self.log(Level::INFO, message, args, extra)
    }

    pub fn warn(&self, message: &str, args: Vec<Value>, extra: Option<Value>) -> bool {
        self.log(Level::WARN, message, args, extra)
    }

    pub fn error(&self, message: &str, args: Vec<Value>, extra: Option<Value>) -> bool {
        self.log(Level::ERROR, message, args, extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{sync_scope, ContextMap, ContextValue, REQUEST_ID};
    use crate::formatter::LOG_GLOBAL_DURATION;
    use crate::redact::PatternRedactor;
    use serde_json::json;

    #[test]
    fn extra_fields_are_nested_under_data() {
        let logger = Logger::detached("core");
        let event = logger.make_event(Level::INFO, "x", vec![], Some(json!({"scheduleId": "s-1"})));
        assert_eq!(event.fields[DATA], json!({"scheduleId": "s-1"}));

        let event = logger.make_event(Level::INFO, "x", vec![], Some(json!(7)));
        assert_eq!(event.fields[DATA], json!({"value": 7}));

        let event = logger.make_event(Level::INFO, "x", vec![], None);
        assert!(event.fields.is_empty());
    }

    #[test]
    fn arguments_are_redacted_before_interpolation() {
        let logger = Logger::detached("core");
        let record = logger.record(
            Level::INFO,
            "payload: {}",
            vec![json!(r#"{"email": "dev@x.com", "bic": "SXPADAH"}"#)],
            None,
        );
        assert_eq!(
            record.message.as_deref(),
            Some(r#"payload: {"email": "***", "bic": "SX***"}"#)
        );
    }

    #[test]
    fn shared_context_is_not_redacted() {
        sync_scope(Some("req-1".to_string()), || {
            let logger = Logger::detached("core");
            logger.context().set(ContextMap::from([(
                "username".to_string(),
                ContextValue::from("alice"),
            )]));
            let record = logger.record(Level::INFO, "x", vec![], Some(json!({"username": "bob"})));

            assert_eq!(record.request_id, Some(json!("req-1")));
            // The shared stray replaces the caller's redacted value and is itself left alone.
            assert_eq!(record.data_value("username"), Some(&json!("alice")));
        });
    }

    #[test]
    fn shared_strays_keep_their_value_when_not_shadowed() {
        sync_scope(None, || {
            let logger = Logger::detached("core");
            logger.context().set(ContextMap::from([(
                "fullName".to_string(),
                ContextValue::from("Ann Smith"),
            )]));
            let record = logger.record(Level::INFO, "x", vec![], None);
            assert_eq!(record.data_value("fullName"), Some(&json!("Ann Smith")));
        });
    }

    #[test]
    fn global_duration_flag_is_consumed() {
        sync_scope(None, || {
            let logger = Logger::detached("core");
            let record = logger.record(Level::INFO, "done", vec![], Some(json!({LOG_GLOBAL_DURATION: true})));
            assert!(record.duration.is_some());
            assert_eq!(record.data_value(LOG_GLOBAL_DURATION), None);
            assert!(logger.context().get_param(REQUEST_ID).is_some());
        });
    }

    #[test]
    fn custom_redactor_replaces_default_rules() {
        let rule = crate::redact::RedactionRule::new(r#"("mrn":\s?")(.*?)(")"#, "${1}***${3}").unwrap();
        let logger = Logger::detached("core").with_redactor(Arc::new(PatternRedactor::new(vec![rule])));
        let record = logger.record(Level::INFO, "x", vec![], Some(json!({"mrn": "123", "email": "a@b.c"})));
        assert_eq!(record.data_value("mrn"), Some(&json!("***")));
        assert_eq!(record.data_value("email"), Some(&json!("a@b.c")));
    }

    #[test]
    fn detached_logger_discards_on_log() {
        let logger = Logger::detached("core");
        assert!(!logger.info("nothing listens", vec![], None));
        assert!(logger.output().is_none());
    }
}
