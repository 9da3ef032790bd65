use crate::logger::Logger;
use crate::record::{RawEvent, DATA};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that routes events through a [`Logger`].
///
/// Event fields become the record's `data`, the formatted message is
/// redacted like any interpolation argument, and the shared context is read
/// on the emitting thread/task, so `info!(scheduleId = %id, "...")` inside a
/// request scope carries that request's id.
pub struct JsonLogLayer {
    logger: Arc<Logger>,
    max_level: Level,
}

impl JsonLogLayer {
    /// Capture events at `max_level` and more severe.
    pub fn new(logger: Arc<Logger>, max_level: Level) -> Self {
        Self { logger, max_level }
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    /// Build the raw event for a `tracing` event.
    pub fn raw_event(&self, event: &Event<'_>) -> RawEvent {
        let mut fields = Map::new();
        let mut message: Option<String> = None;

        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
        };
        event.record(&mut visitor);

        // tracing hands us the message already formatted; passing it as the
        // only argument keeps interpolated values inside redaction's reach.
        let mut raw = RawEvent::new(*event.metadata().level(), "{}");
        raw.args = vec![Value::String(message.unwrap_or_default())];
        if !fields.is_empty() {
            raw.fields.insert(DATA.to_string(), Value::Object(fields));
        }
        raw
    }
}

impl<S> Layer<S> for JsonLogLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() > self.max_level {
            return;
        }

        let record = self.logger.process(self.raw_event(event));
        self.logger.emit(record);
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut Map<String, Value>,
    pub message: &'a mut Option<String>,
}

impl<'a> FieldVisitor<'a> {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.insert(field, Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.insert(field, Value::String(format!("{:?}", value)));
        }
    }
}
