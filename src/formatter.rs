use serde_json::{Map, Value};

use crate::context::{ContextMap, ContextValue, START_PROCESSING_TIMER};
use crate::record::{
    is_reserved, AppInfo, LogRecord, RawEvent, CUSTOMER, DATA, DATE_CREATED, DURATION, LEVEL,
    MESSAGE, REQUEST_ID,
};
use crate::timer::ElapsedTimer;

/// Flag a caller puts into `data` to get the unit-of-work duration attached.
pub const LOG_GLOBAL_DURATION: &str = "logGlobalDuration";

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Turns a redacted [`RawEvent`] plus the shared context into a
/// [`LogRecord`].
///
/// Shared attributes land at the top level, `data` from both sides is merged
/// with the event's keys winning, and any key that is not reserved ends up
/// in `data`.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    service_name: String,
}

impl JsonFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn format(&self, event: &RawEvent, shared: &ContextMap) -> LogRecord {
        let mut fields = event.fields.clone();
        fields.insert(MESSAGE.to_string(), Value::String(event.interpolated_message()));

        let wants_duration = match event.fields.get(DATA) {
            Some(Value::Object(data)) => is_truthy(data.get(LOG_GLOBAL_DURATION)),
            _ => false,
        };
        let timer = merge_shared(&mut fields, shared);

        if !is_truthy(fields.get(DATE_CREATED)) {
            let now = event.timestamp.format(DATE_FORMAT).to_string();
            fields.insert(DATE_CREATED.to_string(), Value::String(now));
        }

        let level = match fields.get(LEVEL) {
            Some(Value::String(level)) if !level.is_empty() => level.to_uppercase(),
            _ => event.level.as_str().to_string(),
        };
        fields.insert(LEVEL.to_string(), Value::String(level));

        if let Some(timer) = timer.filter(|_| wants_duration) {
            attach_duration(&mut fields, &timer);
        }

        move_unexpected_to_data(&mut fields);

        let app = AppInfo {
            name: self.service_name.clone(),
            thread_name: event.thread_name.clone(),
        };
        into_record(fields, app)
    }
}

/// Copy shared attributes to the top level and merge the `data` sections.
/// Returns the processing timer, which is never emitted itself.
fn merge_shared(fields: &mut Map<String, Value>, shared: &ContextMap) -> Option<ElapsedTimer> {
    let mut timer = None;
    let mut shared_data = None;

    for (key, value) in shared {
        match (key.as_str(), value) {
            (START_PROCESSING_TIMER, value) => timer = value.as_timer().copied(),
            (_, ContextValue::Timer(_)) => {}
            (DATA, ContextValue::Json(value)) => shared_data = Some(value.clone()),
            (key, ContextValue::Json(value)) => {
                fields.insert(key.to_string(), value.clone());
            }
        }
    }

    let local_data = fields.remove(DATA);
    let data = match (shared_data, local_data) {
        (Some(Value::Object(mut shared)), Some(Value::Object(local))) => {
            shared.extend(local);
            Some(Value::Object(shared))
        }
        (_, Some(local)) => Some(local),
        (shared, None) => shared,
    };
    if let Some(data) = data {
        fields.insert(DATA.to_string(), data);
    }

    timer
}

/// Only called when the event's own `data` asked for the duration; a flag
/// coming from the shared context alone never triggers it.
fn attach_duration(fields: &mut Map<String, Value>, timer: &ElapsedTimer) {
    if is_truthy(fields.get(DURATION)) {
        return;
    }

    if let Some(Value::Object(data)) = fields.get_mut(DATA) {
        data.remove(LOG_GLOBAL_DURATION);
    }
    fields.insert(DURATION.to_string(), Value::from(timer.duration()));
}

fn move_unexpected_to_data(fields: &mut Map<String, Value>) {
    let unexpected: Vec<String> = fields
        .keys()
        .filter(|key| !is_reserved(key))
        .cloned()
        .collect();
    if unexpected.is_empty() {
        return;
    }

    let mut data = match fields.remove(DATA) {
        Some(Value::Object(data)) => data,
        Some(Value::Null) | None => Map::new(),
        Some(other) => Map::from_iter([("value".to_string(), other)]),
    };
    for key in unexpected {
        if let Some(value) = fields.remove(&key) {
            data.insert(key, value);
        }
    }
    fields.insert(DATA.to_string(), Value::Object(data));
}

fn into_record(mut fields: Map<String, Value>, app: AppInfo) -> LogRecord {
    LogRecord {
        date_created: take_string(&mut fields, DATE_CREATED).unwrap_or_default(),
        level: take_string(&mut fields, LEVEL).unwrap_or_default(),
        duration: fields.remove(DURATION).and_then(|value| {
            value
                .as_u64()
                .or_else(|| value.as_f64().filter(|ms| *ms >= 0.0).map(|ms| ms.round() as u64))
        }),
        message: take_string(&mut fields, MESSAGE),
        request_id: fields.remove(REQUEST_ID).filter(|value| !value.is_null()),
        customer: fields.remove(CUSTOMER).filter(|value| !value.is_null()),
        app,
        data: match fields.remove(DATA) {
            Some(Value::Object(data)) => Some(data),
            Some(Value::Null) | None => None,
            Some(other) => Some(Map::from_iter([("value".to_string(), other)])),
        },
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().map_or(true, |n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::fresh_context;
    use crate::record::RESERVED_KEYS;
    use serde_json::json;
    use std::time::{Duration, Instant};
    use tracing::Level;

    fn event_with_data(data: Value) -> RawEvent {
        let mut event = RawEvent::new(Level::INFO, "Started schedule processing");
        event.fields.insert(DATA.to_string(), data);
        event
    }

    fn formatter() -> JsonFormatter {
        JsonFormatter::new("core")
    }

    #[test]
    fn merges_request_context_and_nests_extras() {
        let shared = fresh_context(Some("req-9".to_string()));
        let record = formatter().format(&event_with_data(json!({"scheduleId": "s-1"})), &shared);

        assert_eq!(record.request_id, Some(json!("req-9")));
        assert_eq!(record.message.as_deref(), Some("Started schedule processing"));
        assert_eq!(record.level, "INFO");
        assert_eq!(record.data_value("scheduleId"), Some(&json!("s-1")));
        assert_eq!(record.app.name, "core");
        assert_eq!(record.duration, None);
    }

    #[test]
    fn date_created_has_microsecond_precision() {
        let record = formatter().format(&RawEvent::new(Level::INFO, "x"), &ContextMap::new());
        let date = record.date_created.as_bytes();
        assert_eq!(date.len(), 26, "{}", record.date_created);
        assert_eq!(date[10], b'T');
        assert_eq!(date[19], b'.');
    }

    #[test]
    fn shared_date_created_and_level_are_respected() {
        let shared = ContextMap::from([
            (DATE_CREATED.to_string(), json!("2019-09-12T14:28:32.482646").into()),
            (LEVEL.to_string(), json!("warning").into()),
        ]);
        let record = formatter().format(&RawEvent::new(Level::INFO, "x"), &shared);
        assert_eq!(record.date_created, "2019-09-12T14:28:32.482646");
        assert_eq!(record.level, "WARNING");
    }

    #[test]
    fn local_data_wins_over_shared_data() {
        let shared = ContextMap::from([(
            DATA.to_string(),
            json!({"site": "leeds", "studyId": 1}).into(),
        )]);
        let record = formatter().format(&event_with_data(json!({"studyId": 2})), &shared);
        assert_eq!(
            record.data,
            Some(Map::from_iter([
                ("site".to_string(), json!("leeds")),
                ("studyId".to_string(), json!(2)),
            ]))
        );
    }

    #[test]
    fn customer_stays_top_level_and_strays_move_to_data() {
        let shared = ContextMap::from([
            (CUSTOMER.to_string(), json!({"userId": "u-1"}).into()),
            ("tenant".to_string(), json!("nhs").into()),
        ]);
        let mut event = RawEvent::new(Level::ERROR, "boom");
        event.fields.insert("status_code".to_string(), json!(500));

        let record = formatter().format(&event, &shared);
        assert_eq!(record.customer, Some(json!({"userId": "u-1"})));
        assert_eq!(record.data_value("tenant"), Some(&json!("nhs")));
        assert_eq!(record.data_value("status_code"), Some(&json!(500)));

        let value = serde_json::to_value(&record).unwrap();
        for key in value.as_object().unwrap().keys() {
            assert!(RESERVED_KEYS.contains(&key.as_str()), "unexpected top-level key {key}");
        }
    }

    #[test]
    fn timer_is_never_emitted() {
        let shared = fresh_context(None);
        let record = formatter().format(&RawEvent::new(Level::INFO, "x"), &shared);
        let json = record.to_json().unwrap();
        assert!(!json.contains(START_PROCESSING_TIMER));
        assert_eq!(record.data, None);
    }

    #[test]
    fn global_duration_is_attached_on_request() {
        let started = Instant::now() - Duration::from_millis(250);
        let shared = ContextMap::from([(
            START_PROCESSING_TIMER.to_string(),
            ElapsedTimer::from_start(started).into(),
        )]);
        let record = formatter().format(
            &event_with_data(json!({LOG_GLOBAL_DURATION: true, "step": "done"})),
            &shared,
        );

        let duration = record.duration.expect("duration");
        assert!((250..1_000).contains(&duration), "got {duration}");
        assert_eq!(record.data_value(LOG_GLOBAL_DURATION), None);
        assert_eq!(record.data_value("step"), Some(&json!("done")));
    }

    #[test]
    fn existing_duration_is_kept() {
        let shared = ContextMap::from([
            (START_PROCESSING_TIMER.to_string(), ElapsedTimer::new().into()),
            (DURATION.to_string(), json!(17).into()),
        ]);
        let record = formatter().format(&event_with_data(json!({LOG_GLOBAL_DURATION: true})), &shared);
        assert_eq!(record.duration, Some(17));
        assert_eq!(record.data_value(LOG_GLOBAL_DURATION), Some(&json!(true)));
    }

    #[test]
    fn no_duration_without_flag_or_timer() {
        let shared = fresh_context(None);
        let record = formatter().format(&event_with_data(json!({"a": 1})), &shared);
        assert_eq!(record.duration, None);

        let record = formatter().format(
            &event_with_data(json!({LOG_GLOBAL_DURATION: true})),
            &ContextMap::new(),
        );
        assert_eq!(record.duration, None);
        assert_eq!(record.data_value(LOG_GLOBAL_DURATION), Some(&json!(true)));
    }

    #[test]
    fn shared_duration_flag_alone_adds_nothing() {
        let shared = ContextMap::from([
            (START_PROCESSING_TIMER.to_string(), ElapsedTimer::new().into()),
            (DATA.to_string(), json!({LOG_GLOBAL_DURATION: true}).into()),
        ]);
        let record = formatter().format(&event_with_data(json!({"step": "one"})), &shared);
        assert_eq!(record.duration, None);

        let record = formatter().format(&event_with_data(json!({LOG_GLOBAL_DURATION: true})), &shared);
        assert!(record.duration.is_some());
        assert_eq!(record.data_value(LOG_GLOBAL_DURATION), None);
    }

    #[test]
    fn stray_keys_overwrite_data_entries() {
        let shared = ContextMap::from([("site".to_string(), json!("leeds").into())]);
        let record = formatter().format(&event_with_data(json!({"site": "york", "a": 1})), &shared);
        assert_eq!(record.data_value("site"), Some(&json!("leeds")));
        assert_eq!(record.data_value("a"), Some(&json!(1)));
    }

    #[test]
    fn formatting_already_wrapped_fields_is_stable() {
        let event = event_with_data(json!({"patientId": 3}));
        let first = formatter().format(&event, &ContextMap::new());

        let mut again = RawEvent::new(Level::INFO, "Started schedule processing");
        again.fields.insert(
            DATA.to_string(),
            Value::Object(first.data.clone().unwrap_or_default()),
        );
        let second = formatter().format(&again, &ContextMap::new());
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn truthiness_follows_json_emptiness() {
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(Some(&json!({}))));
        assert!(is_truthy(Some(&json!(1))));
        assert!(is_truthy(Some(&json!("yes"))));
    }
}
