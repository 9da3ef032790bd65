//! Masking of sensitive values before a record leaves the process.
//!
//! Rules match the serialized form `"<field>": "<value>"` (optionally with
//! backslash-escaped quotes, so JSON embedded in a string is covered too)
//! and replace the value, or part of it, with [`PLACEHOLDER`].
//!
//! | field                                   | input              | output        |
//! |-----------------------------------------|--------------------|---------------|
//! | `*iban`                                 | `DE05202208445090025780` | `DE0***780` |
//! | `ibanGeneralPart`                       | `DE0520220844`     | `***844`      |
//! | `bic`, `accountNumber`, `sortCode`, ... | `SXPADAH`          | `SX***`       |
//! | `*email`, `*name`, `password`, ...      | `dev@x.com`        | `***`         |

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::record::{RawEvent, DATA};

pub const PLACEHOLDER: &str = "***";

/// One pattern substitution, applied once per string value.
#[derive(Debug, Clone)]
pub struct RedactionRule {
    pub pattern: Regex,
    pub replacement: String,
}

impl RedactionRule {
    /// Compile `pattern` case-insensitively.
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&format!("(?i){pattern}"))?,
            replacement: replacement.into(),
        })
    }

    pub fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, self.replacement.as_str())
            .into_owned()
    }
}

const KEEP_OUTER: &str = "${1}***${3}";

const DEFAULT_PATTERNS: [&str; 4] = [
    // "iban": "DE05202208445090025780", \"feeIban\":\"DE05202208445090025780\"
    r#"(\\?"\w*iban\\?":\s?\\?".{3})(.*?)(\w{3}\\?")"#,
    r#"(\\?"ibanGeneralPart\\?":\s?\\?")(.*?)(\w{3}\\?")"#,
    // "bic": "SXPADAH", "accountNumber": "3244334"
    r#"(\\?"(?:bic|accountNumber|sortCode|expYear|lastDigits)\\?":\s?\\?"\w{2})(.*?)(\\?")"#,
    // "email": "dev@mailinator.com", "fullName": "Christopher Hurst"
    r#"(\\?"(?:\w*email|\w*name|password|phone_number|address\w*|city|locality|postcode|birth_date|driver_licence\w*|\w*token)\\?":\s?\\?")(.*?)(\\?")"#,
];

lazy_static! {
    static ref DEFAULT_RULES: Vec<RedactionRule> = DEFAULT_PATTERNS
        .iter()
        .map(|pattern| RedactionRule::new(pattern, KEEP_OUTER).expect("valid redaction pattern"))
        .collect();
}

/// Strategy used by [`RedactionFilter`].
///
/// [`PatternRedactor`] works on serialized text; a structured implementation
/// only has to provide `redact_text` and may override the other two.
pub trait Redactor: Send + Sync {
    fn redact_text(&self, text: &str) -> String;

    /// Redact a string leaf of a mapping by matching it in its serialized
    /// `"key": "value"` form.
    fn redact_field(&self, key: &str, value: &str) -> String {
        let key_json = Value::String(key.to_string()).to_string();
        let fragment = format!("{key_json}: {}", Value::String(value.to_string()));
        let redacted = self.redact_text(&fragment);
        if redacted == fragment {
            return value.to_string();
        }

        redacted
            .get(key_json.len() + 2..)
            .and_then(|rest| serde_json::from_str::<String>(rest).ok())
            .unwrap_or_else(|| PLACEHOLDER.to_string())
    }

    /// Strings are redacted, mappings are walked, everything else is
    /// returned as is.
    fn obfuscate(&self, value: Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.redact_text(&text)),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| {
                        let value = match self.obfuscate(value) {
                            Value::String(text) => Value::String(self.redact_field(&key, &text)),
                            other => other,
                        };
                        (key, value)
                    })
                    .collect::<Map<String, Value>>(),
            ),
            other => other,
        }
    }
}

/// Regex rules applied in order over serialized text.
#[derive(Debug, Clone)]
pub struct PatternRedactor {
    rules: Vec<RedactionRule>,
}

impl PatternRedactor {
    pub fn new(rules: Vec<RedactionRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[RedactionRule] {
        &self.rules
    }
}

impl Default for PatternRedactor {
    fn default() -> Self {
        Self::new(DEFAULT_RULES.clone())
    }
}

impl Redactor for PatternRedactor {
    fn redact_text(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, rule| rule.apply(&acc))
    }
}

/// Sanitizes the interpolation arguments and the `data` payload of an
/// event. Never drops an event.
#[derive(Clone)]
pub struct RedactionFilter {
    redactor: Arc<dyn Redactor>,
}

impl RedactionFilter {
    pub fn new(redactor: Arc<dyn Redactor>) -> Self {
        Self { redactor }
    }

    pub fn filter(&self, mut event: RawEvent) -> RawEvent {
        event.args = event
            .args
            .into_iter()
            .map(|arg| self.redactor.obfuscate(arg))
            .collect();

        if let Some(data) = event.fields.remove(DATA) {
            event.fields.insert(DATA.to_string(), self.redactor.obfuscate(data));
        }
        event
    }

    pub fn redactor(&self) -> &dyn Redactor {
        self.redactor.as_ref()
    }
}

impl Default for RedactionFilter {
    fn default() -> Self {
        Self::new(Arc::new(PatternRedactor::default()))
    }
}
