use crate::record::{LogRecord, Message};
use crate::sanitize::sanitize_record;
use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Zone the `@timestamp` field is rendered in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampZone {
    #[default]
    Utc,
    Local,
}

const ISO_8601: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Render `ts` as ISO-8601 with an explicit offset, e.g.
/// `2023-11-14T22:13:20+00:00`.
pub fn format_timestamp(ts: &DateTime<Utc>, zone: TimestampZone) -> String {
    match zone {
        TimestampZone::Utc => ts.format(ISO_8601).to_string(),
        TimestampZone::Local => ts.with_timezone(&Local).format(ISO_8601).to_string(),
    }
}

/// Merge `overlay` into `base`. Keys present in both take the overlay
/// value, except when both sides are maps, which are merged key by key.
pub fn merge(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        match value {
            Value::Object(incoming) if base.get(&key).map_or(false, Value::is_object) => {
                if let Some(Value::Object(existing)) = base.get_mut(&key) {
                    let merged = merge(std::mem::take(existing), incoming);
                    *existing = merged;
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
    base
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NULL",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Normalize any message shape into a field map.
pub fn parse_text(message: &Message) -> Map<String, Value> {
    let mut fields = Map::new();
    match message {
        Message::Error(text) => {
            fields.insert("message".to_string(), Value::String(text.clone()));
        }
        Message::Map(map) | Message::Object(map) => return map.clone(),
        Message::Text(text) => {
            fields.insert("message".to_string(), Value::String(text.clone()));
        }
        Message::Integer(i) => {
            fields.insert("message".to_string(), Value::from(*i));
        }
        Message::Bytes(_) => {
            fields.insert("message".to_string(), Value::String(warning("bytes")));
        }
        Message::Other(value) => {
            fields.insert("message".to_string(), Value::String(warning(type_name(value))));
        }
    }
    fields
}

fn warning(type_name: &str) -> String {
    format!("Warning, wrong log message type '{}'", type_name)
}

/// Flatten one record into the map written as a JSON line.
///
/// `level`, `category` and `@timestamp` override message fields with the
/// same key.
pub fn prepare_message(record: &LogRecord, zone: TimestampZone) -> Map<String, Value> {
    let mut fixed = Map::new();
    fixed.insert("level".to_string(), Value::String(record.level.name().to_string()));
    fixed.insert("category".to_string(), Value::String(record.category.clone()));
    fixed.insert(
        "@timestamp".to_string(),
        Value::String(format_timestamp(&record.timestamp, zone)),
    );

    let mut result = merge(parse_text(&record.message), fixed);
    if let Some(trace) = &record.trace {
        result.insert("trace".to_string(), Value::String(trace.clone()));
    }
    result
}

/// Sanitize, flatten and serialize one record into a single JSON line
/// (without the trailing newline).
pub fn format_message(record: LogRecord, zone: TimestampZone) -> Result<String, serde_json::Error> {
    let record = sanitize_record(record);
    serde_json::to_string(&prepare_message(&record, zone))
}
