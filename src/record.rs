use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;

/// Severity of a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl Level {
    /// Display name written into the `level` field of every line.
    pub fn name(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warning,
            tracing::Level::INFO => Level::Info,
            _ => Level::Debug,
        }
    }
}

/// Payload of a [`LogRecord`].
///
/// The normalizer checks the variants in declaration order, so an error is
/// always rendered as its string form even if it could also be seen as an
/// object.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Stringified error, including its `source()` chain.
    Error(String),
    /// Already a field map; passed through as-is.
    Map(Map<String, Value>),
    /// Field set of an arbitrary serialized value.
    Object(Map<String, Value>),
    Text(String),
    /// Text whose encoding has not been checked yet.
    Bytes(Vec<u8>),
    Integer(i64),
    /// Anything else. Rendered as a warning naming the type.
    Other(Value),
}

impl Message {
    /// Stringify an error together with the errors that caused it.
    pub fn error(err: &(dyn Error + 'static)) -> Self {
        let mut text = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        Message::Error(text)
    }

    /// Serialize `value` and keep its field set.
    ///
    /// Values that do not serialize to an object are classified the same
    /// way as [`Message::from_value`]. A serialization failure becomes a
    /// text message starting with `unserializable log message:`.
    pub fn object<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(Value::Object(fields)) => Message::Object(fields),
            Ok(other) => Message::from_value(other),
            Err(err) => Message::Text(format!("unserializable log message: {}", err)),
        }
    }

    /// Classify a dynamic JSON value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => Message::Map(fields),
            Value::String(text) => Message::Text(text),
            Value::Number(n) if n.is_i64() => match n.as_i64() {
                Some(i) => Message::Integer(i),
                None => Message::Other(Value::Number(n)),
            },
            Value::Array(items) => Message::Map(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect(),
            ),
            other => Message::Other(other),
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<i64> for Message {
    fn from(value: i64) -> Self {
        Message::Integer(value)
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Message::Bytes(bytes)
    }
}

impl From<Map<String, Value>> for Message {
    fn from(fields: Map<String, Value>) -> Self {
        Message::Map(fields)
    }
}

/// One buffered log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub message: Message,
    pub level: Level,
    pub category: String,
    pub timestamp: DateTime<Utc>,
    pub trace: Option<String>,
}

impl LogRecord {
    /// Record stamped with the current time.
    pub fn new(message: impl Into<Message>, level: Level, category: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level,
            category: category.into(),
            timestamp: Utc::now(),
            trace: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the timestamp from seconds since the Unix epoch.
    ///
    /// Out-of-range values leave the timestamp unchanged.
    pub fn at_epoch(mut self, secs: i64) -> Self {
        if let Some(ts) = Utc.timestamp_opt(secs, 0).single() {
            self.timestamp = ts;
        }
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}
