//! Encoding repair applied before records are serialized.
//!
//! `String` and `serde_json::Value` leaves are valid UTF-8 by construction,
//! so the only place malformed text can hide is a byte payload.

use crate::record::{LogRecord, Message};
use std::borrow::Cow;

/// Decode `bytes` as UTF-8, replacing invalid sequences with U+FFFD.
///
/// Borrows when the input is already valid.
pub fn repair_utf8(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

pub fn sanitize_record(mut record: LogRecord) -> LogRecord {
    if let Message::Bytes(bytes) = &record.message {
        record.message = Message::Text(repair_utf8(bytes).into_owned());
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;
    use serde_json::json;

    #[test]
    fn valid_bytes_are_unchanged() {
        assert!(matches!(repair_utf8("héllo".as_bytes()), Cow::Borrowed("héllo")));
    }

    #[test]
    fn invalid_sequences_are_replaced() {
        assert_eq!(repair_utf8(b"ab\xffcd"), "ab\u{FFFD}cd");
    }

    #[test]
    fn bytes_message_becomes_text() {
        let record = LogRecord::new(b"bad \xc3\x28".to_vec(), Level::Info, "app");
        let clean = sanitize_record(record);
        assert_eq!(clean.message, Message::Text("bad \u{FFFD}(".to_string()));
    }

    #[test]
    fn sanitize_is_idempotent_on_valid_records() {
        let mut fields = serde_json::Map::new();
        fields.insert("user".into(), json!("zoë"));
        fields.insert("n".into(), json!(3));
        let record = LogRecord::new(fields, Level::Warning, "app").with_trace("at main");

        let once = sanitize_record(record.clone());
        assert_eq!(once, record);
        assert_eq!(sanitize_record(once.clone()), once);
    }
}
