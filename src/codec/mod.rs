//! Record codecs.
//!
//! Every persisted entity describes its fields exactly once, through
//! [`Record::write`] and [`Record::read`]. The same description drives the
//! JSON map encoding and the compact binary encoding, so the key order of
//! one and the field order of the other cannot drift apart.

mod binary;
mod json;

pub use binary::{BinarySink, BinarySource, BINARY_FORMAT_VERSION};
pub use json::{JsonSink, JsonSource};

use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` has the wrong type, expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("field `{field}` holds an invalid timestamp: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("unexpected end of input while reading `{0}`")]
    UnexpectedEof(&'static str),
    #[error("invalid UTF-8 in `{0}`")]
    InvalidUtf8(&'static str),
    #[error("invalid tag {tag} for `{field}`")]
    InvalidTag { field: &'static str, tag: u8 },
    #[error("unsupported binary format version {0}")]
    UnsupportedVersion(u8),
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

/// Write side of the field schema.
pub trait FieldSink {
    fn put_str(&mut self, key: &'static str, value: &str);
    fn put_opt_str(&mut self, key: &'static str, value: Option<&str>);
    fn put_bool(&mut self, key: &'static str, value: bool);
    fn put_u64(&mut self, key: &'static str, value: u64);
    fn put_opt_u64(&mut self, key: &'static str, value: Option<u64>);
    fn put_time(&mut self, key: &'static str, value: DateTime<Utc>);
    fn put_opt_time(&mut self, key: &'static str, value: Option<DateTime<Utc>>);
    fn put_str_list(&mut self, key: &'static str, values: &[String]);
    fn put_records<R: Record>(&mut self, key: &'static str, records: &[R]);
}

/// Read side of the field schema.
///
/// Every accessor returns `Ok(None)` when the field is absent, which lets
/// records apply their own per-field defaults. The binary source never
/// reports a plain field as absent.
pub trait FieldSource {
    fn take_str(&mut self, key: &'static str) -> Result<Option<String>, CodecError>;
    fn take_opt_str(&mut self, key: &'static str) -> Result<Option<String>, CodecError>;
    fn take_bool(&mut self, key: &'static str) -> Result<Option<bool>, CodecError>;
    fn take_u64(&mut self, key: &'static str) -> Result<Option<u64>, CodecError>;
    fn take_opt_u64(&mut self, key: &'static str) -> Result<Option<u64>, CodecError>;
    fn take_time(&mut self, key: &'static str) -> Result<Option<DateTime<Utc>>, CodecError>;
    fn take_opt_time(&mut self, key: &'static str)
        -> Result<Option<DateTime<Utc>>, CodecError>;
    fn take_str_list(&mut self, key: &'static str) -> Result<Option<Vec<String>>, CodecError>;
    fn take_records<R: Record>(&mut self, key: &'static str)
        -> Result<Option<Vec<R>>, CodecError>;
}

/// An entity with a canonical, ordered field schema.
pub trait Record: Sized {
    fn write<S: FieldSink>(&self, sink: &mut S);
    fn read<S: FieldSource>(source: &mut S) -> Result<Self, CodecError>;
}

pub fn to_json<R: Record>(record: &R) -> Value {
    let mut sink = JsonSink::new();
    record.write(&mut sink);
    sink.into_value()
}

pub fn from_json<R: Record>(value: &Value) -> Result<R, CodecError> {
    let map = value.as_object().ok_or(CodecError::NotAnObject)?;
    R::read(&mut JsonSource::new(map))
}

pub fn to_bytes<R: Record>(record: &R) -> Vec<u8> {
    let mut sink = BinarySink::new();
    record.write(&mut sink);
    sink.into_bytes()
}

pub fn from_bytes<R: Record>(bytes: &[u8]) -> Result<R, CodecError> {
    let mut source = BinarySource::new(bytes)?;
    let record = R::read(&mut source)?;
    source.finish()?;
    Ok(record)
}

/// Shared helper for required fields.
pub(crate) fn required<T>(value: Option<T>, field: &'static str) -> Result<T, CodecError> {
    value.ok_or(CodecError::MissingField(field))
}

pub(crate) fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}

pub(crate) fn parse_time(field: &'static str, raw: &str) -> Result<DateTime<Utc>, CodecError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| CodecError::InvalidTimestamp {
            field,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, PartialEq)]
    struct Sample {
        name: String,
        note: Option<String>,
        flag: bool,
        count: u64,
        limit: Option<u64>,
        at: DateTime<Utc>,
        seen: Option<DateTime<Utc>>,
        tags: Vec<String>,
        children: Vec<Child>,
    }

    #[derive(Debug, PartialEq)]
    struct Child {
        label: String,
    }

    impl Record for Child {
        fn write<S: FieldSink>(&self, sink: &mut S) {
            sink.put_str("label", &self.label);
        }

        fn read<S: FieldSource>(source: &mut S) -> Result<Self, CodecError> {
            Ok(Child {
                label: required(source.take_str("label")?, "label")?,
            })
        }
    }

    impl Record for Sample {
        fn write<S: FieldSink>(&self, sink: &mut S) {
            sink.put_str("name", &self.name);
            sink.put_opt_str("note", self.note.as_deref());
            sink.put_bool("flag", self.flag);
            sink.put_u64("count", self.count);
            sink.put_opt_u64("limit", self.limit);
            sink.put_time("at", self.at);
            sink.put_opt_time("seen", self.seen);
            sink.put_str_list("tags", &self.tags);
            sink.put_records("children", &self.children);
        }

        fn read<S: FieldSource>(source: &mut S) -> Result<Self, CodecError> {
            Ok(Sample {
                name: required(source.take_str("name")?, "name")?,
                note: source.take_opt_str("note")?,
                flag: source.take_bool("flag")?.unwrap_or(false),
                count: source.take_u64("count")?.unwrap_or(0),
                limit: source.take_opt_u64("limit")?,
                at: required(source.take_time("at")?, "at")?,
                seen: source.take_opt_time("seen")?,
                tags: source.take_str_list("tags")?.unwrap_or_default(),
                children: source.take_records("children")?.unwrap_or_default(),
            })
        }
    }

    fn sample() -> Sample {
        Sample {
            name: "ünïcode name".into(),
            note: None,
            flag: true,
            count: 42,
            limit: Some(7),
            at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
                + chrono::Duration::nanoseconds(123_456_789),
            seen: None,
            tags: vec!["a".into(), "b c".into()],
            children: vec![Child { label: "x".into() }, Child { label: "y".into() }],
        }
    }

    #[test]
    fn test_json_and_binary_agree() {
        let value = sample();
        let from_json_value: Sample = from_json(&to_json(&value)).unwrap();
        let from_binary: Sample = from_bytes(&to_bytes(&value)).unwrap();
        assert_eq!(from_json_value, value);
        assert_eq!(from_binary, value);
    }

    #[test]
    fn test_json_key_order_follows_schema() {
        let json = to_json(&sample());
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["name", "note", "flag", "count", "limit", "at", "seen", "tags", "children"]
        );
    }

    #[test]
    fn test_json_missing_optional_fields_use_defaults() {
        let json = serde_json::json!({ "name": "n", "at": "2024-05-01T12:30:00Z" });
        let parsed: Sample = from_json(&json).unwrap();
        assert!(!parsed.flag);
        assert!(parsed.tags.is_empty());
        assert!(parsed.children.is_empty());
        assert_eq!(parsed.limit, None);
    }

    #[test]
    fn test_json_missing_required_field() {
        let json = serde_json::json!({ "at": "2024-05-01T12:30:00Z" });
        let err = from_json::<Sample>(&json).unwrap_err();
        assert!(matches!(err, CodecError::MissingField("name")));
    }

    #[test]
    fn test_binary_rejects_truncated_and_trailing_input() {
        let bytes = to_bytes(&sample());
        assert!(from_bytes::<Sample>(&bytes[..bytes.len() - 3]).is_err());

        let mut extended = bytes.clone();
        extended.push(0);
        assert!(matches!(
            from_bytes::<Sample>(&extended),
            Err(CodecError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_binary_rejects_unknown_version() {
        let mut bytes = to_bytes(&sample());
        bytes[0] = 99;
        assert!(matches!(
            from_bytes::<Sample>(&bytes),
            Err(CodecError::UnsupportedVersion(99))
        ));
    }
}
