use super::{format_time, parse_time, CodecError, FieldSink, FieldSource, Record};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Builds a JSON object whose key order is the schema's field order.
/// Absent optionals are written as `null` so every record carries the full key set.
#[derive(Default)]
pub struct JsonSink {
    map: Map<String, Value>,
}

impl JsonSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.map)
    }

    fn insert(&mut self, key: &'static str, value: Value) {
        self.map.insert(key.to_string(), value);
    }
}

impl FieldSink for JsonSink {
    fn put_str(&mut self, key: &'static str, value: &str) {
        self.insert(key, Value::String(value.to_string()));
    }

    fn put_opt_str(&mut self, key: &'static str, value: Option<&str>) {
        self.insert(key, value.map_or(Value::Null, |v| Value::String(v.to_string())));
    }

    fn put_bool(&mut self, key: &'static str, value: bool) {
        self.insert(key, Value::Bool(value));
    }

    fn put_u64(&mut self, key: &'static str, value: u64) {
        self.insert(key, Value::from(value));
    }

    fn put_opt_u64(&mut self, key: &'static str, value: Option<u64>) {
        self.insert(key, value.map_or(Value::Null, Value::from));
    }

    fn put_time(&mut self, key: &'static str, value: DateTime<Utc>) {
        self.insert(key, Value::String(format_time(value)));
    }

    fn put_opt_time(&mut self, key: &'static str, value: Option<DateTime<Utc>>) {
        self.insert(
            key,
            value.map_or(Value::Null, |v| Value::String(format_time(v))),
        );
    }

    fn put_str_list(&mut self, key: &'static str, values: &[String]) {
        self.insert(
            key,
            Value::Array(values.iter().cloned().map(Value::String).collect()),
        );
    }

    fn put_records<R: Record>(&mut self, key: &'static str, records: &[R]) {
        let items = records
            .iter()
            .map(|record| {
                let mut nested = JsonSink::new();
                record.write(&mut nested);
                nested.into_value()
            })
            .collect();
        self.insert(key, Value::Array(items));
    }
}

/// Reads fields by key from a JSON object. Missing keys and `null` both read as absent.
pub struct JsonSource<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> JsonSource<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self { map }
    }

    fn get(&self, key: &'static str) -> Option<&'a Value> {
        match self.map.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn string(&self, key: &'static str) -> Result<Option<String>, CodecError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(CodecError::WrongType {
                field: key,
                expected: "string",
            }),
        }
    }

    fn unsigned(&self, key: &'static str) -> Result<Option<u64>, CodecError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or(CodecError::WrongType {
                field: key,
                expected: "non-negative integer",
            }),
        }
    }

    fn time(&self, key: &'static str) -> Result<Option<DateTime<Utc>>, CodecError> {
        self.string(key)?
            .map(|raw| parse_time(key, &raw))
            .transpose()
    }
}

impl FieldSource for JsonSource<'_> {
    fn take_str(&mut self, key: &'static str) -> Result<Option<String>, CodecError> {
        self.string(key)
    }

    fn take_opt_str(&mut self, key: &'static str) -> Result<Option<String>, CodecError> {
        self.string(key)
    }

    fn take_bool(&mut self, key: &'static str) -> Result<Option<bool>, CodecError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(CodecError::WrongType {
                field: key,
                expected: "boolean",
            }),
        }
    }

    fn take_u64(&mut self, key: &'static str) -> Result<Option<u64>, CodecError> {
        self.unsigned(key)
    }

    fn take_opt_u64(&mut self, key: &'static str) -> Result<Option<u64>, CodecError> {
        self.unsigned(key)
    }

    fn take_time(&mut self, key: &'static str) -> Result<Option<DateTime<Utc>>, CodecError> {
        self.time(key)
    }

    fn take_opt_time(
        &mut self,
        key: &'static str,
    ) -> Result<Option<DateTime<Utc>>, CodecError> {
        self.time(key)
    }

    fn take_str_list(&mut self, key: &'static str) -> Result<Option<Vec<String>>, CodecError> {
        let wrong = || CodecError::WrongType {
            field: key,
            expected: "array of strings",
        };
        match self.get(key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string).ok_or_else(wrong))
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(wrong()),
        }
    }

    fn take_records<R: Record>(
        &mut self,
        key: &'static str,
    ) -> Result<Option<Vec<R>>, CodecError> {
        let wrong = || CodecError::WrongType {
            field: key,
            expected: "array of objects",
        };
        match self.get(key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    let map = item.as_object().ok_or_else(wrong)?;
                    R::read(&mut JsonSource::new(map))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(wrong()),
        }
    }
}
