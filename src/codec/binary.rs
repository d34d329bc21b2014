use super::{CodecError, FieldSink, FieldSource, Record};
use chrono::{DateTime, Utc};

/// First byte of every binary record.
pub const BINARY_FORMAT_VERSION: u8 = 1;

const ABSENT: u8 = 0;
const PRESENT: u8 = 1;

/// Little-endian, field-by-field writer. Keys are ignored: position is identity.
///
/// Strings are `u32` length + UTF-8 bytes, integers are fixed width,
/// booleans and option tags are one byte, timestamps are `i64` seconds +
/// `u32` nanoseconds, lists are a `u32` count followed by the items.
pub struct BinarySink {
    buf: Vec<u8>,
}

impl BinarySink {
    pub fn new() -> Self {
        Self {
            buf: vec![BINARY_FORMAT_VERSION],
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn raw_str(&mut self, value: &str) {
        self.len(value.len());
        self.buf.extend_from_slice(value.as_bytes());
    }

    fn len(&mut self, len: usize) {
        // Lengths above u32::MAX are not representable on-device anyway.
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        self.buf.extend_from_slice(&len.to_le_bytes());
    }

    fn raw_time(&mut self, value: DateTime<Utc>) {
        self.buf.extend_from_slice(&value.timestamp().to_le_bytes());
        self.buf
            .extend_from_slice(&value.timestamp_subsec_nanos().to_le_bytes());
    }
}

impl Default for BinarySink {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldSink for BinarySink {
    fn put_str(&mut self, _key: &'static str, value: &str) {
        self.raw_str(value);
    }

    fn put_opt_str(&mut self, _key: &'static str, value: Option<&str>) {
        match value {
            Some(v) => {
                self.buf.push(PRESENT);
                self.raw_str(v);
            }
            None => self.buf.push(ABSENT),
        }
    }

    fn put_bool(&mut self, _key: &'static str, value: bool) {
        self.buf.push(u8::from(value));
    }

    fn put_u64(&mut self, _key: &'static str, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_opt_u64(&mut self, _key: &'static str, value: Option<u64>) {
        match value {
            Some(v) => {
                self.buf.push(PRESENT);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            None => self.buf.push(ABSENT),
        }
    }

    fn put_time(&mut self, _key: &'static str, value: DateTime<Utc>) {
        self.raw_time(value);
    }

    fn put_opt_time(&mut self, _key: &'static str, value: Option<DateTime<Utc>>) {
        match value {
            Some(v) => {
                self.buf.push(PRESENT);
                self.raw_time(v);
            }
            None => self.buf.push(ABSENT),
        }
    }

    fn put_str_list(&mut self, _key: &'static str, values: &[String]) {
        self.len(values.len());
        for value in values {
            self.raw_str(value);
        }
    }

    fn put_records<R: Record>(&mut self, _key: &'static str, records: &[R]) {
        self.len(records.len());
        for record in records {
            record.write(self);
        }
    }
}

/// Cursor over a binary record. Must be driven in exactly the write order.
pub struct BinarySource<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BinarySource<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let (&version, rest) = bytes
            .split_first()
            .ok_or(CodecError::UnexpectedEof("format version"))?;
        if version != BINARY_FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        Ok(Self {
            bytes: rest,
            pos: 0,
        })
    }

    /// Fails if any input is left unread.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.bytes.len() - self.pos {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }

    fn take<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CodecError> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEof(field))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn byte(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.take::<1>(field)?[0])
    }

    fn len(&mut self, field: &'static str) -> Result<usize, CodecError> {
        Ok(u32::from_le_bytes(self.take::<4>(field)?) as usize)
    }

    fn present(&mut self, field: &'static str) -> Result<bool, CodecError> {
        match self.byte(field)? {
            ABSENT => Ok(false),
            PRESENT => Ok(true),
            tag => Err(CodecError::InvalidTag { field, tag }),
        }
    }

    fn raw_str(&mut self, field: &'static str) -> Result<String, CodecError> {
        let len = self.len(field)?;
        let end = self.pos + len;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEof(field))?;
        self.pos = end;
        String::from_utf8(slice.to_vec()).map_err(|_| CodecError::InvalidUtf8(field))
    }

    fn raw_u64(&mut self, field: &'static str) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take::<8>(field)?))
    }

    fn raw_time(&mut self, field: &'static str) -> Result<DateTime<Utc>, CodecError> {
        let secs = i64::from_le_bytes(self.take::<8>(field)?);
        let nanos = u32::from_le_bytes(self.take::<4>(field)?);
        DateTime::from_timestamp(secs, nanos).ok_or_else(|| CodecError::InvalidTimestamp {
            field,
            value: format!("{secs}s+{nanos}ns"),
        })
    }
}

impl FieldSource for BinarySource<'_> {
    fn take_str(&mut self, key: &'static str) -> Result<Option<String>, CodecError> {
        self.raw_str(key).map(Some)
    }

    fn take_opt_str(&mut self, key: &'static str) -> Result<Option<String>, CodecError> {
        if self.present(key)? {
            self.raw_str(key).map(Some)
        } else {
            Ok(None)
        }
    }

    fn take_bool(&mut self, key: &'static str) -> Result<Option<bool>, CodecError> {
        match self.byte(key)? {
            0 => Ok(Some(false)),
            1 => Ok(Some(true)),
            tag => Err(CodecError::InvalidTag { field: key, tag }),
        }
    }

    fn take_u64(&mut self, key: &'static str) -> Result<Option<u64>, CodecError> {
        self.raw_u64(key).map(Some)
    }

    fn take_opt_u64(&mut self, key: &'static str) -> Result<Option<u64>, CodecError> {
        if self.present(key)? {
            self.raw_u64(key).map(Some)
        } else {
            Ok(None)
        }
    }

    fn take_time(&mut self, key: &'static str) -> Result<Option<DateTime<Utc>>, CodecError> {
        self.raw_time(key).map(Some)
    }

    fn take_opt_time(
        &mut self,
        key: &'static str,
    ) -> Result<Option<DateTime<Utc>>, CodecError> {
        if self.present(key)? {
            self.raw_time(key).map(Some)
        } else {
            Ok(None)
        }
    }

    fn take_str_list(&mut self, key: &'static str) -> Result<Option<Vec<String>>, CodecError> {
        let count = self.len(key)?;
        (0..count)
            .map(|_| self.raw_str(key))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn take_records<R: Record>(
        &mut self,
        key: &'static str,
    ) -> Result<Option<Vec<R>>, CodecError> {
        let count = self.len(key)?;
        let mut records = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            records.push(R::read(self)?);
        }
        Ok(Some(records))
    }
}
