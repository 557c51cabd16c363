//! Record decoding.
//!
//! A decoder turns a fetched record into the tuple handed downstream. It
//! yields at most one tuple per record; a record it rejects is treated as
//! resolved and skipped.

use bytes::Bytes;
use logspout_core::FetchedRecord;

/// One value of a tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// Raw bytes.
    Bytes(Bytes),
    /// UTF-8 text.
    Text(String),
    /// Absent value.
    Null,
}

impl Field {
    /// Returns the text if this is a text field.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Ordered values emitted for one record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tuple {
    fields: Vec<Field>,
}

impl Tuple {
    /// Creates a tuple.
    #[must_use]
    pub const fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Returns the fields.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the field at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the tuple has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Decodes fetched records into tuples.
pub trait RecordDecoder: Send + Sync {
    /// Names of the fields every produced tuple carries.
    fn output_fields(&self) -> &'static [&'static str];

    /// Decodes one record. `None` skips it.
    fn decode(&self, record: &FetchedRecord) -> Option<Tuple>;
}

/// Emits the record value as raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl RecordDecoder for RawDecoder {
    fn output_fields(&self) -> &'static [&'static str] {
        &["bytes"]
    }

    fn decode(&self, record: &FetchedRecord) -> Option<Tuple> {
        Some(Tuple::new(vec![Field::Bytes(record.value.clone())]))
    }
}

/// Emits the record value as UTF-8 text; records that are not valid UTF-8
/// are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringDecoder;

impl RecordDecoder for StringDecoder {
    fn output_fields(&self) -> &'static [&'static str] {
        &["str"]
    }

    fn decode(&self, record: &FetchedRecord) -> Option<Tuple> {
        let text = std::str::from_utf8(&record.value).ok()?;
        Some(Tuple::new(vec![Field::Text(text.to_string())]))
    }
}

/// Emits `(key, value)` as text. A missing key becomes [`Field::Null`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueDecoder;

impl RecordDecoder for KeyValueDecoder {
    fn output_fields(&self) -> &'static [&'static str] {
        &["key", "value"]
    }

    fn decode(&self, record: &FetchedRecord) -> Option<Tuple> {
        let key = match &record.key {
            Some(key) => Field::Text(std::str::from_utf8(key).ok()?.to_string()),
            None => Field::Null,
        };
        let value = std::str::from_utf8(&record.value).ok()?.to_string();
        Some(Tuple::new(vec![key, Field::Text(value)]))
    }
}
