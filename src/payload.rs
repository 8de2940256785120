use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

use binrw::BinReaderExt;
use uuid::Uuid;

use crate::nettrace::helpers::{read_guid, read_utf16_null};
use crate::trace::{EventFieldDefinition, FieldTypeCode};

/// One decoded payload field. One variant per decodable type code, so tests
/// can assert on the exact width an event declared.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Single(f32),
    Double(f64),
    String(Arc<str>),
    Guid(Uuid),
    Object(EventPayload),
    Array(Vec<PayloadValue>),
}

impl PayloadValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PayloadValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PayloadValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PayloadValue::Byte(v) => Some(u32::from(*v)),
            PayloadValue::UInt16(v) => Some(u32::from(*v)),
            PayloadValue::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PayloadValue::UInt64(v) => Some(*v),
            other => other.as_u32().map(u64::from),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PayloadValue::SByte(v) => Some(i64::from(*v)),
            PayloadValue::Int16(v) => Some(i64::from(*v)),
            PayloadValue::Int32(v) => Some(i64::from(*v)),
            PayloadValue::Int64(v) => Some(*v),
            other => other.as_u32().map(i64::from),
        }
    }
}

/// Field name/value pairs in schema order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPayload {
    fields: Vec<(Arc<str>, PayloadValue)>,
}

impl EventPayload {
    pub fn get(&self, name: &str) -> Option<&PayloadValue> {
        self.fields
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PayloadValue)> {
        self.fields.iter().map(|(n, v)| (n.as_ref(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_ref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug)]
pub(crate) enum PayloadError {
    /// The payload ended inside a field.
    Truncated,
    Unsupported { field: String, type_code: i32 },
}

impl From<binrw::Error> for PayloadError {
    fn from(_: binrw::Error) -> Self {
        // Payloads decode from bounded in-memory slices; the only error a
        // primitive read can produce there is running off the end.
        PayloadError::Truncated
    }
}

/// Append-only canonicalization table for strings. Provider names, event
/// and field names, and string payload values all share storage through it.
#[derive(Default)]
pub(crate) struct Interner {
    strings: HashSet<Arc<str>>,
}

impl Interner {
    pub(crate) fn intern(&mut self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return existing.clone();
        }
        let value: Arc<str> = Arc::from(s);
        self.strings.insert(value.clone());
        value
    }
}

/// Decodes an event payload by walking the schema fields in order.
pub(crate) fn read_event_payload(
    cursor: &mut Cursor<&[u8]>,
    fields: &[EventFieldDefinition],
    interner: &mut Interner,
) -> Result<EventPayload, PayloadError> {
    let mut decoded = Vec::with_capacity(fields.len());
    for field in fields {
        let value = read_field_value(cursor, field, interner)?;
        decoded.push((field.name.clone(), value));
    }
    Ok(EventPayload { fields: decoded })
}

fn read_field_value(
    cursor: &mut Cursor<&[u8]>,
    field: &EventFieldDefinition,
    interner: &mut Interner,
) -> Result<PayloadValue, PayloadError> {
    match field.type_code {
        FieldTypeCode::Object => {
            let sub = read_event_payload(cursor, &field.sub_fields, interner)?;
            Ok(PayloadValue::Object(sub))
        }
        FieldTypeCode::Array => {
            let element_type = field
                .array_element_type
                .ok_or_else(|| PayloadError::Unsupported {
                    field: field.name.to_string(),
                    type_code: FieldTypeCode::Array as i32,
                })?;
            if matches!(element_type, FieldTypeCode::Object | FieldTypeCode::Array) {
                return Err(PayloadError::Unsupported {
                    field: field.name.to_string(),
                    type_code: element_type as i32,
                });
            }
            let count: u16 = cursor.read_le()?;
            let mut values = Vec::with_capacity(usize::min(count.into(), 1024));
            for _ in 0..count {
                values.push(read_scalar(cursor, element_type, &field.name, interner)?);
            }
            Ok(PayloadValue::Array(values))
        }
        scalar => read_scalar(cursor, scalar, &field.name, interner),
    }
}

fn read_scalar(
    cursor: &mut Cursor<&[u8]>,
    type_code: FieldTypeCode,
    field_name: &str,
    interner: &mut Interner,
) -> Result<PayloadValue, PayloadError> {
    match type_code {
        // Booleans are stored as 32-bit values; zero is false.
        FieldTypeCode::Boolean => Ok(PayloadValue::Boolean(cursor.read_le::<i32>()? != 0)),
        FieldTypeCode::SByte => Ok(PayloadValue::SByte(cursor.read_le()?)),
        FieldTypeCode::Byte => Ok(PayloadValue::Byte(cursor.read_le()?)),
        FieldTypeCode::Int16 => Ok(PayloadValue::Int16(cursor.read_le()?)),
        FieldTypeCode::UInt16 => Ok(PayloadValue::UInt16(cursor.read_le()?)),
        FieldTypeCode::Int32 => Ok(PayloadValue::Int32(cursor.read_le()?)),
        FieldTypeCode::UInt32 => Ok(PayloadValue::UInt32(cursor.read_le()?)),
        FieldTypeCode::Int64 => Ok(PayloadValue::Int64(cursor.read_le()?)),
        FieldTypeCode::UInt64 => Ok(PayloadValue::UInt64(cursor.read_le()?)),
        // Floats are big-endian in this format.
        FieldTypeCode::Single => Ok(PayloadValue::Single(cursor.read_be()?)),
        FieldTypeCode::Double => Ok(PayloadValue::Double(cursor.read_be()?)),
        FieldTypeCode::String => {
            let s = read_utf16_null(cursor)?;
            Ok(PayloadValue::String(interner.intern(&s)))
        }
        FieldTypeCode::Guid => Ok(PayloadValue::Guid(read_guid(cursor)?)),
        unsupported => Err(PayloadError::Unsupported {
            field: field_name.to_string(),
            type_code: unsupported as i32,
        }),
    }
}
