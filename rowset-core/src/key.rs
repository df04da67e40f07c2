use crate::{DataError, Result, Value};
use std::fmt::{self, Display};
use uuid::Uuid;
use xxhash_rust::xxh64::xxh64;

/// Key of a collection entry: an automatically assigned positional integer,
/// a scalar taken from a primary field, or a synthetic hash of an ordered
/// component tuple when a composite primary is declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Int(i64),
    Text(String),
    Uuid(Uuid),
    /// Synthetic key: xxh64 over the canonical encoding of the component
    /// tuple. Deterministic across runs and platforms.
    Composite(u64),
}

impl Key {
    /// Derives a key from a scalar field value. Values that cannot act as a
    /// key (nulls, floats, nested structures) are a [`DataError`].
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Err(DataError::new("cannot key records by a null value").into());
        }
        match value {
            Value::Int8(Some(v)) => Ok(Self::Int(*v as i64)),
            Value::Int16(Some(v)) => Ok(Self::Int(*v as i64)),
            Value::Int32(Some(v)) => Ok(Self::Int(*v as i64)),
            Value::Int64(Some(v)) => Ok(Self::Int(*v)),
            Value::UInt8(Some(v)) => Ok(Self::Int(*v as i64)),
            Value::UInt16(Some(v)) => Ok(Self::Int(*v as i64)),
            Value::UInt32(Some(v)) => Ok(Self::Int(*v as i64)),
            Value::UInt64(Some(v)) => i64::try_from(*v)
                .map(Self::Int)
                .map_err(|_| DataError::new(format!("key value {v} exceeds the integer key range")).into()),
            Value::Varchar(Some(v)) => Ok(Self::Text(v.clone())),
            Value::Uuid(Some(v)) => Ok(Self::Uuid(*v)),
            other => Err(DataError::new(format!("cannot key records by value {other}")).into()),
        }
    }

    /// Synthesizes a composite key from the ordered component values.
    /// The canonical encoding is order-stable and self-delimiting, so equal
    /// tuples always hash equal and permuted tuples do not.
    pub fn composite<'a>(components: impl IntoIterator<Item = &'a Value>) -> Result<Self> {
        let mut encoded = Vec::with_capacity(64);
        for component in components {
            encode_component(&mut encoded, component)?;
        }
        Ok(Self::Composite(xxh64(&encoded, 0)))
    }
}

fn push_integer(buffer: &mut Vec<u8>, value: i128) {
    let mut digits = itoa::Buffer::new();
    buffer.extend_from_slice(digits.format(value).as_bytes());
}

fn push_float(buffer: &mut Vec<u8>, value: f64) {
    let mut digits = ryu::Buffer::new();
    buffer.extend_from_slice(digits.format(value).as_bytes());
}

/// One component: a type tag, a canonical body, a terminator. Variable
/// length bodies (text, blobs) are length prefixed so that adjacent
/// components can never re-align into another tuple's encoding.
fn encode_component(buffer: &mut Vec<u8>, value: &Value) -> Result<()> {
    if value.is_null() {
        buffer.push(b'n');
        buffer.push(0x1f);
        return Ok(());
    }
    match value {
        Value::Boolean(Some(v)) => {
            buffer.push(b'b');
            buffer.push(*v as u8);
        }
        Value::Int8(Some(v)) => {
            buffer.push(b'i');
            push_integer(buffer, *v as i128);
        }
        Value::Int16(Some(v)) => {
            buffer.push(b'i');
            push_integer(buffer, *v as i128);
        }
        Value::Int32(Some(v)) => {
            buffer.push(b'i');
            push_integer(buffer, *v as i128);
        }
        Value::Int64(Some(v)) => {
            buffer.push(b'i');
            push_integer(buffer, *v as i128);
        }
        Value::UInt8(Some(v)) => {
            buffer.push(b'i');
            push_integer(buffer, *v as i128);
        }
        Value::UInt16(Some(v)) => {
            buffer.push(b'i');
            push_integer(buffer, *v as i128);
        }
        Value::UInt32(Some(v)) => {
            buffer.push(b'i');
            push_integer(buffer, *v as i128);
        }
        Value::UInt64(Some(v)) => {
            buffer.push(b'i');
            push_integer(buffer, *v as i128);
        }
        Value::Float32(Some(v)) => {
            buffer.push(b'f');
            push_float(buffer, *v as f64);
        }
        Value::Float64(Some(v)) => {
            buffer.push(b'f');
            push_float(buffer, *v);
        }
        Value::Decimal(Some(v)) => {
            buffer.push(b'd');
            buffer.extend_from_slice(v.normalize().to_string().as_bytes());
        }
        Value::Varchar(Some(v)) => {
            buffer.push(b's');
            push_integer(buffer, v.len() as i128);
            buffer.push(b':');
            buffer.extend_from_slice(v.as_bytes());
        }
        Value::Blob(Some(v)) => {
            buffer.push(b'x');
            push_integer(buffer, v.len() as i128);
            buffer.push(b':');
            buffer.extend_from_slice(v);
        }
        Value::Date(Some(v)) => {
            buffer.push(b't');
            push_integer(buffer, v.year() as i128);
            buffer.push(b'-');
            push_integer(buffer, v.ordinal() as i128);
        }
        Value::Time(Some(v)) => {
            buffer.push(b't');
            push_integer(buffer, v.hour() as i128);
            buffer.push(b':');
            push_integer(buffer, v.minute() as i128);
            buffer.push(b':');
            push_integer(buffer, v.second() as i128);
            buffer.push(b'.');
            push_integer(buffer, v.nanosecond() as i128);
        }
        Value::Timestamp(Some(v)) => {
            encode_component(buffer, &Value::Date(Some(v.date())))?;
            encode_component(buffer, &Value::Time(Some(v.time())))?;
        }
        Value::Uuid(Some(v)) => {
            buffer.push(b'u');
            buffer.extend_from_slice(v.as_bytes());
        }
        other => {
            return Err(DataError::new(format!(
                "value {other} cannot participate in a composite key"
            ))
            .into());
        }
    }
    buffer.push(0x1f);
    Ok(())
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Composite(v) => write!(f, "{v:016x}"),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Uuid> for Key {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}
