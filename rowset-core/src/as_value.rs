use crate::{Collection, Error, Record, Result, Value};
use rust_decimal::{
    Decimal,
    prelude::{FromPrimitive, ToPrimitive},
};
use std::any;
use time::{Date, PrimitiveDateTime, Time};
use uuid::Uuid;

/// Conversion between native Rust types and the dynamically typed [`Value`]
/// representation that backs record fields.
///
/// - `as_empty_value` returns the typed-null variant for the type, used when
///   a field must exist with no payload yet.
/// - `as_value` wraps the native value; it must not be lossy.
/// - `try_from_value` accepts the canonical variant and, for numerics, other
///   widths under a range check; anything else is an error describing the
///   mismatch.
pub trait AsValue {
    fn as_empty_value() -> Value;
    fn as_value(self) -> Value;
    fn try_from_value(value: Value) -> Result<Self>
    where
        Self: Sized;
}

impl<T: AsValue> From<T> for Value {
    fn from(value: T) -> Self {
        value.as_value()
    }
}

fn mismatch<T>(value: &Value) -> Error {
    Error::msg(format!(
        "Cannot convert value {} into {}",
        value,
        any::type_name::<T>()
    ))
}

fn integer_of(value: &Value) -> Option<i128> {
    match value {
        Value::Int8(Some(v)) => Some(*v as i128),
        Value::Int16(Some(v)) => Some(*v as i128),
        Value::Int32(Some(v)) => Some(*v as i128),
        Value::Int64(Some(v)) => Some(*v as i128),
        Value::UInt8(Some(v)) => Some(*v as i128),
        Value::UInt16(Some(v)) => Some(*v as i128),
        Value::UInt32(Some(v)) => Some(*v as i128),
        Value::UInt64(Some(v)) => Some(*v as i128),
        _ => None,
    }
}

macro_rules! integer_as_value {
    ($type:ty, $variant:ident) => {
        impl AsValue for $type {
            fn as_empty_value() -> Value {
                Value::$variant(None)
            }
            fn as_value(self) -> Value {
                Value::$variant(Some(self))
            }
            fn try_from_value(value: Value) -> Result<Self> {
                let Some(integer) = integer_of(&value) else {
                    return Err(mismatch::<Self>(&value));
                };
                <$type>::try_from(integer).map_err(|_| {
                    Error::msg(format!(
                        "Value {}: out of range for {}",
                        value,
                        any::type_name::<Self>()
                    ))
                })
            }
        }
    };
}

integer_as_value!(i8, Int8);
integer_as_value!(i16, Int16);
integer_as_value!(i32, Int32);
integer_as_value!(i64, Int64);
integer_as_value!(u8, UInt8);
integer_as_value!(u16, UInt16);
integer_as_value!(u32, UInt32);
integer_as_value!(u64, UInt64);

impl AsValue for bool {
    fn as_empty_value() -> Value {
        Value::Boolean(None)
    }
    fn as_value(self) -> Value {
        Value::Boolean(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        if let Value::Boolean(Some(v)) = value {
            return Ok(v);
        }
        integer_of(&value)
            .map(|v| v != 0)
            .ok_or_else(|| mismatch::<Self>(&value))
    }
}

impl AsValue for f32 {
    fn as_empty_value() -> Value {
        Value::Float32(None)
    }
    fn as_value(self) -> Value {
        Value::Float32(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float32(Some(v)) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl AsValue for f64 {
    fn as_empty_value() -> Value {
        Value::Float64(None)
    }
    fn as_value(self) -> Value {
        Value::Float64(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Float64(Some(v)) => Ok(*v),
            Value::Float32(Some(v)) => Ok(*v as f64),
            Value::Decimal(Some(v)) => v.to_f64().ok_or_else(|| mismatch::<Self>(&value)),
            other => integer_of(other)
                .map(|v| v as f64)
                .ok_or_else(|| mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for Decimal {
    fn as_empty_value() -> Value {
        Value::Decimal(None)
    }
    fn as_value(self) -> Value {
        Value::Decimal(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Decimal(Some(v)) => Ok(*v),
            Value::Float64(Some(v)) => Decimal::from_f64(*v).ok_or_else(|| mismatch::<Self>(&value)),
            Value::Float32(Some(v)) => Decimal::from_f32(*v).ok_or_else(|| mismatch::<Self>(&value)),
            other => integer_of(other)
                .and_then(Decimal::from_i128)
                .ok_or_else(|| mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for String {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Varchar(Some(v)) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl AsValue for &str {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self.to_owned()))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        Err(mismatch::<Self>(&value))
    }
}

impl AsValue for Box<[u8]> {
    fn as_empty_value() -> Value {
        Value::Blob(None)
    }
    fn as_value(self) -> Value {
        Value::Blob(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(Some(v)) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl AsValue for Date {
    fn as_empty_value() -> Value {
        Value::Date(None)
    }
    fn as_value(self) -> Value {
        Value::Date(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Date(Some(v)) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl AsValue for Time {
    fn as_empty_value() -> Value {
        Value::Time(None)
    }
    fn as_value(self) -> Value {
        Value::Time(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Time(Some(v)) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl AsValue for PrimitiveDateTime {
    fn as_empty_value() -> Value {
        Value::Timestamp(None)
    }
    fn as_value(self) -> Value {
        Value::Timestamp(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(Some(v)) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl AsValue for Uuid {
    fn as_empty_value() -> Value {
        Value::Uuid(None)
    }
    fn as_value(self) -> Value {
        Value::Uuid(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(Some(v)) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl<T: AsValue> AsValue for Option<T> {
    fn as_empty_value() -> Value {
        T::as_empty_value()
    }
    fn as_value(self) -> Value {
        match self {
            Some(v) => v.as_value(),
            None => T::as_empty_value(),
        }
    }
    fn try_from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            return Ok(None);
        }
        T::try_from_value(value).map(Some)
    }
}

impl<T: AsValue> AsValue for Vec<T> {
    fn as_empty_value() -> Value {
        Value::List(Vec::new())
    }
    fn as_value(self) -> Value {
        Value::List(self.into_iter().map(AsValue::as_value).collect())
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(values) => values.into_iter().map(T::try_from_value).collect(),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl AsValue for Record {
    fn as_empty_value() -> Value {
        Value::Record(Record::new())
    }
    fn as_value(self) -> Value {
        Value::Record(self)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Record(record) => Ok(record),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl AsValue for Collection {
    fn as_empty_value() -> Value {
        Value::Null
    }
    fn as_value(self) -> Value {
        Value::Collection(Box::new(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Collection(collection) => Ok(*collection),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}
