use crate::{Collection, Record};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use std::{
    cmp::Ordering,
    fmt::{self, Display},
    mem,
};
use time::{Date, PrimitiveDateTime, Time};
use uuid::Uuid;

/// Dynamically typed field value stored inside a [`Record`].
///
/// Scalar variants carry `Option` payloads; a `None` payload is a typed
/// null and compares equal to `Null` for ordering purposes. `Record` and
/// `Collection` make the value space recursive: a field can hold a nested
/// record or a whole nested collection.
#[derive(Default, Debug, Clone)]
pub enum Value {
    #[default]
    Null,
    Boolean(Option<bool>),
    Int8(Option<i8>),
    Int16(Option<i16>),
    Int32(Option<i32>),
    Int64(Option<i64>),
    UInt8(Option<u8>),
    UInt16(Option<u16>),
    UInt32(Option<u32>),
    UInt64(Option<u64>),
    Float32(Option<f32>),
    Float64(Option<f64>),
    Decimal(Option<Decimal>),
    Varchar(Option<String>),
    Blob(Option<Box<[u8]>>),
    Date(Option<Date>),
    Time(Option<Time>),
    Timestamp(Option<PrimitiveDateTime>),
    Uuid(Option<Uuid>),
    List(Vec<Value>),
    Record(Record),
    Collection(Box<Collection>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Boolean(l), Self::Boolean(r)) => l == r,
            (Self::Int8(l), Self::Int8(r)) => l == r,
            (Self::Int16(l), Self::Int16(r)) => l == r,
            (Self::Int32(l), Self::Int32(r)) => l == r,
            (Self::Int64(l), Self::Int64(r)) => l == r,
            (Self::UInt8(l), Self::UInt8(r)) => l == r,
            (Self::UInt16(l), Self::UInt16(r)) => l == r,
            (Self::UInt32(l), Self::UInt32(r)) => l == r,
            (Self::UInt64(l), Self::UInt64(r)) => l == r,
            (Self::Float32(l), Self::Float32(r)) => l == r,
            (Self::Float64(l), Self::Float64(r)) => l == r,
            (Self::Decimal(l), Self::Decimal(r)) => l == r,
            (Self::Varchar(l), Self::Varchar(r)) => l == r,
            (Self::Blob(l), Self::Blob(r)) => l == r,
            (Self::Date(l), Self::Date(r)) => l == r,
            (Self::Time(l), Self::Time(r)) => l == r,
            (Self::Timestamp(l), Self::Timestamp(r)) => l == r,
            (Self::Uuid(l), Self::Uuid(r)) => l == r,
            (Self::List(l), Self::List(r)) => l == r,
            (Self::Record(l), Self::Record(r)) => l == r,
            (Self::Collection(l), Self::Collection(r)) => l == r,
            _ => mem::discriminant(self) == mem::discriminant(other),
        }
    }
}

/// Internal numeric view used by [`Value::compare`].
enum Numeric {
    Int(i128),
    Float(f64),
}

impl Value {
    pub fn same_type(&self, other: &Self) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }

    /// A `Null` or a scalar variant with a `None` payload.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Boolean(v) => v.is_none(),
            Self::Int8(v) => v.is_none(),
            Self::Int16(v) => v.is_none(),
            Self::Int32(v) => v.is_none(),
            Self::Int64(v) => v.is_none(),
            Self::UInt8(v) => v.is_none(),
            Self::UInt16(v) => v.is_none(),
            Self::UInt32(v) => v.is_none(),
            Self::UInt64(v) => v.is_none(),
            Self::Float32(v) => v.is_none(),
            Self::Float64(v) => v.is_none(),
            Self::Decimal(v) => v.is_none(),
            Self::Varchar(v) => v.is_none(),
            Self::Blob(v) => v.is_none(),
            Self::Date(v) => v.is_none(),
            Self::Time(v) => v.is_none(),
            Self::Timestamp(v) => v.is_none(),
            Self::Uuid(v) => v.is_none(),
            Self::List(..) | Self::Record(..) | Self::Collection(..) => false,
        }
    }

    fn numeric(&self) -> Option<Numeric> {
        Some(match self {
            Self::Int8(Some(v)) => Numeric::Int(*v as i128),
            Self::Int16(Some(v)) => Numeric::Int(*v as i128),
            Self::Int32(Some(v)) => Numeric::Int(*v as i128),
            Self::Int64(Some(v)) => Numeric::Int(*v as i128),
            Self::UInt8(Some(v)) => Numeric::Int(*v as i128),
            Self::UInt16(Some(v)) => Numeric::Int(*v as i128),
            Self::UInt32(Some(v)) => Numeric::Int(*v as i128),
            Self::UInt64(Some(v)) => Numeric::Int(*v as i128),
            Self::Float32(Some(v)) => Numeric::Float(*v as f64),
            Self::Float64(Some(v)) => Numeric::Float(*v),
            Self::Decimal(Some(v)) => Numeric::Float(v.to_f64().unwrap_or(f64::NAN)),
            _ => return None,
        })
    }

    /// Ordering class: values of different classes order by class, values of
    /// the same class by payload. Nulls (typed or not) form the lowest class.
    fn rank(&self) -> u8 {
        if self.is_null() {
            return 0;
        }
        match self {
            Self::Boolean(..) => 1,
            Self::Int8(..)
            | Self::Int16(..)
            | Self::Int32(..)
            | Self::Int64(..)
            | Self::UInt8(..)
            | Self::UInt16(..)
            | Self::UInt32(..)
            | Self::UInt64(..)
            | Self::Float32(..)
            | Self::Float64(..)
            | Self::Decimal(..) => 2,
            Self::Varchar(..) => 3,
            Self::Blob(..) => 4,
            Self::Date(..) => 5,
            Self::Time(..) => 6,
            Self::Timestamp(..) => 7,
            Self::Uuid(..) => 8,
            Self::List(..) => 9,
            Self::Record(..) => 10,
            Self::Collection(..) => 11,
            Self::Null => 0,
        }
    }

    /// Canonical total ordering across the whole value space, used by
    /// [`Collection::sort`](crate::Collection::sort). Numerics compare
    /// across widths (integers exactly, anything involving a float or a
    /// decimal through `f64::total_cmp`); everything else compares within
    /// its class and across classes by [`Value::rank`].
    pub fn compare(&self, other: &Self) -> Ordering {
        let (lr, rr) = (self.rank(), other.rank());
        if lr != rr {
            return lr.cmp(&rr);
        }
        match (self, other) {
            (l, r) if l.is_null() && r.is_null() => Ordering::Equal,
            (Self::Boolean(Some(l)), Self::Boolean(Some(r))) => l.cmp(r),
            (Self::Varchar(Some(l)), Self::Varchar(Some(r))) => l.cmp(r),
            (Self::Blob(Some(l)), Self::Blob(Some(r))) => l.cmp(r),
            (Self::Date(Some(l)), Self::Date(Some(r))) => l.cmp(r),
            (Self::Time(Some(l)), Self::Time(Some(r))) => l.cmp(r),
            (Self::Timestamp(Some(l)), Self::Timestamp(Some(r))) => l.cmp(r),
            (Self::Uuid(Some(l)), Self::Uuid(Some(r))) => l.cmp(r),
            (Self::List(l), Self::List(r)) => {
                for (lv, rv) in l.iter().zip(r.iter()) {
                    match lv.compare(rv) {
                        Ordering::Equal => continue,
                        unequal => return unequal,
                    }
                }
                l.len().cmp(&r.len())
            }
            (Self::Record(l), Self::Record(r)) => {
                for ((lf, lv), (rf, rv)) in l.iter().zip(r.iter()) {
                    match lf.cmp(rf).then_with(|| lv.compare(rv)) {
                        Ordering::Equal => continue,
                        unequal => return unequal,
                    }
                }
                l.len().cmp(&r.len())
            }
            (Self::Collection(l), Self::Collection(r)) => l.len().cmp(&r.len()),
            (l, r) => match (l.numeric(), r.numeric()) {
                (Some(Numeric::Int(a)), Some(Numeric::Int(b))) => a.cmp(&b),
                (Some(a), Some(b)) => a.as_f64().total_cmp(&b.as_f64()),
                _ => Ordering::Equal,
            },
        }
    }
}

impl Numeric {
    fn as_f64(&self) -> f64 {
        match self {
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "NULL");
        }
        match self {
            Self::Boolean(Some(v)) => write!(f, "{v}"),
            Self::Int8(Some(v)) => write!(f, "{v}"),
            Self::Int16(Some(v)) => write!(f, "{v}"),
            Self::Int32(Some(v)) => write!(f, "{v}"),
            Self::Int64(Some(v)) => write!(f, "{v}"),
            Self::UInt8(Some(v)) => write!(f, "{v}"),
            Self::UInt16(Some(v)) => write!(f, "{v}"),
            Self::UInt32(Some(v)) => write!(f, "{v}"),
            Self::UInt64(Some(v)) => write!(f, "{v}"),
            Self::Float32(Some(v)) => write!(f, "{v}"),
            Self::Float64(Some(v)) => write!(f, "{v}"),
            Self::Decimal(Some(v)) => write!(f, "{v}"),
            Self::Varchar(Some(v)) => write!(f, "{v}"),
            Self::Blob(Some(v)) => write!(f, "blob[{} bytes]", v.len()),
            Self::Date(Some(v)) => write!(f, "{v:?}"),
            Self::Time(Some(v)) => write!(f, "{v:?}"),
            Self::Timestamp(Some(v)) => write!(f, "{v:?}"),
            Self::Uuid(Some(v)) => write!(f, "{v}"),
            Self::List(values) => write!(f, "list[{} values]", values.len()),
            Self::Record(record) => write!(f, "record[{} fields]", record.len()),
            Self::Collection(collection) => write!(f, "collection[{} records]", collection.len()),
            _ => write!(f, "NULL"),
        }
    }
}
