//! Scalar values that cross the wire in parameters and result rows.
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single nullable cell or parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

/// The type a caller asks a value to be read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Decimal,
    String,
    Bytes,
    Date,
    Time,
    Timestamp,
}

impl ValueType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Decimal => "decimal",
            ValueType::String => "string",
            ValueType::Bytes => "bytes",
            ValueType::Date => "date",
            ValueType::Time => "time",
            ValueType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot read {from} value '{text}' as {to}")]
pub struct CastError {
    pub from: &'static str,
    pub to: ValueType,
    pub text: String,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the variant, used in error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Textual form of the value, `None` for null and for non UTF-8 bytes.
    pub fn to_text(&self) -> Option<String> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::String(v) => v.clone(),
            Value::Bytes(v) => return String::from_utf8(v.clone()).ok(),
            Value::Date(v) => v.format(DATE_FORMAT).to_string(),
            Value::Time(v) => v.format(TIME_FORMAT).to_string(),
            Value::Timestamp(v) => v.format(TIMESTAMP_FORMAT).to_string(),
        })
    }

    /// Convert to the requested type.
    ///
    /// Null casts to null for every type. Strings are parsed, numeric values
    /// widen or narrow where the conversion is exact enough to be useful.
    pub fn cast(&self, to: ValueType) -> Result<Value, CastError> {
        let fail = || CastError {
            from: self.type_name(),
            to,
            text: self.to_text().unwrap_or_default(),
        };

        let out = match (self, to) {
            (Value::Null, _) => Value::Null,

            (Value::Bool(v), ValueType::Bool) => Value::Bool(*v),
            (Value::Bool(v), ValueType::Int) => Value::Int(*v as i64),
            (Value::Int(v), ValueType::Bool) => Value::Bool(*v != 0),
            (Value::String(s), ValueType::Bool) => Value::Bool(parse_bool(s).ok_or_else(fail)?),

            (Value::Int(v), ValueType::Int) => Value::Int(*v),
            (Value::Float(v), ValueType::Int) => {
                if v.is_finite() && v.fract() == 0.0 {
                    Value::Int(*v as i64)
                } else {
                    return Err(fail());
                }
            }
            (Value::Decimal(v), ValueType::Int) => Value::Int(v.to_i64().ok_or_else(fail)?),
            (Value::String(s), ValueType::Int) => {
                Value::Int(s.trim().parse::<i64>().map_err(|_| fail())?)
            }

            (Value::Int(v), ValueType::Float) => Value::Float(*v as f64),
            (Value::Float(v), ValueType::Float) => Value::Float(*v),
            (Value::Decimal(v), ValueType::Float) => Value::Float(v.to_f64().ok_or_else(fail)?),
            (Value::String(s), ValueType::Float) => {
                Value::Float(s.trim().parse::<f64>().map_err(|_| fail())?)
            }

            (Value::Int(v), ValueType::Decimal) => Value::Decimal(Decimal::from(*v)),
            (Value::Float(v), ValueType::Decimal) => {
                Value::Decimal(Decimal::from_f64(*v).ok_or_else(fail)?)
            }
            (Value::Decimal(v), ValueType::Decimal) => Value::Decimal(*v),
            (Value::String(s), ValueType::Decimal) => Value::Decimal(
                Decimal::from_str(s.trim())
                    .or_else(|_| Decimal::from_scientific(s.trim()))
                    .map_err(|_| fail())?,
            ),

            (Value::Bytes(b), ValueType::Bytes) => Value::Bytes(b.clone()),
            (Value::String(s), ValueType::Bytes) => Value::Bytes(s.as_bytes().to_vec()),

            (Value::Date(d), ValueType::Date) => Value::Date(*d),
            (Value::Timestamp(ts), ValueType::Date) => Value::Date(ts.date()),
            (Value::String(s), ValueType::Date) => {
                Value::Date(parse_date(s.trim()).ok_or_else(fail)?)
            }

            (Value::Time(t), ValueType::Time) => Value::Time(*t),
            (Value::Timestamp(ts), ValueType::Time) => Value::Time(ts.time()),
            (Value::String(s), ValueType::Time) => Value::Time(
                NaiveTime::parse_from_str(s.trim(), TIME_FORMAT).map_err(|_| fail())?,
            ),

            (Value::Timestamp(ts), ValueType::Timestamp) => Value::Timestamp(*ts),
            (Value::Date(d), ValueType::Timestamp) => {
                Value::Timestamp(d.and_time(NaiveTime::MIN))
            }
            (Value::String(s), ValueType::Timestamp) => {
                Value::Timestamp(parse_timestamp(s.trim()).ok_or_else(fail)?)
            }

            (v, ValueType::String) => Value::String(v.to_text().ok_or_else(fail)?),
            (Value::Bytes(b), other) => {
                let s = String::from_utf8(b.clone()).map_err(|_| fail())?;
                return Value::String(s).cast(other);
            }

            _ => return Err(fail()),
        };

        Ok(out)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .or_else(|| parse_timestamp(s).map(|ts| ts.date()))
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{s}"),
                Err(_) => {
                    write!(f, "\\x")?;
                    for byte in b {
                        write!(f, "{byte:02x}")?;
                    }
                    Ok(())
                }
            },
            other => match other.to_text() {
                Some(s) => write!(f, "{s}"),
                None => write!(f, "NULL"),
            },
        }
    }
}

macro_rules! impl_from {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v.into())
            }
        }
    };
}

impl_from!(bool, Bool);
impl_from!(i64, Int);
impl_from!(i32, Int);
impl_from!(i16, Int);
impl_from!(u32, Int);
impl_from!(f64, Float);
impl_from!(f32, Float);
impl_from!(Decimal, Decimal);
impl_from!(String, String);
impl_from!(&str, String);
impl_from!(Vec<u8>, Bytes);
impl_from!(&[u8], Bytes);
impl_from!(NaiveDate, Date);
impl_from!(NaiveTime, Time);
impl_from!(NaiveDateTime, Timestamp);

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
