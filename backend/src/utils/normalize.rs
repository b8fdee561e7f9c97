//! JSON-safe normalization of captured field values.
//!
//! Every value that ends up in an audit payload passes through [`normalize`].
//! The set of shapes a field can take is closed ([`AuditValue`]); anything the
//! capture layer does not understand is turned into [`AuditValue::Opaque`]
//! when it is constructed, so normalization itself never fails.

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Number, Value};
use std::fmt::Debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum AuditValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    /// An enumerated value, reduced to its underlying scalar.
    Enum(Box<AuditValue>),
    Timestamp(DateTime<FixedOffset>),
    NaiveTimestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Decimal(BigDecimal),
    Uuid(Uuid),
    Sequence(Vec<AuditValue>),
    Mapping(Vec<(AuditValue, AuditValue)>),
    /// Debug rendering of a value with no better representation.
    Opaque(String),
}

/// Enums that should be audited by their stored value rather than their
/// Rust variant name.
pub trait AuditEnum {
    fn audit_value(&self) -> AuditValue;
}

impl AuditValue {
    pub fn opaque<T: Debug + ?Sized>(value: &T) -> Self {
        AuditValue::Opaque(format!("{value:?}"))
    }

    pub fn tagged<E: AuditEnum + ?Sized>(value: &E) -> Self {
        AuditValue::Enum(Box::new(value.audit_value()))
    }

    pub fn mapping<K, V, I>(entries: I) -> Self
    where
        K: Into<AuditValue>,
        V: Into<AuditValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        AuditValue::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AuditValue::Null)
    }

    /// Identity-style rendering used for `target_id`: text verbatim, other
    /// values through their normalized JSON text. Null and empty text yield
    /// `None`.
    pub fn as_identity(&self) -> Option<String> {
        match normalize(self) {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }
}

pub fn normalize(value: &AuditValue) -> Value {
    match value {
        AuditValue::Null => Value::Null,
        AuditValue::Bool(b) => Value::Bool(*b),
        AuditValue::Int(i) => Value::Number((*i).into()),
        AuditValue::UInt(u) => Value::Number((*u).into()),
        AuditValue::Float(f) => Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        AuditValue::Text(s) => Value::String(s.clone()),
        AuditValue::Enum(inner) => normalize(inner),
        AuditValue::Timestamp(ts) => Value::String(
            ts.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::AutoSi, false),
        ),
        AuditValue::NaiveTimestamp(ts) => Value::String(
            Utc.from_utc_datetime(ts)
                .to_rfc3339_opts(SecondsFormat::AutoSi, false),
        ),
        AuditValue::Date(d) => Value::String(d.to_string()),
        AuditValue::Time(t) => Value::String(t.to_string()),
        AuditValue::Decimal(d) => Value::String(d.to_string()),
        AuditValue::Uuid(u) => Value::String(u.hyphenated().to_string()),
        AuditValue::Sequence(items) => Value::Array(items.iter().map(normalize).collect()),
        AuditValue::Mapping(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, val) in entries {
                map.insert(mapping_key(key), normalize(val));
            }
            Value::Object(map)
        }
        AuditValue::Opaque(repr) => Value::String(repr.clone()),
    }
}

fn mapping_key(key: &AuditValue) -> String {
    match normalize(key) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl From<&str> for AuditValue {
    fn from(value: &str) -> Self {
        AuditValue::Text(value.to_string())
    }
}

impl From<String> for AuditValue {
    fn from(value: String) -> Self {
        AuditValue::Text(value)
    }
}

impl From<&String> for AuditValue {
    fn from(value: &String) -> Self {
        AuditValue::Text(value.clone())
    }
}

impl From<bool> for AuditValue {
    fn from(value: bool) -> Self {
        AuditValue::Bool(value)
    }
}

macro_rules! int_audit_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for AuditValue {
                fn from(value: $ty) -> Self {
                    AuditValue::Int(i64::from(value))
                }
            }
        )*
    };
}

int_audit_value!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for AuditValue {
    fn from(value: u64) -> Self {
        i64::try_from(value)
            .map(AuditValue::Int)
            .unwrap_or(AuditValue::UInt(value))
    }
}

impl From<f32> for AuditValue {
    fn from(value: f32) -> Self {
        AuditValue::Float(f64::from(value))
    }
}

impl From<f64> for AuditValue {
    fn from(value: f64) -> Self {
        AuditValue::Float(value)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for AuditValue {
    fn from(value: DateTime<Tz>) -> Self {
        AuditValue::Timestamp(value.fixed_offset())
    }
}

impl From<NaiveDateTime> for AuditValue {
    fn from(value: NaiveDateTime) -> Self {
        AuditValue::NaiveTimestamp(value)
    }
}

impl From<NaiveDate> for AuditValue {
    fn from(value: NaiveDate) -> Self {
        AuditValue::Date(value)
    }
}

impl From<NaiveTime> for AuditValue {
    fn from(value: NaiveTime) -> Self {
        AuditValue::Time(value)
    }
}

impl From<BigDecimal> for AuditValue {
    fn from(value: BigDecimal) -> Self {
        AuditValue::Decimal(value)
    }
}

impl From<Uuid> for AuditValue {
    fn from(value: Uuid) -> Self {
        AuditValue::Uuid(value)
    }
}

impl<T: Into<AuditValue>> From<Option<T>> for AuditValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(AuditValue::Null)
    }
}

impl<T: Into<AuditValue>> From<Vec<T>> for AuditValue {
    fn from(value: Vec<T>) -> Self {
        AuditValue::Sequence(value.into_iter().map(Into::into).collect())
    }
}

impl From<Value> for AuditValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => AuditValue::Null,
            Value::Bool(b) => AuditValue::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map(AuditValue::Int)
                .or_else(|| n.as_u64().map(AuditValue::UInt))
                .or_else(|| n.as_f64().map(AuditValue::Float))
                .unwrap_or_else(|| AuditValue::Text(n.to_string())),
            Value::String(s) => AuditValue::Text(s),
            Value::Array(items) => {
                AuditValue::Sequence(items.into_iter().map(Into::into).collect())
            }
            Value::Object(map) => AuditValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (AuditValue::Text(k), v.into()))
                    .collect(),
            ),
        }
    }
}
