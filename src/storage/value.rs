/// Scalar values and logical data types
///
/// `Value` is the row-at-a-time view of a column slot. Hashing and equality are total
/// (floats compare through `OrderedFloat`), so NULL == NULL and NaN == NaN, which is what
/// grouping and DISTINCT need. SQL three-valued comparison lives in the evaluator, not here.
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Days between 0001-01-01 (CE day 1) and 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;
pub const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Logical column type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Double,
    Boolean,
    String,
    /// Days since 1970-01-01
    Date,
    /// Microseconds since the Unix epoch, no time zone
    Timestamp,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Double)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }

    /// Smallest type both sides convert to without losing meaning
    pub fn common_supertype(a: DataType, b: DataType) -> Option<DataType> {
        use DataType::*;
        match (a, b) {
            _ if a == b => Some(a),
            (Integer, Double) | (Double, Integer) => Some(Double),
            (Date, Timestamp) | (Timestamp, Date) => Some(Timestamp),
            _ => None,
        }
    }

    /// Widening used by schema inference: conflicts that are not numeric/temporal become String
    pub fn widen(a: DataType, b: DataType) -> DataType {
        Self::common_supertype(a, b).unwrap_or(DataType::String)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Integer => "INTEGER",
            DataType::Double => "DOUBLE",
            DataType::Boolean => "BOOLEAN",
            DataType::String => "STRING",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
        };
        f.write_str(name)
    }
}

/// Scalar value
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Double(f64),
    Boolean(bool),
    String(String),
    Date(i32),
    Timestamp(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(DataType::Integer),
            Value::Double(_) => Some(DataType::Double),
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::String(_) => Some(DataType::String),
            Value::Date(_) => Some(DataType::Date),
            Value::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn date(text: &str) -> EngineResult<Value> {
        parse_date(text)
            .map(Value::Date)
            .ok_or_else(|| EngineError::type_mismatch(format!("'{}' is not a valid DATE", text)))
    }

    pub fn timestamp(text: &str) -> EngineResult<Value> {
        parse_timestamp(text)
            .map(Value::Timestamp)
            .ok_or_else(|| EngineError::type_mismatch(format!("'{}' is not a valid TIMESTAMP", text)))
    }

    /// Convert this value to `target`; NULL stays NULL
    pub fn cast_to(&self, target: DataType) -> EngineResult<Value> {
        if self.is_null() || self.data_type() == Some(target) {
            return Ok(self.clone());
        }
        let fail = || {
            EngineError::type_mismatch(format!("cannot cast {} to {}", self, target))
        };
        let cast = match (self, target) {
            (Value::Integer(v), DataType::Double) => Value::Double(*v as f64),
            (Value::Double(v), DataType::Integer) => {
                let r = v.round();
                if !r.is_finite() || r < i64::MIN as f64 || r > i64::MAX as f64 {
                    return Err(fail());
                }
                Value::Integer(r as i64)
            }
            (Value::Integer(v), DataType::Boolean) => Value::Boolean(*v != 0),
            (Value::Boolean(b), DataType::Integer) => Value::Integer(*b as i64),
            (Value::Boolean(b), DataType::Double) => Value::Double(if *b { 1.0 } else { 0.0 }),
            (Value::Date(d), DataType::Timestamp) => Value::Timestamp(*d as i64 * MICROS_PER_DAY),
            (Value::Timestamp(t), DataType::Date) => {
                Value::Date(t.div_euclid(MICROS_PER_DAY) as i32)
            }
            (v, DataType::String) => Value::String(v.to_string()),
            (Value::String(s), DataType::Integer) => {
                Value::Integer(s.trim().parse::<i64>().map_err(|_| fail())?)
            }
            (Value::String(s), DataType::Double) => {
                Value::Double(s.trim().parse::<f64>().map_err(|_| fail())?)
            }
            (Value::String(s), DataType::Boolean) => {
                Value::Boolean(parse_bool(s.trim()).ok_or_else(fail)?)
            }
            (Value::String(s), DataType::Date) => match parse_date(s.trim()) {
                Some(d) => Value::Date(d),
                None => Value::Date(
                    parse_timestamp(s.trim())
                        .ok_or_else(fail)?
                        .div_euclid(MICROS_PER_DAY) as i32,
                ),
            },
            (Value::String(s), DataType::Timestamp) => {
                Value::Timestamp(parse_timestamp(s.trim()).ok_or_else(fail)?)
            }
            _ => return Err(fail()),
        };
        Ok(cast)
    }

    /// Order two non-null values, coercing Integer/Double and Date/Timestamp.
    /// Returns None when the types are not comparable.
    pub fn partial_cmp_coerced(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => Some(OrderedFloat(*a).cmp(&OrderedFloat(*b))),
            (Value::Integer(a), Value::Double(b)) => {
                Some(OrderedFloat(*a as f64).cmp(&OrderedFloat(*b)))
            }
            (Value::Double(a), Value::Integer(b)) => {
                Some(OrderedFloat(*a).cmp(&OrderedFloat(*b as f64)))
            }
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Timestamp(b)) => Some((*a as i64 * MICROS_PER_DAY).cmp(b)),
            (Value::Timestamp(a), Value::Date(b)) => Some(a.cmp(&(*b as i64 * MICROS_PER_DAY))),
            (Value::String(_), Value::Date(_) | Value::Timestamp(_)) => {
                let target = other.data_type()?;
                self.cast_to(target).ok()?.partial_cmp_coerced(other)
            }
            (Value::Date(_) | Value::Timestamp(_), Value::String(_)) => {
                let target = self.data_type()?;
                self.partial_cmp_coerced(&other.cast_to(target).ok()?)
            }
            _ => None,
        }
    }

    /// Total order used by sorting: NULL sorts last here, callers apply NULLS FIRST/LAST
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            _ => self
                .partial_cmp_coerced(other)
                .unwrap_or_else(|| self.type_rank().cmp(&other.type_rank())),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Boolean(_) => 0,
            Value::Integer(_) | Value::Double(_) => 1,
            Value::Date(_) | Value::Timestamp(_) => 2,
            Value::String(_) => 3,
            Value::Null => 4,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => OrderedFloat(*a) == OrderedFloat(*b),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Integer(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            Value::Double(v) => {
                2u8.hash(state);
                OrderedFloat(*v).hash(state);
            }
            Value::Boolean(v) => {
                3u8.hash(state);
                v.hash(state);
            }
            Value::String(v) => {
                4u8.hash(state);
                v.hash(state);
            }
            Value::Date(v) => {
                5u8.hash(state);
                v.hash(state);
            }
            Value::Timestamp(v) => {
                6u8.hash(state);
                v.hash(state);
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", format_double(*v)),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", format_date(*v)),
            Value::Timestamp(v) => write!(f, "{}", format_timestamp(*v)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Text conversions shared by readers, writers, casts and display
// ---------------------------------------------------------------------------

/// Doubles always carry a fraction or exponent so their text re-infers as DOUBLE
pub fn format_double(v: f64) -> String {
    format!("{:?}", v)
}

pub fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

pub fn parse_date(text: &str) -> Option<i32> {
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Some(date_to_days(date))
}

pub fn parse_timestamp(text: &str) -> Option<i64> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|dt| dt.and_utc().timestamp_micros())
}

pub fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

pub fn micros_to_datetime(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

pub fn format_date(days: i32) -> String {
    days_to_date(days)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| format!("<date {}>", days))
}

pub fn format_timestamp(micros: i64) -> String {
    match micros_to_datetime(micros) {
        Some(dt) if micros.rem_euclid(1_000_000) == 0 => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        None => format!("<timestamp {}>", micros),
    }
}

/// Type a text field would be inferred as; None for an empty (NULL) field
pub fn infer_text_type(text: &str) -> Option<DataType> {
    if text.is_empty() {
        return None;
    }
    if parse_bool(text).is_some() {
        return Some(DataType::Boolean);
    }
    if text.parse::<i64>().is_ok() {
        return Some(DataType::Integer);
    }
    if text.bytes().any(|b| b.is_ascii_digit()) && text.parse::<f64>().is_ok() {
        return Some(DataType::Double);
    }
    if parse_date(text).is_some() {
        return Some(DataType::Date);
    }
    if parse_timestamp(text).is_some() {
        return Some(DataType::Timestamp);
    }
    Some(DataType::String)
}

/// Parse one text field as `data_type`; empty text is NULL
pub fn parse_text(text: &str, data_type: DataType) -> Option<Value> {
    if text.is_empty() {
        return Some(Value::Null);
    }
    let value = match data_type {
        DataType::Integer => Value::Integer(text.parse().ok()?),
        DataType::Double => Value::Double(text.parse().ok()?),
        DataType::Boolean => Value::Boolean(parse_bool(text)?),
        DataType::String => Value::String(text.to_string()),
        DataType::Date => Value::Date(parse_date(text)?),
        DataType::Timestamp => Value::Timestamp(
            parse_timestamp(text).or_else(|| parse_date(text).map(|d| d as i64 * MICROS_PER_DAY))?,
        ),
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_equals_null_for_grouping() {
        assert_eq!(Value::Null, Value::Null);
        assert_ne!(Value::Null, Value::Integer(0));
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
    }

    #[test]
    fn test_date_round_trip() {
        let days = parse_date("2024-03-15").unwrap();
        assert_eq!(format_date(days), "2024-03-15");
        assert_eq!(parse_date("1970-01-01"), Some(0));
    }

    #[test]
    fn test_timestamp_formats() {
        let a = parse_timestamp("2024-01-01 10:30:00").unwrap();
        let b = parse_timestamp("2024-01-01T10:30:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(format_timestamp(a), "2024-01-01 10:30:00");
        let c = parse_timestamp("2024-01-01 10:30:00.250").unwrap();
        assert_eq!(format_timestamp(c), "2024-01-01 10:30:00.250000");
    }

    #[test]
    fn test_infer_text_type() {
        assert_eq!(infer_text_type("42"), Some(DataType::Integer));
        assert_eq!(infer_text_type("42.5"), Some(DataType::Double));
        assert_eq!(infer_text_type("true"), Some(DataType::Boolean));
        assert_eq!(infer_text_type("2024-01-31"), Some(DataType::Date));
        assert_eq!(infer_text_type("2024-01-31 08:00:00"), Some(DataType::Timestamp));
        assert_eq!(infer_text_type("inf"), Some(DataType::String));
        assert_eq!(infer_text_type("North"), Some(DataType::String));
        assert_eq!(infer_text_type(""), None);
    }

    #[test]
    fn test_double_text_reinfers_as_double() {
        assert_eq!(format_double(10.0), "10.0");
        assert_eq!(infer_text_type(&format_double(10.0)), Some(DataType::Double));
    }

    #[test]
    fn test_cast_string_to_date_accepts_timestamp_text() {
        let v = Value::from("2024-02-01 13:00:00").cast_to(DataType::Date).unwrap();
        assert_eq!(v, Value::Date(parse_date("2024-02-01").unwrap()));
        assert!(Value::from("abc").cast_to(DataType::Integer).is_err());
    }

    #[test]
    fn test_coerced_comparison() {
        assert_eq!(
            Value::Integer(2).partial_cmp_coerced(&Value::Double(2.5)),
            Some(Ordering::Less)
        );
        let d = Value::Date(parse_date("2024-01-02").unwrap());
        assert_eq!(d.partial_cmp_coerced(&Value::from("2024-01-01")), Some(Ordering::Greater));
        assert_eq!(Value::Integer(1).partial_cmp_coerced(&Value::from("x")), None);
    }
}
