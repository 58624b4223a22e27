//! Scalar values, declared data types, and the [`Row`] record shared by every
//! pipeline stage.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};
use thiserror::Error;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%m-%d-%Y", "%Y%m%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M",
];

static NULL: Value = Value::Null;

/// Declared type of a mapped column. Values are coerced to it before format
/// and range checks run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    String,
    Number,
    Date,
    Boolean,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Date => "date",
            DataType::Boolean => "boolean",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["string", "number", "date", "boolean"]
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => Ok(DataType::String),
            "number" | "integer" | "int" | "float" | "decimal" => Ok(DataType::Number),
            "date" | "datetime" => Ok(DataType::Date),
            "boolean" | "bool" => Ok(DataType::Boolean),
            _ => Err(anyhow!(
                "Unknown data type '{value}'. Supported types: {}",
                DataType::variants().join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null and whitespace-only strings count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => parse_number(s.trim()).and_then(|v| v.as_f64()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date()),
            Value::String(s) => parse_naive_date(s.trim()).ok(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Integer(_) | Value::Float(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

/// An ordered record of named scalar values. Field names are unique; inserting
/// an existing name replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Returns the named value, or `Null` when the field is absent.
    pub fn value(&self, name: &str) -> &Value {
        self.get(name).unwrap_or(&NULL)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_blank(&self, name: &str) -> bool {
        self.value(name).is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.insert(name, value);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("'{value}' is not a valid {expected}")]
pub struct CoercionError {
    pub value: String,
    pub expected: DataType,
}

impl CoercionError {
    fn new(value: &Value, expected: DataType) -> Self {
        Self {
            value: value.as_display(),
            expected,
        }
    }
}

/// Converts `value` to the declared type. Nulls and blank strings become
/// `Null` for every type.
pub fn coerce_value(value: &Value, ty: DataType) -> Result<Value, CoercionError> {
    if value.is_empty() {
        return Ok(Value::Null);
    }
    let coerced = match (ty, value) {
        (DataType::String, Value::String(_)) => Some(value.clone()),
        (DataType::String, other) => Some(Value::String(other.as_display())),
        (DataType::Number, Value::Integer(_) | Value::Float(_)) => Some(value.clone()),
        (DataType::Number, Value::String(s)) => parse_number(s.trim()),
        (DataType::Date, Value::Date(_)) => Some(value.clone()),
        (DataType::Date, Value::DateTime(dt)) => Some(Value::Date(dt.date())),
        (DataType::Date, Value::String(s)) => {
            let trimmed = s.trim();
            parse_naive_date(trimmed)
                .or_else(|_| parse_naive_datetime(trimmed).map(|dt| dt.date()))
                .ok()
                .map(Value::Date)
        }
        (DataType::Boolean, Value::Boolean(_)) => Some(value.clone()),
        (DataType::Boolean, Value::Integer(1)) => Some(Value::Boolean(true)),
        (DataType::Boolean, Value::Integer(0)) => Some(Value::Boolean(false)),
        (DataType::Boolean, Value::String(s)) => parse_boolean(s.trim()).map(Value::Boolean),
        _ => None,
    };
    coerced.ok_or_else(|| CoercionError::new(value, ty))
}

fn parse_number(value: &str) -> Option<Value> {
    if let Ok(parsed) = value.parse::<i64>() {
        return Some(Value::Integer(parsed));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .map(Value::Float)
}

fn parse_boolean(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Lowercases a header and collapses every non-alphanumeric run into `_` so it
/// can be bound as an expression variable.
pub fn normalize_column_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            normalized.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep && !normalized.is_empty() {
            normalized.push('_');
            last_was_sep = true;
        }
    }
    while normalized.ends_with('_') {
        normalized.pop();
    }
    if normalized.starts_with(|c: char| c.is_ascii_digit()) {
        normalized.insert(0, '_');
    }
    if normalized.is_empty() {
        normalized.push_str("column");
    }
    normalized
}

pub fn value_to_evalexpr(value: &Value) -> evalexpr::Value {
    match value {
        Value::Null => evalexpr::Value::Empty,
        Value::String(s) => evalexpr::Value::String(s.clone()),
        Value::Integer(i) => evalexpr::Value::Int(*i),
        Value::Float(f) => evalexpr::Value::Float(*f),
        Value::Boolean(b) => evalexpr::Value::Boolean(*b),
        Value::Date(_) | Value::DateTime(_) => evalexpr::Value::String(value.as_display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_column_name_collapses_separators() {
        assert_eq!(normalize_column_name("Employee ID"), "employee_id");
        assert_eq!(normalize_column_name("  Date of Birth (DOB) "), "date_of_birth_dob");
        assert_eq!(normalize_column_name("401k Plan"), "_401k_plan");
        assert_eq!(normalize_column_name("%%"), "column");
    }

    #[test]
    fn parse_naive_date_prefers_us_ordering() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        assert_eq!(parse_naive_date("2024-05-06").unwrap(), expected);
        assert_eq!(parse_naive_date("05/06/2024").unwrap(), expected);
        assert_eq!(parse_naive_date("20240506").unwrap(), expected);
        assert!(parse_naive_date("13/45/2024").is_err());
    }

    #[test]
    fn coerce_value_handles_blank_and_boolean_inputs() {
        assert_eq!(
            coerce_value(&Value::text("  "), DataType::Number).unwrap(),
            Value::Null
        );
        assert_eq!(
            coerce_value(&Value::text("Yes"), DataType::Boolean).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            coerce_value(&Value::Integer(0), DataType::Boolean).unwrap(),
            Value::Boolean(false)
        );
        let err = coerce_value(&Value::text("maybe"), DataType::Boolean).unwrap_err();
        assert_eq!(err.to_string(), "'maybe' is not a valid boolean");
    }

    #[test]
    fn coerce_value_parses_numbers_and_dates() {
        assert_eq!(
            coerce_value(&Value::text("42"), DataType::Number).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            coerce_value(&Value::text("42.5"), DataType::Number).unwrap(),
            Value::Float(42.5)
        );
        assert!(coerce_value(&Value::text("NaN"), DataType::Number).is_err());
        assert_eq!(
            coerce_value(&Value::text("2024-01-15T08:00:00"), DataType::Date).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );
        assert_eq!(
            coerce_value(&Value::Integer(7), DataType::String).unwrap(),
            Value::text("7")
        );
    }

    #[test]
    fn row_insert_replaces_existing_field_in_place() {
        let mut row = Row::new().with("a", "1").with("b", "2");
        row.insert("a", Value::Integer(3));
        let names = row.names().collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(row.value("a"), &Value::Integer(3));
        assert_eq!(row.value("missing"), &Value::Null);
    }

    #[test]
    fn row_serializes_in_field_order() {
        let row = Row::new()
            .with("z", "last")
            .with("a", Value::Integer(1))
            .with("m", Value::Null);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"z":"last","a":1,"m":null}"#);
    }

    #[test]
    fn data_type_parses_aliases() {
        assert_eq!("Integer".parse::<DataType>().unwrap(), DataType::Number);
        assert_eq!("bool".parse::<DataType>().unwrap(), DataType::Boolean);
        assert!("blob".parse::<DataType>().is_err());
    }
}
