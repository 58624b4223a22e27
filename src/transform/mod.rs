//! Declarative field transformations.
//!
//! A [`Transform`] is a tagged, serializable operation rather than executable
//! code, so blueprints carrying them can be shared between clients. Column
//! mappings run them against the source row; vendor outputs run them against
//! the validated target row.
//!
//! In YAML a transform may be written either as a tagged map
//! (`{ op: date_format, format: "%m/%d/%Y" }`) or as a compact token:
//!
//! | Token | Transform |
//! |---|---|
//! | `identity` | value unchanged |
//! | `uppercase` / `lowercase` | case change |
//! | `date:%m/%d/%Y` | date reformat |
//! | `const:MEDICAL` | constant substitution |
//! | `concat:First Name\|Last Name` | space-joined concatenation |

pub mod string_ops;

use std::{fmt::Write as _, str::FromStr};

use anyhow::{anyhow, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{Row, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", try_from = "TransformRepr")]
pub enum Transform {
    #[default]
    Identity,
    Uppercase,
    Lowercase,
    DateFormat {
        format: String,
    },
    Constant {
        value: String,
    },
    Concat {
        fields: Vec<String>,
        separator: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("cannot reformat '{value}' as a date")]
    UnparsableDate { value: String },
    #[error("invalid date format '{format}'")]
    InvalidFormat { format: String },
}

impl Transform {
    pub fn apply(&self, value: &Value, row: &Row) -> Result<Value, TransformError> {
        match self {
            Transform::Identity => Ok(value.clone()),
            Transform::Uppercase => Ok(map_text(value, |s| string_ops::uppercase(s).into_owned())),
            Transform::Lowercase => Ok(map_text(value, |s| string_ops::lowercase(s).into_owned())),
            Transform::DateFormat { format } => {
                if value.is_empty() {
                    return Ok(Value::Null);
                }
                let date = value.as_date().ok_or_else(|| TransformError::UnparsableDate {
                    value: value.as_display(),
                })?;
                format_date(date, format).map(Value::String)
            }
            Transform::Constant { value } => Ok(Value::String(value.clone())),
            Transform::Concat { fields, separator } => {
                let parts = fields
                    .iter()
                    .map(|field| row.value(field))
                    .filter(|v| !v.is_empty())
                    .map(Value::as_display)
                    .collect::<Vec<_>>();
                if parts.is_empty() {
                    Ok(Value::Null)
                } else {
                    Ok(Value::String(parts.join(separator)))
                }
            }
        }
    }

    /// Field names this transform reads from the row besides its own input.
    pub fn referenced_fields(&self) -> &[String] {
        match self {
            Transform::Concat { fields, .. } => fields,
            _ => &[],
        }
    }

    /// Rejects date formats chrono cannot render before any row is touched.
    pub fn check(&self) -> Result<(), TransformError> {
        if let Transform::DateFormat { format } = self {
            let sample = NaiveDate::from_ymd_opt(2000, 1, 31).unwrap_or_default();
            format_date(sample, format)?;
        }
        Ok(())
    }
}

fn map_text(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        other => other.clone(),
    }
}

fn format_date(date: NaiveDate, format: &str) -> Result<String, TransformError> {
    let mut rendered = String::new();
    write!(rendered, "{}", date.format(format)).map_err(|_| TransformError::InvalidFormat {
        format: format.to_string(),
    })?;
    Ok(rendered)
}

impl FromStr for Transform {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let (op, arg) = match trimmed.split_once(':') {
            Some((op, arg)) => (op.trim().to_ascii_lowercase(), Some(arg)),
            None => (trimmed.to_ascii_lowercase(), None),
        };
        let transform = match (op.as_str(), arg) {
            ("" | "identity" | "none", None) => Transform::Identity,
            ("uppercase" | "upper", None) => Transform::Uppercase,
            ("lowercase" | "lower", None) => Transform::Lowercase,
            ("date" | "date_format", Some(format)) if !format.trim().is_empty() => {
                Transform::DateFormat {
                    format: format.trim().to_string(),
                }
            }
            ("const" | "constant", Some(value)) => Transform::Constant {
                value: value.to_string(),
            },
            ("concat", Some(fields)) => {
                let fields = fields
                    .split('|')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                if fields.is_empty() {
                    bail!("concat transform '{raw}' names no fields");
                }
                Transform::Concat {
                    fields,
                    separator: " ".to_string(),
                }
            }
            _ => return Err(anyhow!("Unknown transform '{raw}'")),
        };
        transform
            .check()
            .map_err(|err| anyhow!("Transform '{raw}': {err}"))?;
        Ok(transform)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TransformRepr {
    Token(String),
    Structured(StructuredTransform),
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum StructuredTransform {
    Identity,
    Uppercase,
    Lowercase,
    DateFormat {
        format: String,
    },
    Constant {
        value: String,
    },
    Concat {
        fields: Vec<String>,
        #[serde(default = "default_separator")]
        separator: String,
    },
}

fn default_separator() -> String {
    " ".to_string()
}

impl TryFrom<TransformRepr> for Transform {
    type Error = String;

    fn try_from(repr: TransformRepr) -> Result<Self, Self::Error> {
        let transform = match repr {
            TransformRepr::Token(token) => return token.parse().map_err(|e| format!("{e:#}")),
            TransformRepr::Structured(StructuredTransform::Identity) => Transform::Identity,
            TransformRepr::Structured(StructuredTransform::Uppercase) => Transform::Uppercase,
            TransformRepr::Structured(StructuredTransform::Lowercase) => Transform::Lowercase,
            TransformRepr::Structured(StructuredTransform::DateFormat { format }) => {
                Transform::DateFormat { format }
            }
            TransformRepr::Structured(StructuredTransform::Constant { value }) => {
                Transform::Constant { value }
            }
            TransformRepr::Structured(StructuredTransform::Concat { fields, separator }) => {
                Transform::Concat { fields, separator }
            }
        };
        transform.check().map_err(|err| err.to_string())?;
        Ok(transform)
    }
}
