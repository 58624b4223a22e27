//! Column descriptions and sample-based type inference.
//!
//! Descriptions come from a [`ColumnDescriber`]; the bundled
//! [`HeuristicDescriber`] matches header tokens against a small enrollment
//! vocabulary. A learned or remote classifier can implement the same trait
//! without changing how templates are generated.

use serde::Serialize;

use crate::{
    data::{DataType, Value, coerce_value},
    parser::ParsedTable,
    transform::string_ops,
};

pub trait ColumnDescriber {
    fn describe(&self, header: &str) -> String;
}

impl<F> ColumnDescriber for F
where
    F: Fn(&str) -> String,
{
    fn describe(&self, header: &str) -> String {
        self(header)
    }
}

/// Token rules checked in order; the first hit wins.
const DESCRIPTION_RULES: &[(&[&str], &str)] = &[
    (&["email", "mail"], "Email address"),
    (&["phone", "mobile", "tel", "cell"], "Phone number"),
    (&["ssn", "sin"], "Social security number"),
    (&["dob", "birth", "birthdate"], "Date of birth in YYYY-MM-DD format"),
    (&["date", "effective", "termination", "hire"], "Date in YYYY-MM-DD format"),
    (&["name", "fname", "lname"], "Full name of the person"),
    (&["id", "identifier", "number", "num", "no"], "Unique identifier"),
    (&["zip", "postal"], "Postal code"),
    (&["gender", "sex"], "Gender"),
    (&["plan"], "Benefit plan code"),
    (&["coverage", "tier"], "Coverage level"),
    (&["department", "dept"], "Department"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicDescriber;

impl ColumnDescriber for HeuristicDescriber {
    fn describe(&self, header: &str) -> String {
        let tokens = string_ops::tokens(header);
        DESCRIPTION_RULES
            .iter()
            .find(|(needles, _)| tokens.iter().any(|t| needles.contains(&t.as_str())))
            .map(|(_, description)| (*description).to_string())
            .unwrap_or_else(|| format!("Data field for {}", header.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInsight {
    pub header: String,
    pub description: String,
    pub data_type: DataType,
    pub non_empty: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<String>,
}

/// Describes every column of `table` and infers its type from up to
/// `sample_rows` rows (0 scans everything).
pub fn profile_table(
    table: &ParsedTable,
    describer: &dyn ColumnDescriber,
    sample_rows: usize,
) -> Vec<ColumnInsight> {
    let limit = if sample_rows == 0 {
        table.rows.len()
    } else {
        sample_rows
    };
    table
        .headers
        .iter()
        .map(|header| {
            let values = table
                .column_values(header)
                .take(limit)
                .filter(|v| !v.is_empty())
                .collect::<Vec<_>>();
            ColumnInsight {
                header: header.clone(),
                description: describer.describe(header),
                data_type: infer_data_type(values.iter().copied()),
                non_empty: values.len(),
                sample: values.first().map(|v| v.as_display()),
            }
        })
        .collect()
}

/// Picks the narrowest type every non-empty value coerces to. Numeric columns
/// win over booleans, so 0/1 flags infer as numbers.
pub fn infer_data_type<'a, I>(values: I) -> DataType
where
    I: IntoIterator<Item = &'a Value>,
{
    let values = values
        .into_iter()
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>();
    if values.is_empty() {
        return DataType::String;
    }
    let all = |ty: DataType| values.iter().all(|v| coerce_value(v, ty).is_ok());
    let all_digits = values
        .iter()
        .all(|v| matches!(v, Value::Integer(_) | Value::Float(_)) || v.as_f64().is_some());
    if all_digits {
        // Leading zeros mark identifiers, not quantities.
        let has_leading_zero = values.iter().any(|v| match v {
            Value::String(s) => s.len() > 1 && s.starts_with('0') && !s.starts_with("0."),
            _ => false,
        });
        return if has_leading_zero {
            DataType::String
        } else {
            DataType::Number
        };
    }
    if all(DataType::Boolean) {
        DataType::Boolean
    } else if all(DataType::Date) {
        DataType::Date
    } else {
        DataType::String
    }
}
