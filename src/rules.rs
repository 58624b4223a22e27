//! Declarative validation rules.
//!
//! Rules are tagged by `type` and stored flat, the way blueprints write them:
//!
//! ```yaml
//! - field: Email
//!   type: format
//!   format: email
//! - field: Date of Birth
//!   type: range
//!   min: 1900-01-01
//!   message: Birth date is out of range
//! - field: Coverage Level
//!   type: custom
//!   one_of: [EE, EE+SP, EE+CH, FAM]
//! ```
//!
//! [`ValidationRule::compile`] turns one into a [`CompiledRule`], checking
//! that the rule names exactly one check and that patterns and expressions
//! parse.

use std::{cmp::Ordering, fmt};

use chrono::NaiveDate;
use evalexpr::ContextWithMutableVariables;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    data::{DataType, Row, Value, coerce_value, parse_naive_date, value_to_evalexpr},
    expr,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Required,
    Format,
    Range,
    Custom,
}

/// Which stage produced a diagnostic. `Transform` marks failed mapping
/// transformations, which are not rules but are reported alongside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTag {
    Required,
    Format,
    Range,
    Custom,
    Transform,
}

impl From<RuleKind> for RuleTag {
    fn from(kind: RuleKind) -> Self {
        match kind {
            RuleKind::Required => RuleTag::Required,
            RuleKind::Format => RuleTag::Format,
            RuleKind::Range => RuleTag::Range,
            RuleKind::Custom => RuleTag::Custom,
        }
    }
}

impl fmt::Display for RuleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleTag::Required => "required",
            RuleTag::Format => "format",
            RuleTag::Range => "range",
            RuleTag::Custom => "custom",
            RuleTag::Transform => "transform",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedFormat {
    Email,
    Phone,
    PostalCode,
    Ssn,
}

impl NamedFormat {
    fn pattern(self) -> &'static str {
        match self {
            NamedFormat::Email => r"^[^\s@]+@[^\s@]+\.[^\s@]+$",
            NamedFormat::Phone => r"^(\+?1[\s.-]?)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}$",
            NamedFormat::PostalCode => r"^\d{5}(-\d{4})?$",
            NamedFormat::Ssn => r"^\d{3}-?\d{2}-?\d{4}$",
        }
    }

    fn label(self) -> &'static str {
        match self {
            NamedFormat::Email => "email address",
            NamedFormat::Phone => "phone number",
            NamedFormat::PostalCode => "postal code",
            NamedFormat::Ssn => "social security number",
        }
    }
}

/// Range bound: a number, or text holding a number or a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Le,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Ge,
}

impl Comparison {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Le => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "equal to",
            Comparison::Ne => "different from",
            Comparison::Lt => "before",
            Comparison::Le => "on or before",
            Comparison::Gt => "after",
            Comparison::Ge => "on or after",
        }
    }
}

/// One rule on one field, tagged by `type`. Keys that do not belong to the
/// rule's type are rejected when a blueprint is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ValidationRule {
    Required {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Exactly one of `format`, `pattern` or `data_type`.
    Format {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<NamedFormat>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_type: Option<DataType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Range {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<Bound>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<Bound>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Exactly one check: `one_of`, a length bound, `compare` with
    /// `other_field`, or `expression`.
    Custom {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        one_of: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        case_insensitive: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compare: Option<Comparison>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        other_field: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expression: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ValidationRule {
    pub fn required(field: impl Into<String>) -> Self {
        ValidationRule::Required {
            field: field.into(),
            message: None,
        }
    }

    pub fn named_format(field: impl Into<String>, format: NamedFormat) -> Self {
        ValidationRule::Format {
            field: field.into(),
            format: Some(format),
            pattern: None,
            data_type: None,
            message: None,
        }
    }

    pub fn pattern(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        ValidationRule::Format {
            field: field.into(),
            format: None,
            pattern: Some(pattern.into()),
            data_type: None,
            message: None,
        }
    }

    pub fn range(field: impl Into<String>, min: Option<Bound>, max: Option<Bound>) -> Self {
        ValidationRule::Range {
            field: field.into(),
            min,
            max,
            message: None,
        }
    }

    fn custom(field: impl Into<String>) -> Self {
        ValidationRule::Custom {
            field: field.into(),
            one_of: None,
            case_insensitive: false,
            min_length: None,
            max_length: None,
            compare: None,
            other_field: None,
            expression: None,
            message: None,
        }
    }

    pub fn one_of<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut rule = Self::custom(field);
        if let ValidationRule::Custom { one_of, .. } = &mut rule {
            *one_of = Some(values.into_iter().map(Into::into).collect());
        }
        rule
    }

    /// Makes a `one_of` check ignore ASCII case. No effect on other rules.
    pub fn ignoring_case(mut self) -> Self {
        if let ValidationRule::Custom {
            case_insensitive, ..
        } = &mut self
        {
            *case_insensitive = true;
        }
        self
    }

    pub fn length(field: impl Into<String>, min: Option<usize>, max: Option<usize>) -> Self {
        let mut rule = Self::custom(field);
        if let ValidationRule::Custom {
            min_length,
            max_length,
            ..
        } = &mut rule
        {
            *min_length = min;
            *max_length = max;
        }
        rule
    }

    pub fn compare_field(
        field: impl Into<String>,
        op: Comparison,
        other: impl Into<String>,
    ) -> Self {
        let mut rule = Self::custom(field);
        if let ValidationRule::Custom {
            compare,
            other_field,
            ..
        } = &mut rule
        {
            *compare = Some(op);
            *other_field = Some(other.into());
        }
        rule
    }

    pub fn expression(field: impl Into<String>, source: impl Into<String>) -> Self {
        let mut rule = Self::custom(field);
        if let ValidationRule::Custom { expression, .. } = &mut rule {
            *expression = Some(source.into());
        }
        rule
    }

    pub fn with_message(mut self, text: impl Into<String>) -> Self {
        let (ValidationRule::Required { message, .. }
        | ValidationRule::Format { message, .. }
        | ValidationRule::Range { message, .. }
        | ValidationRule::Custom { message, .. }) = &mut self;
        *message = Some(text.into());
        self
    }

    pub fn field(&self) -> &str {
        match self {
            ValidationRule::Required { field, .. }
            | ValidationRule::Format { field, .. }
            | ValidationRule::Range { field, .. }
            | ValidationRule::Custom { field, .. } => field,
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            ValidationRule::Required { .. } => RuleKind::Required,
            ValidationRule::Format { .. } => RuleKind::Format,
            ValidationRule::Range { .. } => RuleKind::Range,
            ValidationRule::Custom { .. } => RuleKind::Custom,
        }
    }

    fn message(&self) -> Option<&String> {
        match self {
            ValidationRule::Required { message, .. }
            | ValidationRule::Format { message, .. }
            | ValidationRule::Range { message, .. }
            | ValidationRule::Custom { message, .. } => message.as_ref(),
        }
    }

    pub fn compile(&self) -> Result<CompiledRule, RuleError> {
        let check = match self {
            ValidationRule::Required { .. } => Check::Required,
            ValidationRule::Format {
                format,
                pattern,
                data_type,
                ..
            } => self.compile_format(*format, pattern.as_deref(), *data_type)?,
            ValidationRule::Range { min, max, .. } => self.compile_range(min.as_ref(), max.as_ref())?,
            ValidationRule::Custom {
                one_of,
                case_insensitive,
                min_length,
                max_length,
                compare,
                other_field,
                expression,
                ..
            } => {
                let chosen = [
                    one_of.is_some().then_some("one_of"),
                    (min_length.is_some() || max_length.is_some()).then_some("min_length/max_length"),
                    (compare.is_some() || other_field.is_some()).then_some("compare"),
                    expression.is_some().then_some("expression"),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>();
                self.exclusive(&chosen)?;
                if *case_insensitive && one_of.is_none() {
                    return Err(self.incomplete("sets case_insensitive without one_of"));
                }
                if let Some(values) = one_of {
                    Check::OneOf {
                        values: values.iter().map(|v| v.trim().to_string()).collect(),
                        case_insensitive: *case_insensitive,
                    }
                } else if min_length.is_some() || max_length.is_some() {
                    Check::Length {
                        min: *min_length,
                        max: *max_length,
                    }
                } else if let Some(expression) = expression {
                    expr::check_expression(expression).map_err(|err| {
                        RuleError::InvalidExpression {
                            field: self.field().to_string(),
                            message: format!("{err:#}"),
                        }
                    })?;
                    Check::Expression(expression.clone())
                } else {
                    match (compare, other_field) {
                        (Some(op), Some(other)) => Check::Compare {
                            op: *op,
                            other: other.clone(),
                        },
                        (None, None) => {
                            return Err(self.incomplete(
                                "needs one_of, min_length/max_length, compare with other_field, or expression",
                            ));
                        }
                        _ => return Err(self.incomplete("needs both compare and other_field")),
                    }
                }
            }
        };
        Ok(CompiledRule {
            field: self.field().to_string(),
            tag: self.kind().into(),
            check,
            message: self.message().cloned(),
        })
    }

    fn compile_format(
        &self,
        format: Option<NamedFormat>,
        pattern: Option<&str>,
        data_type: Option<DataType>,
    ) -> Result<Check, RuleError> {
        let chosen = [
            format.is_some().then_some("format"),
            pattern.is_some().then_some("pattern"),
            data_type.is_some().then_some("data_type"),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
        self.exclusive(&chosen)?;
        if let Some(pattern) = pattern {
            return Ok(Check::Pattern {
                regex: self.regex(pattern)?,
                label: None,
            });
        }
        if let Some(named) = format {
            return Ok(Check::Pattern {
                regex: self.regex(named.pattern())?,
                label: Some(named.label()),
            });
        }
        match data_type {
            Some(data_type) => Ok(Check::Type(data_type)),
            None => Err(self.incomplete("needs one of pattern, format or data_type")),
        }
    }

    fn regex(&self, pattern: &str) -> Result<Regex, RuleError> {
        Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
            field: self.field().to_string(),
            source,
        })
    }

    fn compile_range(&self, min: Option<&Bound>, max: Option<&Bound>) -> Result<Check, RuleError> {
        let min = min.map(|b| self.resolve_bound(b)).transpose()?;
        let max = max.map(|b| self.resolve_bound(b)).transpose()?;
        match (min, max) {
            (None, None) => Err(self.incomplete("needs min, max or both")),
            (Some(ResolvedBound::Date(_)), Some(ResolvedBound::Number(_)))
            | (Some(ResolvedBound::Number(_)), Some(ResolvedBound::Date(_))) => {
                Err(self.incomplete("mixes a number bound with a date bound"))
            }
            (Some(ResolvedBound::Date(min)), max) => Ok(Check::DateRange {
                min: Some(min),
                max: max.and_then(ResolvedBound::date),
            }),
            (min, Some(ResolvedBound::Date(max))) => Ok(Check::DateRange {
                min: min.and_then(ResolvedBound::date),
                max: Some(max),
            }),
            (min, max) => Ok(Check::NumberRange {
                min: min.and_then(ResolvedBound::number),
                max: max.and_then(ResolvedBound::number),
            }),
        }
    }

    fn resolve_bound(&self, bound: &Bound) -> Result<ResolvedBound, RuleError> {
        match bound {
            Bound::Number(n) => Ok(ResolvedBound::Number(*n)),
            Bound::Text(text) => {
                let trimmed = text.trim();
                if let Ok(n) = trimmed.parse::<f64>()
                    && n.is_finite()
                {
                    return Ok(ResolvedBound::Number(n));
                }
                parse_naive_date(trimmed)
                    .map(ResolvedBound::Date)
                    .map_err(|_| RuleError::InvalidBound {
                        field: self.field().to_string(),
                        bound: text.clone(),
                    })
            }
        }
    }

    /// A rule carries a single check; several options at once is an error.
    fn exclusive(&self, chosen: &[&str]) -> Result<(), RuleError> {
        if chosen.len() > 1 {
            return Err(RuleError::Conflicting {
                field: self.field().to_string(),
                kind: self.kind(),
                options: chosen.join(", "),
            });
        }
        Ok(())
    }

    fn incomplete(&self, reason: &'static str) -> RuleError {
        RuleError::Incomplete {
            field: self.field().to_string(),
            kind: self.kind(),
            reason,
        }
    }
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule on '{field}' has an invalid pattern: {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },
    #[error("rule on '{field}' has an invalid expression: {message}")]
    InvalidExpression { field: String, message: String },
    #[error("rule on '{field}' has bound '{bound}' that is neither a number nor a date")]
    InvalidBound { field: String, bound: String },
    #[error("{kind:?} rule on '{field}' sets more than one check: {options}")]
    Conflicting {
        field: String,
        kind: RuleKind,
        options: String,
    },
    #[error("{kind:?} rule on '{field}' {reason}")]
    Incomplete {
        field: String,
        kind: RuleKind,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
enum ResolvedBound {
    Number(f64),
    Date(NaiveDate),
}

impl ResolvedBound {
    fn number(self) -> Option<f64> {
        match self {
            ResolvedBound::Number(n) => Some(n),
            ResolvedBound::Date(_) => None,
        }
    }

    fn date(self) -> Option<NaiveDate> {
        match self {
            ResolvedBound::Date(d) => Some(d),
            ResolvedBound::Number(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Check {
    Required,
    Pattern {
        regex: Regex,
        label: Option<&'static str>,
    },
    Type(DataType),
    NumberRange {
        min: Option<f64>,
        max: Option<f64>,
    },
    DateRange {
        min: Option<NaiveDate>,
        max: Option<NaiveDate>,
    },
    OneOf {
        values: Vec<String>,
        case_insensitive: bool,
    },
    Length {
        min: Option<usize>,
        max: Option<usize>,
    },
    Compare {
        op: Comparison,
        other: String,
    },
    Expression(String),
}

/// A rule ready to run. `evaluate` returns the failure message on `Err`.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub field: String,
    pub tag: RuleTag,
    check: Check,
    message: Option<String>,
}

impl CompiledRule {
    pub fn is_required(&self) -> bool {
        matches!(self.check, Check::Required)
    }

    /// Evaluates against an already-coerced value. `row` is the coerced row
    /// the value came from; `row_number` is 1-based.
    pub fn evaluate(&self, value: &Value, row: &Row, row_number: usize) -> Result<(), String> {
        match self.outcome(value, row, row_number) {
            Outcome::Pass => Ok(()),
            Outcome::Fail(default) => Err(self.message.clone().unwrap_or(default)),
            Outcome::Broken(reason) => Err(reason),
        }
    }

    fn outcome(&self, value: &Value, row: &Row, row_number: usize) -> Outcome {
        let field = &self.field;
        match &self.check {
            Check::Required => {
                if value.is_empty() {
                    Outcome::Fail(format!("{field} is required"))
                } else {
                    Outcome::Pass
                }
            }
            Check::Pattern { regex, label } => {
                if regex.is_match(&value.as_display()) {
                    Outcome::Pass
                } else {
                    Outcome::Fail(match label {
                        Some(label) => format!("{field} is not a valid {label}"),
                        None => format!("{field} does not match pattern {}", regex.as_str()),
                    })
                }
            }
            Check::Type(data_type) => match coerce_value(value, *data_type) {
                Ok(_) => Outcome::Pass,
                Err(err) => Outcome::Fail(format!("{field}: {err}")),
            },
            Check::NumberRange { min, max } => match value.as_f64() {
                Some(n) if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) => {
                    Outcome::Fail(describe_range(field, min, max))
                }
                Some(_) => Outcome::Pass,
                None => Outcome::Fail(format!("{field} value '{value}' is not a number")),
            },
            Check::DateRange { min, max } => match value.as_date() {
                Some(d) if min.is_some_and(|m| d < m) || max.is_some_and(|m| d > m) => {
                    Outcome::Fail(describe_range(field, min, max))
                }
                Some(_) => Outcome::Pass,
                None => Outcome::Fail(format!("{field} value '{value}' is not a date")),
            },
            Check::OneOf {
                values,
                case_insensitive,
            } => {
                if value.is_empty() {
                    return Outcome::Pass;
                }
                let actual = value.as_display();
                let actual = actual.trim();
                let found = values.iter().any(|allowed| {
                    if *case_insensitive {
                        allowed.eq_ignore_ascii_case(actual)
                    } else {
                        allowed == actual
                    }
                });
                if found {
                    Outcome::Pass
                } else {
                    Outcome::Fail(format!("{field} must be one of: {}", values.join(", ")))
                }
            }
            Check::Length { min, max } => {
                if value.is_empty() {
                    return Outcome::Pass;
                }
                let length = value.as_display().chars().count();
                if min.is_some_and(|m| length < m) || max.is_some_and(|m| length > m) {
                    Outcome::Fail(describe_range(&format!("{field} length"), min, max))
                } else {
                    Outcome::Pass
                }
            }
            Check::Compare { op, other } => {
                let other_value = row.value(other);
                if value.is_empty() || other_value.is_empty() {
                    return Outcome::Pass;
                }
                if op.holds(compare_values(value, other_value)) {
                    Outcome::Pass
                } else {
                    Outcome::Fail(format!("{field} must be {} {other}", op.symbol()))
                }
            }
            Check::Expression(expression) => {
                let verdict = expr::build_context(row, Some(row_number)).and_then(|mut context| {
                    context.set_value("value".to_string(), value_to_evalexpr(value))?;
                    expr::evaluate_expression_to_bool(expression, &context)
                });
                match verdict {
                    Ok(true) => Outcome::Pass,
                    Ok(false) => Outcome::Fail(format!("{field} failed check `{expression}`")),
                    Err(err) => Outcome::Broken(format!(
                        "{field} check `{expression}` could not be evaluated: {}",
                        err.root_cause()
                    )),
                }
            }
        }
    }
}

enum Outcome {
    Pass,
    Fail(String),
    Broken(String),
}

fn describe_range<T: fmt::Display>(subject: &str, min: &Option<T>, max: &Option<T>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("{subject} must be between {min} and {max}"),
        (Some(min), None) => format!("{subject} must be at least {min}"),
        (None, Some(max)) => format!("{subject} must be at most {max}"),
        (None, None) => format!("{subject} is out of range"),
    }
}

/// Orders two values numerically, then as dates, then as text.
fn compare_values(left: &Value, right: &Value) -> Ordering {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    if let (Some(a), Some(b)) = (left.as_date(), right.as_date()) {
        return a.cmp(&b);
    }
    left.as_display().cmp(&right.as_display())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(rule: &ValidationRule, value: Value) -> Result<(), String> {
        let row = Row::new().with(rule.field(), value.clone());
        rule.compile().unwrap().evaluate(&value, &row, 1)
    }

    #[test]
    fn named_formats_accept_common_shapes() {
        let email = ValidationRule::named_format("Email", NamedFormat::Email);
        assert!(check(&email, Value::text("ana@example.com")).is_ok());
        assert_eq!(
            check(&email, Value::text("ana@")).unwrap_err(),
            "Email is not a valid email address"
        );

        let phone = ValidationRule::named_format("Phone", NamedFormat::Phone);
        assert!(check(&phone, Value::text("(555) 123-4567")).is_ok());
        assert!(check(&phone, Value::text("+1 555.123.4567")).is_ok());
        assert!(check(&phone, Value::text("12345")).is_err());

        let zip = ValidationRule::named_format("Zip", NamedFormat::PostalCode);
        assert!(check(&zip, Value::text("02139-1234")).is_ok());
    }

    #[test]
    fn custom_message_replaces_default() {
        let rule = ValidationRule::pattern("Plan", "^[A-Z]{3}$").with_message("Plan code must be three letters");
        assert_eq!(
            check(&rule, Value::text("ppo")).unwrap_err(),
            "Plan code must be three letters"
        );
    }

    #[test]
    fn invalid_pattern_is_a_compile_error() {
        let rule = ValidationRule::pattern("Plan", "([");
        assert!(matches!(
            rule.compile(),
            Err(RuleError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn range_bounds_pick_numbers_or_dates() {
        let salary = ValidationRule::range("Salary", Some(Bound::Number(0.0)), Some(Bound::Text("250000".into())));
        assert!(check(&salary, Value::Integer(52000)).is_ok());
        assert_eq!(
            check(&salary, Value::Integer(-1)).unwrap_err(),
            "Salary must be between 0 and 250000"
        );

        let dob = ValidationRule::range("DOB", Some(Bound::Text("1900-01-01".into())), None);
        let born = NaiveDate::from_ymd_opt(1899, 12, 31).unwrap();
        assert_eq!(
            check(&dob, Value::Date(born)).unwrap_err(),
            "DOB must be at least 1900-01-01"
        );

        let mixed = ValidationRule::range(
            "X",
            Some(Bound::Number(1.0)),
            Some(Bound::Text("2020-01-01".into())),
        );
        assert!(matches!(mixed.compile(), Err(RuleError::Incomplete { .. })));
        let garbage = ValidationRule::range("X", Some(Bound::Text("soon".into())), None);
        assert!(matches!(garbage.compile(), Err(RuleError::InvalidBound { .. })));
    }

    #[test]
    fn one_of_respects_case_flag() {
        let rule = ValidationRule::one_of("Tier", ["EE", "FAM"]);
        assert!(check(&rule, Value::text("fam")).is_err());
        let rule = rule.ignoring_case();
        assert!(check(&rule, Value::text("fam")).is_ok());
        assert!(check(&rule, Value::Null).is_ok());
    }

    #[test]
    fn compare_field_orders_dates() {
        let rule = ValidationRule::compare_field("Termination Date", Comparison::Ge, "Hire Date");
        let compiled = rule.compile().unwrap();
        let row = Row::new()
            .with("Hire Date", "2021-05-01")
            .with("Termination Date", "2021-04-30");
        let err = compiled
            .evaluate(row.value("Termination Date"), &row, 1)
            .unwrap_err();
        assert_eq!(err, "Termination Date must be on or after Hire Date");

        let open = Row::new().with("Hire Date", "2021-05-01").with("Termination Date", Value::Null);
        assert!(compiled.evaluate(&Value::Null, &open, 1).is_ok());
    }

    #[test]
    fn expression_sees_value_and_row() {
        let rule = ValidationRule::expression("Salary", "value >= minimum");
        let compiled = rule.compile().unwrap();
        let row = Row::new()
            .with("Salary", Value::Integer(10))
            .with("Minimum", Value::Integer(20));
        assert_eq!(
            compiled.evaluate(&Value::Integer(10), &row, 1).unwrap_err(),
            "Salary failed check `value >= minimum`"
        );
        assert!(compiled.evaluate(&Value::Integer(25), &row, 1).is_ok());
    }

    #[test]
    fn expression_syntax_errors_surface_at_compile() {
        let rule = ValidationRule::expression("Salary", "value >= (");
        assert!(matches!(
            rule.compile(),
            Err(RuleError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn incomplete_rules_are_rejected() {
        let rule: ValidationRule = serde_yaml::from_str("field: Email\ntype: format").unwrap();
        let err = rule.compile().unwrap_err();
        assert!(err.to_string().contains("needs one of pattern"), "{err}");
        let half: ValidationRule =
            serde_yaml::from_str("field: End\ntype: custom\ncompare: '>='").unwrap();
        assert!(matches!(half.compile(), Err(RuleError::Incomplete { .. })));
    }

    #[test]
    fn rules_with_several_checks_are_rejected() {
        let both: ValidationRule = serde_yaml::from_str(
            "field: Tier\ntype: custom\none_of: [EE, FAM]\nexpression: \"value == 'EE'\"",
        )
        .unwrap();
        let err = both.compile().unwrap_err();
        assert!(matches!(err, RuleError::Conflicting { .. }));
        assert!(err.to_string().contains("one_of, expression"), "{err}");

        let format: ValidationRule =
            serde_yaml::from_str("field: Email\ntype: format\nformat: email\npattern: '^x$'").unwrap();
        assert!(matches!(format.compile(), Err(RuleError::Conflicting { .. })));

        let stray_case: ValidationRule =
            serde_yaml::from_str("field: Tier\ntype: custom\ncase_insensitive: true\nmin_length: 2").unwrap();
        assert!(matches!(stray_case.compile(), Err(RuleError::Incomplete { .. })));
    }

    #[test]
    fn keys_foreign_to_the_rule_type_fail_to_parse() {
        let result = serde_yaml::from_str::<ValidationRule>("field: Email\ntype: required\npattern: '^x$'");
        assert!(result.is_err());
        let result = serde_yaml::from_str::<ValidationRule>("field: Age\ntype: range\nmin: 1\none_of: [a]");
        assert!(result.is_err());
    }

    #[test]
    fn length_bounds_count_characters() {
        let rule = ValidationRule::length("State", Some(2), Some(2));
        assert!(check(&rule, Value::text("MA")).is_ok());
        assert_eq!(
            check(&rule, Value::text("Mass")).unwrap_err(),
            "State length must be between 2 and 2"
        );
    }

    #[test]
    fn rules_deserialize_from_flat_yaml() {
        let yaml = "\
- field: Email
  type: format
  format: email
- field: DOB
  type: range
  min: 1900-01-01
- field: Term Date
  type: custom
  compare: '>='
  other_field: Hire Date
";
        let rules: Vec<ValidationRule> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules[0], ValidationRule::named_format("Email", NamedFormat::Email));
        assert_eq!(
            rules[1],
            ValidationRule::range("DOB", Some(Bound::Text("1900-01-01".to_string())), None)
        );
        assert_eq!(
            rules[2],
            ValidationRule::compare_field("Term Date", Comparison::Ge, "Hire Date")
        );
        assert!(rules.iter().all(|rule| rule.compile().is_ok()));
    }
}
