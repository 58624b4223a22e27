//! Expression support for `custom` validation rules.
//!
//! Every field of the row is bound under its normalized name (`Date of Birth`
//! becomes `date_of_birth`), and a handful of string and date helpers are
//! registered so enrollment checks such as
//! `date_diff_days(termination_date, hire_date) >= 0` can be written inline.

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate};
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, Function, HashMapContext,
    Value as EvalValue, eval_with_context,
};
use regex::Regex;

use crate::{
    data::{Row, normalize_column_name, parse_naive_date, value_to_evalexpr},
    transform::string_ops,
};

fn register_date_functions(context: &mut HashMapContext) -> Result<()> {
    context
        .set_function(
            "date_add".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "date_add")?;
                let date = parse_date_arg(&args[0])?;
                let days = parse_i64_arg(&args[1], "days")?;
                let result = date
                    .checked_add_signed(Duration::days(days))
                    .ok_or_else(|| eval_error("date_add overflow"))?;
                Ok(EvalValue::String(result.format("%Y-%m-%d").to_string()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "date_diff_days".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "date_diff_days")?;
                let end = parse_date_arg(&args[0])?;
                let start = parse_date_arg(&args[1])?;
                Ok(EvalValue::Int((end - start).num_days()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "age_on".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "age_on")?;
                let birth = parse_date_arg(&args[0])?;
                let on = parse_date_arg(&args[1])?;
                Ok(EvalValue::Int(whole_years_between(birth, on)))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "is_date".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "is_date")?;
                let valid = matches!(&args[0], EvalValue::String(s) if parse_naive_date(s).is_ok());
                Ok(EvalValue::Boolean(valid))
            }),
        )
        .map_err(anyhow::Error::from)?;

    Ok(())
}

fn register_string_functions(context: &mut HashMapContext) -> Result<()> {
    context
        .set_function(
            "lowercase".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "lowercase")?;
                let value = expect_string(&args[0], "value")?;
                Ok(EvalValue::String(string_ops::lowercase(value).into_owned()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "uppercase".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "uppercase")?;
                let value = expect_string(&args[0], "value")?;
                Ok(EvalValue::String(string_ops::uppercase(value).into_owned()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "trim".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "trim")?;
                let value = expect_string(&args[0], "value")?;
                Ok(EvalValue::String(value.trim().to_string()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "length".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 1, "length")?;
                let length = match &args[0] {
                    EvalValue::String(s) => s.chars().count(),
                    EvalValue::Empty => 0,
                    other => other.to_string().chars().count(),
                };
                Ok(EvalValue::Int(length as i64))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "matches".into(),
            Function::new(|arguments| {
                let args = expect_args(arguments, 2, "matches")?;
                let value = expect_string(&args[0], "value")?;
                let pattern = expect_string(&args[1], "pattern")?;
                let regex = Regex::new(pattern)
                    .map_err(|err| eval_error(&format!("Invalid regex: {err}")))?;
                Ok(EvalValue::Boolean(regex.is_match(value)))
            }),
        )
        .map_err(anyhow::Error::from)?;

    Ok(())
}

fn whole_years_between(birth: NaiveDate, on: NaiveDate) -> i64 {
    let mut years = i64::from(on.year() - birth.year());
    if (on.month(), on.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    years
}

fn expect_args(
    arguments: &EvalValue,
    expected: usize,
    name: &str,
) -> Result<Vec<EvalValue>, evalexpr::EvalexprError> {
    match arguments {
        EvalValue::Empty if expected == 0 => Ok(Vec::new()),
        value if expected == 1 && !matches!(value, EvalValue::Tuple(_)) => Ok(vec![value.clone()]),
        EvalValue::Tuple(values) => {
            if values.len() != expected {
                return Err(evalexpr::EvalexprError::wrong_function_argument_amount(
                    values.len(),
                    expected,
                ));
            }
            Ok(values.clone())
        }
        _ => Err(eval_error(&format!(
            "{name} expects {expected} arguments provided as a tuple"
        ))),
    }
}

fn eval_error(message: &str) -> evalexpr::EvalexprError {
    evalexpr::EvalexprError::CustomMessage(message.to_string())
}

fn parse_date_arg(value: &EvalValue) -> Result<NaiveDate, evalexpr::EvalexprError> {
    let raw = expect_string(value, "date")?;
    parse_naive_date(raw).map_err(|err| eval_error(&err.to_string()))
}

fn parse_i64_arg(value: &EvalValue, name: &str) -> Result<i64, evalexpr::EvalexprError> {
    match value {
        EvalValue::Int(i) => Ok(*i),
        EvalValue::Float(f) => Ok(*f as i64),
        other => Err(eval_error(&format!(
            "Expected integer for {name}, got {other:?}",
        ))),
    }
}

fn expect_string<'a>(value: &'a EvalValue, name: &str) -> Result<&'a str, evalexpr::EvalexprError> {
    if let EvalValue::String(s) = value {
        Ok(s)
    } else {
        Err(eval_error(&format!("Expected string for {name}")))
    }
}

/// Binds every field of `row` plus `row_number` (1-based) into a fresh context.
pub fn build_context(row: &Row, row_number: Option<usize>) -> Result<HashMapContext> {
    let mut context = HashMapContext::new();
    register_date_functions(&mut context)?;
    register_string_functions(&mut context)?;
    for (name, value) in row.iter() {
        context
            .set_value(normalize_column_name(name), value_to_evalexpr(value))
            .with_context(|| format!("Binding field '{name}'"))?;
    }
    if let Some(number) = row_number {
        context
            .set_value("row_number".to_string(), EvalValue::Int(number as i64))
            .context("Binding row_number")?;
    }
    Ok(context)
}

/// Parses `expr` once so malformed rules fail before any row is validated.
pub fn check_expression(expr: &str) -> Result<()> {
    evalexpr::build_operator_tree::<evalexpr::DefaultNumericTypes>(expr)
        .map(|_| ())
        .with_context(|| format!("Parsing expression '{expr}'"))
}

pub fn evaluate_expression_to_bool(expr: &str, context: &HashMapContext) -> Result<bool> {
    let result = eval_with_context(expr, context)
        .with_context(|| format!("Evaluating expression '{expr}'"))?;
    Ok(eval_value_truthy(result))
}

pub fn eval_value_truthy(value: EvalValue) -> bool {
    match value {
        EvalValue::Boolean(b) => b,
        EvalValue::Int(i) => i != 0,
        EvalValue::Float(f) => f != 0.0,
        EvalValue::String(s) => !s.is_empty(),
        EvalValue::Tuple(values) => values.into_iter().any(eval_value_truthy),
        EvalValue::Empty => false,
    }
}
