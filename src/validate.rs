//! Row validation against compiled rules.
//!
//! Each field is checked in a fixed order: required, type coercion, format,
//! range, custom. A failed `required` check ends that field's checks, as does
//! a value that cannot be coerced to the declared type.

use std::collections::HashMap;

use log::debug;
use serde::Serialize;

use crate::{
    data::{DataType, Row, coerce_value},
    mapping::ColumnMapping,
    rules::{CompiledRule, RuleError, RuleTag, ValidationRule},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub field: String,
    pub rule: RuleTag,
    pub message: String,
}

impl Diagnostic {
    pub fn new(field: &str, rule: RuleTag, message: String) -> Self {
        Self {
            field: field.to_string(),
            rule,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowValidation {
    pub row_index: usize,
    pub valid: bool,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub error_rows: usize,
    pub diagnostic_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub results: Vec<RowValidation>,
    pub summary: ValidationSummary,
}

impl ValidationReport {
    fn from_results(results: Vec<RowValidation>) -> Self {
        let mut report = Self {
            results,
            summary: ValidationSummary::default(),
        };
        report.refresh_summary();
        report
    }

    pub fn is_valid(&self, row_index: usize) -> bool {
        self.results
            .get(row_index)
            .is_some_and(|result| result.valid)
    }

    pub fn valid_row_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.results
            .iter()
            .filter(|result| result.valid)
            .map(|result| result.row_index)
    }

    /// Adds diagnostics produced outside the engine, such as failed mapping
    /// transformations. Each named row becomes invalid; indices past the end
    /// are ignored. The summary is recomputed once for the whole batch.
    pub fn record_external_all(&mut self, diagnostics: impl IntoIterator<Item = (usize, Diagnostic)>) {
        let mut recorded = 0usize;
        for (row_index, diagnostic) in diagnostics {
            if let Some(result) = self.results.get_mut(row_index) {
                result.diagnostics.push(diagnostic);
                result.valid = false;
                recorded += 1;
            }
        }
        if recorded > 0 {
            self.refresh_summary();
        }
    }

    fn refresh_summary(&mut self) {
        let valid_rows = self.results.iter().filter(|r| r.valid).count();
        self.summary = ValidationSummary {
            total_rows: self.results.len(),
            valid_rows,
            error_rows: self.results.len() - valid_rows,
            diagnostic_count: self.results.iter().map(|r| r.diagnostics.len()).sum(),
        };
    }
}

#[derive(Debug, Clone)]
struct FieldPlan {
    name: String,
    data_type: DataType,
    required: Option<CompiledRule>,
    format: Vec<CompiledRule>,
    range: Vec<CompiledRule>,
    custom: Vec<CompiledRule>,
}

impl FieldPlan {
    fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            required: None,
            format: Vec::new(),
            range: Vec::new(),
            custom: Vec::new(),
        }
    }
}

/// Rules compiled once and applied to any number of rows.
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    fields: Vec<FieldPlan>,
}

impl ValidationEngine {
    /// Compiles `rules`. Fields are visited in mapping order, then in the
    /// order rule-only fields first appear. A mapping flagged `required`
    /// gets a `required` rule unless one is already declared.
    pub fn new(rules: &[ValidationRule], mappings: &[ColumnMapping]) -> Result<Self, RuleError> {
        let mut fields = Vec::<FieldPlan>::new();
        let mut positions = HashMap::<String, usize>::new();
        for mapping in mappings {
            if !positions.contains_key(&mapping.target) {
                positions.insert(mapping.target.clone(), fields.len());
                fields.push(FieldPlan::new(&mapping.target, mapping.data_type));
            }
        }
        for rule in rules {
            let compiled = rule.compile()?;
            let idx = *positions.entry(rule.field().to_string()).or_insert_with(|| {
                fields.push(FieldPlan::new(rule.field(), DataType::String));
                fields.len() - 1
            });
            let plan = &mut fields[idx];
            match compiled.tag {
                RuleTag::Required => {
                    if plan.required.is_none() {
                        plan.required = Some(compiled);
                    }
                }
                RuleTag::Format => plan.format.push(compiled),
                RuleTag::Range => plan.range.push(compiled),
                RuleTag::Custom | RuleTag::Transform => plan.custom.push(compiled),
            }
        }
        for mapping in mappings.iter().filter(|m| m.required) {
            if let Some(&idx) = positions.get(&mapping.target)
                && fields[idx].required.is_none()
            {
                fields[idx].required = Some(ValidationRule::required(&mapping.target).compile()?);
            }
        }
        debug!(
            "Compiled {} rule(s) across {} field(s)",
            rules.len(),
            fields.len()
        );
        Ok(Self { fields })
    }

    pub fn validate(&self, rows: &[Row]) -> ValidationReport {
        let results = rows
            .iter()
            .enumerate()
            .map(|(row_index, row)| self.validate_row(row_index, row))
            .collect();
        let report = ValidationReport::from_results(results);
        debug!(
            "Validated {} row(s): {} valid, {} with errors",
            report.summary.total_rows, report.summary.valid_rows, report.summary.error_rows
        );
        report
    }

    pub fn validate_row(&self, row_index: usize, row: &Row) -> RowValidation {
        let mut coerced = row.clone();
        let mut coercion_failures = HashMap::new();
        for plan in &self.fields {
            if let Some(raw) = row.get(&plan.name) {
                match coerce_value(raw, plan.data_type) {
                    Ok(value) => coerced.insert(plan.name.clone(), value),
                    Err(err) => {
                        coercion_failures.insert(plan.name.as_str(), err);
                    }
                }
            }
        }

        let row_number = row_index + 1;
        let mut diagnostics = Vec::new();
        for plan in &self.fields {
            let raw = row.value(&plan.name);
            let value = coerced.value(&plan.name);

            if let Some(required) = &plan.required
                && let Err(message) = required.evaluate(raw, &coerced, row_number)
            {
                diagnostics.push(Diagnostic::new(&plan.name, required.tag, message));
                continue;
            }
            if let Some(err) = coercion_failures.get(plan.name.as_str()) {
                let message = format!("{}: {err}", plan.name);
                diagnostics.push(Diagnostic::new(&plan.name, RuleTag::Format, message));
                continue;
            }
            let (format, range): (&[CompiledRule], &[CompiledRule]) = if raw.is_empty() {
                (&[], &[])
            } else {
                (&plan.format, &plan.range)
            };
            for rule in format.iter().chain(range).chain(&plan.custom) {
                if let Err(message) = rule.evaluate(value, &coerced, row_number) {
                    diagnostics.push(Diagnostic::new(&plan.name, rule.tag, message));
                }
            }
        }
        RowValidation {
            row_index,
            valid: diagnostics.is_empty(),
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::Value,
        rules::{Bound, NamedFormat},
    };

    fn typed(target: &str, data_type: DataType, required: bool) -> ColumnMapping {
        let mut mapping = ColumnMapping::unmapped(target);
        mapping.source = Some(target.to_string());
        mapping.data_type = data_type;
        mapping.required = required;
        mapping
    }

    #[test]
    fn required_failure_stops_further_checks() {
        let rules = vec![
            ValidationRule::required("Email"),
            ValidationRule::named_format("Email", NamedFormat::Email),
        ];
        let engine = ValidationEngine::new(&rules, &[]).unwrap();
        let report = engine.validate(&[Row::new().with("Email", "")]);
        let result = &report.results[0];
        assert!(!result.valid);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].rule, RuleTag::Required);
    }

    #[test]
    fn coercion_failure_is_a_single_format_diagnostic() {
        let mappings = vec![typed("Salary", DataType::Number, false)];
        let rules = vec![ValidationRule::range(
            "Salary",
            Some(Bound::Number(0.0)),
            None,
        )];
        let engine = ValidationEngine::new(&rules, &mappings).unwrap();
        let result = engine.validate_row(0, &Row::new().with("Salary", "lots"));
        assert_eq!(
            result.diagnostics,
            vec![Diagnostic {
                field: "Salary".to_string(),
                rule: RuleTag::Format,
                message: "Salary: 'lots' is not a valid number".to_string(),
            }]
        );
    }

    #[test]
    fn empty_optional_fields_skip_format_and_range() {
        let rules = vec![
            ValidationRule::named_format("Phone", NamedFormat::Phone),
            ValidationRule::range("Age", Some(Bound::Number(18.0)), None),
        ];
        let engine = ValidationEngine::new(&rules, &[]).unwrap();
        let result = engine.validate_row(0, &Row::new().with("Phone", Value::Null));
        assert!(result.valid, "{:?}", result.diagnostics);
    }

    #[test]
    fn mapping_required_flag_synthesizes_rule() {
        let mappings = vec![typed("Employee ID", DataType::String, true)];
        let engine = ValidationEngine::new(&[], &mappings).unwrap();
        let report = engine.validate(&[
            Row::new().with("Employee ID", "E1"),
            Row::new().with("Employee ID", "  "),
        ]);
        assert_eq!(report.summary.valid_rows, 1);
        assert_eq!(report.summary.error_rows, 1);
        assert_eq!(
            report.results[1].diagnostics[0].message,
            "Employee ID is required"
        );
    }

    #[test]
    fn diagnostics_follow_mapping_order() {
        let mappings = vec![
            typed("B", DataType::String, true),
            typed("A", DataType::String, true),
        ];
        let rules = vec![ValidationRule::required("C")];
        let engine = ValidationEngine::new(&rules, &mappings).unwrap();
        let result = engine.validate_row(0, &Row::new());
        let fields = result
            .diagnostics
            .iter()
            .map(|d| d.field.as_str())
            .collect::<Vec<_>>();
        assert_eq!(fields, vec!["B", "A", "C"]);
    }

    #[test]
    fn custom_rules_see_coerced_row() {
        let mappings = vec![
            typed("Hire Date", DataType::Date, false),
            typed("Termination Date", DataType::Date, false),
        ];
        let rules = vec![ValidationRule::compare_field(
            "Termination Date",
            crate::rules::Comparison::Ge,
            "Hire Date",
        )];
        let engine = ValidationEngine::new(&rules, &mappings).unwrap();
        let ok = Row::new()
            .with("Hire Date", "01/15/2020")
            .with("Termination Date", "2020-02-01");
        assert!(engine.validate_row(0, &ok).valid);
        let bad = Row::new()
            .with("Hire Date", "01/15/2020")
            .with("Termination Date", "2019-02-01");
        assert!(!engine.validate_row(0, &bad).valid);
    }

    #[test]
    fn external_diagnostics_invalidate_row() {
        let engine = ValidationEngine::new(&[], &[]).unwrap();
        let mut report = engine.validate(&[Row::new(), Row::new()]);
        assert_eq!(report.summary.valid_rows, 2);
        report.record_external_all([
            (
                1,
                Diagnostic {
                    field: "DOB".to_string(),
                    rule: RuleTag::Transform,
                    message: "cannot reformat 'x' as a date".to_string(),
                },
            ),
            (
                7,
                Diagnostic::new("DOB", RuleTag::Transform, "row does not exist".to_string()),
            ),
        ]);
        assert!(!report.is_valid(1));
        assert_eq!(report.summary.error_rows, 1);
        assert_eq!(report.summary.diagnostic_count, 1);
        assert_eq!(report.valid_row_indices().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn external_batch_covers_every_row() {
        let engine = ValidationEngine::new(&[], &[]).unwrap();
        let rows = vec![Row::new(); 20_000];
        let mut report = engine.validate(&rows);
        report.record_external_all((0..rows.len()).map(|idx| {
            (
                idx,
                Diagnostic::new("DOB", RuleTag::Transform, format!("row {idx} has no date")),
            )
        }));
        assert_eq!(report.summary.total_rows, 20_000);
        assert_eq!(report.summary.valid_rows, 0);
        assert_eq!(report.summary.diagnostic_count, 20_000);
    }
}
