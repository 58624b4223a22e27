//! Parser output → matcher → mapping → validation → vendor outputs → SQL.
//!
//! [`run_pipeline`] is a pure function of its inputs: it never reads files and
//! keeps no state between calls.

use log::info;
use serde::Serialize;
use thiserror::Error;

use crate::{
    blueprint::BlueprintConfig,
    config::EngineConfig,
    data::Row,
    mapping::{self, MappedTable, MappingError, MappingOverride},
    matcher::{self, MatchReport},
    parser::ParsedTable,
    rules::{RuleError, RuleTag},
    sql::{self, SqlOutput},
    validate::{Diagnostic, ValidationEngine, ValidationReport},
    vendor::{self, VendorOutput},
};

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub overrides: Vec<MappingOverride>,
    /// Render SQL for the valid rows into this table when set.
    pub sql_table: Option<String>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Rule(#[from] RuleError),
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub matching: MatchReport,
    pub mapped: MappedTable,
    pub validation: ValidationReport,
    pub vendor_outputs: Vec<VendorOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<SqlOutput>,
}

impl PipelineReport {
    pub fn valid_rows(&self) -> Vec<Row> {
        self.validation
            .valid_row_indices()
            .filter_map(|idx| self.mapped.rows.get(idx).cloned())
            .collect()
    }
}

/// Maps the parsed rows onto the blueprint's targets and validates them.
/// Without saved mappings every source header maps onto itself.
pub fn map_and_validate(
    table: &ParsedTable,
    config: &EngineConfig,
    blueprint: &BlueprintConfig,
    overrides: &[MappingOverride],
) -> Result<(MatchReport, MappedTable, ValidationReport), PipelineError> {
    let mut matching = if blueprint.column_mappings.is_empty() {
        matcher::match_headers(&table.headers, &table.headers, &config.matcher)
    } else {
        matcher::resolve_saved(&table.headers, &blueprint.column_mappings, &config.matcher)
    };
    if !overrides.is_empty() {
        matching.mappings = mapping::apply_overrides(&matching.mappings, overrides, &table.headers)?;
    }

    let mapped = mapping::apply_mappings(table, &matching.mappings);
    let engine = ValidationEngine::new(&blueprint.validation_rules, &matching.mappings)?;
    let mut validation = engine.validate(&mapped.rows);
    validation.record_external_all(mapped.issues.iter().map(|issue| {
        (
            issue.row_index,
            Diagnostic::new(&issue.field, RuleTag::Transform, issue.message.clone()),
        )
    }));
    Ok((matching, mapped, validation))
}

pub fn run_pipeline(
    table: &ParsedTable,
    config: &EngineConfig,
    blueprint: &BlueprintConfig,
    options: &PipelineOptions,
) -> Result<PipelineReport, PipelineError> {
    let (matching, mapped, validation) =
        map_and_validate(table, config, blueprint, &options.overrides)?;

    let vendor_outputs = blueprint
        .vendor_outputs
        .iter()
        .map(|spec| vendor::emit_vendor_output(&mapped.rows, &validation, spec))
        .collect::<Result<Vec<_>, _>>()?;

    let mut report = PipelineReport {
        matching,
        mapped,
        validation,
        vendor_outputs,
        sql: None,
    };
    if let Some(table_name) = &options.sql_table {
        report.sql = Some(sql::generate(
            &report.valid_rows(),
            &config.sql.options(table_name.as_str()),
        ));
    }

    info!(
        "Pipeline finished: {}/{} target(s) mapped, {} of {} row(s) valid, {} vendor output(s)",
        report.matching.mapped_count(),
        report.matching.mappings.len(),
        report.validation.summary.valid_rows,
        report.validation.summary.total_rows,
        report.vendor_outputs.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::Value,
        mapping::ColumnMapping,
        rules::ValidationRule,
        vendor::{VendorField, VendorOutputSpec},
    };

    fn table() -> ParsedTable {
        ParsedTable {
            headers: vec!["EEID".to_string(), "Mail".to_string(), "Birth Date".to_string()],
            rows: vec![
                Row::new()
                    .with("EEID", "E1")
                    .with("Mail", "a@example.com")
                    .with("Birth Date", "1990-01-02"),
                Row::new()
                    .with("EEID", "E2")
                    .with("Mail", Value::Null)
                    .with("Birth Date", "garbage"),
            ],
        }
    }

    fn blueprint() -> BlueprintConfig {
        let mut id = ColumnMapping::unmapped("Employee ID");
        id.source = Some("EEID".to_string());
        let mut email = ColumnMapping::unmapped("Email");
        email.source = Some("Mail".to_string());
        let mut dob = ColumnMapping::unmapped("Date of Birth");
        dob.transformation = Some("date:%m/%d/%Y".parse().unwrap());
        BlueprintConfig {
            column_mappings: vec![id, email, dob],
            validation_rules: vec![ValidationRule::required("Email")],
            vendor_outputs: vec![VendorOutputSpec {
                vendor_id: "acme".to_string(),
                vendor_name: "Acme".to_string(),
                output_format: Default::default(),
                required_fields: vec!["Employee ID".to_string()],
                fields: vec![VendorField::new("Employee ID").renamed("member")],
                validation_rules: Vec::new(),
            }],
        }
    }

    #[test]
    fn runs_every_stage() {
        let options = PipelineOptions {
            overrides: Vec::new(),
            sql_table: Some("enrollment".to_string()),
        };
        let report =
            run_pipeline(&table(), &EngineConfig::default(), &blueprint(), &options).unwrap();

        let dob = &report.matching.mappings[2];
        assert_eq!(dob.source.as_deref(), Some("Birth Date"));
        assert_eq!(report.mapped.rows[0].value("Date of Birth"), &Value::text("01/02/1990"));

        assert_eq!(report.validation.summary.valid_rows, 1);
        let bad = &report.validation.results[1].diagnostics;
        assert!(bad.iter().any(|d| d.rule == RuleTag::Required));
        assert!(bad.iter().any(|d| d.rule == RuleTag::Transform));

        assert_eq!(report.vendor_outputs[0].rows.len(), 1);
        assert_eq!(report.vendor_outputs[0].skipped_invalid, vec![1]);

        let sql = report.sql.as_ref().unwrap();
        assert!(sql.statements.contains("'E1'"));
        assert!(!sql.statements.contains("'E2'"));
    }

    #[test]
    fn overrides_apply_before_validation() {
        let options = PipelineOptions {
            overrides: vec!["Email=".parse().unwrap()],
            sql_table: None,
        };
        let report =
            run_pipeline(&table(), &EngineConfig::default(), &blueprint(), &options).unwrap();
        assert!(report.matching.mappings[1].source.is_none());
        assert_eq!(report.validation.summary.valid_rows, 0);
        assert!(report.sql.is_none());
    }

    #[test]
    fn empty_blueprint_maps_headers_onto_themselves() {
        let report = run_pipeline(
            &table(),
            &EngineConfig::default(),
            &BlueprintConfig::default(),
            &PipelineOptions::default(),
        )
        .unwrap();
        assert_eq!(report.mapped.headers, vec!["EEID", "Mail", "Birth Date"]);
        assert!(report.matching.mappings.iter().all(|m| m.confidence == 100));
    }
}
