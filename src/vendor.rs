//! Vendor-specific output emission.
//!
//! A [`VendorOutputSpec`] picks, renames and transforms target fields into
//! the record shape one vendor expects. Only rows that passed validation are
//! eligible; every row left out is accounted for either in
//! [`VendorOutput::skipped_invalid`] or in [`VendorOutput::errors`].

use std::{io::Write, path::Path};

use anyhow::{Context, Result, bail};
use log::{debug, info};
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize};

use crate::{
    data::{Row, Value},
    io_utils::{self, DEFAULT_CSV_DELIMITER, DEFAULT_TSV_DELIMITER},
    rules::{RuleError, ValidationRule},
    transform::Transform,
    validate::{ValidationEngine, ValidationReport},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Tsv,
    Json,
    /// One worksheet named after the vendor; numbers, booleans and dates keep
    /// their cell types.
    Xlsx,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Tsv => "tsv",
            OutputFormat::Json => "json",
            OutputFormat::Xlsx => "xlsx",
        }
    }
}

const MAX_SHEET_NAME: usize = 31;

/// One output column: the target field it reads, the vendor's name for it,
/// and an optional transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorField {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
}

impl VendorField {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            output: None,
            transform: None,
        }
    }

    pub fn renamed(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn transformed(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn output_name(&self) -> &str {
        self.output.as_deref().unwrap_or(&self.field)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorOutputSpec {
    pub vendor_id: String,
    #[serde(default)]
    pub vendor_name: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub required_fields: Vec<String>,
    pub fields: Vec<VendorField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_rules: Vec<ValidationRule>,
}

impl VendorOutputSpec {
    pub fn display_name(&self) -> &str {
        if self.vendor_name.trim().is_empty() {
            &self.vendor_id
        } else {
            &self.vendor_name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VendorError {
    FieldMissing {
        row_index: usize,
        field: String,
    },
    TransformFailed {
        row_index: usize,
        field: String,
        message: String,
    },
    RuleFailed {
        row_index: usize,
        field: String,
        message: String,
    },
}

impl VendorError {
    pub fn row_index(&self) -> usize {
        match self {
            VendorError::FieldMissing { row_index, .. }
            | VendorError::TransformFailed { row_index, .. }
            | VendorError::RuleFailed { row_index, .. } => *row_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VendorRow {
    pub source_index: usize,
    pub row: Row,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VendorSummary {
    pub total_rows: usize,
    pub successful_rows: usize,
    pub error_rows: usize,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VendorOutput {
    pub vendor_id: String,
    pub vendor_name: String,
    pub output_format: OutputFormat,
    pub headers: Vec<String>,
    pub rows: Vec<VendorRow>,
    pub errors: Vec<VendorError>,
    pub skipped_invalid: Vec<usize>,
    pub summary: VendorSummary,
}

/// Compiled form of a [`VendorOutputSpec`].
#[derive(Debug, Clone)]
pub struct VendorEmitter<'a> {
    spec: &'a VendorOutputSpec,
    rules: ValidationEngine,
}

impl<'a> VendorEmitter<'a> {
    pub fn new(spec: &'a VendorOutputSpec) -> Result<Self, RuleError> {
        Ok(Self {
            spec,
            rules: ValidationEngine::new(&spec.validation_rules, &[])?,
        })
    }

    pub fn emit(&self, rows: &[Row], report: &ValidationReport) -> VendorOutput {
        let spec = self.spec;
        let headers = spec
            .fields
            .iter()
            .map(|f| f.output_name().to_string())
            .collect::<Vec<_>>();
        let mut output_rows = Vec::new();
        let mut errors = Vec::new();
        let mut skipped_invalid = Vec::new();

        for (row_index, row) in rows.iter().enumerate() {
            if !report.is_valid(row_index) {
                skipped_invalid.push(row_index);
                continue;
            }
            match self.shape_row(row_index, row) {
                Ok(shaped) => output_rows.push(VendorRow {
                    source_index: row_index,
                    row: shaped,
                }),
                Err(row_errors) => errors.extend(row_errors),
            }
        }

        let mut error_indices = errors.iter().map(VendorError::row_index).collect::<Vec<_>>();
        error_indices.dedup();
        let summary = VendorSummary {
            total_rows: rows.len(),
            successful_rows: output_rows.len(),
            error_rows: error_indices.len(),
            skipped_rows: skipped_invalid.len(),
        };
        info!(
            "{}: {} row(s) emitted, {} excluded by errors, {} skipped as invalid",
            spec.display_name(),
            summary.successful_rows,
            summary.error_rows,
            summary.skipped_rows
        );
        VendorOutput {
            vendor_id: spec.vendor_id.clone(),
            vendor_name: spec.display_name().to_string(),
            output_format: spec.output_format,
            headers,
            rows: output_rows,
            errors,
            skipped_invalid,
            summary,
        }
    }

    fn shape_row(&self, row_index: usize, row: &Row) -> Result<Row, Vec<VendorError>> {
        let missing = self
            .spec
            .required_fields
            .iter()
            .filter(|field| row.is_blank(field))
            .map(|field| VendorError::FieldMissing {
                row_index,
                field: field.clone(),
            })
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            debug!("Row {row_index} lacks {} vendor-required field(s)", missing.len());
            return Err(missing);
        }

        let check = self.rules.validate_row(row_index, row);
        if !check.valid {
            return Err(check
                .diagnostics
                .into_iter()
                .map(|d| VendorError::RuleFailed {
                    row_index,
                    field: d.field,
                    message: d.message,
                })
                .collect());
        }

        let mut shaped = Row::with_capacity(self.spec.fields.len());
        let mut failures = Vec::new();
        for field in &self.spec.fields {
            let value = row.value(&field.field);
            let value = match &field.transform {
                Some(transform) => match transform.apply(value, row) {
                    Ok(v) => v,
                    Err(err) => {
                        failures.push(VendorError::TransformFailed {
                            row_index,
                            field: field.field.clone(),
                            message: err.to_string(),
                        });
                        continue;
                    }
                },
                None => value.clone(),
            };
            shaped.insert(field.output_name(), value);
        }
        if failures.is_empty() {
            Ok(shaped)
        } else {
            Err(failures)
        }
    }
}

/// Compiles `spec` and emits in one step.
pub fn emit_vendor_output(
    rows: &[Row],
    report: &ValidationReport,
    spec: &VendorOutputSpec,
) -> Result<VendorOutput, RuleError> {
    Ok(VendorEmitter::new(spec)?.emit(rows, report))
}

impl VendorOutput {
    pub fn default_file_name(&self) -> String {
        format!("{}.{}", self.vendor_id, self.output_format.extension())
    }

    /// Renders the rows in the vendor's output format. Binary formats are
    /// only available through [`VendorOutput::to_bytes`].
    pub fn render(&self) -> Result<String> {
        match self.output_format {
            OutputFormat::Json => self.render_json(),
            OutputFormat::Csv => self.render_delimited(DEFAULT_CSV_DELIMITER),
            OutputFormat::Tsv => self.render_delimited(DEFAULT_TSV_DELIMITER),
            OutputFormat::Xlsx => bail!("{} output is a binary workbook", self.vendor_name),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self.output_format {
            OutputFormat::Xlsx => self.render_xlsx(),
            _ => self.render().map(String::into_bytes),
        }
    }

    pub fn write(&self, path: Option<&Path>) -> Result<()> {
        let written = match self.output_format {
            OutputFormat::Xlsx => self
                .render_xlsx()
                .and_then(|bytes| io_utils::write_bytes(path, &bytes)),
            OutputFormat::Json => io_utils::write_text(path, &self.render_json()?),
            OutputFormat::Csv => {
                self.write_delimited(io_utils::open_csv_writer(path, DEFAULT_CSV_DELIMITER)?)
            }
            OutputFormat::Tsv => {
                self.write_delimited(io_utils::open_csv_writer(path, DEFAULT_TSV_DELIMITER)?)
            }
        };
        written.with_context(|| format!("Writing {} output", self.vendor_name))
    }

    fn render_json(&self) -> Result<String> {
        let records = self.rows.iter().map(|r| &r.row).collect::<Vec<_>>();
        let mut rendered = serde_json::to_string_pretty(&records)?;
        rendered.push('\n');
        Ok(rendered)
    }

    fn render_delimited(&self, delimiter: u8) -> Result<String> {
        let mut builder = csv::WriterBuilder::new();
        builder.delimiter(delimiter);
        let mut buffer = Vec::new();
        self.write_delimited(builder.from_writer(&mut buffer))?;
        Ok(String::from_utf8(buffer)?)
    }

    fn render_xlsx(&self) -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        let datetime_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");
        let sheet = workbook.add_worksheet();
        sheet.set_name(sheet_name(&self.vendor_id))?;
        for (col, header) in self.headers.iter().enumerate() {
            sheet.write_string(0, column_number(col)?, header)?;
        }
        for (idx, vendor_row) in self.rows.iter().enumerate() {
            let row = u32::try_from(idx + 1).context("Too many rows for one worksheet")?;
            for (col, header) in self.headers.iter().enumerate() {
                let col = column_number(col)?;
                match vendor_row.row.value(header) {
                    Value::Null => continue,
                    Value::String(text) => sheet.write_string(row, col, text)?,
                    Value::Integer(n) => sheet.write_number(row, col, *n as f64)?,
                    Value::Float(n) => sheet.write_number(row, col, *n)?,
                    Value::Boolean(b) => sheet.write_boolean(row, col, *b)?,
                    Value::Date(date) => {
                        sheet.write_datetime_with_format(row, col, date, &date_format)?
                    }
                    Value::DateTime(stamp) => {
                        sheet.write_datetime_with_format(row, col, stamp, &datetime_format)?
                    }
                };
            }
        }
        Ok(workbook.save_to_buffer()?)
    }

    fn write_delimited<W: Write>(&self, mut writer: csv::Writer<W>) -> Result<()> {
        writer.write_record(&self.headers)?;
        for vendor_row in &self.rows {
            writer.write_record(
                self.headers
                    .iter()
                    .map(|header| vendor_row.row.value(header).as_display()),
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Worksheet names are capped at 31 characters and may not contain
/// `[ ] : * ? / \`.
fn sheet_name(vendor_id: &str) -> String {
    let cleaned = vendor_id
        .chars()
        .map(|ch| if "[]:*?/\\".contains(ch) { '_' } else { ch })
        .take(MAX_SHEET_NAME)
        .collect::<String>();
    let cleaned = cleaned.trim_matches('\'').trim();
    if cleaned.is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned.to_string()
    }
}

fn column_number(idx: usize) -> Result<u16> {
    u16::try_from(idx).context("Too many columns for one worksheet")
}
