//! Tabular parser.
//!
//! Normalizes delimited text or spreadsheet bytes into a header list and an
//! ordered sequence of [`Row`]s. Text values are trimmed and otherwise left
//! untyped; spreadsheet cells keep their native numeric, boolean, and date
//! types. Blank lines are skipped so no all-null rows are produced.

use std::{collections::HashSet, io::Cursor, path::Path};

use anyhow::Context;
use calamine::{Data, Reader, open_workbook_auto_from_rs};
use chrono::Timelike;
use encoding_rs::{Encoding, UTF_8};
use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

use crate::{
    data::{Row, Value},
    io_utils,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Delimited { delimiter: u8 },
    Spreadsheet,
}

impl FileFormat {
    pub fn from_path(path: &Path, delimiter: Option<u8>) -> Self {
        if io_utils::is_spreadsheet_path(path) {
            FileFormat::Spreadsheet
        } else {
            FileFormat::Delimited {
                delimiter: io_utils::resolve_input_delimiter(path, delimiter),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub encoding: &'static Encoding,
    /// Worksheet to read; the first sheet when unset.
    pub sheet: Option<String>,
    /// Accept a header row with no data rows. Template generation reads
    /// master files that carry headers only.
    pub allow_header_only: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            encoding: UTF_8,
            sheet: None,
            allow_header_only: false,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("input is not valid {encoding} text")]
    Encoding { encoding: &'static str },
    #[error("malformed delimited text at line {line}: {message}")]
    Malformed { line: u64, message: String },
    #[error("unreadable spreadsheet: {0}")]
    Workbook(String),
    #[error("worksheet '{0}' not found")]
    SheetNotFound(String),
    #[error("header row is missing")]
    MissingHeader,
    #[error("duplicate header '{name}' in column {column}")]
    DuplicateHeader { name: String, column: usize },
    #[error("file contains no data rows")]
    NoDataRows,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl ParsedTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.iter().map(move |row| row.value(name))
    }
}

pub fn parse_bytes(
    bytes: &[u8],
    format: FileFormat,
    options: &ParseOptions,
) -> Result<ParsedTable, ParseError> {
    let table = match format {
        FileFormat::Delimited { delimiter } => parse_delimited(bytes, delimiter, options.encoding)?,
        FileFormat::Spreadsheet => parse_spreadsheet(bytes, options.sheet.as_deref())?,
    };
    if table.rows.is_empty() && !options.allow_header_only {
        return Err(ParseError::NoDataRows);
    }
    debug!(
        "Parsed {} row(s) across {} column(s)",
        table.rows.len(),
        table.headers.len()
    );
    Ok(table)
}

/// Reads `path` (or stdin for `-`) and parses it with the format implied by
/// its extension.
pub fn load_table(
    path: &Path,
    delimiter: Option<u8>,
    options: &ParseOptions,
) -> anyhow::Result<ParsedTable> {
    let bytes = io_utils::read_input_bytes(path)?;
    let format = FileFormat::from_path(path, delimiter);
    parse_bytes(&bytes, format, options).with_context(|| format!("Parsing {path:?}"))
}

fn parse_delimited(
    bytes: &[u8],
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<ParsedTable, ParseError> {
    let text = io_utils::decode_bytes(bytes, encoding).map_err(|_| ParseError::Encoding {
        encoding: encoding.name(),
    })?;
    let mut reader = io_utils::open_csv_reader(text.as_bytes(), delimiter);
    let raw_headers = reader
        .headers()
        .map_err(|err| malformed(&err, 1))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    if raw_headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ParseError::MissingHeader);
    }
    let headers = normalize_headers(raw_headers)?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|err| malformed(&err, 0))?;
        let line = record.position().map_or(0, |pos| pos.line());
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.len() > headers.len() {
            return Err(ParseError::Malformed {
                line,
                message: format!(
                    "expected {} field(s) but found {}",
                    headers.len(),
                    record.len()
                ),
            });
        }
        let mut row = Row::with_capacity(headers.len());
        for (idx, header) in headers.iter().enumerate() {
            let value = record.get(idx).map_or(Value::Null, text_value);
            row.insert(header.clone(), value);
        }
        rows.push(row);
    }
    Ok(ParsedTable { headers, rows })
}

fn malformed(err: &csv::Error, fallback_line: u64) -> ParseError {
    let line = err
        .position()
        .map_or(fallback_line, |position| position.line());
    ParseError::Malformed {
        line,
        message: err.to_string(),
    }
}

fn parse_spreadsheet(bytes: &[u8], sheet: Option<&str>) -> Result<ParsedTable, ParseError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|err| ParseError::Workbook(err.to_string()))?;
    let names = workbook.sheet_names();
    let sheet_name = match sheet {
        Some(requested) => names
            .iter()
            .find(|name| name.as_str() == requested)
            .cloned()
            .ok_or_else(|| ParseError::SheetNotFound(requested.to_string()))?,
        None => names
            .first()
            .cloned()
            .ok_or_else(|| ParseError::Workbook("workbook has no worksheets".to_string()))?,
    };
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|err| ParseError::Workbook(err.to_string()))?;

    let mut sheet_rows = range
        .rows()
        .skip_while(|cells| cells.iter().all(|cell| cell_value(cell).is_empty()));
    let header_cells = sheet_rows.next().ok_or(ParseError::MissingHeader)?;
    let headers = normalize_headers(
        header_cells
            .iter()
            .map(|cell| cell_value(cell).as_display())
            .collect(),
    )?;

    let mut rows = Vec::new();
    for cells in sheet_rows {
        let values = cells.iter().map(cell_value).collect::<Vec<_>>();
        if values.iter().all(Value::is_empty) {
            continue;
        }
        let row = headers
            .iter()
            .cloned()
            .zip(values.into_iter().chain(std::iter::repeat(Value::Null)))
            .collect::<Row>();
        rows.push(row);
    }
    debug!("Read worksheet '{sheet_name}'");
    Ok(ParsedTable { headers, rows })
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => text_value(s),
        Data::Int(i) => Value::Integer(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Boolean(*b),
        Data::DateTime(excel) => match excel.as_datetime() {
            Some(dt) if dt.time().num_seconds_from_midnight() == 0 => Value::Date(dt.date()),
            Some(dt) => Value::DateTime(dt),
            None => Value::Float(excel.as_f64()),
        },
        Data::Error(err) => Value::String(err.to_string()),
    }
}

fn text_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::String(trimmed.to_string())
    }
}

fn normalize_headers(raw: Vec<String>) -> Result<Vec<String>, ParseError> {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut headers = Vec::with_capacity(raw.len());
    for (idx, header) in raw.into_iter().enumerate() {
        let trimmed = header.trim();
        let name = if trimmed.is_empty() {
            let synthetic = format!("column_{}", idx + 1);
            warn!("Header in column {} is blank; using '{synthetic}'", idx + 1);
            synthetic
        } else {
            trimmed.to_string()
        };
        if !seen.insert(name.clone()) {
            return Err(ParseError::DuplicateHeader {
                name,
                column: idx + 1,
            });
        }
        headers.push(name);
    }
    Ok(headers)
}
