//! SQL bootstrap rendering: one `CREATE TABLE IF NOT EXISTS` plus one
//! `INSERT` per row. Nothing is executed.

use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::data::{Row, Value};

const AUDIT_COLUMNS: &[&str] = &["created_at", "updated_at"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierStyle {
    /// Emit names verbatim; names that are not plain identifiers are flagged.
    #[default]
    AsIs,
    /// Wrap every name in ANSI double quotes.
    Quoted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlOptions {
    pub table: String,
    pub audit_columns: bool,
    pub identifiers: IdentifierStyle,
}

impl SqlOptions {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            audit_columns: true,
            identifiers: IdentifierStyle::AsIs,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SqlOutput {
    pub statements: String,
    /// Identifiers emitted verbatim that a database may reject or misread.
    pub flagged_identifiers: Vec<String>,
}

impl SqlOutput {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Renders a value as a SQL literal. Every non-null value becomes a quoted
/// string of its display form.
pub fn value_to_sql(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        other => format!("'{}'", other.as_display().replace('\'', "''")),
    }
}

/// Column list: every field name across `rows`, in first-seen order.
pub fn column_union(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .flat_map(Row::names)
        .unique()
        .map(str::to_string)
        .collect()
}

pub fn generate(rows: &[Row], options: &SqlOptions) -> SqlOutput {
    if rows.is_empty() {
        return SqlOutput::default();
    }
    let columns = column_union(rows);
    let mut flagged = Vec::new();
    let mut ident = |name: &str| match options.identifiers {
        IdentifierStyle::Quoted => quote_identifier(name),
        IdentifierStyle::AsIs => {
            if !is_plain_identifier(name) && !flagged.iter().any(|f| f == name) {
                warn!("Identifier '{name}' is not a plain SQL identifier; emitting it unchanged");
                flagged.push(name.to_string());
            }
            name.to_string()
        }
    };

    let table = ident(options.table.as_str());
    let rendered_columns = columns.iter().map(|c| ident(c.as_str())).collect::<Vec<_>>();

    let mut definitions = rendered_columns
        .iter()
        .map(|c| format!("  {c} TEXT"))
        .collect::<Vec<_>>();
    if options.audit_columns {
        for &audit in AUDIT_COLUMNS {
            if !columns.iter().any(|c| c == audit) {
                definitions.push(format!(
                    "  {} TIMESTAMP DEFAULT CURRENT_TIMESTAMP",
                    ident(audit)
                ));
            }
        }
    }

    let mut statements = Vec::with_capacity(rows.len() + 1);
    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n{}\n);",
        definitions.join(",\n")
    ));
    let column_list = rendered_columns.join(", ");
    for row in rows {
        let values = columns
            .iter()
            .map(|c| value_to_sql(row.value(c)))
            .join(", ");
        statements.push(format!(
            "INSERT INTO {table} ({column_list}) VALUES ({values});"
        ));
    }

    SqlOutput {
        statements: statements.join("\n"),
        flagged_identifiers: flagged,
    }
}
