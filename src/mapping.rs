//! Column mappings: the per-target entries the matcher proposes, manual
//! overrides on top of them, and their application to parsed rows.

use std::{collections::HashSet, str::FromStr};

use anyhow::anyhow;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    data::{DataType, Row, Value},
    parser::ParsedTable,
    transform::Transform,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "is_string_type")]
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<Transform>,
}

fn is_string_type(data_type: &DataType) -> bool {
    *data_type == DataType::String
}

impl ColumnMapping {
    pub fn unmapped(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: None,
            confidence: 0,
            data_type: DataType::String,
            required: false,
            description: None,
            transformation: None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.source.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("override names unknown target '{0}'")]
    UnknownTarget(String),
    #[error("override for '{target}' names unknown source '{source_name}'")]
    UnknownSource { target: String, source_name: String },
}

/// A manual correction: `Target=Source` assigns, `Target=` clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingOverride {
    pub target: String,
    pub source: Option<String>,
}

impl FromStr for MappingOverride {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (target, source) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("Override '{raw}' must look like TARGET=SOURCE"))?;
        let target = target.trim();
        if target.is_empty() {
            return Err(anyhow!("Override '{raw}' is missing a target column"));
        }
        let source = Some(source.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Self {
            target: target.to_string(),
            source,
        })
    }
}

/// Applies manual overrides. An assigned entry gets confidence 100; any other
/// entry that referenced the same source is unmapped so each source is still
/// used at most once.
pub fn apply_overrides(
    mappings: &[ColumnMapping],
    overrides: &[MappingOverride],
    sources: &[String],
) -> Result<Vec<ColumnMapping>, MappingError> {
    let mut updated = mappings.to_vec();
    for entry in overrides {
        let idx = updated
            .iter()
            .position(|m| m.target == entry.target)
            .ok_or_else(|| MappingError::UnknownTarget(entry.target.clone()))?;
        if let Some(source) = &entry.source {
            if !sources.contains(source) {
                return Err(MappingError::UnknownSource {
                    target: entry.target.clone(),
                    source_name: source.clone(),
                });
            }
            for (other_idx, other) in updated.iter_mut().enumerate() {
                if other_idx != idx && other.source.as_ref() == Some(source) {
                    warn!(
                        "'{}' released source '{source}' to manual override of '{}'",
                        other.target, entry.target
                    );
                    other.source = None;
                    other.confidence = 0;
                }
            }
        }
        updated[idx].source = entry.source.clone();
        updated[idx].confidence = if entry.source.is_some() { 100 } else { 0 };
    }
    Ok(updated)
}

/// Checks the one-entry-per-target and one-target-per-source invariants.
pub fn check_one_to_one(mappings: &[ColumnMapping]) -> Result<(), String> {
    let mut targets = HashSet::new();
    let mut sources = HashSet::new();
    for mapping in mappings {
        if !targets.insert(mapping.target.as_str()) {
            return Err(format!("target '{}' is mapped more than once", mapping.target));
        }
        if let Some(source) = mapping.source.as_deref()
            && !sources.insert(source)
        {
            return Err(format!("source '{source}' feeds more than one target"));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingIssue {
    pub row_index: usize,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub issues: Vec<MappingIssue>,
}

/// Builds target-shaped rows. Unmapped targets read as null before their
/// transformation runs, so a `concat` over source fields can still fill them.
/// A failed transformation keeps the untransformed value and is reported as a
/// [`MappingIssue`].
pub fn apply_mappings(table: &ParsedTable, mappings: &[ColumnMapping]) -> MappedTable {
    let headers = mappings.iter().map(|m| m.target.clone()).collect::<Vec<_>>();
    let mut issues = Vec::new();
    let rows = table
        .rows
        .iter()
        .enumerate()
        .map(|(row_index, source_row)| {
            let mut row = Row::with_capacity(mappings.len());
            for mapping in mappings {
                let raw = mapping
                    .source
                    .as_deref()
                    .map_or(Value::Null, |source| source_row.value(source).clone());
                let value = match &mapping.transformation {
                    Some(transform) => transform.apply(&raw, source_row).unwrap_or_else(|err| {
                        issues.push(MappingIssue {
                            row_index,
                            field: mapping.target.clone(),
                            message: err.to_string(),
                        });
                        raw
                    }),
                    None => raw,
                };
                row.insert(mapping.target.clone(), value);
            }
            row
        })
        .collect::<Vec<_>>();
    debug!(
        "Mapped {} row(s) onto {} target column(s) with {} issue(s)",
        rows.len(),
        headers.len(),
        issues.len()
    );
    MappedTable {
        headers,
        rows,
        issues,
    }
}
