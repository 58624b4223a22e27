//! Engine configuration loaded from `--config FILE`.
//!
//! ```yaml
//! matcher:
//!   min_confidence: 60
//! parser:
//!   sheet: Census
//!   encoding: windows-1252
//! sql:
//!   audit_columns: false
//!   identifiers: quoted
//! ```
//!
//! Every section is optional; missing keys take their defaults.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    io_utils,
    matcher::MatchOptions,
    parser::ParseOptions,
    sql::{IdentifierStyle, SqlOptions},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub matcher: MatchOptions,
    pub parser: ParserConfig,
    pub sql: SqlConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub sheet: Option<String>,
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    pub audit_columns: bool,
    pub identifiers: IdentifierStyle,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            audit_columns: true,
            identifiers: IdentifierStyle::AsIs,
        }
    }
}

impl SqlConfig {
    pub fn options(&self, table: impl Into<String>) -> SqlOptions {
        SqlOptions {
            table: table.into(),
            audit_columns: self.audit_columns,
            identifiers: self.identifiers,
        }
    }
}

impl ParserConfig {
    pub fn parse_options(&self) -> Result<ParseOptions> {
        Ok(ParseOptions {
            encoding: io_utils::resolve_encoding(self.encoding.as_deref())?,
            sheet: self.sheet.clone(),
            ..ParseOptions::default()
        })
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Reading config {path:?}"))?;
        let config: EngineConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Parsing config YAML from {path:?}"))?;
        debug!("Loaded engine config from {path:?}: {config:?}");
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_take_defaults() {
        let config: EngineConfig = serde_yaml::from_str("matcher:\n  min_confidence: 65\n").unwrap();
        assert_eq!(config.matcher.min_confidence, 65);
        assert!(config.sql.audit_columns);
        assert_eq!(config.sql.identifiers, IdentifierStyle::AsIs);
        assert_eq!(config.parser, ParserConfig::default());
    }

    #[test]
    fn sql_section_feeds_options() {
        let config: EngineConfig =
            serde_yaml::from_str("sql:\n  audit_columns: false\n  identifiers: quoted\n").unwrap();
        let options = config.sql.options("members");
        assert_eq!(options.table, "members");
        assert!(!options.audit_columns);
        assert_eq!(options.identifiers, IdentifierStyle::Quoted);
    }

    #[test]
    fn parser_section_resolves_encoding() {
        let config = ParserConfig {
            sheet: Some("Census".to_string()),
            encoding: Some("windows-1252".to_string()),
        };
        let options = config.parse_options().unwrap();
        assert_eq!(options.encoding.name(), "windows-1252");
        assert_eq!(options.sheet.as_deref(), Some("Census"));

        let bad = ParserConfig {
            sheet: None,
            encoding: Some("klingon".to_string()),
        };
        assert!(bad.parse_options().is_err());
    }

    #[test]
    fn load_or_default_without_path() {
        assert_eq!(EngineConfig::load_or_default(None).unwrap(), EngineConfig::default());
    }
}
