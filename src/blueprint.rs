//! Blueprints: named, versioned bundles of column mappings, validation rules
//! and vendor output specs.
//!
//! A template is reusable across clients. An instance is created from a
//! template by copying its configuration at that moment and binding it to one
//! client/vendor pair; the instance records the template's id, version and
//! configuration fingerprint so later template edits can be detected, but it
//! never changes when the template does.

use std::{collections::HashSet, fs, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    io_utils,
    mapping::{self, ColumnMapping},
    rules::{RuleError, ValidationRule},
    transform::Transform,
    vendor::VendorOutputSpec,
};

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlueprintConfig {
    #[serde(default)]
    pub column_mappings: Vec<ColumnMapping>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub vendor_outputs: Vec<VendorOutputSpec>,
}

impl BlueprintConfig {
    pub fn targets(&self) -> Vec<String> {
        self.column_mappings
            .iter()
            .map(|m| m.target.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceBinding {
    pub template_id: String,
    pub template_version: u32,
    pub template_fingerprint: String,
    pub client_id: String,
    pub vendor_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Present on instances only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceBinding>,
    #[serde(default)]
    pub configuration: BlueprintConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("blueprint '{0}' is an instance; only templates can be instantiated")]
    NotATemplate(String),
    #[error("blueprint '{blueprint}' has no vendor output for '{vendor_id}'")]
    UnknownVendor { blueprint: String, vendor_id: String },
    #[error("blueprint '{blueprint}': {message}")]
    Inconsistent { blueprint: String, message: String },
    #[error("blueprint '{blueprint}' configuration cannot be fingerprinted: {source}")]
    Fingerprint {
        blueprint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("blueprint '{blueprint}': {source}")]
    Rule {
        blueprint: String,
        #[source]
        source: RuleError,
    },
}

impl Blueprint {
    pub fn template(
        name: impl Into<String>,
        configuration: BlueprintConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            category: None,
            version: 1,
            instance: None,
            configuration,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    pub fn is_template(&self) -> bool {
        self.instance.is_none()
    }

    /// SHA-256 over the JSON form of the configuration.
    pub fn fingerprint(&self) -> Result<String, BlueprintError> {
        let canonical =
            serde_json::to_vec(&self.configuration).map_err(|source| BlueprintError::Fingerprint {
                blueprint: self.name.clone(),
                source,
            })?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Checks the mapping invariants, that rules and vendor fields refer to
    /// mapped targets, and that every rule compiles.
    pub fn validate(&self) -> Result<(), BlueprintError> {
        let config = &self.configuration;
        mapping::check_one_to_one(&config.column_mappings)
            .map_err(|message| self.inconsistent(message))?;

        let targets = config
            .column_mappings
            .iter()
            .map(|m| m.target.as_str())
            .collect::<HashSet<_>>();
        let known = |field: &str| targets.is_empty() || targets.contains(field);

        for rule in &config.validation_rules {
            if !known(rule.field()) {
                return Err(self.inconsistent(format!("rule names unknown field '{}'", rule.field())));
            }
            rule.compile().map_err(|source| self.rule_error(source))?;
        }

        let mut vendor_ids = HashSet::new();
        for vendor in &config.vendor_outputs {
            if !vendor_ids.insert(vendor.vendor_id.as_str()) {
                return Err(self.inconsistent(format!(
                    "vendor '{}' is declared more than once",
                    vendor.vendor_id
                )));
            }
            let unknown = vendor
                .required_fields
                .iter()
                .chain(
                    vendor
                        .fields
                        .iter()
                        .filter(|f| !matches!(f.transform, Some(Transform::Constant { .. })))
                        .map(|f| &f.field),
                )
                .find(|field| !known(field.as_str()));
            if let Some(field) = unknown {
                return Err(self.inconsistent(format!(
                    "vendor '{}' names unknown field '{field}'",
                    vendor.vendor_id
                )));
            }
            for rule in &vendor.validation_rules {
                rule.compile().map_err(|source| self.rule_error(source))?;
            }
        }

        if let Some(binding) = &self.instance
            && config
                .vendor_outputs
                .iter()
                .any(|v| v.vendor_id != binding.vendor_id)
        {
            return Err(self.inconsistent(format!(
                "instance is bound to vendor '{}' but carries outputs for other vendors",
                binding.vendor_id
            )));
        }
        Ok(())
    }

    /// Creates an instance bound to `client_id` and `vendor_id` from a copy
    /// of this template's configuration. Vendor outputs for other vendors are
    /// dropped.
    pub fn instantiate(
        &self,
        name: Option<&str>,
        client_id: &str,
        vendor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Blueprint, BlueprintError> {
        if !self.is_template() {
            return Err(BlueprintError::NotATemplate(self.name.clone()));
        }
        let mut configuration = self.configuration.clone();
        if !configuration.vendor_outputs.is_empty() {
            configuration
                .vendor_outputs
                .retain(|v| v.vendor_id == vendor_id);
            if configuration.vendor_outputs.is_empty() {
                return Err(BlueprintError::UnknownVendor {
                    blueprint: self.name.clone(),
                    vendor_id: vendor_id.to_string(),
                });
            }
        }
        let instance = Blueprint {
            id: Uuid::new_v4().to_string(),
            name: name
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} ({client_id} / {vendor_id})", self.name)),
            description: self.description.clone(),
            category: self.category.clone(),
            version: 1,
            instance: Some(InstanceBinding {
                template_id: self.id.clone(),
                template_version: self.version,
                template_fingerprint: self.fingerprint()?,
                client_id: client_id.to_string(),
                vendor_id: vendor_id.to_string(),
            }),
            configuration,
            created_at: Some(now),
            updated_at: Some(now),
        };
        info!(
            "Instantiated '{}' from template '{}' v{}",
            instance.name, self.name, self.version
        );
        Ok(instance)
    }

    /// True when `template` is still the version and content this instance
    /// was copied from.
    pub fn matches_template(&self, template: &Blueprint) -> Result<bool, BlueprintError> {
        let Some(binding) = &self.instance else {
            return Ok(false);
        };
        Ok(binding.template_id == template.id
            && binding.template_version == template.version
            && binding.template_fingerprint == template.fingerprint()?)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing blueprint to YAML")
    }

    /// Loads a blueprint from YAML, or JSON when the extension is `.json`,
    /// and validates it.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Reading blueprint {path:?}"))?;
        let blueprint: Blueprint = if io_utils::extension(path).as_deref() == Some("json") {
            serde_json::from_str(&contents)
                .with_context(|| format!("Parsing blueprint JSON from {path:?}"))?
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Parsing blueprint YAML from {path:?}"))?
        };
        blueprint
            .validate()
            .with_context(|| format!("Validating blueprint {path:?}"))?;
        Ok(blueprint)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let rendered = if io_utils::extension(path).as_deref() == Some("json") {
            let mut json =
                serde_json::to_string_pretty(self).context("Serializing blueprint to JSON")?;
            json.push('\n');
            json
        } else {
            self.to_yaml_string()?
        };
        io_utils::write_text(Some(path), &rendered)
    }

    fn inconsistent(&self, message: String) -> BlueprintError {
        BlueprintError::Inconsistent {
            blueprint: self.name.clone(),
            message,
        }
    }

    fn rule_error(&self, source: RuleError) -> BlueprintError {
        BlueprintError::Rule {
            blueprint: self.name.clone(),
            source,
        }
    }
}
