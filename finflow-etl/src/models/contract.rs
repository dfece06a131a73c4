//! Schema contract definitions
//!
//! A contract is the governance-owned description of one data domain:
//! field types, validation rules, normalization and lookup enrichment.
//! Contracts are immutable once registered; edits produce a new version.

use finflow_common::config::SourceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared type of a contract field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    /// Calendar date, coerced to `YYYY-MM-DD`
    Date,
}

/// One validation rule; rules run in declaration order and the first
/// failure short-circuits with a recorded reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    /// Non-empty after normalization (strings)
    NonEmpty,
    /// Numeric value >= 0
    NonNegative,
    /// Numeric value >= min
    MinValue { min: f64 },
    /// Numeric value <= max
    MaxValue { max: f64 },
    /// String length <= limit
    MaxLength { limit: usize },
    /// Value must be one of the listed strings (after normalization)
    OneOf { values: Vec<String> },
}

/// One field of a schema contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
    /// Apply text standardization (trim, collapse whitespace,
    /// uppercase, strip accents) before coercion and rules
    #[serde(default)]
    pub normalize: bool,
    /// Post-normalization value aliases (e.g. legacy spellings)
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
}

/// Lookup enrichment: maps a source field's value to a derived
/// attribute. Unmatched keys warn and leave the target null; they do
/// not reject the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupDef {
    /// Attribute the key is read from
    pub source_field: String,
    /// Attribute the mapped value is written to
    pub target_field: String,
    /// Governance-maintained mapping, versioned with the contract
    pub map: BTreeMap<String, String>,
}

/// A named, versioned schema contract for one data domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaContract {
    pub domain: String,
    pub version: u32,
    /// Fields whose coerced values form the business key, in order
    pub business_key: Vec<String>,
    /// Numeric field aggregated into the forecast feature series
    #[serde(default)]
    pub measure_field: Option<String>,
    /// Tie-break order when sources supply the same business key at the
    /// same source timestamp; earlier wins
    #[serde(default)]
    pub source_priority: Vec<SourceKind>,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub lookups: Vec<LookupDef>,
}

impl SchemaContract {
    /// Parse a contract from its TOML definition file content
    pub fn from_toml(content: &str) -> finflow_common::Result<Self> {
        let contract: SchemaContract = toml::from_str(content)
            .map_err(|e| finflow_common::Error::Config(format!("Invalid contract: {}", e)))?;
        contract.check()?;
        Ok(contract)
    }

    /// Field definition by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Rank of a source in the tie-break order; unlisted sources rank
    /// after all listed ones.
    pub fn source_rank(&self, kind: SourceKind) -> usize {
        self.source_priority
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(self.source_priority.len())
    }

    fn check(&self) -> finflow_common::Result<()> {
        use finflow_common::Error;

        if self.business_key.is_empty() {
            return Err(Error::Config(format!(
                "Contract {} v{}: business_key is empty",
                self.domain, self.version
            )));
        }
        for key_field in &self.business_key {
            if self.field(key_field).is_none() {
                return Err(Error::Config(format!(
                    "Contract {} v{}: business_key field '{}' is not declared",
                    self.domain, self.version, key_field
                )));
            }
        }
        if let Some(measure) = &self.measure_field {
            match self.field(measure) {
                Some(def) if matches!(def.field_type, FieldType::Float | FieldType::Integer) => {}
                Some(_) => {
                    return Err(Error::Config(format!(
                        "Contract {} v{}: measure_field '{}' must be numeric",
                        self.domain, self.version, measure
                    )))
                }
                None => {
                    return Err(Error::Config(format!(
                        "Contract {} v{}: measure_field '{}' is not declared",
                        self.domain, self.version, measure
                    )))
                }
            }
        }
        for lookup in &self.lookups {
            if self.field(&lookup.source_field).is_none() {
                return Err(Error::Config(format!(
                    "Contract {} v{}: lookup source field '{}' is not declared",
                    self.domain, self.version, lookup.source_field
                )));
            }
        }
        Ok(())
    }
}
