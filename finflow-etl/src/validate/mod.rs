//! Validation & standardization stage
//!
//! Enforces a schema contract over a batch of raw records: text
//! standardization, type coercion, validation rules in declaration
//! order (first failure short-circuits), lookup enrichment and
//! deduplication. Rejection never blocks the batch; rejected records
//! are returned alongside accepted ones for the governance log.

pub mod normalize;

use crate::models::{
    FieldDef, FieldType, RawRecord, RecordStatus, SchemaContract, ValidatedRecord, ValidationRule,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Result of validating one batch
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub accepted: Vec<ValidatedRecord>,
    pub rejected: Vec<ValidatedRecord>,
    /// Records dropped as duplicates of an accepted record
    pub deduplicated: usize,
}

/// Contract enforcement engine for one domain
pub struct Validator {
    contract: SchemaContract,
}

impl Validator {
    pub fn new(contract: SchemaContract) -> Self {
        Self { contract }
    }

    pub fn contract(&self) -> &SchemaContract {
        &self.contract
    }

    /// Validate a batch: coerce, check, enrich, dedup.
    ///
    /// Records with the same (business key, source timestamp) are
    /// duplicates; the contract's source priority picks the survivor,
    /// latest ingestion winning among equals.
    pub fn validate_batch(&self, records: &[RawRecord]) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        let mut survivors: HashMap<(String, DateTime<Utc>), ValidatedRecord> = HashMap::new();

        for raw in records {
            match self.validate_record(raw) {
                Ok(validated) => {
                    let key = (validated.business_key.clone(), validated.source_timestamp);
                    match survivors.get(&key) {
                        Some(existing) if !self.replaces(&validated, existing) => {
                            outcome.deduplicated += 1;
                        }
                        Some(_) => {
                            outcome.deduplicated += 1;
                            survivors.insert(key, validated);
                        }
                        None => {
                            survivors.insert(key, validated);
                        }
                    }
                }
                Err(rejected) => {
                    tracing::warn!(
                        domain = %self.contract.domain,
                        record_id = %rejected.record_id,
                        reason = ?rejected.rejection(),
                        "Record rejected by contract"
                    );
                    outcome.rejected.push(rejected);
                }
            }
        }

        let mut accepted: Vec<ValidatedRecord> = survivors.into_values().collect();
        accepted.sort_by(|a, b| {
            a.source_timestamp
                .cmp(&b.source_timestamp)
                .then_with(|| a.business_key.cmp(&b.business_key))
        });
        outcome.accepted = accepted;
        outcome
    }

    /// Whether `candidate` wins the duplicate slot over `existing`
    fn replaces(&self, candidate: &ValidatedRecord, existing: &ValidatedRecord) -> bool {
        let candidate_rank = self.contract.source_rank(candidate.source);
        let existing_rank = self.contract.source_rank(existing.source);
        if candidate_rank != existing_rank {
            return candidate_rank < existing_rank;
        }
        candidate.ingested_at > existing.ingested_at
    }

    /// Validate one record against the contract
    pub fn validate_record(
        &self,
        raw: &RawRecord,
    ) -> std::result::Result<ValidatedRecord, ValidatedRecord> {
        let mut attributes: BTreeMap<String, Value> = BTreeMap::new();

        for field in &self.contract.fields {
            let coerced = match self.coerce_field(raw, field) {
                Ok(value) => value,
                Err((rule, reason)) => {
                    return Err(self.rejected(raw, &field.name, &rule, &reason));
                }
            };

            // Rules run in declaration order; nulls already passed the
            // nullability check, rules only see concrete values.
            if !coerced.is_null() {
                for rule in &field.rules {
                    if let Err((rule_id, reason)) = apply_rule(rule, &coerced) {
                        return Err(self.rejected(raw, &field.name, &rule_id, &reason));
                    }
                }
            }

            attributes.insert(field.name.clone(), coerced);
        }

        // Lookup enrichment: unmatched keys warn and stay null, the
        // record itself remains accepted (governance fixes the map).
        for lookup in &self.contract.lookups {
            let key = attributes
                .get(&lookup.source_field)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            let mapped = key.as_deref().and_then(|k| lookup.map.get(k));
            match mapped {
                Some(value) => {
                    attributes.insert(lookup.target_field.clone(), Value::String(value.clone()));
                }
                None => {
                    if let Some(k) = &key {
                        tracing::warn!(
                            domain = %self.contract.domain,
                            field = %lookup.source_field,
                            key = %k,
                            target = %lookup.target_field,
                            "Lookup key not found, target left null"
                        );
                    }
                    attributes.insert(lookup.target_field.clone(), Value::Null);
                }
            }
        }

        let business_key = self
            .contract
            .business_key
            .iter()
            .map(|name| value_as_key_part(attributes.get(name).unwrap_or(&Value::Null)))
            .collect::<Vec<_>>()
            .join("|");

        Ok(ValidatedRecord {
            record_id: raw.record_id,
            domain: raw.domain.clone(),
            contract_version: self.contract.version,
            source: raw.source,
            source_timestamp: raw.source_timestamp,
            business_key,
            attributes,
            status: RecordStatus::Accepted,
            ingested_at: raw.ingested_at,
        })
    }

    fn rejected(
        &self,
        raw: &RawRecord,
        field: &str,
        rule: &str,
        reason: &str,
    ) -> ValidatedRecord {
        ValidatedRecord {
            record_id: raw.record_id,
            domain: raw.domain.clone(),
            contract_version: self.contract.version,
            source: raw.source,
            source_timestamp: raw.source_timestamp,
            business_key: String::new(),
            attributes: BTreeMap::new(),
            status: RecordStatus::Rejected {
                field: field.to_string(),
                rule: rule.to_string(),
                reason: reason.to_string(),
            },
            ingested_at: raw.ingested_at,
        }
    }

    /// Pull a field from the payload, standardize and coerce it
    fn coerce_field(
        &self,
        raw: &RawRecord,
        field: &FieldDef,
    ) -> std::result::Result<Value, (String, String)> {
        let raw_value = lookup_payload(&raw.payload, &field.name);

        let raw_value = match raw_value {
            Some(v) if !v.is_null() => v.clone(),
            _ => {
                if field.nullable {
                    return Ok(Value::Null);
                }
                return Err((
                    "required".to_string(),
                    format!("Missing required field '{}'", field.name),
                ));
            }
        };

        // Standardization happens before coercion so "  1 500 " style
        // strings and accented enums both land in canonical form.
        let raw_value = match (&raw_value, field.normalize) {
            (Value::String(s), true) => {
                let standardized = normalize::standardize(s);
                let aliased = field
                    .aliases
                    .get(&standardized)
                    .cloned()
                    .unwrap_or(standardized);
                Value::String(aliased)
            }
            _ => raw_value,
        };

        coerce(&raw_value, field.field_type).map_err(|reason| ("type".to_string(), reason))
    }
}

/// Case-insensitive payload lookup; CSV headers arrive in whatever case
/// the export used.
fn lookup_payload<'a>(
    payload: &'a serde_json::Map<String, Value>,
    name: &str,
) -> Option<&'a Value> {
    payload
        .get(name)
        .or_else(|| payload.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v))
}

/// Coerce a JSON value to the declared field type
fn coerce(value: &Value, field_type: FieldType) -> std::result::Result<Value, String> {
    match field_type {
        FieldType::String => match value {
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(format!("Cannot coerce {} to string", other)),
        },
        FieldType::Integer => match value {
            Value::Number(n) if n.is_i64() => Ok(value.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                _ => Err(format!("Not an integer: {}", n)),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("Not an integer: '{}'", s)),
            other => Err(format!("Cannot coerce {} to integer", other)),
        },
        FieldType::Float => match value {
            Value::Number(n) => n
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| format!("Not a number: {}", n)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| format!("Not a number: '{}'", s)),
            other => Err(format!("Cannot coerce {} to float", other)),
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("Not a boolean: '{}'", s)),
            },
            other => Err(format!("Cannot coerce {} to boolean", other)),
        },
        FieldType::Date => match value {
            Value::String(s) => crate::adapters::parse_source_timestamp(s)
                .map(|dt| Value::String(dt.date_naive().format("%Y-%m-%d").to_string()))
                .map_err(|_| format!("Not a date: '{}'", s)),
            other => Err(format!("Cannot coerce {} to date", other)),
        },
    }
}

/// Apply one validation rule to a coerced value
fn apply_rule(rule: &ValidationRule, value: &Value) -> std::result::Result<(), (String, String)> {
    match rule {
        ValidationRule::NonEmpty => {
            if value.as_str().map(|s| s.is_empty()).unwrap_or(false) {
                return Err(("non_empty".to_string(), "Value is empty".to_string()));
            }
        }
        ValidationRule::NonNegative => {
            if let Some(n) = value.as_f64() {
                if n < 0.0 {
                    return Err((
                        "non_negative".to_string(),
                        format!("Value {} is negative", n),
                    ));
                }
            }
        }
        ValidationRule::MinValue { min } => {
            if let Some(n) = value.as_f64() {
                if n < *min {
                    return Err((
                        "min_value".to_string(),
                        format!("Value {} below minimum {}", n, min),
                    ));
                }
            }
        }
        ValidationRule::MaxValue { max } => {
            if let Some(n) = value.as_f64() {
                if n > *max {
                    return Err((
                        "max_value".to_string(),
                        format!("Value {} above maximum {}", n, max),
                    ));
                }
            }
        }
        ValidationRule::MaxLength { limit } => {
            if let Some(s) = value.as_str() {
                if s.chars().count() > *limit {
                    return Err((
                        "max_length".to_string(),
                        format!("Length {} exceeds limit {}", s.chars().count(), limit),
                    ));
                }
            }
        }
        ValidationRule::OneOf { values } => {
            if let Some(s) = value.as_str() {
                if !values.iter().any(|v| v == s) {
                    return Err((
                        "one_of".to_string(),
                        format!("'{}' not in allowed set", s),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn value_as_key_part(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
