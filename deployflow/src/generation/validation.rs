//! Local validation of generated units.
//!
//! Checks run before anything is submitted, so a package that would be
//! refused for structural reasons never reaches the gateway.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use super::ValidationReport;
use crate::core::{FieldType, FieldUnit, GeneratedUnit, UnitValidity, ValidationRuleUnit};

/// Maximum label length.
pub const MAX_LABEL_LENGTH: usize = 40;
/// Maximum length of a plain text field.
pub const MAX_TEXT_LENGTH: u32 = 255;
/// Bounds of a long text area.
pub const LONG_TEXT_LENGTH: std::ops::RangeInclusive<u32> = 256..=131_072;
/// Maximum numeric precision.
pub const MAX_PRECISION: u32 = 18;
/// Maximum rule error message length.
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 255;

static FIELD_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*\.[A-Za-z][A-Za-z0-9_]*__c$"));

static RULE_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*\.[A-Za-z][A-Za-z0-9_]*$"));

fn check_name(pattern: &LazyLock<Result<Regex, regex::Error>>, name: &str, errors: &mut Vec<String>) {
    match &**pattern {
        Ok(re) if re.is_match(name) => {}
        Ok(_) => errors.push(format!("invalid full name '{name}'")),
        Err(err) => errors.push(format!("name pattern unavailable: {err}")),
    }
}

/// Validates one unit in isolation.
#[must_use]
pub fn validate_unit(unit: &GeneratedUnit) -> UnitValidity {
    let errors = match unit {
        GeneratedUnit::Field(field) => field_errors(field),
        GeneratedUnit::ValidationRule(rule) => rule_errors(rule),
    };
    UnitValidity::from_errors(errors)
}

fn field_errors(unit: &FieldUnit) -> Vec<String> {
    let mut errors = Vec::new();
    let def = &unit.definition;
    check_name(&FIELD_NAME, &unit.full_name, &mut errors);

    let label_len = def.label.trim().chars().count();
    if label_len == 0 {
        errors.push("label is required".to_string());
    } else if label_len > MAX_LABEL_LENGTH {
        errors.push(format!("label exceeds {MAX_LABEL_LENGTH} characters"));
    }

    match def.field_type {
        FieldType::Text => match def.length {
            Some(length) if (1..=MAX_TEXT_LENGTH).contains(&length) => {}
            Some(length) => errors.push(format!(
                "text length {length} is outside 1..={MAX_TEXT_LENGTH}"
            )),
            None => errors.push("text fields require a length".to_string()),
        },
        FieldType::LongTextArea => match def.length {
            Some(length) if LONG_TEXT_LENGTH.contains(&length) => {}
            Some(length) => errors.push(format!(
                "long text length {length} is outside {}..={}",
                LONG_TEXT_LENGTH.start(),
                LONG_TEXT_LENGTH.end()
            )),
            None => errors.push("long text areas require a length".to_string()),
        },
        t if t.is_numeric() => match def.precision {
            Some(precision) if (1..=MAX_PRECISION).contains(&precision) => {
                if def.scale.unwrap_or(0) > precision {
                    errors.push(format!("scale exceeds precision {precision}"));
                }
            }
            Some(precision) => errors.push(format!(
                "precision {precision} is outside 1..={MAX_PRECISION}"
            )),
            None => errors.push("numeric fields require a precision".to_string()),
        },
        t if t.is_picklist() => {
            if def.picklist_values.is_empty() {
                errors.push("picklist fields require at least one value".to_string());
            }
            let mut seen = HashSet::new();
            for value in &def.picklist_values {
                if value.trim().is_empty() {
                    errors.push("picklist values must not be blank".to_string());
                } else if !seen.insert(value.to_lowercase()) {
                    errors.push(format!("duplicate picklist value '{value}'"));
                }
            }
        }
        FieldType::Lookup => {
            if def.reference_to.as_deref().map_or(true, |r| r.trim().is_empty()) {
                errors.push("lookup fields require a referenced container".to_string());
            }
        }
        FieldType::Checkbox => {
            if let Some(default) = &def.default_value {
                if !matches!(default.as_str(), "true" | "false") {
                    errors.push(format!("checkbox default '{default}' must be true or false"));
                }
            }
        }
        _ => {}
    }

    errors
}

fn rule_errors(unit: &ValidationRuleUnit) -> Vec<String> {
    let mut errors = Vec::new();
    let def = &unit.definition;
    check_name(&RULE_NAME, &unit.full_name, &mut errors);

    if def.condition_formula.trim().is_empty() {
        errors.push("condition formula is required".to_string());
    }
    let message_len = def.error_message.trim().chars().count();
    if message_len == 0 {
        errors.push("error message is required".to_string());
    } else if message_len > MAX_ERROR_MESSAGE_LENGTH {
        errors.push(format!(
            "error message exceeds {MAX_ERROR_MESSAGE_LENGTH} characters"
        ));
    }
    errors
}

/// Validates a batch: every unit on its own plus uniqueness of full names.
///
/// Errors are prefixed with the unit's full name.
#[must_use]
pub fn validate_units(units: &[GeneratedUnit]) -> ValidationReport {
    let mut errors = Vec::new();
    let mut names = HashSet::new();

    for unit in units {
        let validity = validate_unit(unit);
        errors.extend(
            validity
                .errors
                .iter()
                .map(|e| format!("{}: {e}", unit.full_name())),
        );
        if !names.insert(unit.full_name().to_lowercase()) {
            errors.push(format!("{}: duplicate full name", unit.full_name()));
        }
    }

    ValidationReport::from_errors(errors)
}
