//! Generated configuration units.
//!
//! Each unit kind carries its own definition schema; the enum is tagged by
//! kind when serialized so payloads stay self-describing in the run log.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::deployment::ComponentDescriptor;
use super::requirement::FieldType;

/// Component kind as understood by the configuration-management system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentKind {
    /// A field on a container.
    CustomField,
    /// A validation rule on a container.
    ValidationRule,
}

impl ComponentKind {
    /// Name used in package manifests.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomField => "CustomField",
            Self::ValidationRule => "ValidationRule",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of validating a single unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitValidity {
    /// True when `errors` is empty.
    pub is_valid: bool,
    /// Validation failures.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl UnitValidity {
    /// A valid result.
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    /// Builds a result from a list of failures.
    #[must_use]
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

impl Default for UnitValidity {
    fn default() -> Self {
        Self::valid()
    }
}

/// Definition payload of a field unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Display label.
    pub label: String,
    /// Data type.
    pub field_type: FieldType,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether a value is mandatory.
    #[serde(default)]
    pub required: bool,
    /// Text length.
    #[serde(default)]
    pub length: Option<u32>,
    /// Numeric precision.
    #[serde(default)]
    pub precision: Option<u32>,
    /// Numeric scale.
    #[serde(default)]
    pub scale: Option<u32>,
    /// Picklist values.
    #[serde(default)]
    pub picklist_values: Vec<String>,
    /// Lookup target container.
    #[serde(default)]
    pub reference_to: Option<String>,
    /// Default value expression.
    #[serde(default)]
    pub default_value: Option<String>,
}

/// Definition payload of a validation-rule unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRuleDefinition {
    /// Whether the rule is enforced.
    pub active: bool,
    /// Formula that evaluates to true for invalid records.
    pub condition_formula: String,
    /// Message shown when the rule fires.
    pub error_message: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Field the message is attached to.
    #[serde(default)]
    pub error_display_field: Option<String>,
}

/// A generated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUnit {
    /// `Container.Member` name.
    pub full_name: String,
    /// Field definition.
    pub definition: FieldDefinition,
    /// Validity computed at generation time.
    #[serde(default)]
    pub validity: UnitValidity,
}

/// A generated validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRuleUnit {
    /// `Container.Member` name.
    pub full_name: String,
    /// Rule definition.
    pub definition: ValidationRuleDefinition,
    /// Validity computed at generation time.
    #[serde(default)]
    pub validity: UnitValidity,
}

/// A deployable configuration unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeneratedUnit {
    /// A field.
    Field(FieldUnit),
    /// A validation rule.
    ValidationRule(ValidationRuleUnit),
}

impl GeneratedUnit {
    /// The fully-qualified `Container.Member` name.
    #[must_use]
    pub fn full_name(&self) -> &str {
        match self {
            Self::Field(unit) => &unit.full_name,
            Self::ValidationRule(unit) => &unit.full_name,
        }
    }

    /// The component kind this unit deploys as.
    #[must_use]
    pub fn component_kind(&self) -> ComponentKind {
        match self {
            Self::Field(_) => ComponentKind::CustomField,
            Self::ValidationRule(_) => ComponentKind::ValidationRule,
        }
    }

    /// The owning container, i.e. the part before the first dot.
    #[must_use]
    pub fn container(&self) -> Option<&str> {
        self.full_name().split_once('.').map(|(container, _)| container)
    }

    /// The validity record.
    #[must_use]
    pub fn validity(&self) -> &UnitValidity {
        match self {
            Self::Field(unit) => &unit.validity,
            Self::ValidationRule(unit) => &unit.validity,
        }
    }

    /// Replaces the validity record.
    pub fn set_validity(&mut self, validity: UnitValidity) {
        match self {
            Self::Field(unit) => unit.validity = validity,
            Self::ValidationRule(unit) => unit.validity = validity,
        }
    }

    /// Shortcut for `validity().is_valid`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validity().is_valid
    }

    /// The component this unit becomes once deployed.
    #[must_use]
    pub fn component(&self) -> ComponentDescriptor {
        ComponentDescriptor::new(self.component_kind(), self.full_name())
    }
}
