//! Deterministic metadata generator.

use async_trait::async_trait;

use super::validation::{validate_unit, MAX_LABEL_LENGTH};
use super::{FieldRequest, MetadataGenerator, RuleRequest};
use crate::core::{
    FieldDefinition, FieldType, FieldUnit, GeneratedUnit, UnitValidity, ValidationRuleDefinition,
    ValidationRuleUnit,
};
use crate::errors::DeployError;

const DEFAULT_TEXT_LENGTH: u32 = 255;
const DEFAULT_LONG_TEXT_LENGTH: u32 = 32_768;
const DEFAULT_PRECISION: u32 = 18;

/// Derives an API name from a label.
///
/// Runs of non-alphanumeric characters become one underscore, leading and
/// trailing underscores are dropped, a leading digit gets an `X` prefix and
/// the result is cut to the label length limit.
///
/// ```
/// use deployflow::generation::derive_api_name;
///
/// assert_eq!(derive_api_name("Customer Tier"), "Customer_Tier");
/// assert_eq!(derive_api_name("  % of revenue!"), "of_revenue");
/// ```
#[must_use]
pub fn derive_api_name(label: &str) -> String {
    let mut name = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }

    let mut name = name.trim_matches('_').to_string();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, 'X');
    }
    name.truncate(MAX_LABEL_LENGTH);
    name.trim_end_matches('_').to_string()
}

fn require_container(container: &str, requirement: &str) -> Result<String, DeployError> {
    let container = container.trim();
    if container.is_empty() {
        return Err(DeployError::generation(requirement, "no owning container"));
    }
    Ok(container.to_string())
}

/// Builds units directly from requirement fields, without any external
/// service.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMetadataGenerator;

impl StandardMetadataGenerator {
    /// Creates the generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetadataGenerator for StandardMetadataGenerator {
    async fn generate_field(&self, request: &FieldRequest) -> Result<GeneratedUnit, DeployError> {
        let req = &request.requirement;
        let container = require_container(&request.container, &req.label)?;
        let source = req
            .api_name
            .as_deref()
            .map_or(req.label.as_str(), |name| name.trim_end_matches("__c"));
        let api_name = derive_api_name(source);
        if api_name.is_empty() {
            return Err(DeployError::generation(
                &req.label,
                "label does not yield a usable API name",
            ));
        }

        let (length, precision, scale) = match req.field_type {
            FieldType::Text => (req.length.or(Some(DEFAULT_TEXT_LENGTH)), None, None),
            FieldType::LongTextArea => (req.length.or(Some(DEFAULT_LONG_TEXT_LENGTH)), None, None),
            FieldType::Number => (
                None,
                req.precision.or(Some(DEFAULT_PRECISION)),
                req.scale.or(Some(0)),
            ),
            t if t.is_numeric() => (
                None,
                req.precision.or(Some(DEFAULT_PRECISION)),
                req.scale.or(Some(2)),
            ),
            _ => (None, None, None),
        };

        let mut unit = GeneratedUnit::Field(FieldUnit {
            full_name: format!("{container}.{api_name}__c"),
            definition: FieldDefinition {
                label: req.label.trim().to_string(),
                field_type: req.field_type,
                description: req.description.clone(),
                required: req.required,
                length,
                precision,
                scale,
                picklist_values: req.picklist_values.clone(),
                reference_to: req.reference_to.clone(),
                default_value: req.default_value.clone(),
            },
            validity: UnitValidity::valid(),
        });
        unit.set_validity(validate_unit(&unit));
        Ok(unit)
    }

    async fn generate_rule(&self, request: &RuleRequest) -> Result<GeneratedUnit, DeployError> {
        let req = &request.requirement;
        let container = require_container(&request.container, &req.name)?;
        let name = derive_api_name(&req.name);
        if name.is_empty() {
            return Err(DeployError::generation(
                &req.name,
                "rule name does not yield a usable API name",
            ));
        }

        let mut unit = GeneratedUnit::ValidationRule(ValidationRuleUnit {
            full_name: format!("{container}.{name}"),
            definition: ValidationRuleDefinition {
                active: true,
                condition_formula: req.condition.trim().to_string(),
                error_message: req.error_message.trim().to_string(),
                description: req.description.clone(),
                error_display_field: req.error_field.clone(),
            },
            validity: UnitValidity::valid(),
        });
        unit.set_validity(validate_unit(&unit));
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldRequirement, RuleRequirement};

    fn field_request(requirement: FieldRequirement) -> FieldRequest {
        FieldRequest {
            requirement,
            container: "Account".to_string(),
        }
    }

    #[test]
    fn test_derive_api_name() {
        assert_eq!(derive_api_name("Customer Tier"), "Customer_Tier");
        assert_eq!(derive_api_name("Annual  Revenue (USD)"), "Annual_Revenue_USD");
        assert_eq!(derive_api_name("2024 Target"), "X2024_Target");
        assert_eq!(derive_api_name("!!!"), "");
        assert_eq!(derive_api_name(&"a".repeat(60)).len(), MAX_LABEL_LENGTH);
    }

    #[tokio::test]
    async fn test_text_field_gets_default_length() {
        let unit = StandardMetadataGenerator::new()
            .generate_field(&field_request(FieldRequirement::new("Customer Tier", FieldType::Text)))
            .await
            .unwrap();

        assert_eq!(unit.full_name(), "Account.Customer_Tier__c");
        assert!(unit.is_valid());
        match unit {
            GeneratedUnit::Field(field) => assert_eq!(field.definition.length, Some(255)),
            GeneratedUnit::ValidationRule(_) => panic!("expected a field"),
        }
    }

    #[tokio::test]
    async fn test_explicit_api_name_wins() {
        let requirement =
            FieldRequirement::new("Score", FieldType::Currency).with_api_name("Deal_Score__c");
        let unit = StandardMetadataGenerator::new()
            .generate_field(&field_request(requirement))
            .await
            .unwrap();

        assert_eq!(unit.full_name(), "Account.Deal_Score__c");
        match unit {
            GeneratedUnit::Field(field) => {
                assert_eq!(field.definition.precision, Some(18));
                assert_eq!(field.definition.scale, Some(2));
            }
            GeneratedUnit::ValidationRule(_) => panic!("expected a field"),
        }
    }

    #[tokio::test]
    async fn test_invalid_definition_is_flagged_not_rejected() {
        let unit = StandardMetadataGenerator::new()
            .generate_field(&field_request(FieldRequirement::new("Tier", FieldType::Picklist)))
            .await
            .unwrap();

        assert!(!unit.is_valid());
        assert!(unit.validity().errors[0].contains("at least one value"));
    }

    #[tokio::test]
    async fn test_unusable_label_is_generation_error() {
        let err = StandardMetadataGenerator::new()
            .generate_field(&field_request(FieldRequirement::new("???", FieldType::Text)))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Generation { .. }));
    }

    #[tokio::test]
    async fn test_rule_generation() {
        let request = RuleRequest {
            requirement: RuleRequirement::new(
                "Tier Required",
                "ISBLANK(Customer_Tier__c)",
                "Customer tier is required",
            ),
            container: "Account".to_string(),
        };

        let unit = StandardMetadataGenerator::new()
            .generate_rule(&request)
            .await
            .unwrap();

        assert_eq!(unit.full_name(), "Account.Tier_Required");
        assert!(unit.is_valid());
    }

    #[tokio::test]
    async fn test_blank_container_is_generation_error() {
        let request = FieldRequest {
            requirement: FieldRequirement::new("Tier", FieldType::Text),
            container: "  ".to_string(),
        };

        let err = StandardMetadataGenerator::new()
            .generate_field(&request)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no owning container"));
    }
}
