//! Structured requirements produced by the requirement extractor.

use serde::{Deserialize, Serialize};

/// Data type requested for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Single-line text.
    Text,
    /// Multi-line text without a configurable length.
    TextArea,
    /// Long multi-line text.
    LongTextArea,
    /// Number with precision and scale.
    Number,
    /// Currency amount.
    Currency,
    /// Percentage.
    Percent,
    /// Boolean.
    Checkbox,
    /// Calendar date.
    Date,
    /// Date and time.
    DateTime,
    /// Email address.
    Email,
    /// Phone number.
    Phone,
    /// URL.
    Url,
    /// Single-select value list.
    Picklist,
    /// Multi-select value list.
    MultiselectPicklist,
    /// Reference to another container.
    Lookup,
}

impl FieldType {
    /// Returns true for numeric types that carry precision and scale.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Number | Self::Currency | Self::Percent)
    }

    /// Returns true for value-list types.
    #[must_use]
    pub fn is_picklist(&self) -> bool {
        matches!(self, Self::Picklist | Self::MultiselectPicklist)
    }
}

/// A requested field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRequirement {
    /// Human-readable label.
    pub label: String,
    /// Explicit API name; derived from the label when absent.
    #[serde(default)]
    pub api_name: Option<String>,
    /// Requested data type.
    pub field_type: FieldType,
    /// Owning container (object) named by the requirement.
    #[serde(default)]
    pub container: Option<String>,
    /// Free-text description.
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
    /// Values for picklist types.
    #[serde(default)]
    pub picklist_values: Vec<String>,
    /// Referenced container for lookups.
    #[serde(default)]
    pub reference_to: Option<String>,
    /// Default value expression.
    #[serde(default)]
    pub default_value: Option<String>,
}

impl FieldRequirement {
    /// Creates a field requirement with only label and type set.
    #[must_use]
    pub fn new(label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            label: label.into(),
            api_name: None,
            field_type,
            container: None,
            description: None,
            required: false,
            length: None,
            precision: None,
            scale: None,
            picklist_values: Vec::new(),
            reference_to: None,
            default_value: None,
        }
    }

    /// Sets the owning container.
    #[must_use]
    pub fn on(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Sets the explicit API name.
    #[must_use]
    pub fn with_api_name(mut self, api_name: impl Into<String>) -> Self {
        self.api_name = Some(api_name.into());
        self
    }

    /// Sets the text length.
    #[must_use]
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Sets the picklist values.
    #[must_use]
    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.picklist_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the lookup target.
    #[must_use]
    pub fn referencing(mut self, container: impl Into<String>) -> Self {
        self.reference_to = Some(container.into());
        self
    }

    /// Marks the field as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A requested validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRequirement {
    /// Rule name.
    pub name: String,
    /// Owning container named by the requirement.
    #[serde(default)]
    pub container: Option<String>,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Formula that evaluates to true when the record is invalid.
    pub condition: String,
    /// Message shown to the user when the rule fires.
    pub error_message: String,
    /// Field the message is attached to.
    #[serde(default)]
    pub error_field: Option<String>,
}

impl RuleRequirement {
    /// Creates a rule requirement.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        condition: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            container: None,
            description: None,
            condition: condition.into(),
            error_message: error_message.into(),
            error_field: None,
        }
    }

    /// Sets the owning container.
    #[must_use]
    pub fn on(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

/// Output of the requirement extractor for one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRequirements {
    /// Requested fields.
    #[serde(default)]
    pub fields: Vec<FieldRequirement>,
    /// Requested validation rules.
    #[serde(default)]
    pub validation_rules: Vec<RuleRequirement>,
    /// Advisory notes about unclear requirements.
    #[serde(default)]
    pub ambiguities: Vec<String>,
}

impl ExtractedRequirements {
    /// Creates an empty requirement set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field requirement.
    #[must_use]
    pub fn with_field(mut self, field: FieldRequirement) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a rule requirement.
    #[must_use]
    pub fn with_rule(mut self, rule: RuleRequirement) -> Self {
        self.validation_rules.push(rule);
        self
    }

    /// Adds an ambiguity note.
    #[must_use]
    pub fn with_ambiguity(mut self, note: impl Into<String>) -> Self {
        self.ambiguities.push(note.into());
        self
    }

    /// Appends another set. Ambiguities already present are not repeated.
    pub fn merge(&mut self, other: Self) {
        self.fields.extend(other.fields);
        self.validation_rules.extend(other.validation_rules);
        for note in other.ambiguities {
            if !self.ambiguities.contains(&note) {
                self.ambiguities.push(note);
            }
        }
    }

    /// Number of requirements (fields plus rules).
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len() + self.validation_rules.len()
    }

    /// Returns true when nothing was extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The text a run extracts requirements from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementSource {
    /// External reference (e.g. a ticket key).
    pub reference: String,
    /// Primary description text.
    pub text: String,
    /// Optional acceptance-criteria text.
    #[serde(default)]
    pub acceptance_criteria: Option<String>,
}

impl RequirementSource {
    /// Creates a source without acceptance criteria.
    #[must_use]
    pub fn new(reference: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            text: text.into(),
            acceptance_criteria: None,
        }
    }

    /// Sets the acceptance-criteria text.
    #[must_use]
    pub fn with_acceptance_criteria(mut self, text: impl Into<String>) -> Self {
        self.acceptance_criteria = Some(text.into());
        self
    }
}
