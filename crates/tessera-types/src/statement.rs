//! Group attribute statements.
//!
//! A statement belongs to exactly one group and synthesizes (or overrides) an
//! attribute for the group's members when its condition holds. A statement
//! may redirect its output to another group on the same root-to-leaf chain
//! via `extra_attributes_group`.

use serde::{Deserialize, Serialize};

use crate::GroupPath;
use crate::attribute::Attribute;

/// How a statement result is reconciled with an existing attribute of the
/// same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    /// Keep the existing attribute, discard the statement result.
    #[default]
    Skip,
    /// Replace the existing attribute with the statement result.
    Overwrite,
    /// Append statement values not already present.
    Merge,
}

/// What a statement assigns when its condition holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementAssignment {
    /// A literal attribute.
    Fixed { attribute: Attribute },
    /// Values computed by an expression, bound to a named attribute type.
    Dynamic {
        attribute_type: String,
        expression: String,
    },
}

/// Errors in a statement definition, detected before any evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatementDefinitionError {
    #[error("statement condition must not be empty")]
    EmptyCondition,

    #[error("statement assigns neither a fixed nor a dynamic attribute")]
    MissingAssignment,

    #[error("statement declares both a fixed and a dynamic attribute")]
    ConflictingAssignment,

    #[error("dynamic statement is missing its {0}")]
    IncompleteDynamic(&'static str),

    #[error("statement attribute name must not be empty")]
    EmptyAttributeName,
}

/// A conditional attribute assignment attached to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StatementRecord", into = "StatementRecord")]
pub struct AttributeStatement {
    pub condition: String,
    pub assignment: StatementAssignment,
    pub conflict_resolution: ConflictResolution,
    pub extra_attributes_group: Option<GroupPath>,
}

impl AttributeStatement {
    /// Statement assigning a literal attribute when `condition` holds.
    pub fn fixed(condition: impl Into<String>, attribute: Attribute) -> Self {
        Self {
            condition: condition.into(),
            assignment: StatementAssignment::Fixed { attribute },
            conflict_resolution: ConflictResolution::Skip,
            extra_attributes_group: None,
        }
    }

    /// Statement assigning expression-computed values of `attribute_type`.
    pub fn dynamic(
        condition: impl Into<String>,
        attribute_type: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            condition: condition.into(),
            assignment: StatementAssignment::Dynamic {
                attribute_type: attribute_type.into(),
                expression: expression.into(),
            },
            conflict_resolution: ConflictResolution::Skip,
            extra_attributes_group: None,
        }
    }

    /// Statement assigning a literal attribute to every member.
    pub fn everybody(attribute: Attribute) -> Self {
        Self::fixed("true", attribute)
    }

    pub fn with_conflict_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.conflict_resolution = resolution;
        self
    }

    /// Writes the statement's output against `group` instead of the owner.
    pub fn redirected_to(mut self, group: GroupPath) -> Self {
        self.extra_attributes_group = Some(group);
        self
    }

    /// Name of the attribute this statement produces.
    pub fn assigned_attribute_name(&self) -> &str {
        match &self.assignment {
            StatementAssignment::Fixed { attribute } => &attribute.name,
            StatementAssignment::Dynamic { attribute_type, .. } => attribute_type,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.assignment, StatementAssignment::Dynamic { .. })
    }

    /// Group the statement's output is recorded against when owned by `owner`.
    pub fn target_group<'a>(&'a self, owner: &'a GroupPath) -> &'a GroupPath {
        self.extra_attributes_group.as_ref().unwrap_or(owner)
    }

    /// Checks the statement definition for structural errors.
    pub fn validate(&self) -> Result<(), StatementDefinitionError> {
        if self.condition.trim().is_empty() {
            return Err(StatementDefinitionError::EmptyCondition);
        }
        match &self.assignment {
            StatementAssignment::Fixed { attribute } if attribute.name.trim().is_empty() => {
                Err(StatementDefinitionError::EmptyAttributeName)
            }
            StatementAssignment::Dynamic { attribute_type, .. }
                if attribute_type.trim().is_empty() =>
            {
                Err(StatementDefinitionError::EmptyAttributeName)
            }
            StatementAssignment::Dynamic { expression, .. } if expression.trim().is_empty() => {
                Err(StatementDefinitionError::IncompleteDynamic("expression"))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Serialized form
// ============================================================================

/// Flat serialized form. Assignment-mode conflicts are rejected on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementRecord {
    condition: String,
    #[serde(default)]
    conflict_resolution: ConflictResolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extra_attributes_group: Option<GroupPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fixed_attribute: Option<Attribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dynamic_attribute_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dynamic_attribute_expression: Option<String>,
}

impl TryFrom<StatementRecord> for AttributeStatement {
    type Error = StatementDefinitionError;

    fn try_from(record: StatementRecord) -> Result<Self, Self::Error> {
        let has_dynamic =
            record.dynamic_attribute_type.is_some() || record.dynamic_attribute_expression.is_some();

        let assignment = match (record.fixed_attribute, has_dynamic) {
            (Some(_), true) => return Err(StatementDefinitionError::ConflictingAssignment),
            (Some(attribute), false) => StatementAssignment::Fixed { attribute },
            (None, true) => StatementAssignment::Dynamic {
                attribute_type: record
                    .dynamic_attribute_type
                    .ok_or(StatementDefinitionError::IncompleteDynamic("attribute type"))?,
                expression: record
                    .dynamic_attribute_expression
                    .ok_or(StatementDefinitionError::IncompleteDynamic("expression"))?,
            },
            (None, false) => return Err(StatementDefinitionError::MissingAssignment),
        };

        let statement = AttributeStatement {
            condition: record.condition,
            assignment,
            conflict_resolution: record.conflict_resolution,
            extra_attributes_group: record.extra_attributes_group,
        };
        statement.validate()?;
        Ok(statement)
    }
}

impl From<AttributeStatement> for StatementRecord {
    fn from(statement: AttributeStatement) -> Self {
        let (fixed_attribute, dynamic_attribute_type, dynamic_attribute_expression) =
            match statement.assignment {
                StatementAssignment::Fixed { attribute } => (Some(attribute), None, None),
                StatementAssignment::Dynamic {
                    attribute_type,
                    expression,
                } => (None, Some(attribute_type), Some(expression)),
            };
        Self {
            condition: statement.condition,
            conflict_resolution: statement.conflict_resolution,
            extra_attributes_group: statement.extra_attributes_group,
            fixed_attribute,
            dynamic_attribute_type,
            dynamic_attribute_expression,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(s: &str) -> GroupPath {
        GroupPath::new(s).unwrap()
    }

    #[test]
    fn assigned_name_and_target() {
        let owner = group("/org");
        let stmt = AttributeStatement::dynamic("true", "dept", "'x'").redirected_to(group("/org/dept"));
        assert_eq!(stmt.assigned_attribute_name(), "dept");
        assert_eq!(stmt.target_group(&owner), &group("/org/dept"));
        assert!(stmt.is_dynamic());

        let fixed = AttributeStatement::everybody(Attribute::new("role", owner.clone(), ["member"]));
        assert_eq!(fixed.target_group(&owner), &owner);
        assert_eq!(fixed.conflict_resolution, ConflictResolution::Skip);
    }

    #[test]
    fn json_round_trip_of_dynamic_statement() {
        let stmt = AttributeStatement::dynamic("true", "dept", "deptName")
            .with_conflict_resolution(ConflictResolution::Merge);
        let json = serde_json::to_value(&stmt).unwrap();
        assert_eq!(json["conflictResolution"], "merge");
        assert_eq!(json["dynamicAttributeType"], "dept");
        let back: AttributeStatement = serde_json::from_value(json).unwrap();
        assert_eq!(back, stmt);
    }

    #[test]
    fn conflicting_assignment_rejected_on_load() {
        let json = serde_json::json!({
            "condition": "true",
            "fixedAttribute": { "name": "role", "group": "/", "values": ["a"] },
            "dynamicAttributeType": "role",
            "dynamicAttributeExpression": "'b'"
        });
        let err = serde_json::from_value::<AttributeStatement>(json).unwrap_err();
        assert!(err.to_string().contains("both a fixed and a dynamic"));
    }

    #[test]
    fn incomplete_definitions_rejected() {
        let missing = serde_json::json!({ "condition": "true" });
        assert!(serde_json::from_value::<AttributeStatement>(missing).is_err());

        let half_dynamic = serde_json::json!({ "condition": "true", "dynamicAttributeType": "x" });
        assert!(serde_json::from_value::<AttributeStatement>(half_dynamic).is_err());

        let empty_condition = AttributeStatement::dynamic(" ", "x", "y");
        assert_eq!(
            empty_condition.validate(),
            Err(StatementDefinitionError::EmptyCondition)
        );
    }
}
