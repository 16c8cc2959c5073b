//! Translation actions.
//!
//! Actions form a closed set. Each rule carries one [`Action`]; the engine
//! dispatches through [`Action::apply`], which mutates the accumulator and
//! reports whether the pass continues.

use std::fmt::{self, Display};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tessera_expr::{EvalContext, ExpressionError, ExpressionEvaluator, scalar_string, value_list};
use tessera_types::{
    Attribute, EntityScheduledChange, EntityScheduledOperation, EntityState, GroupPath, Identity,
    TypeCatalog,
};
use tracing::{debug, warn};

use crate::result::{AutomaticRequestAction, SelectedGroup, TranslatedResult};

// ============================================================================
// Pattern
// ============================================================================

/// Regular expression matched against a whole value.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Result<Self, regex::Error> {
        let source = source.into();
        // The bare source must parse on its own before it is anchored.
        Regex::new(&source)?;
        let regex = Regex::new(&format!("^(?:{source})$"))?;
        Ok(Self { source, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl Serialize for Pattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::new(source).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Action
// ============================================================================

/// What a rule does when its condition holds.
///
/// Value-producing arguments (`expression` fields) are evaluated against the
/// translation context; enumerations are literals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    /// Adds `attribute` in `group` with the expression's values.
    AddAttribute {
        attribute: String,
        group: GroupPath,
        expression: String,
    },
    /// Adds one identity of `identity_type` per produced value.
    AddIdentity {
        identity_type: String,
        expression: String,
    },
    /// Selects every produced group path for membership.
    AddToGroup { expression: String },
    /// Assigns the produced attribute classes in `group`.
    AddAttributeClass { group: GroupPath, expression: String },
    /// Drops attributes of `group` whose name matches.
    FilterAttribute { pattern: Pattern, group: GroupPath },
    /// Drops selected groups whose path matches.
    FilterGroup { pattern: Pattern },
    /// Drops identities whose value matches, optionally of one type only.
    FilterIdentity {
        pattern: Pattern,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity_type: Option<String>,
    },
    SetEntityState { state: EntityState },
    /// Schedules `operation` to run `days` after the translation.
    ScheduleEntityChange {
        operation: EntityScheduledOperation,
        days: u32,
    },
    SetCredentialRequirement { requirement: String },
    SetAutoAction { decision: AutomaticRequestAction },
    /// Redirect after submission or cancellation.
    SetRedirectUrl { expression: String },
    /// Redirect after a confirmation link is followed.
    SetConfirmationRedirectUrl { expression: String },
    SetPostSubmitMessage { expression: String },
    /// Stops the pass.
    Break,
}

/// Discriminant of an [`Action`], used to filter rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    AddAttribute,
    AddIdentity,
    AddToGroup,
    AddAttributeClass,
    FilterAttribute,
    FilterGroup,
    FilterIdentity,
    SetEntityState,
    ScheduleEntityChange,
    SetCredentialRequirement,
    SetAutoAction,
    SetRedirectUrl,
    SetConfirmationRedirectUrl,
    SetPostSubmitMessage,
    Break,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddAttribute => "addAttribute",
            Self::AddIdentity => "addIdentity",
            Self::AddToGroup => "addToGroup",
            Self::AddAttributeClass => "addAttributeClass",
            Self::FilterAttribute => "filterAttribute",
            Self::FilterGroup => "filterGroup",
            Self::FilterIdentity => "filterIdentity",
            Self::SetEntityState => "setEntityState",
            Self::ScheduleEntityChange => "scheduleEntityChange",
            Self::SetCredentialRequirement => "setCredentialRequirement",
            Self::SetAutoAction => "setAutoAction",
            Self::SetRedirectUrl => "setRedirectUrl",
            Self::SetConfirmationRedirectUrl => "setConfirmationRedirectUrl",
            Self::SetPostSubmitMessage => "setPostSubmitMessage",
            Self::Break => "break",
        }
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the pass continues after an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Break,
}

/// Failure of a single action.
#[derive(Debug)]
pub(crate) enum ActionError {
    Expression(ExpressionError),
    InvalidOutput(String),
}

impl From<ExpressionError> for ActionError {
    fn from(err: ExpressionError) -> Self {
        Self::Expression(err)
    }
}

/// Everything an action may read while it runs.
pub(crate) struct ActionEnv<'a> {
    pub context: &'a EvalContext,
    pub expressions: &'a dyn ExpressionEvaluator,
    pub types: Option<&'a TypeCatalog>,
    pub now: DateTime<Utc>,
}

impl ActionEnv<'_> {
    fn values(&self, expression: &str) -> Result<Option<Vec<String>>, ExpressionError> {
        let value = self.expressions.evaluate_value(expression, self.context)?;
        Ok(value_list(&value))
    }

    fn scalar(&self, expression: &str) -> Result<Option<String>, ExpressionError> {
        let value = self.expressions.evaluate_value(expression, self.context)?;
        Ok((!value.is_null()).then(|| scalar_string(&value)))
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::AddAttribute { .. } => ActionKind::AddAttribute,
            Self::AddIdentity { .. } => ActionKind::AddIdentity,
            Self::AddToGroup { .. } => ActionKind::AddToGroup,
            Self::AddAttributeClass { .. } => ActionKind::AddAttributeClass,
            Self::FilterAttribute { .. } => ActionKind::FilterAttribute,
            Self::FilterGroup { .. } => ActionKind::FilterGroup,
            Self::FilterIdentity { .. } => ActionKind::FilterIdentity,
            Self::SetEntityState { .. } => ActionKind::SetEntityState,
            Self::ScheduleEntityChange { .. } => ActionKind::ScheduleEntityChange,
            Self::SetCredentialRequirement { .. } => ActionKind::SetCredentialRequirement,
            Self::SetAutoAction { .. } => ActionKind::SetAutoAction,
            Self::SetRedirectUrl { .. } => ActionKind::SetRedirectUrl,
            Self::SetConfirmationRedirectUrl { .. } => ActionKind::SetConfirmationRedirectUrl,
            Self::SetPostSubmitMessage { .. } => ActionKind::SetPostSubmitMessage,
            Self::Break => ActionKind::Break,
        }
    }

    /// Expressions the action evaluates when applied.
    pub fn expressions(&self) -> Vec<&str> {
        match self {
            Self::AddAttribute { expression, .. }
            | Self::AddIdentity { expression, .. }
            | Self::AddToGroup { expression }
            | Self::AddAttributeClass { expression, .. }
            | Self::SetRedirectUrl { expression }
            | Self::SetConfirmationRedirectUrl { expression }
            | Self::SetPostSubmitMessage { expression } => vec![expression.as_str()],
            _ => Vec::new(),
        }
    }

    /// Literal arguments that must not be blank.
    pub(crate) fn required_names(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::AddAttribute { attribute, .. } => vec![("attribute", attribute.as_str())],
            Self::AddIdentity { identity_type, .. } => {
                vec![("identityType", identity_type.as_str())]
            }
            Self::SetCredentialRequirement { requirement } => {
                vec![("requirement", requirement.as_str())]
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn apply(
        &self,
        result: &mut TranslatedResult,
        env: &ActionEnv<'_>,
    ) -> Result<Flow, ActionError> {
        match self {
            Self::AddAttribute {
                attribute,
                group,
                expression,
            } => {
                let Some(raw) = env.values(expression)? else {
                    debug!(attribute = %attribute, "No value produced, attribute not added");
                    return Ok(Flow::Continue);
                };
                let values = match env.types {
                    None => raw,
                    Some(types) => {
                        let Some(attribute_type) = types.get(attribute) else {
                            warn!(attribute = %attribute, "Unknown attribute type, nothing added");
                            return Ok(Flow::Continue);
                        };
                        if !attribute_type.allows_cardinality(raw.len()) {
                            return Err(ActionError::InvalidOutput(format!(
                                "{} values exceed the limit of attribute '{attribute}'",
                                raw.len()
                            )));
                        }
                        raw.iter()
                            .map(|v| attribute_type.syntax.normalize(v))
                            .collect::<Result<Vec<_>, _>>()
                            .map_err(|e| ActionError::InvalidOutput(e.to_string()))?
                    }
                };
                result.add_attribute(Attribute::new(attribute.clone(), group.clone(), values));
            }

            Self::AddIdentity {
                identity_type,
                expression,
            } => {
                for value in env.values(expression)?.unwrap_or_default() {
                    result.add_identity(Identity::new(identity_type.clone(), value));
                }
            }

            Self::AddToGroup { expression } => {
                for value in env.values(expression)?.unwrap_or_default() {
                    let group = GroupPath::new(value.as_str()).map_err(|e| {
                        ActionError::InvalidOutput(format!("'{value}' is not a group path: {e}"))
                    })?;
                    result.add_group(SelectedGroup::new(group));
                }
            }

            Self::AddAttributeClass { group, expression } => {
                for class in env.values(expression)?.unwrap_or_default() {
                    result.add_attribute_class(group.clone(), class);
                }
            }

            Self::FilterAttribute { pattern, group } => {
                let removed = result.remove_attributes(pattern, group);
                debug!(pattern = pattern.as_str(), group = %group, removed, "Attributes filtered");
            }

            Self::FilterGroup { pattern } => {
                let removed = result.remove_groups(pattern);
                debug!(pattern = pattern.as_str(), removed, "Groups filtered");
            }

            Self::FilterIdentity {
                pattern,
                identity_type,
            } => {
                let removed = result.remove_identities(pattern, identity_type.as_deref());
                debug!(pattern = pattern.as_str(), removed, "Identities filtered");
            }

            Self::SetEntityState { state } => result.set_entity_state(*state),

            Self::ScheduleEntityChange { operation, days } => {
                let at = env
                    .now
                    .checked_add_signed(Duration::days(i64::from(*days)))
                    .ok_or_else(|| {
                        ActionError::InvalidOutput(format!("{days} days from now is out of range"))
                    })?;
                result.set_entity_change(EntityScheduledChange {
                    operation: *operation,
                    at,
                });
            }

            Self::SetCredentialRequirement { requirement } => {
                result.set_credential_requirement(requirement.clone());
            }

            Self::SetAutoAction { decision } => result.set_auto_action(*decision),

            Self::SetRedirectUrl { expression } | Self::SetConfirmationRedirectUrl { expression } => {
                if let Some(url) = env.scalar(expression)? {
                    result.set_redirect_url(url);
                }
            }

            Self::SetPostSubmitMessage { expression } => {
                if let Some(message) = env.scalar(expression)? {
                    result.set_post_submit_message(message);
                }
            }

            Self::Break => return Ok(Flow::Break),
        }
        Ok(Flow::Continue)
    }
}
