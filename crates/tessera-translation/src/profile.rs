//! Translation profiles and their rules.

use serde::{Deserialize, Serialize};
use tessera_expr::ExpressionEvaluator;

use crate::action::Action;
use crate::{Result, TranslationError};

/// What a profile is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProfileType {
    #[default]
    Registration,
    Enquiry,
    Output,
}

/// A single `condition -> action` rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRule {
    pub condition: String,
    pub action: Action,
}

impl TranslationRule {
    pub fn new(condition: impl Into<String>, action: Action) -> Self {
        Self {
            condition: condition.into(),
            action,
        }
    }
}

/// An ordered list of rules. Order is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationProfile {
    pub name: String,
    #[serde(default, rename = "type")]
    pub profile_type: ProfileType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub rules: Vec<TranslationRule>,
}

impl TranslationProfile {
    pub fn new(name: impl Into<String>, profile_type: ProfileType) -> Self {
        Self {
            name: name.into(),
            profile_type,
            description: String::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a rule.
    pub fn with_rule(mut self, condition: impl Into<String>, action: Action) -> Self {
        self.rules.push(TranslationRule::new(condition, action));
        self
    }

    /// Parses and structurally validates a profile.
    ///
    /// Unknown actions, malformed filter patterns and invalid group paths
    /// are reported as [`TranslationError::Configuration`].
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| configuration("<unparsed>", e))?;
        let name = value
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();
        let profile: Self = serde_json::from_value(value).map_err(|e| configuration(&name, e))?;
        profile.validate(None)?;
        Ok(profile)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| configuration(&self.name, e))
    }

    /// Checks the profile before any evaluation.
    ///
    /// With an evaluator, every condition and action expression is also
    /// checked through [`ExpressionEvaluator::check`].
    pub fn validate(&self, expressions: Option<&dyn ExpressionEvaluator>) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(configuration(&self.name, "profile name is empty"));
        }

        for (index, rule) in self.rules.iter().enumerate() {
            let rule_error = |reason: String| configuration(&self.name, format!("rule {index}: {reason}"));

            for (field, value) in rule.action.required_names() {
                if value.trim().is_empty() {
                    return Err(rule_error(format!("{} has an empty '{field}'", rule.action.kind())));
                }
            }

            let mut expressions_to_check = vec![rule.condition.as_str()];
            expressions_to_check.extend(rule.action.expressions());
            for expression in expressions_to_check {
                if expression.trim().is_empty() {
                    return Err(rule_error("empty expression".to_string()));
                }
                if let Some(evaluator) = expressions {
                    evaluator
                        .check(expression)
                        .map_err(|e| rule_error(e.to_string()))?;
                }
            }
        }
        Ok(())
    }
}

fn configuration(profile: &str, reason: impl std::fmt::Display) -> TranslationError {
    TranslationError::Configuration {
        profile: profile.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_expr::RegistryEvaluator;
    use tessera_types::GroupPath;

    const PROFILE: &str = r#"{
        "name": "registration",
        "type": "registration",
        "rules": [
            {"condition": "true", "action": {"name": "addAttribute", "attribute": "role", "group": "/", "expression": "'member'"}},
            {"condition": "true", "action": {"name": "filterGroup", "pattern": "/tmp.*"}},
            {"condition": "true", "action": {"name": "break"}}
        ]
    }"#;

    #[test]
    fn parses_rules_in_order() {
        let profile = TranslationProfile::from_json(PROFILE).unwrap();
        assert_eq!(profile.name, "registration");
        assert_eq!(profile.rules.len(), 3);
        assert_eq!(
            profile.rules[0].action,
            Action::AddAttribute {
                attribute: "role".into(),
                group: GroupPath::root(),
                expression: "'member'".into(),
            }
        );
        assert_eq!(profile.rules[2].action, Action::Break);

        let again = TranslationProfile::from_json(&profile.to_json().unwrap()).unwrap();
        assert_eq!(again, profile);
    }

    #[test]
    fn bad_pattern_is_configuration_error() {
        let json = r#"{"name": "p", "rules": [{"condition": "true", "action": {"name": "filterGroup", "pattern": "("}}]}"#;
        let err = TranslationProfile::from_json(json).unwrap_err();
        assert!(matches!(err, TranslationError::Configuration { ref profile, .. } if profile == "p"));
    }

    #[test]
    fn unknown_action_is_configuration_error() {
        let json = r#"{"name": "p", "rules": [{"condition": "true", "action": {"name": "launchRocket"}}]}"#;
        assert!(matches!(
            TranslationProfile::from_json(json),
            Err(TranslationError::Configuration { .. })
        ));
    }

    #[test]
    fn empty_expressions_rejected() {
        let profile = TranslationProfile::new("p", ProfileType::Enquiry)
            .with_rule("", Action::Break);
        assert!(profile.validate(None).is_err());

        let profile = TranslationProfile::new("p", ProfileType::Enquiry).with_rule(
            "true",
            Action::AddIdentity {
                identity_type: " ".into(),
                expression: "'x'".into(),
            },
        );
        assert!(profile.validate(None).is_err());
    }

    #[test]
    fn evaluator_checks_expressions() {
        let evaluator = RegistryEvaluator::new();
        let profile = TranslationProfile::new("p", ProfileType::Registration)
            .with_rule("true", Action::SetRedirectUrl { expression: "'http://x'".into() });
        assert!(profile.validate(Some(&evaluator)).is_ok());

        let broken = TranslationProfile::new("p", ProfileType::Registration)
            .with_rule("a b c", Action::Break);
        assert!(broken.validate(Some(&evaluator)).is_err());
    }
}
