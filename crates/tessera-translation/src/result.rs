//! The translation accumulator.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tessera_types::{Attribute, EntityScheduledChange, EntityState, GroupPath, Identity};

use crate::action::Pattern;

// ============================================================================
// Automatic Request Action
// ============================================================================

/// Automatic decision on a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutomaticRequestAction {
    /// Leave the request for manual processing.
    #[default]
    None,
    Accept,
    Reject,
    /// Remove the request without a decision.
    Drop,
}

// ============================================================================
// Selected Group
// ============================================================================

/// A group membership to be created for the entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedGroup {
    pub group: GroupPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_idp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_profile: Option<String>,
}

impl SelectedGroup {
    pub fn new(group: GroupPath) -> Self {
        Self {
            group,
            remote_idp: None,
            translation_profile: None,
        }
    }
}

// ============================================================================
// Translated Result
// ============================================================================

/// Deduplicating accumulator of one profile evaluation.
///
/// Identities are keyed by `(type, value)`, attributes by `(group, name)`
/// and memberships by group; writing an existing key replaces the entry.
/// All maps are ordered, so the JSON form is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "ResultRecord", from = "ResultRecord")]
pub struct TranslatedResult {
    identities: BTreeMap<(String, String), Identity>,
    attributes: BTreeMap<(GroupPath, String), Attribute>,
    groups: BTreeMap<GroupPath, SelectedGroup>,
    attribute_classes: BTreeMap<GroupPath, BTreeSet<String>>,
    auto_action: AutomaticRequestAction,
    entity_state: EntityState,
    entity_change: Option<EntityScheduledChange>,
    credential_requirement: Option<String>,
    redirect_url: Option<String>,
    post_submit_message: Option<String>,
}

impl TranslatedResult {
    /// Empty accumulator with the form's default credential requirement.
    pub fn new(credential_requirement: Option<String>) -> Self {
        Self {
            credential_requirement,
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------------
    // Identities
    // ------------------------------------------------------------------------

    pub fn add_identity(&mut self, identity: Identity) {
        self.identities
            .insert((identity.type_id.clone(), identity.value.clone()), identity);
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    pub fn identity(&self, type_id: &str, value: &str) -> Option<&Identity> {
        self.identities.get(&(type_id.to_string(), value.to_string()))
    }

    /// Removes identities whose value matches `pattern`, restricted to
    /// `type_id` when given. Returns the number removed.
    pub fn remove_identities(&mut self, pattern: &Pattern, type_id: Option<&str>) -> usize {
        let before = self.identities.len();
        self.identities.retain(|(t, value), _| {
            !(type_id.is_none_or(|wanted| wanted == t) && pattern.matches(value))
        });
        before - self.identities.len()
    }

    // ------------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------------

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.insert(
            (attribute.group.clone(), attribute.name.clone()),
            attribute,
        );
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    pub fn attribute(&self, group: &GroupPath, name: &str) -> Option<&Attribute> {
        self.attributes.get(&(group.clone(), name.to_string()))
    }

    /// Removes attributes of `group` whose name matches `pattern`.
    pub fn remove_attributes(&mut self, pattern: &Pattern, group: &GroupPath) -> usize {
        let before = self.attributes.len();
        self.attributes
            .retain(|(g, name), _| !(g == group && pattern.matches(name)));
        before - self.attributes.len()
    }

    // ------------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------------

    pub fn add_group(&mut self, selection: SelectedGroup) {
        self.groups.insert(selection.group.clone(), selection);
    }

    pub fn groups(&self) -> impl Iterator<Item = &SelectedGroup> {
        self.groups.values()
    }

    pub fn is_group_selected(&self, group: &GroupPath) -> bool {
        self.groups.contains_key(group)
    }

    /// Removes selected groups whose path matches `pattern`.
    pub fn remove_groups(&mut self, pattern: &Pattern) -> usize {
        let before = self.groups.len();
        self.groups.retain(|group, _| !pattern.matches(group.as_str()));
        before - self.groups.len()
    }

    pub fn add_attribute_class(&mut self, group: GroupPath, class: impl Into<String>) {
        self.attribute_classes
            .entry(group)
            .or_default()
            .insert(class.into());
    }

    pub fn attribute_classes(&self) -> &BTreeMap<GroupPath, BTreeSet<String>> {
        &self.attribute_classes
    }

    // ------------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------------

    pub fn auto_action(&self) -> AutomaticRequestAction {
        self.auto_action
    }

    pub fn set_auto_action(&mut self, action: AutomaticRequestAction) {
        self.auto_action = action;
    }

    pub fn entity_state(&self) -> EntityState {
        self.entity_state
    }

    pub fn set_entity_state(&mut self, state: EntityState) {
        self.entity_state = state;
    }

    pub fn entity_change(&self) -> Option<&EntityScheduledChange> {
        self.entity_change.as_ref()
    }

    pub fn set_entity_change(&mut self, change: EntityScheduledChange) {
        self.entity_change = Some(change);
    }

    pub fn credential_requirement(&self) -> Option<&str> {
        self.credential_requirement.as_deref()
    }

    pub fn set_credential_requirement(&mut self, requirement: impl Into<String>) {
        self.credential_requirement = Some(requirement.into());
    }

    pub fn redirect_url(&self) -> Option<&str> {
        self.redirect_url.as_deref()
    }

    pub fn set_redirect_url(&mut self, url: impl Into<String>) {
        self.redirect_url = Some(url.into());
    }

    pub fn post_submit_message(&self) -> Option<&str> {
        self.post_submit_message.as_deref()
    }

    pub fn set_post_submit_message(&mut self, message: impl Into<String>) {
        self.post_submit_message = Some(message.into());
    }

    /// Audit form of the result.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Flat serialized form; maps become ordered value lists.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultRecord {
    #[serde(default)]
    identities: Vec<Identity>,
    #[serde(default)]
    attributes: Vec<Attribute>,
    #[serde(default)]
    groups: Vec<SelectedGroup>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attribute_classes: BTreeMap<GroupPath, BTreeSet<String>>,
    #[serde(default)]
    auto_action: AutomaticRequestAction,
    #[serde(default)]
    entity_state: EntityState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity_change: Option<EntityScheduledChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credential_requirement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    post_submit_message: Option<String>,
}

impl From<TranslatedResult> for ResultRecord {
    fn from(result: TranslatedResult) -> Self {
        Self {
            identities: result.identities.into_values().collect(),
            attributes: result.attributes.into_values().collect(),
            groups: result.groups.into_values().collect(),
            attribute_classes: result.attribute_classes,
            auto_action: result.auto_action,
            entity_state: result.entity_state,
            entity_change: result.entity_change,
            credential_requirement: result.credential_requirement,
            redirect_url: result.redirect_url,
            post_submit_message: result.post_submit_message,
        }
    }
}

impl From<ResultRecord> for TranslatedResult {
    fn from(record: ResultRecord) -> Self {
        let mut result = Self {
            attribute_classes: record.attribute_classes,
            auto_action: record.auto_action,
            entity_state: record.entity_state,
            entity_change: record.entity_change,
            credential_requirement: record.credential_requirement,
            redirect_url: record.redirect_url,
            post_submit_message: record.post_submit_message,
            ..Self::default()
        };
        record.identities.into_iter().for_each(|i| result.add_identity(i));
        record.attributes.into_iter().for_each(|a| result.add_attribute(a));
        record.groups.into_iter().for_each(|g| result.add_group(g));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(s: &str) -> GroupPath {
        GroupPath::new(s).unwrap()
    }

    #[test]
    fn later_write_replaces_same_key() {
        let mut result = TranslatedResult::default();
        result.add_attribute(Attribute::new("role", group("/"), ["member"]));
        result.add_attribute(Attribute::new("role", group("/"), ["admin"]));
        result.add_attribute(Attribute::new("role", group("/org"), ["guest"]));

        assert_eq!(result.attributes().count(), 2);
        assert_eq!(result.attribute(&group("/"), "role").unwrap().values, vec!["admin"]);
    }

    #[test]
    fn identities_dedup_on_type_and_value() {
        let mut result = TranslatedResult::default();
        result.add_identity(Identity::new("email", "a@x"));
        result.add_identity(Identity::new("email", "a@x"));
        result.add_identity(Identity::new("userName", "a@x"));
        assert_eq!(result.identities().count(), 2);
    }

    #[test]
    fn removal_by_pattern() {
        let mut result = TranslatedResult::default();
        result.add_group(SelectedGroup::new(group("/A/B")));
        result.add_group(SelectedGroup::new(group("/Z")));
        result.add_identity(Identity::new("idT", "idAA"));
        result.add_identity(Identity::new("idT", "bbb"));
        result.add_identity(Identity::new("other", "idZ"));

        assert_eq!(result.remove_groups(&Pattern::new("/A.*").unwrap()), 1);
        assert!(result.is_group_selected(&group("/Z")));

        let removed = result.remove_identities(&Pattern::new("id.*").unwrap(), Some("idT"));
        assert_eq!(removed, 1);
        assert!(result.identity("other", "idZ").is_some());
        assert!(result.identity("idT", "bbb").is_some());
    }

    #[test]
    fn json_round_trip_keeps_keys() {
        let mut result = TranslatedResult::new(Some("defaultCR".into()));
        result.add_attribute(Attribute::new("role", group("/org"), ["admin"]));
        result.add_attribute_class(group("/org"), "staff");
        result.set_auto_action(AutomaticRequestAction::Accept);

        let json = result.to_json().unwrap();
        let parsed: TranslatedResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
        assert!(json.contains("\"autoAction\":\"accept\""));
    }
}
