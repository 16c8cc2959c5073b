//! Attributes and the attribute-type catalog.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::GroupPath;
use crate::syntax::ValueSyntax;

// ============================================================================
// Attribute
// ============================================================================

/// A named, ordered list of values bound to an entity in one group.
///
/// At most one attribute exists per (entity, group, name). `direct` marks
/// attributes read from storage, as opposed to ones synthesized by group
/// attribute statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub group: GroupPath,
    pub values: Vec<String>,
    #[serde(default)]
    pub direct: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Attribute {
    /// Creates a non-direct attribute without timestamps.
    pub fn new<I, V>(name: impl Into<String>, group: GroupPath, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            group,
            values: values.into_iter().map(Into::into).collect(),
            direct: false,
            verified: false,
            created_at: None,
            updated_at: None,
        }
    }

    /// Creates a directly stored attribute, created and updated at `at`.
    pub fn stored<I, V>(name: impl Into<String>, group: GroupPath, values: I, at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut attribute = Self::new(name, group, values);
        attribute.direct = true;
        attribute.created_at = Some(at);
        attribute.updated_at = Some(at);
        attribute
    }

    pub fn verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    /// First value, or the empty string when the attribute has no values.
    pub fn first_value(&self) -> &str {
        self.values.first().map_or("", String::as_str)
    }
}

// ============================================================================
// Attribute Type
// ============================================================================

/// Declaration of an attribute name: its syntax, cardinality and scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeType {
    pub name: String,
    /// A global type's value, once set in `/`, is visible from every group
    /// the entity belongs to.
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub syntax: ValueSyntax,
    /// Upper bound on the number of values, `None` for unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_elements: Option<usize>,
}

impl AttributeType {
    pub fn new(name: impl Into<String>, syntax: ValueSyntax) -> Self {
        Self {
            name: name.into(),
            global: false,
            syntax,
            max_elements: None,
        }
    }

    /// Marks the type as global.
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn with_max_elements(mut self, max: usize) -> Self {
        self.max_elements = Some(max);
        self
    }

    /// Returns true if an attribute of this type may hold `count` values.
    pub fn allows_cardinality(&self, count: usize) -> bool {
        self.max_elements.is_none_or(|max| count <= max)
    }
}

// ============================================================================
// Type Catalog
// ============================================================================

/// Lookup table of attribute types by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeCatalog {
    types: HashMap<String, AttributeType>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, attribute_type: AttributeType) {
        self.types
            .insert(attribute_type.name.clone(), attribute_type);
    }

    /// Adds a type (builder pattern).
    pub fn with_type(mut self, attribute_type: AttributeType) -> Self {
        self.insert(attribute_type);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeType> {
        self.types.get(name)
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.types.get(name).is_some_and(|t| t.global)
    }

    /// Names of all global types, sorted.
    pub fn global_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .types
            .values()
            .filter(|t| t.global)
            .map(|t| t.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<AttributeType> for TypeCatalog {
    fn from_iter<T: IntoIterator<Item = AttributeType>>(iter: T) -> Self {
        let mut catalog = Self::new();
        for attribute_type in iter {
            catalog.insert(attribute_type);
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stored_attribute_is_direct_with_timestamps() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let attr = Attribute::stored("role", GroupPath::root(), ["manager"], at);
        assert!(attr.direct);
        assert_eq!(attr.created_at, Some(at));
        assert_eq!(attr.first_value(), "manager");
    }

    #[test]
    fn first_value_of_empty_attribute() {
        let attr = Attribute::new("flag", GroupPath::root(), Vec::<String>::new());
        assert_eq!(attr.first_value(), "");
    }

    #[test]
    fn catalog_globals() {
        let catalog: TypeCatalog = [
            AttributeType::new("clearance", ValueSyntax::String).global(),
            AttributeType::new("role", ValueSyntax::String),
            AttributeType::new("country", ValueSyntax::String).global(),
        ]
        .into_iter()
        .collect();

        assert_eq!(catalog.global_names(), vec!["clearance", "country"]);
        assert!(catalog.is_global("clearance"));
        assert!(!catalog.is_global("role"));
        assert!(!catalog.is_global("missing"));
    }

    #[test]
    fn cardinality_bound() {
        let bounded = AttributeType::new("email", ValueSyntax::Email).with_max_elements(1);
        assert!(bounded.allows_cardinality(1));
        assert!(!bounded.allows_cardinality(2));
        assert!(AttributeType::new("tags", ValueSyntax::String).allows_cardinality(100));
    }
}
