//! # tessera-types: Core types for `Tessera`
//!
//! This crate contains the shared identity model used across the `Tessera` system:
//! - Entity IDs ([`EntityId`])
//! - Group tree addressing ([`GroupPath`])
//! - Identities ([`Identity`]) and entity lifecycle ([`EntityState`], [`EntityScheduledChange`])
//! - Group membership ([`GroupMembership`])
//! - Attributes and their type catalog ([`Attribute`], [`AttributeType`], [`TypeCatalog`])
//! - Value syntaxes ([`ValueSyntax`])
//! - Group attribute statements ([`AttributeStatement`], [`ConflictResolution`])

use std::fmt::{Debug, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod attribute;
mod statement;
mod syntax;

pub use attribute::{Attribute, AttributeType, TypeCatalog};
pub use statement::{
    AttributeStatement, ConflictResolution, StatementAssignment, StatementDefinitionError,
};
pub use syntax::{SyntaxError, ValueSyntax};

// ============================================================================
// Entity IDs
// ============================================================================

/// Unique, immutable identifier of an entity (user or service principal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<EntityId> for u64 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

// ============================================================================
// Group Paths
// ============================================================================

/// Errors produced when parsing a group path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupPathError {
    #[error("group path must not be empty")]
    Empty,

    #[error("group path '{0}' must start with '/'")]
    NotAbsolute(String),

    #[error("group path '{0}' contains an empty segment")]
    EmptySegment(String),
}

/// Slash-delimited address of a node in the group tree.
///
/// The root group is `/`. Every other path starts with `/`, has no empty
/// segments and no trailing slash. Parent/child relations are derived from
/// path prefixes, so the tree can never contain cycles.
///
/// # Examples
///
/// ```
/// use tessera_types::GroupPath;
///
/// let dept = GroupPath::new("/org/dept").unwrap();
/// assert_eq!(dept.parent(), Some(GroupPath::new("/org").unwrap()));
/// assert!(dept.is_child_of(&GroupPath::root()));
/// assert!(GroupPath::new("org").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupPath(String);

impl GroupPath {
    const SEPARATOR: char = '/';

    /// Returns the root group `/`.
    pub fn root() -> Self {
        Self(Self::SEPARATOR.to_string())
    }

    /// Parses and validates a group path.
    pub fn new(path: impl Into<String>) -> Result<Self, GroupPathError> {
        let path = path.into();
        if path.is_empty() {
            return Err(GroupPathError::Empty);
        }
        if !path.starts_with(Self::SEPARATOR) {
            return Err(GroupPathError::NotAbsolute(path));
        }
        if path.len() == 1 {
            return Ok(Self(path));
        }
        if path[1..].split(Self::SEPARATOR).any(str::is_empty) {
            return Err(GroupPathError::EmptySegment(path));
        }
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    /// Number of segments below the root. The root has depth 0.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches(Self::SEPARATOR).count()
        }
    }

    /// Last path segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit(Self::SEPARATOR).next()
    }

    /// Returns the parent group, or `None` for the root.
    pub fn parent(&self) -> Option<GroupPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(Self::SEPARATOR) {
            Some(0) | None => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
        }
    }

    /// All strict ancestors, ordered from the root down to the parent.
    pub fn ancestors(&self) -> Vec<GroupPath> {
        let mut chain = Vec::with_capacity(self.depth());
        let mut current = self.parent();
        while let Some(group) = current {
            current = group.parent();
            chain.push(group);
        }
        chain.reverse();
        chain
    }

    /// Returns a child path with the given segment appended.
    pub fn child(&self, segment: &str) -> Result<GroupPath, GroupPathError> {
        if self.is_root() {
            Self::new(format!("/{segment}"))
        } else {
            Self::new(format!("{}/{segment}", self.0))
        }
    }

    /// True if `self` is a strict descendant of `other`.
    pub fn is_child_of(&self, other: &GroupPath) -> bool {
        if self == other {
            return false;
        }
        if other.is_root() {
            return true;
        }
        self.0.len() > other.0.len()
            && self.0.starts_with(&other.0)
            && self.0.as_bytes()[other.0.len()] == b'/'
    }

    /// True if `self` equals `other` or descends from it.
    pub fn is_child_or_same(&self, other: &GroupPath) -> bool {
        self == other || self.is_child_of(other)
    }

    /// True if `self` is an immediate child of `other`.
    pub fn is_direct_child_of(&self, other: &GroupPath) -> bool {
        self.parent().as_ref() == Some(other)
    }

    /// True if the two groups lie on one root-to-leaf chain.
    pub fn is_related_to(&self, other: &GroupPath) -> bool {
        self.is_child_or_same(other) || other.is_child_of(self)
    }
}

impl Debug for GroupPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroupPath({})", self.0)
    }
}

impl Display for GroupPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GroupPath {
    type Err = GroupPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for GroupPath {
    type Error = GroupPathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GroupPath> for String {
    fn from(path: GroupPath) -> Self {
        path.0
    }
}

impl AsRef<str> for GroupPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Identities
// ============================================================================

/// A typed identity value owned by an entity (e.g. `email: alice@corp`).
///
/// Targeted identities are only meaningful for a single relying party
/// and are excluded from most bulk listings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub type_id: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Identity {
    pub fn new(type_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            value: value.into(),
            target: None,
        }
    }

    /// Binds the identity to a single relying party.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn is_targeted(&self) -> bool {
        self.target.is_some()
    }
}

// ============================================================================
// Entity Lifecycle
// ============================================================================

/// Lifecycle state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityState {
    /// Entity may authenticate and is fully usable.
    #[default]
    Valid,
    /// Entity may not authenticate; kept for audit.
    Disabled,
    /// Entity exists but every authentication attempt is refused.
    AuthenticationDisabled,
    /// Entity may only log in; no other operation is permitted.
    OnlyLoginPermitted,
}

/// An operation scheduled to be applied to an entity later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityScheduledOperation {
    Disable,
    Remove,
}

/// A scheduled entity operation with its due time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityScheduledChange {
    pub operation: EntityScheduledOperation,
    pub at: DateTime<Utc>,
}

/// Stored per-entity information, independent of any group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub id: EntityId,
    pub state: EntityState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_change: Option<EntityScheduledChange>,
}

impl EntityInfo {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            state: EntityState::Valid,
            scheduled_change: None,
        }
    }

    pub fn with_state(mut self, state: EntityState) -> Self {
        self.state = state;
        self
    }
}

// ============================================================================
// Group Membership
// ============================================================================

/// Relation between an entity and a group it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub entity: EntityId,
    pub group: GroupPath,
    pub joined_at: DateTime<Utc>,
    /// Remote identity provider the membership was imported from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_idp: Option<String>,
    /// Input translation profile that created the membership, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_profile: Option<String>,
}

impl GroupMembership {
    pub fn new(entity: EntityId, group: GroupPath, joined_at: DateTime<Utc>) -> Self {
        Self {
            entity,
            group,
            joined_at,
            remote_idp: None,
            translation_profile: None,
        }
    }

    pub fn with_remote_origin(
        mut self,
        remote_idp: impl Into<String>,
        translation_profile: impl Into<String>,
    ) -> Self {
        self.remote_idp = Some(remote_idp.into());
        self.translation_profile = Some(translation_profile.into());
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
