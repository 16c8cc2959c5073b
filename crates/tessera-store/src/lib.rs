//! # tessera-store: Directory data access
//!
//! The Tessera core never owns persistent storage. It reads entities,
//! groups, memberships, attributes and statements through the batch-capable
//! [`DirectoryReader`] contract, obtained per call from a
//! [`DirectoryStore::snapshot`] so that every read of one resolution agrees
//! with the others.
//!
//! [`InMemoryDirectory`] is a complete implementation backed by an
//! immutable, copy-on-write data set: snapshots are cheap `Arc` clones and
//! writers never disturb readers.

use std::sync::Arc;

use tessera_statements::{StatementError, StatementIndex};
use tessera_types::{
    Attribute, AttributeStatement, EntityId, EntityInfo, GroupMembership, GroupPath, Identity,
    TypeCatalog,
};

mod memory;

pub use memory::{DirectorySnapshot, InMemoryDirectory};

// ============================================================================
// Rows
// ============================================================================

/// A directly stored attribute together with its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRow {
    pub entity: EntityId,
    pub attribute: Attribute,
}

/// An identity together with its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRow {
    pub entity: EntityId,
    pub identity: Identity,
}

// ============================================================================
// Errors
// ============================================================================

/// Error type for directory access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A batch read failed in the underlying store.
    #[error("batch read '{operation}' failed: {reason}")]
    BatchRead {
        operation: &'static str,
        reason: String,
    },

    /// The referenced group does not exist.
    #[error("group not found: {0}")]
    GroupNotFound(GroupPath),

    /// The referenced entity does not exist.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    /// A write collides with existing data or violates the group tree.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A statement list was rejected.
    #[error(transparent)]
    Statements(#[from] StatementError),

    /// Internal store failure.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn batch_read(operation: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::BatchRead {
            operation,
            reason: reason.to_string(),
        }
    }
}

/// Result type for directory access.
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Contracts
// ============================================================================

/// Consistent, read-only view of the directory.
///
/// Every method is a single batch operation: its cost depends on the number
/// of groups or entities passed in, never on a per-row round trip. Unknown
/// groups and entities in a batch yield no rows rather than an error.
pub trait DirectoryReader: Send + Sync {
    /// Every existing group, sorted by path.
    fn groups(&self) -> Result<Vec<GroupPath>>;

    fn group_exists(&self, group: &GroupPath) -> Result<bool> {
        Ok(self.groups()?.contains(group))
    }

    /// The full attribute type catalog.
    fn attribute_types(&self) -> Result<TypeCatalog>;

    /// Direct attributes stored in any of `groups`, optionally restricted to
    /// `names`.
    fn direct_attributes(
        &self,
        groups: &[GroupPath],
        names: Option<&[String]>,
    ) -> Result<Vec<AttributeRow>>;

    /// Direct attributes of one entity in any of `groups`.
    fn entity_attributes(&self, entity: EntityId, groups: &[GroupPath]) -> Result<Vec<Attribute>>;

    /// Memberships in any of `groups`.
    fn memberships(&self, groups: &[GroupPath]) -> Result<Vec<GroupMembership>>;

    /// Every membership of the given entities.
    fn entity_memberships(&self, entities: &[EntityId]) -> Result<Vec<GroupMembership>>;

    /// Identities of every member of any of `groups`.
    fn identities(&self, groups: &[GroupPath]) -> Result<Vec<IdentityRow>>;

    /// Identities of the given entities.
    fn entity_identities(&self, entities: &[EntityId]) -> Result<Vec<IdentityRow>>;

    /// Stored information of the given entities.
    fn entities(&self, entities: &[EntityId]) -> Result<Vec<EntityInfo>>;

    /// The ordered statement list of `group`.
    fn statements(&self, group: &GroupPath) -> Result<Vec<AttributeStatement>>;

    /// The statement index of the whole group tree.
    fn statement_index(&self) -> Result<Arc<StatementIndex>>;
}

/// A directory that hands out consistent snapshots.
pub trait DirectoryStore: Send + Sync {
    /// Opens a read view. All reads through it observe the same state.
    fn snapshot(&self) -> Result<Box<dyn DirectoryReader + '_>>;
}
