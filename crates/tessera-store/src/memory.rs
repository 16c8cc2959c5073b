//! In-memory directory with copy-on-write snapshots.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tessera_statements::StatementIndex;
use tessera_types::{
    Attribute, AttributeStatement, AttributeType, EntityId, EntityInfo, GroupMembership, GroupPath,
    Identity, TypeCatalog,
};
use tracing::{debug, info};

use crate::{AttributeRow, DirectoryReader, DirectoryStore, IdentityRow, Result, StoreError};

#[derive(Debug, Clone, Default)]
struct EntityRecord {
    info: Option<EntityInfo>,
    identities: Vec<Identity>,
    memberships: BTreeMap<GroupPath, GroupMembership>,
    attributes: BTreeMap<(GroupPath, String), Attribute>,
}

#[derive(Debug, Clone)]
struct DirectoryData {
    groups: BTreeMap<GroupPath, Vec<AttributeStatement>>,
    index: Arc<StatementIndex>,
    types: TypeCatalog,
    entities: BTreeMap<EntityId, EntityRecord>,
}

impl Default for DirectoryData {
    fn default() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(GroupPath::root(), Vec::new());
        Self {
            groups,
            index: Arc::new(StatementIndex::empty()),
            types: TypeCatalog::new(),
            entities: BTreeMap::new(),
        }
    }
}

impl DirectoryData {
    fn rebuild_index(&mut self) -> Result<()> {
        let index = StatementIndex::build(self.groups.iter().map(|(g, s)| (g, s.as_slice())))?;
        self.index = Arc::new(index);
        Ok(())
    }

    fn require_group(&self, group: &GroupPath) -> Result<()> {
        if self.groups.contains_key(group) {
            Ok(())
        } else {
            Err(StoreError::GroupNotFound(group.clone()))
        }
    }

    fn entity_mut(&mut self, entity: EntityId) -> Result<&mut EntityRecord> {
        self.entities
            .get_mut(&entity)
            .ok_or(StoreError::EntityNotFound(entity))
    }
}

/// Directory held entirely in memory.
///
/// Each write produces a new immutable data set; snapshots keep the data
/// set they were opened on. Every entity is a member of `/`, and membership
/// in a group requires membership in its parent.
///
/// # Example
///
/// ```
/// use tessera_store::{DirectoryReader, DirectoryStore, InMemoryDirectory};
/// use tessera_types::{EntityId, EntityInfo, GroupPath};
///
/// let directory = InMemoryDirectory::new();
/// let org = GroupPath::new("/org").unwrap();
/// directory.add_group(&org).unwrap();
/// directory.add_entity(EntityInfo::new(EntityId::new(1))).unwrap();
/// directory.add_member(EntityId::new(1), &org).unwrap();
///
/// let snapshot = directory.snapshot().unwrap();
/// assert_eq!(snapshot.memberships(&[org]).unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    data: RwLock<Arc<DirectoryData>>,
}

impl InMemoryDirectory {
    /// Creates a directory containing only the root group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `f` to a private copy of the data and publishes it on success.
    fn write<T>(&self, f: impl FnOnce(&mut DirectoryData) -> Result<T>) -> Result<T> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| StoreError::Internal("lock poisoned".to_string()))?;
        let mut next = DirectoryData::clone(&guard);
        let value = f(&mut next)?;
        *guard = Arc::new(next);
        Ok(value)
    }

    // ========================================================================
    // Groups and Statements
    // ========================================================================

    /// Creates a group. Its parent must exist.
    pub fn add_group(&self, group: &GroupPath) -> Result<()> {
        self.write(|data| {
            if data.groups.contains_key(group) {
                return Err(StoreError::Conflict(format!("group {group} already exists")));
            }
            if let Some(parent) = group.parent() {
                data.require_group(&parent)?;
            }
            data.groups.insert(group.clone(), Vec::new());
            debug!(group = %group, "Group created");
            Ok(())
        })
    }

    /// Removes a group with its whole subtree, including memberships and
    /// attributes held there.
    pub fn remove_group(&self, group: &GroupPath) -> Result<()> {
        if group.is_root() {
            return Err(StoreError::Conflict("the root group cannot be removed".to_string()));
        }
        self.write(|data| {
            data.require_group(group)?;
            data.groups.retain(|g, _| !g.is_child_or_same(group));
            for record in data.entities.values_mut() {
                record.memberships.retain(|g, _| !g.is_child_or_same(group));
                record.attributes.retain(|(g, _), _| !g.is_child_or_same(group));
            }
            data.rebuild_index()?;
            info!(group = %group, "Group subtree removed");
            Ok(())
        })
    }

    /// Replaces the statement list of `group` in one step.
    ///
    /// The whole statement set is revalidated; on error nothing changes.
    pub fn set_statements(&self, group: &GroupPath, statements: Vec<AttributeStatement>) -> Result<()> {
        self.write(|data| {
            data.require_group(group)?;
            let count = statements.len();
            data.groups.insert(group.clone(), statements);
            data.rebuild_index()?;
            debug!(group = %group, statements = count, "Attribute statements replaced");
            Ok(())
        })
    }

    pub fn add_attribute_type(&self, attribute_type: AttributeType) -> Result<()> {
        self.write(|data| {
            data.types.insert(attribute_type);
            Ok(())
        })
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Creates an entity as a member of `/`.
    pub fn add_entity(&self, info: EntityInfo) -> Result<()> {
        self.add_entity_at(info, Utc::now())
    }

    /// Creates an entity, joining `/` at `joined_at`.
    pub fn add_entity_at(&self, info: EntityInfo, joined_at: DateTime<Utc>) -> Result<()> {
        self.write(|data| {
            if data.entities.contains_key(&info.id) {
                return Err(StoreError::Conflict(format!("entity {} already exists", info.id)));
            }
            let id = info.id;
            let mut record = EntityRecord {
                info: Some(info),
                ..EntityRecord::default()
            };
            record.memberships.insert(
                GroupPath::root(),
                GroupMembership::new(id, GroupPath::root(), joined_at),
            );
            data.entities.insert(id, record);
            Ok(())
        })
    }

    pub fn add_identity(&self, entity: EntityId, identity: Identity) -> Result<()> {
        self.write(|data| {
            let record = data.entity_mut(entity)?;
            if record.identities.contains(&identity) {
                return Err(StoreError::Conflict(format!(
                    "identity {}:{} already assigned",
                    identity.type_id, identity.value
                )));
            }
            record.identities.push(identity);
            Ok(())
        })
    }

    /// Adds `entity` to `group`, joined now.
    pub fn add_member(&self, entity: EntityId, group: &GroupPath) -> Result<()> {
        self.add_membership(GroupMembership::new(entity, group.clone(), Utc::now()))
    }

    /// Records a membership. The entity must already belong to the parent.
    pub fn add_membership(&self, membership: GroupMembership) -> Result<()> {
        self.write(|data| {
            data.require_group(&membership.group)?;
            let record = data.entity_mut(membership.entity)?;
            if record.memberships.contains_key(&membership.group) {
                return Err(StoreError::Conflict(format!(
                    "entity {} is already a member of {}",
                    membership.entity, membership.group
                )));
            }
            if let Some(parent) = membership.group.parent()
                && !record.memberships.contains_key(&parent)
            {
                return Err(StoreError::Conflict(format!(
                    "entity {} is not a member of the parent group {parent}",
                    membership.entity
                )));
            }
            record
                .memberships
                .insert(membership.group.clone(), membership);
            Ok(())
        })
    }

    /// Removes `entity` from `group` and its subgroups, dropping the
    /// attributes held there.
    pub fn remove_member(&self, entity: EntityId, group: &GroupPath) -> Result<()> {
        if group.is_root() {
            return Err(StoreError::Conflict("membership in / cannot be removed".to_string()));
        }
        self.write(|data| {
            let record = data.entity_mut(entity)?;
            if record.memberships.remove(group).is_none() {
                return Err(StoreError::Conflict(format!(
                    "entity {entity} is not a member of {group}"
                )));
            }
            record.memberships.retain(|g, _| !g.is_child_of(group));
            record.attributes.retain(|(g, _), _| !g.is_child_or_same(group));
            Ok(())
        })
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Stores a new direct attribute. Fails if one already exists under the
    /// same (entity, group, name).
    pub fn add_attribute(&self, entity: EntityId, attribute: Attribute) -> Result<()> {
        self.store_attribute(entity, attribute, false)
    }

    /// Stores a direct attribute, replacing any existing one.
    pub fn set_attribute(&self, entity: EntityId, attribute: Attribute) -> Result<()> {
        self.store_attribute(entity, attribute, true)
    }

    fn store_attribute(&self, entity: EntityId, mut attribute: Attribute, replace: bool) -> Result<()> {
        self.write(|data| {
            let record = data.entity_mut(entity)?;
            if !record.memberships.contains_key(&attribute.group) {
                return Err(StoreError::Conflict(format!(
                    "entity {entity} is not a member of {}",
                    attribute.group
                )));
            }
            let key = (attribute.group.clone(), attribute.name.clone());
            if !replace && record.attributes.contains_key(&key) {
                return Err(StoreError::Conflict(format!(
                    "attribute '{}' of entity {entity} already exists in {}",
                    attribute.name, attribute.group
                )));
            }
            attribute.direct = true;
            record.attributes.insert(key, attribute);
            Ok(())
        })
    }

    pub fn remove_attribute(&self, entity: EntityId, group: &GroupPath, name: &str) -> Result<()> {
        self.write(|data| {
            let record = data.entity_mut(entity)?;
            record
                .attributes
                .remove(&(group.clone(), name.to_string()))
                .map(|_| ())
                .ok_or_else(|| {
                    StoreError::Conflict(format!("attribute '{name}' of entity {entity} not found in {group}"))
                })
        })
    }
}

impl DirectoryStore for InMemoryDirectory {
    fn snapshot(&self) -> Result<Box<dyn DirectoryReader + '_>> {
        let data = self
            .data
            .read()
            .map_err(|_| StoreError::batch_read("snapshot", "lock poisoned"))?;
        Ok(Box::new(DirectorySnapshot {
            data: Arc::clone(&*data),
        }))
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Immutable view of an [`InMemoryDirectory`] at one point in time.
#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    data: Arc<DirectoryData>,
}

impl DirectorySnapshot {
    fn members_of<'a>(
        &'a self,
        groups: &'a HashSet<&'a GroupPath>,
    ) -> impl Iterator<Item = (&'a EntityId, &'a EntityRecord)> + 'a {
        self.data
            .entities
            .iter()
            .filter(move |(_, r)| r.memberships.keys().any(|g| groups.contains(g)))
    }
}

impl DirectoryReader for DirectorySnapshot {
    fn groups(&self) -> Result<Vec<GroupPath>> {
        Ok(self.data.groups.keys().cloned().collect())
    }

    fn group_exists(&self, group: &GroupPath) -> Result<bool> {
        Ok(self.data.groups.contains_key(group))
    }

    fn attribute_types(&self) -> Result<TypeCatalog> {
        Ok(self.data.types.clone())
    }

    fn direct_attributes(
        &self,
        groups: &[GroupPath],
        names: Option<&[String]>,
    ) -> Result<Vec<AttributeRow>> {
        let groups: HashSet<&GroupPath> = groups.iter().collect();
        let mut rows = Vec::new();
        for (entity, record) in &self.data.entities {
            for ((group, name), attribute) in &record.attributes {
                if groups.contains(group) && names.is_none_or(|n| n.contains(name)) {
                    rows.push(AttributeRow {
                        entity: *entity,
                        attribute: attribute.clone(),
                    });
                }
            }
        }
        Ok(rows)
    }

    fn entity_attributes(&self, entity: EntityId, groups: &[GroupPath]) -> Result<Vec<Attribute>> {
        let Some(record) = self.data.entities.get(&entity) else {
            return Ok(Vec::new());
        };
        Ok(record
            .attributes
            .iter()
            .filter(|((group, _), _)| groups.contains(group))
            .map(|(_, attribute)| attribute.clone())
            .collect())
    }

    fn memberships(&self, groups: &[GroupPath]) -> Result<Vec<GroupMembership>> {
        let mut rows = Vec::new();
        for record in self.data.entities.values() {
            for group in groups {
                if let Some(membership) = record.memberships.get(group) {
                    rows.push(membership.clone());
                }
            }
        }
        Ok(rows)
    }

    fn entity_memberships(&self, entities: &[EntityId]) -> Result<Vec<GroupMembership>> {
        Ok(entities
            .iter()
            .filter_map(|id| self.data.entities.get(id))
            .flat_map(|record| record.memberships.values().cloned())
            .collect())
    }

    fn identities(&self, groups: &[GroupPath]) -> Result<Vec<IdentityRow>> {
        let groups: HashSet<&GroupPath> = groups.iter().collect();
        Ok(self
            .members_of(&groups)
            .flat_map(|(entity, record)| {
                record.identities.iter().map(|identity| IdentityRow {
                    entity: *entity,
                    identity: identity.clone(),
                })
            })
            .collect())
    }

    fn entity_identities(&self, entities: &[EntityId]) -> Result<Vec<IdentityRow>> {
        let mut rows = Vec::new();
        for id in entities {
            if let Some(record) = self.data.entities.get(id) {
                rows.extend(record.identities.iter().map(|identity| IdentityRow {
                    entity: *id,
                    identity: identity.clone(),
                }));
            }
        }
        Ok(rows)
    }

    fn entities(&self, entities: &[EntityId]) -> Result<Vec<EntityInfo>> {
        Ok(entities
            .iter()
            .filter_map(|id| self.data.entities.get(id))
            .filter_map(|record| record.info.clone())
            .collect())
    }

    fn statements(&self, group: &GroupPath) -> Result<Vec<AttributeStatement>> {
        self.data
            .groups
            .get(group)
            .cloned()
            .ok_or_else(|| StoreError::GroupNotFound(group.clone()))
    }

    fn statement_index(&self) -> Result<Arc<StatementIndex>> {
        Ok(Arc::clone(&self.data.index))
    }
}
