//! Batch resolution of effective attributes, memberships and group structure.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tessera_expr::ExpressionEvaluator;
use tessera_statements::{
    AttributesByGroup, GroupAttributes, StatementEvaluator, StatementIndex, Subject,
};
use tessera_store::DirectoryReader;
use tessera_types::{
    Attribute, EntityId, EntityInfo, GroupMembership, GroupPath, Identity, TypeCatalog,
};
use tracing::{debug, debug_span, error, warn};

use crate::instrumentation::{Instrumentation, NoopInstrumentation, operations};
use crate::{BulkError, BulkOptions, Result};

/// Effective attributes: group -> entity -> attribute name -> attribute.
pub type ResolvedAttributes = BTreeMap<GroupPath, HashMap<EntityId, GroupAttributes>>;

/// Every group of a subtree with its direct subgroups.
pub type GroupStructure = BTreeMap<GroupPath, Vec<GroupPath>>;

/// Complete information about one member of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityInGroup {
    pub entity: EntityInfo,
    /// Identities, excluding targeted ones.
    pub identities: Vec<Identity>,
    /// Every membership of the entity.
    pub groups: BTreeMap<GroupPath, GroupMembership>,
    /// Effective attributes in the queried group.
    pub attributes: GroupAttributes,
    /// Effective attributes in `/`.
    pub root_attributes: GroupAttributes,
}

/// Per-entity data fetched for statement evaluation.
#[derive(Default)]
struct EntityData {
    groups: BTreeSet<GroupPath>,
    identities: Vec<Identity>,
    attributes: AttributesByGroup,
}

/// Bulk resolution service.
///
/// Holds no mutable state between calls; a single instance can serve
/// concurrent callers, each passing its own directory snapshot.
pub struct BulkResolver {
    options: BulkOptions,
    statements: StatementEvaluator,
    instrumentation: Arc<dyn Instrumentation>,
}

impl std::fmt::Debug for BulkResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkResolver")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl BulkResolver {
    pub fn new(expressions: Arc<dyn ExpressionEvaluator>) -> Self {
        Self {
            options: BulkOptions::default(),
            statements: StatementEvaluator::new(expressions),
            instrumentation: Arc::new(NoopInstrumentation),
        }
    }

    pub fn with_options(mut self, options: BulkOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    pub fn options(&self) -> &BulkOptions {
        &self.options
    }

    /// Runs one batch read, recording its duration.
    fn timed<T>(
        &self,
        operation: &'static str,
        read: impl FnOnce() -> tessera_store::Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = read();
        let elapsed = start.elapsed();
        self.instrumentation.record(operation, elapsed);

        if elapsed > self.options.slow_read_threshold {
            warn!(
                operation,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.options.slow_read_threshold.as_millis() as u64,
                "Slow batch read"
            );
        }

        result.map_err(|source| {
            error!(operation, error = %source, "Batch read failed, resolution aborted");
            BulkError::BatchRead { operation, source }
        })
    }

    fn load_index(&self, reader: &dyn DirectoryReader) -> Result<Arc<StatementIndex>> {
        if self.options.evaluate_statements {
            self.timed(operations::STATEMENT_INDEX, || reader.statement_index())
        } else {
            Ok(Arc::new(StatementIndex::empty()))
        }
    }

    /// Global type names to overlay, restricted to `names` when given.
    fn global_names(&self, types: &TypeCatalog, names: Option<&[String]>) -> Vec<String> {
        if !self.options.include_global_attributes {
            return Vec::new();
        }
        types
            .global_names()
            .into_iter()
            .filter(|n| names.is_none_or(|requested| requested.contains(n)))
            .collect()
    }

    // ========================================================================
    // Bulk Resolution
    // ========================================================================

    /// Resolves the effective attributes of every member of `groups`.
    ///
    /// `names` restricts the output to the given attribute names. Requested
    /// groups that do not exist yield an empty map.
    pub fn resolve_many(
        &self,
        reader: &dyn DirectoryReader,
        groups: &[GroupPath],
        names: Option<&[String]>,
    ) -> Result<ResolvedAttributes> {
        let span = debug_span!("resolve_many", groups = groups.len());
        let _guard = span.enter();
        self.resolve_scoped(reader, groups, names, None)
    }

    fn resolve_scoped(
        &self,
        reader: &dyn DirectoryReader,
        groups: &[GroupPath],
        names: Option<&[String]>,
        only: Option<&BTreeSet<EntityId>>,
    ) -> Result<ResolvedAttributes> {
        let started = Instant::now();
        let mut resolved = ResolvedAttributes::new();

        let existing: BTreeSet<GroupPath> = self
            .timed(operations::GROUPS, || reader.groups())?
            .into_iter()
            .collect();
        let mut requested: Vec<GroupPath> = Vec::new();
        for group in groups.iter().collect::<BTreeSet<_>>() {
            if existing.contains(group) {
                requested.push(group.clone());
            } else {
                warn!(group = %group, "Requested group does not exist");
            }
            resolved.insert(group.clone(), HashMap::new());
        }
        if requested.is_empty() {
            return Ok(resolved);
        }

        let types = self.timed(operations::ATTRIBUTE_TYPES, || reader.attribute_types())?;
        let index = self.load_index(reader)?;
        let global_names = self.global_names(&types, names);

        let with_statements: BTreeSet<&GroupPath> =
            requested.iter().filter(|g| index.has_statements(g)).collect();
        let mut scope: BTreeSet<GroupPath> = requested.iter().cloned().collect();
        for group in &with_statements {
            scope.extend(index.source_groups(group));
        }
        let scope: Vec<GroupPath> = scope.into_iter().collect();

        // Conditions may read any attribute, so the name filter only narrows
        // the read when no statement is involved.
        let read_names = if with_statements.is_empty() { names } else { None };

        let memberships = self.timed(operations::MEMBERSHIPS, || reader.memberships(&requested))?;
        let mut members: BTreeMap<&GroupPath, Vec<EntityId>> = BTreeMap::new();
        let mut entities: BTreeSet<EntityId> = BTreeSet::new();
        for membership in &memberships {
            if only.is_some_and(|o| !o.contains(&membership.entity)) {
                continue;
            }
            members
                .entry(&membership.group)
                .or_default()
                .push(membership.entity);
            entities.insert(membership.entity);
        }

        if self.options.max_entities > 0 && entities.len() > self.options.max_entities {
            return Err(BulkError::TooManyEntities {
                count: entities.len(),
                limit: self.options.max_entities,
            });
        }

        let rows = self.timed(operations::DIRECT_ATTRIBUTES, || {
            reader.direct_attributes(&scope, read_names)
        })?;
        let global_rows = if global_names.is_empty() {
            Vec::new()
        } else {
            self.timed(operations::GLOBAL_ATTRIBUTES, || {
                reader.direct_attributes(&[GroupPath::root()], Some(&global_names))
            })?
        };

        let mut data: HashMap<EntityId, EntityData> = HashMap::with_capacity(entities.len());
        for row in rows {
            if !entities.contains(&row.entity) {
                continue;
            }
            data.entry(row.entity)
                .or_default()
                .attributes
                .entry(row.attribute.group.clone())
                .or_default()
                .insert(row.attribute.name.clone(), row.attribute);
        }

        let mut globals: HashMap<EntityId, GroupAttributes> = HashMap::new();
        for row in global_rows {
            if entities.contains(&row.entity) {
                globals
                    .entry(row.entity)
                    .or_default()
                    .insert(row.attribute.name.clone(), row.attribute);
            }
        }

        if !with_statements.is_empty() {
            let ids: Vec<EntityId> = members
                .iter()
                .filter(|(g, _)| with_statements.contains(*g))
                .flat_map(|(_, ids)| ids.iter().copied())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let all_memberships = self.timed(operations::ENTITY_MEMBERSHIPS, || {
                reader.entity_memberships(&ids)
            })?;
            for membership in all_memberships {
                data.entry(membership.entity)
                    .or_default()
                    .groups
                    .insert(membership.group);
            }
            let identities = self.timed(operations::IDENTITIES, || reader.entity_identities(&ids))?;
            for row in identities {
                data.entry(row.entity).or_default().identities.push(row.identity);
            }
        }

        let empty = EntityData::default();
        let mut statement_runs = 0usize;
        for (group, ids) in &members {
            let statements = index.for_group(group);
            let per_group = resolved.entry((*group).clone()).or_default();
            for entity in ids {
                let entity_data = data.get(entity).unwrap_or(&empty);
                let mut attributes = if statements.is_empty() {
                    entity_data
                        .attributes
                        .get(*group)
                        .cloned()
                        .unwrap_or_default()
                } else {
                    statement_runs += 1;
                    let subject = Subject::new(*entity, &entity_data.groups, &entity_data.attributes)
                        .with_identities(&entity_data.identities);
                    self.statements
                        .evaluate(&subject, group, statements, &types, None)
                };

                if let Some(root_values) = globals.get(entity) {
                    overlay_globals(&mut attributes, root_values);
                }
                if let Some(names) = names {
                    attributes.retain(|name, _| names.contains(name));
                }
                per_group.insert(*entity, attributes);
            }
        }

        debug!(
            groups = requested.len(),
            scope = scope.len(),
            entities = entities.len(),
            statement_runs,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Bulk resolution complete"
        );
        Ok(resolved)
    }

    // ========================================================================
    // Point Resolution
    // ========================================================================

    /// Resolves the effective attributes of one entity in one group.
    ///
    /// Returns an empty map when the entity is not a member of `group`.
    pub fn resolve_group(
        &self,
        reader: &dyn DirectoryReader,
        entity: EntityId,
        group: &GroupPath,
    ) -> Result<GroupAttributes> {
        self.resolve_point(reader, entity, group, None)
    }

    /// Resolves a single effective attribute of one entity in one group.
    pub fn resolve_attribute(
        &self,
        reader: &dyn DirectoryReader,
        entity: EntityId,
        group: &GroupPath,
        name: &str,
    ) -> Result<Option<Attribute>> {
        Ok(self
            .resolve_point(reader, entity, group, Some(name))?
            .remove(name))
    }

    fn resolve_point(
        &self,
        reader: &dyn DirectoryReader,
        entity: EntityId,
        group: &GroupPath,
        queried: Option<&str>,
    ) -> Result<GroupAttributes> {
        let span = debug_span!("resolve_group", entity = %entity, group = %group);
        let _guard = span.enter();

        let groups: BTreeSet<GroupPath> = self
            .timed(operations::ENTITY_MEMBERSHIPS, || reader.entity_memberships(&[entity]))?
            .into_iter()
            .map(|m| m.group)
            .collect();
        if !groups.contains(group) {
            debug!("Entity is not a member of the group");
            return Ok(GroupAttributes::new());
        }

        let types = self.timed(operations::ATTRIBUTE_TYPES, || reader.attribute_types())?;
        let index = self.load_index(reader)?;
        let statements = index.for_group(group);
        let queried_names: Option<Vec<String>> = queried.map(|q| vec![q.to_string()]);
        let global_names = self.global_names(&types, queried_names.as_deref());

        let mut scope: BTreeSet<GroupPath> = index.source_groups(group);
        scope.insert(group.clone());
        if !global_names.is_empty() {
            scope.insert(GroupPath::root());
        }
        let scope: Vec<GroupPath> = scope.into_iter().collect();

        let mut attributes = AttributesByGroup::new();
        for attribute in self.timed(operations::ENTITY_ATTRIBUTES, || {
            reader.entity_attributes(entity, &scope)
        })? {
            attributes
                .entry(attribute.group.clone())
                .or_default()
                .insert(attribute.name.clone(), attribute);
        }

        let identities: Vec<Identity> = if statements.is_empty() {
            Vec::new()
        } else {
            self.timed(operations::IDENTITIES, || reader.entity_identities(&[entity]))?
                .into_iter()
                .map(|row| row.identity)
                .collect()
        };

        let subject = Subject::new(entity, &groups, &attributes).with_identities(&identities);
        let mut resolved = self
            .statements
            .evaluate(&subject, group, statements, &types, queried);

        if let Some(root_values) = attributes.get(&GroupPath::root()) {
            let root_globals: GroupAttributes = root_values
                .iter()
                .filter(|(name, _)| global_names.contains(name))
                .map(|(name, attribute)| (name.clone(), attribute.clone()))
                .collect();
            overlay_globals(&mut resolved, &root_globals);
        }
        Ok(resolved)
    }

    // ========================================================================
    // Structural Queries
    // ========================================================================

    /// Every group of the subtree rooted at `root`, with its direct subgroups.
    pub fn group_and_subgroups(
        &self,
        reader: &dyn DirectoryReader,
        root: &GroupPath,
    ) -> Result<GroupStructure> {
        let groups = self.timed(operations::GROUPS, || reader.groups())?;
        if !groups.contains(root) {
            return Err(BulkError::GroupNotFound(root.clone()));
        }

        let mut structure: GroupStructure = groups
            .iter()
            .filter(|g| g.is_child_or_same(root))
            .map(|g| (g.clone(), Vec::new()))
            .collect();
        for group in groups.iter().filter(|g| g.is_child_of(root)) {
            if let Some(parent) = group.parent()
                && let Some(children) = structure.get_mut(&parent)
            {
                children.push(group.clone());
            }
        }
        Ok(structure)
    }

    /// Complete information about every member of `group`.
    pub fn membership_info(
        &self,
        reader: &dyn DirectoryReader,
        group: &GroupPath,
    ) -> Result<BTreeMap<EntityId, EntityInGroup>> {
        let span = debug_span!("membership_info", group = %group);
        let _guard = span.enter();

        if !self.timed(operations::GROUPS, || reader.group_exists(group))? {
            return Err(BulkError::GroupNotFound(group.clone()));
        }

        let members: BTreeSet<EntityId> = self
            .timed(operations::MEMBERSHIPS, || reader.memberships(std::slice::from_ref(group)))?
            .into_iter()
            .map(|m| m.entity)
            .collect();
        if self.options.max_entities > 0 && members.len() > self.options.max_entities {
            return Err(BulkError::TooManyEntities {
                count: members.len(),
                limit: self.options.max_entities,
            });
        }
        let ids: Vec<EntityId> = members.iter().copied().collect();

        let infos = self.timed(operations::ENTITIES, || reader.entities(&ids))?;
        let mut memberships: HashMap<EntityId, BTreeMap<GroupPath, GroupMembership>> = HashMap::new();
        for membership in self.timed(operations::ENTITY_MEMBERSHIPS, || reader.entity_memberships(&ids))? {
            memberships
                .entry(membership.entity)
                .or_default()
                .insert(membership.group.clone(), membership);
        }
        let mut identities: HashMap<EntityId, Vec<Identity>> = HashMap::new();
        for row in self.timed(operations::IDENTITIES, || reader.entity_identities(&ids))? {
            if !row.identity.is_targeted() {
                identities.entry(row.entity).or_default().push(row.identity);
            }
        }

        let mut resolved =
            self.resolve_scoped(reader, &[group.clone(), GroupPath::root()], None, Some(&members))?;
        let mut in_group = resolved.remove(group).unwrap_or_default();
        let mut in_root = if group.is_root() {
            in_group.clone()
        } else {
            resolved.remove(&GroupPath::root()).unwrap_or_default()
        };

        let mut info = BTreeMap::new();
        for entity in infos {
            let id = entity.id;
            info.insert(
                id,
                EntityInGroup {
                    entity,
                    identities: identities.remove(&id).unwrap_or_default(),
                    groups: memberships.remove(&id).unwrap_or_default(),
                    attributes: in_group.remove(&id).unwrap_or_default(),
                    root_attributes: in_root.remove(&id).unwrap_or_default(),
                },
            );
        }
        debug!(members = info.len(), "Membership info assembled");
        Ok(info)
    }
}

/// Fills names missing from `attributes` with the entity's root-scoped
/// global values. A group-scoped value always wins. Copies are not direct
/// values of the target group.
fn overlay_globals(attributes: &mut GroupAttributes, root_values: &GroupAttributes) {
    for (name, attribute) in root_values {
        attributes.entry(name.clone()).or_insert_with(|| {
            let mut copy = attribute.clone();
            copy.direct = false;
            copy
        });
    }
}
