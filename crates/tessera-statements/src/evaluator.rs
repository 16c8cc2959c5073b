//! Attribute statement evaluation for one entity in one group.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};
use tessera_expr::{EvalContext, ExpressionEvaluator, value_list};
use tessera_types::{
    Attribute, AttributeType, ConflictResolution, EntityId, GroupPath, Identity,
    StatementAssignment, TypeCatalog,
};
use tracing::{debug, trace, warn};

use crate::index::IndexedStatement;

/// Attributes of one entity in one group, by name.
pub type GroupAttributes = BTreeMap<String, Attribute>;

/// Attributes of one entity across groups.
pub type AttributesByGroup = HashMap<GroupPath, GroupAttributes>;

/// Variables exposed to statement conditions and value expressions.
pub mod context_keys {
    /// Numeric entity identifier.
    pub const ENTITY_ID: &str = "entityId";
    /// Path of the group being resolved.
    pub const GROUP_NAME: &str = "groupName";
    /// Every group the entity belongs to.
    pub const GROUPS: &str = "groups";
    /// Identity values by identity type.
    pub const IDS_BY_TYPE: &str = "idsByType";
    /// First value of each attribute in the group.
    pub const ATTR: &str = "attr";
    /// All values of each attribute in the group.
    pub const ATTRS: &str = "attrs";
    /// First values of the owner group's attributes, for redirected statements.
    pub const EATTR: &str = "eattr";
    /// All values of the owner group's attributes, for redirected statements.
    pub const EATTRS: &str = "eattrs";
}

/// The entity whose attributes are being resolved.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub entity: EntityId,
    /// Every group the entity is a member of.
    pub groups: &'a BTreeSet<GroupPath>,
    /// Directly stored attributes, grouped by group.
    pub attributes: &'a AttributesByGroup,
    pub identities: &'a [Identity],
}

impl<'a> Subject<'a> {
    pub fn new(
        entity: EntityId,
        groups: &'a BTreeSet<GroupPath>,
        attributes: &'a AttributesByGroup,
    ) -> Self {
        Self {
            entity,
            groups,
            attributes,
            identities: &[],
        }
    }

    pub fn with_identities(mut self, identities: &'a [Identity]) -> Self {
        self.identities = identities;
        self
    }

    pub fn is_member_of(&self, group: &GroupPath) -> bool {
        self.groups.contains(group)
    }
}

/// Applies attribute statements on top of directly stored attributes.
///
/// Stateless apart from the shared expression evaluator, so one instance can
/// serve concurrent callers.
#[derive(Clone)]
pub struct StatementEvaluator {
    expressions: Arc<dyn ExpressionEvaluator>,
}

impl std::fmt::Debug for StatementEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementEvaluator").finish_non_exhaustive()
    }
}

impl StatementEvaluator {
    pub fn new(expressions: Arc<dyn ExpressionEvaluator>) -> Self {
        Self { expressions }
    }

    /// Computes the candidate attributes of `subject` in `group`.
    ///
    /// Starts from the subject's direct attributes in `group`, then applies
    /// `statements` (as returned by
    /// [`StatementIndex::for_group`](crate::StatementIndex::for_group)) in
    /// order, reconciling each result with the running candidate map using
    /// the statement's [`ConflictResolution`].
    ///
    /// With `queried_attribute` set, only that attribute is collected and
    /// only statements producing it are evaluated. Statements are ignored
    /// entirely when the subject is not a member of `group`.
    pub fn evaluate(
        &self,
        subject: &Subject<'_>,
        group: &GroupPath,
        statements: &[IndexedStatement],
        types: &TypeCatalog,
        queried_attribute: Option<&str>,
    ) -> GroupAttributes {
        let mut collected: GroupAttributes = match subject.attributes.get(group) {
            Some(direct) => direct
                .iter()
                .filter(|(name, _)| queried_attribute.is_none_or(|q| q == name.as_str()))
                .map(|(name, attribute)| (name.clone(), attribute.clone()))
                .collect(),
            None => GroupAttributes::new(),
        };

        if statements.is_empty() || !subject.is_member_of(group) {
            return collected;
        }

        let base = base_context(subject, group);
        for indexed in statements {
            if queried_attribute.is_some_and(|q| !indexed.produces(q)) {
                continue;
            }
            let context = statement_context(&base, subject, indexed, &collected);
            if let Some(candidate) = self.produce(subject, group, indexed, &context, types) {
                reconcile(
                    &mut collected,
                    candidate,
                    indexed.statement.conflict_resolution,
                    types,
                );
            }
        }
        collected
    }

    /// Evaluates a single statement, `None` when it produces nothing.
    fn produce(
        &self,
        subject: &Subject<'_>,
        group: &GroupPath,
        indexed: &IndexedStatement,
        context: &EvalContext,
        types: &TypeCatalog,
    ) -> Option<Attribute> {
        let statement = &indexed.statement;
        match self.expressions.evaluate_boolean(&statement.condition, context) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(
                    group = %group,
                    owner = %indexed.owner,
                    statement = indexed.position,
                    entity = %subject.entity,
                    condition = %statement.condition,
                    error = %e,
                    "Attribute statement condition failed, statement skipped"
                );
                return None;
            }
        }

        match &statement.assignment {
            StatementAssignment::Fixed { attribute } => {
                let mut produced = attribute.clone();
                produced.group = group.clone();
                produced.direct = false;
                Some(produced)
            }
            StatementAssignment::Dynamic {
                attribute_type,
                expression,
            } => {
                let Some(attribute_type) = types.get(attribute_type) else {
                    warn!(
                        group = %group,
                        owner = %indexed.owner,
                        statement = indexed.position,
                        attribute_type = %attribute_type,
                        "Unknown attribute type in dynamic statement, statement skipped"
                    );
                    return None;
                };
                self.dynamic_attribute(subject, group, indexed, attribute_type, expression, context)
            }
        }
    }

    fn dynamic_attribute(
        &self,
        subject: &Subject<'_>,
        group: &GroupPath,
        indexed: &IndexedStatement,
        attribute_type: &AttributeType,
        expression: &str,
        context: &EvalContext,
    ) -> Option<Attribute> {
        let value = match self.expressions.evaluate_value(expression, context) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    group = %group,
                    owner = %indexed.owner,
                    statement = indexed.position,
                    entity = %subject.entity,
                    expression = %expression,
                    error = %e,
                    "Dynamic attribute expression failed, statement skipped"
                );
                return None;
            }
        };

        let Some(raw) = value_list(&value) else {
            debug!(
                group = %group,
                statement = indexed.position,
                attribute = %attribute_type.name,
                "Dynamic attribute expression produced no value"
            );
            return None;
        };

        let mut values = Vec::with_capacity(raw.len());
        for raw_value in &raw {
            match attribute_type.syntax.normalize(raw_value) {
                Ok(normalized) => values.push(normalized),
                Err(e) => {
                    debug!(
                        group = %group,
                        statement = indexed.position,
                        attribute = %attribute_type.name,
                        error = %e,
                        "Dynamic attribute value rejected by syntax, statement skipped"
                    );
                    return None;
                }
            }
        }

        if !attribute_type.allows_cardinality(values.len()) {
            debug!(
                group = %group,
                statement = indexed.position,
                attribute = %attribute_type.name,
                count = values.len(),
                "Dynamic attribute exceeds the type's value bound, statement skipped"
            );
            return None;
        }

        Some(Attribute::new(attribute_type.name.clone(), group.clone(), values))
    }
}

/// Folds a statement result into the candidate map.
fn reconcile(
    collected: &mut GroupAttributes,
    candidate: Attribute,
    resolution: ConflictResolution,
    types: &TypeCatalog,
) {
    let Some(existing) = collected.get_mut(&candidate.name) else {
        collected.insert(candidate.name.clone(), candidate);
        return;
    };

    match resolution {
        ConflictResolution::Skip => {
            trace!(attribute = %candidate.name, "Conflict: existing attribute kept");
        }
        ConflictResolution::Overwrite => {
            trace!(attribute = %candidate.name, "Conflict: existing attribute overwritten");
            *existing = candidate;
        }
        ConflictResolution::Merge => {
            let mut merged: Vec<String> = Vec::with_capacity(existing.values.len() + candidate.values.len());
            for value in existing.values.iter().chain(&candidate.values) {
                if !merged.contains(value) {
                    merged.push(value.clone());
                }
            }
            let allowed = types
                .get(&candidate.name)
                .is_none_or(|t| t.allows_cardinality(merged.len()));
            if allowed {
                trace!(attribute = %candidate.name, count = merged.len(), "Conflict: values merged");
                existing.values = merged;
                existing.direct = false;
            } else {
                trace!(attribute = %candidate.name, "Conflict: merge would exceed value bound, skipped");
            }
        }
    }
}

// ============================================================================
// Evaluation Context
// ============================================================================

fn base_context(subject: &Subject<'_>, group: &GroupPath) -> EvalContext {
    let mut ids_by_type: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
    for identity in subject.identities {
        ids_by_type
            .entry(identity.type_id.as_str())
            .or_default()
            .push(Value::from(identity.value.as_str()));
    }
    let ids_by_type: Map<String, Value> = ids_by_type
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::Array(v)))
        .collect();

    EvalContext::new()
        .with(context_keys::ENTITY_ID, subject.entity.as_u64())
        .with(context_keys::GROUP_NAME, group.as_str())
        .with(
            context_keys::GROUPS,
            subject.groups.iter().map(GroupPath::as_str).collect::<Vec<_>>(),
        )
        .with(context_keys::IDS_BY_TYPE, Value::Object(ids_by_type))
}

fn statement_context(
    base: &EvalContext,
    subject: &Subject<'_>,
    indexed: &IndexedStatement,
    collected: &GroupAttributes,
) -> EvalContext {
    let mut context = base.clone();
    let (attr, attrs) = attribute_maps(collected.values());
    context.insert(context_keys::ATTR, attr);
    context.insert(context_keys::ATTRS, attrs);

    if indexed.is_redirected() {
        let owner_attributes = subject.attributes.get(&indexed.owner);
        let (eattr, eattrs) = attribute_maps(owner_attributes.into_iter().flat_map(|m| m.values()));
        context.insert(context_keys::EATTR, eattr);
        context.insert(context_keys::EATTRS, eattrs);
    } else {
        context.insert(context_keys::EATTR, Value::Null);
        context.insert(context_keys::EATTRS, Value::Null);
    }
    context
}

/// Builds the `attr` (first value) and `attrs` (all values) maps.
fn attribute_maps<'a>(attributes: impl Iterator<Item = &'a Attribute>) -> (Value, Value) {
    let mut first = Map::new();
    let mut all = Map::new();
    for attribute in attributes {
        let head = attribute
            .values
            .first()
            .map_or(Value::Null, |v| Value::from(v.as_str()));
        first.insert(attribute.name.clone(), head);
        all.insert(attribute.name.clone(), Value::from(attribute.values.clone()));
    }
    (Value::Object(first), Value::Object(all))
}
