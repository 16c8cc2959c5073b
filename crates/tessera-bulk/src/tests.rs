//! Unit tests for tessera-bulk

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use tessera_expr::RegistryEvaluator;
use tessera_statements::StatementIndex;
use tessera_store::{
    AttributeRow, DirectoryReader, DirectoryStore, IdentityRow, InMemoryDirectory, StoreError,
};
use tessera_types::{
    Attribute, AttributeStatement, AttributeType, ConflictResolution, EntityId, EntityInfo,
    GroupMembership, GroupPath, Identity, TypeCatalog, ValueSyntax,
};
use test_case::test_case;

use crate::{
    AtomicInstrumentation, BulkError, BulkOptions, BulkResolver, GroupAttributes, operations,
};

// ============================================================================
// Fixtures
// ============================================================================

fn group(s: &str) -> GroupPath {
    GroupPath::new(s).unwrap()
}

fn id(n: u64) -> EntityId {
    EntityId::new(n)
}

/// `/org/dept` tree with entity 1 in `/org/dept`, entity 2 in `/org` only.
fn directory() -> InMemoryDirectory {
    let dir = InMemoryDirectory::new();
    dir.add_group(&group("/org")).unwrap();
    dir.add_group(&group("/org/dept")).unwrap();
    dir.add_group(&group("/other")).unwrap();
    for t in [
        AttributeType::new("role", ValueSyntax::String),
        AttributeType::new("deptName", ValueSyntax::String),
        AttributeType::new("clearance", ValueSyntax::String).global(),
        AttributeType::new("country", ValueSyntax::String).global(),
    ] {
        dir.add_attribute_type(t).unwrap();
    }
    for n in [1, 2] {
        dir.add_entity(EntityInfo::new(id(n))).unwrap();
        dir.add_member(id(n), &group("/org")).unwrap();
    }
    dir.add_member(id(1), &group("/org/dept")).unwrap();
    dir
}

fn resolver() -> BulkResolver {
    BulkResolver::new(Arc::new(RegistryEvaluator::new()))
}

fn values(attributes: &GroupAttributes, name: &str) -> Option<Vec<String>> {
    attributes.get(name).map(|a| a.values.clone())
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn fixed_statement_resolves_for_members() {
    let dir = directory();
    let dept = group("/org/dept");
    dir.set_statements(
        &dept,
        vec![AttributeStatement::everybody(Attribute::new("role", dept.clone(), ["employee"]))],
    )
    .unwrap();

    let snap = dir.snapshot().unwrap();
    let resolved = resolver()
        .resolve_many(snap.as_ref(), &[dept.clone()], None)
        .unwrap();

    assert_eq!(resolved[&dept].len(), 1);
    assert_eq!(values(&resolved[&dept][&id(1)], "role"), Some(vec!["employee".into()]));
}

#[test]
fn skip_statement_keeps_direct_value() {
    let dir = directory();
    let dept = group("/org/dept");
    dir.set_statements(
        &dept,
        vec![AttributeStatement::everybody(Attribute::new("role", dept.clone(), ["employee"]))],
    )
    .unwrap();
    dir.set_attribute(id(1), Attribute::new("role", dept.clone(), ["manager"]))
        .unwrap();

    let snap = dir.snapshot().unwrap();
    let resolved = resolver()
        .resolve_many(snap.as_ref(), &[dept.clone()], None)
        .unwrap();

    assert_eq!(values(&resolved[&dept][&id(1)], "role"), Some(vec!["manager".into()]));
}

#[test]
fn redirected_statement_output_recorded_against_target() {
    let dir = directory();
    let org = group("/org");
    let dept = group("/org/dept");
    dir.set_statements(
        &org,
        vec![AttributeStatement::dynamic("true", "deptName", "deptOf").redirected_to(dept.clone())],
    )
    .unwrap();
    let registry = RegistryEvaluator::new().register_value("deptOf", json!(["alice_dept"]));
    let bulk = BulkResolver::new(Arc::new(registry));

    let snap = dir.snapshot().unwrap();
    let resolved = bulk
        .resolve_many(snap.as_ref(), &[org.clone(), dept.clone()], None)
        .unwrap();

    let at_dept = &resolved[&dept][&id(1)];
    assert_eq!(values(at_dept, "deptName"), Some(vec!["alice_dept".into()]));
    assert_eq!(at_dept["deptName"].group, dept);
    assert!(!resolved[&org][&id(1)].contains_key("deptName"));
}

#[test]
fn global_root_value_visible_in_subgroup() {
    let dir = directory();
    dir.set_attribute(id(1), Attribute::new("clearance", GroupPath::root(), ["secret"]))
        .unwrap();

    let snap = dir.snapshot().unwrap();
    let dept = group("/org/dept");
    let resolved = resolver()
        .resolve_many(snap.as_ref(), &[dept.clone()], None)
        .unwrap();

    let attrs = &resolved[&dept][&id(1)];
    assert_eq!(values(attrs, "clearance"), Some(vec!["secret".into()]));
    assert_eq!(attrs["clearance"].group, GroupPath::root());
    assert!(!attrs["clearance"].direct);
}

#[test]
fn global_root_value_is_not_direct_in_point_query() {
    let dir = directory();
    dir.set_attribute(id(1), Attribute::new("clearance", GroupPath::root(), ["secret"]))
        .unwrap();

    let snap = dir.snapshot().unwrap();
    let attrs = resolver()
        .resolve_group(snap.as_ref(), id(1), &group("/org/dept"))
        .unwrap();
    assert_eq!(values(&attrs, "clearance"), Some(vec!["secret".into()]));
    assert!(!attrs["clearance"].direct);

    let root = resolver()
        .resolve_group(snap.as_ref(), id(1), &GroupPath::root())
        .unwrap();
    assert!(root["clearance"].direct);
}

#[test]
fn group_scoped_global_value_wins_over_root() {
    let dir = directory();
    let dept = group("/org/dept");
    dir.set_attribute(id(1), Attribute::new("clearance", GroupPath::root(), ["secret"]))
        .unwrap();
    dir.set_attribute(id(1), Attribute::new("clearance", dept.clone(), ["public"]))
        .unwrap();

    let snap = dir.snapshot().unwrap();
    let resolved = resolver()
        .resolve_many(snap.as_ref(), &[dept.clone()], None)
        .unwrap();

    assert_eq!(values(&resolved[&dept][&id(1)], "clearance"), Some(vec!["public".into()]));
}

#[test]
fn non_global_root_value_is_not_overlaid() {
    let dir = directory();
    dir.set_attribute(id(1), Attribute::new("role", GroupPath::root(), ["root-role"]))
        .unwrap();

    let snap = dir.snapshot().unwrap();
    let org = group("/org");
    let resolved = resolver().resolve_many(snap.as_ref(), &[org.clone()], None).unwrap();

    assert!(resolved[&org][&id(1)].is_empty());
}

// ============================================================================
// Options and Filters
// ============================================================================

#[test]
fn name_filter_restricts_output() {
    let dir = directory();
    let org = group("/org");
    dir.set_attribute(id(1), Attribute::new("role", org.clone(), ["a"])).unwrap();
    dir.set_attribute(id(1), Attribute::new("deptName", org.clone(), ["b"])).unwrap();
    dir.set_attribute(id(1), Attribute::new("clearance", GroupPath::root(), ["secret"]))
        .unwrap();

    let snap = dir.snapshot().unwrap();
    let names = vec!["role".to_string()];
    let resolved = resolver()
        .resolve_many(snap.as_ref(), &[org.clone()], Some(&names))
        .unwrap();

    let attrs = &resolved[&org][&id(1)];
    assert_eq!(attrs.keys().collect::<Vec<_>>(), vec!["role"]);
}

#[test]
fn globals_can_be_disabled() {
    let dir = directory();
    dir.set_attribute(id(1), Attribute::new("clearance", GroupPath::root(), ["secret"]))
        .unwrap();
    let bulk = resolver().with_options(BulkOptions {
        include_global_attributes: false,
        ..BulkOptions::default()
    });

    let snap = dir.snapshot().unwrap();
    let org = group("/org");
    let resolved = bulk.resolve_many(snap.as_ref(), &[org.clone()], None).unwrap();

    assert!(!resolved[&org][&id(1)].contains_key("clearance"));
}

#[test]
fn statements_can_be_disabled() {
    let dir = directory();
    let org = group("/org");
    dir.set_statements(
        &org,
        vec![AttributeStatement::everybody(Attribute::new("role", org.clone(), ["member"]))],
    )
    .unwrap();
    let bulk = resolver().with_options(BulkOptions {
        evaluate_statements: false,
        ..BulkOptions::default()
    });

    let snap = dir.snapshot().unwrap();
    let resolved = bulk.resolve_many(snap.as_ref(), &[org.clone()], None).unwrap();

    assert!(resolved[&org][&id(1)].is_empty());
}

#[test]
fn missing_group_yields_empty_map() {
    let dir = directory();
    let snap = dir.snapshot().unwrap();
    let missing = group("/nope");
    let org = group("/org");

    let resolved = resolver()
        .resolve_many(snap.as_ref(), &[missing.clone(), org.clone()], None)
        .unwrap();

    assert!(resolved[&missing].is_empty());
    assert_eq!(resolved[&org].len(), 2);
}

#[test]
fn entity_limit_is_enforced() {
    let dir = directory();
    let bulk = resolver().with_options(BulkOptions {
        max_entities: 1,
        ..BulkOptions::default()
    });

    let snap = dir.snapshot().unwrap();
    let err = bulk
        .resolve_many(snap.as_ref(), &[group("/org")], None)
        .unwrap_err();

    assert!(matches!(err, BulkError::TooManyEntities { count: 2, limit: 1 }));
}

// ============================================================================
// Batch Behavior
// ============================================================================

/// Delegating reader that can fail one operation or inject stray rows.
struct ScriptedReader<'a> {
    inner: &'a dyn DirectoryReader,
    fail_on: Option<&'static str>,
    stray_rows: Vec<AttributeRow>,
}

impl<'a> ScriptedReader<'a> {
    fn new(inner: &'a dyn DirectoryReader) -> Self {
        Self {
            inner,
            fail_on: None,
            stray_rows: Vec::new(),
        }
    }

    fn check(&self, operation: &'static str) -> tessera_store::Result<()> {
        if self.fail_on == Some(operation) {
            Err(StoreError::batch_read(operation, "connection reset"))
        } else {
            Ok(())
        }
    }
}

impl DirectoryReader for ScriptedReader<'_> {
    fn groups(&self) -> tessera_store::Result<Vec<GroupPath>> {
        self.check("groups")?;
        self.inner.groups()
    }

    fn attribute_types(&self) -> tessera_store::Result<TypeCatalog> {
        self.check("attribute_types")?;
        self.inner.attribute_types()
    }

    fn direct_attributes(
        &self,
        groups: &[GroupPath],
        names: Option<&[String]>,
    ) -> tessera_store::Result<Vec<AttributeRow>> {
        self.check("direct_attributes")?;
        let mut rows = self.inner.direct_attributes(groups, names)?;
        rows.extend(self.stray_rows.iter().cloned());
        Ok(rows)
    }

    fn entity_attributes(
        &self,
        entity: EntityId,
        groups: &[GroupPath],
    ) -> tessera_store::Result<Vec<Attribute>> {
        self.check("entity_attributes")?;
        self.inner.entity_attributes(entity, groups)
    }

    fn memberships(&self, groups: &[GroupPath]) -> tessera_store::Result<Vec<GroupMembership>> {
        self.check("memberships")?;
        self.inner.memberships(groups)
    }

    fn entity_memberships(
        &self,
        entities: &[EntityId],
    ) -> tessera_store::Result<Vec<GroupMembership>> {
        self.check("entity_memberships")?;
        self.inner.entity_memberships(entities)
    }

    fn identities(&self, groups: &[GroupPath]) -> tessera_store::Result<Vec<IdentityRow>> {
        self.check("identities")?;
        self.inner.identities(groups)
    }

    fn entity_identities(&self, entities: &[EntityId]) -> tessera_store::Result<Vec<IdentityRow>> {
        self.check("entity_identities")?;
        self.inner.entity_identities(entities)
    }

    fn entities(&self, entities: &[EntityId]) -> tessera_store::Result<Vec<EntityInfo>> {
        self.check("entities")?;
        self.inner.entities(entities)
    }

    fn statements(&self, group: &GroupPath) -> tessera_store::Result<Vec<AttributeStatement>> {
        self.inner.statements(group)
    }

    fn statement_index(&self) -> tessera_store::Result<Arc<StatementIndex>> {
        self.check("statement_index")?;
        self.inner.statement_index()
    }
}

#[test_case("groups" ; "group listing")]
#[test_case("attribute_types" ; "type catalog")]
#[test_case("statement_index" ; "statement index")]
#[test_case("direct_attributes" ; "attributes")]
#[test_case("memberships" ; "memberships")]
#[test_case("entity_memberships" ; "entity memberships")]
#[test_case("entity_identities" ; "identities")]
fn failed_batch_read_aborts_resolution(operation: &'static str) {
    let dir = directory();
    let org = group("/org");
    dir.set_statements(
        &org,
        vec![AttributeStatement::everybody(Attribute::new("role", org.clone(), ["member"]))],
    )
    .unwrap();
    let snap = dir.snapshot().unwrap();
    let mut reader = ScriptedReader::new(snap.as_ref());
    reader.fail_on = Some(operation);

    let err = resolver().resolve_many(&reader, &[org], None).unwrap_err();

    match err {
        BulkError::BatchRead { source, .. } => {
            assert!(matches!(source, StoreError::BatchRead { operation: op, .. } if op == operation));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn rows_of_non_members_are_ignored() {
    let dir = directory();
    let dept = group("/org/dept");
    let snap = dir.snapshot().unwrap();
    let mut reader = ScriptedReader::new(snap.as_ref());
    reader.stray_rows.push(AttributeRow {
        entity: id(2),
        attribute: Attribute::new("role", dept.clone(), ["ghost"]),
    });
    reader.stray_rows.push(AttributeRow {
        entity: id(99),
        attribute: Attribute::new("role", dept.clone(), ["ghost"]),
    });

    let resolved = resolver().resolve_many(&reader, &[dept.clone()], None).unwrap();

    assert_eq!(resolved[&dept].keys().collect::<Vec<_>>(), vec![&id(1)]);
    assert!(resolved[&dept][&id(1)].is_empty());
}

#[test]
fn batch_reads_do_not_scale_with_entities() {
    let dir = directory();
    let org = group("/org");
    dir.set_statements(
        &org,
        vec![AttributeStatement::everybody(Attribute::new("role", org.clone(), ["member"]))],
    )
    .unwrap();
    for n in 10..60 {
        dir.add_entity(EntityInfo::new(id(n))).unwrap();
        dir.add_member(id(n), &org).unwrap();
        dir.set_attribute(id(n), Attribute::new("clearance", GroupPath::root(), ["secret"]))
            .unwrap();
    }
    let metrics = Arc::new(AtomicInstrumentation::new());
    let bulk = resolver().with_instrumentation(metrics.clone());

    let snap = dir.snapshot().unwrap();
    let resolved = bulk.resolve_many(snap.as_ref(), &[org.clone()], None).unwrap();

    assert_eq!(resolved[&org].len(), 52);
    for op in [
        operations::DIRECT_ATTRIBUTES,
        operations::GLOBAL_ATTRIBUTES,
        operations::MEMBERSHIPS,
        operations::ENTITY_MEMBERSHIPS,
        operations::IDENTITIES,
    ] {
        assert_eq!(metrics.stats(op).unwrap().calls, 1, "operation {op}");
    }
}

#[test]
fn slow_reads_still_succeed() {
    let dir = directory();
    let bulk = resolver().with_options(BulkOptions {
        slow_read_threshold: Duration::ZERO,
        ..BulkOptions::default()
    });
    let snap = dir.snapshot().unwrap();
    assert!(bulk.resolve_many(snap.as_ref(), &[group("/org")], None).is_ok());
}

// ============================================================================
// Point Resolution and Structure
// ============================================================================

#[test]
fn resolve_group_for_member_and_non_member() {
    let dir = directory();
    let dept = group("/org/dept");
    dir.set_statements(
        &dept,
        vec![AttributeStatement::everybody(Attribute::new("role", dept.clone(), ["employee"]))],
    )
    .unwrap();
    dir.set_attribute(id(1), Attribute::new("country", GroupPath::root(), ["PL"]))
        .unwrap();
    let snap = dir.snapshot().unwrap();
    let bulk = resolver();

    let member = bulk.resolve_group(snap.as_ref(), id(1), &dept).unwrap();
    assert_eq!(values(&member, "role"), Some(vec!["employee".into()]));
    assert_eq!(values(&member, "country"), Some(vec!["PL".into()]));

    let outsider = bulk.resolve_group(snap.as_ref(), id(2), &dept).unwrap();
    assert!(outsider.is_empty());
}

#[test]
fn resolve_attribute_returns_single_value() {
    let dir = directory();
    let org = group("/org");
    dir.set_statements(
        &org,
        vec![
            AttributeStatement::everybody(Attribute::new("role", org.clone(), ["member"]))
                .with_conflict_resolution(ConflictResolution::Merge),
        ],
    )
    .unwrap();
    dir.set_attribute(id(1), Attribute::new("role", org.clone(), ["admin"])).unwrap();
    let snap = dir.snapshot().unwrap();

    let role = resolver()
        .resolve_attribute(snap.as_ref(), id(1), &org, "role")
        .unwrap()
        .unwrap();
    assert_eq!(role.values, vec!["admin", "member"]);

    let missing = resolver()
        .resolve_attribute(snap.as_ref(), id(1), &org, "deptName")
        .unwrap();
    assert!(missing.is_none());
}

#[test]
fn group_and_subgroups_lists_direct_children() {
    let dir = directory();
    dir.add_group(&group("/org/dept/team")).unwrap();
    dir.add_group(&group("/org/hr")).unwrap();
    let snap = dir.snapshot().unwrap();

    let structure = resolver()
        .group_and_subgroups(snap.as_ref(), &group("/org"))
        .unwrap();

    assert_eq!(structure.len(), 4);
    assert_eq!(structure[&group("/org")], vec![group("/org/dept"), group("/org/hr")]);
    assert_eq!(structure[&group("/org/dept")], vec![group("/org/dept/team")]);
    assert!(structure[&group("/org/hr")].is_empty());
    assert!(!structure.contains_key(&group("/other")));

    let err = resolver()
        .group_and_subgroups(snap.as_ref(), &group("/missing"))
        .unwrap_err();
    assert!(matches!(err, BulkError::GroupNotFound(_)));
}

#[test]
fn membership_info_assembles_members() {
    let dir = directory();
    let dept = group("/org/dept");
    dir.add_identity(id(1), Identity::new("email", "alice@corp")).unwrap();
    dir.add_identity(id(1), Identity::new("persistent", "xyz").with_target("sp-1"))
        .unwrap();
    dir.set_attribute(id(1), Attribute::new("role", dept.clone(), ["manager"]))
        .unwrap();
    dir.set_attribute(id(1), Attribute::new("clearance", GroupPath::root(), ["secret"]))
        .unwrap();
    let snap = dir.snapshot().unwrap();

    let info = resolver().membership_info(snap.as_ref(), &dept).unwrap();

    assert_eq!(info.len(), 1);
    let alice = &info[&id(1)];
    assert_eq!(alice.identities, vec![Identity::new("email", "alice@corp")]);
    assert_eq!(
        alice.groups.keys().cloned().collect::<Vec<_>>(),
        vec![GroupPath::root(), group("/org"), dept.clone()]
    );
    assert_eq!(values(&alice.attributes, "role"), Some(vec!["manager".into()]));
    assert_eq!(values(&alice.attributes, "clearance"), Some(vec!["secret".into()]));
    assert_eq!(values(&alice.root_attributes, "clearance"), Some(vec!["secret".into()]));
    assert!(!alice.root_attributes.contains_key("role"));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Property: a group-scoped value of a global type always wins over `/`
    #[test]
    fn prop_group_scoped_global_wins(
        root_value in "[a-z]{1,6}",
        scoped_value in prop::option::of("[a-z]{1,6}"),
    ) {
        let dir = directory();
        let dept = group("/org/dept");
        dir.set_attribute(id(1), Attribute::new("clearance", GroupPath::root(), [root_value.clone()]))
            .unwrap();
        if let Some(v) = &scoped_value {
            dir.set_attribute(id(1), Attribute::new("clearance", dept.clone(), [v.clone()]))
                .unwrap();
        }

        let snap = dir.snapshot().unwrap();
        let resolved = resolver().resolve_many(snap.as_ref(), &[dept.clone()], None).unwrap();

        let expected = scoped_value.unwrap_or(root_value);
        prop_assert_eq!(values(&resolved[&dept][&id(1)], "clearance"), Some(vec![expected]));
    }

    /// Property: resolving twice against the same snapshot is idempotent
    #[test]
    fn prop_resolution_is_idempotent(
        direct_role in prop::option::of("[a-z]{1,4}"),
        merge in any::<bool>(),
    ) {
        let dir = directory();
        let org = group("/org");
        let resolution = if merge { ConflictResolution::Merge } else { ConflictResolution::Skip };
        dir.set_statements(
            &org,
            vec![
                AttributeStatement::everybody(Attribute::new("role", org.clone(), ["member"]))
                    .with_conflict_resolution(resolution),
            ],
        )
        .unwrap();
        if let Some(role) = &direct_role {
            dir.set_attribute(id(2), Attribute::new("role", org.clone(), [role.clone()])).unwrap();
        }

        let snap = dir.snapshot().unwrap();
        let bulk = resolver();
        let first = bulk.resolve_many(snap.as_ref(), &[org.clone()], None).unwrap();
        let second = bulk.resolve_many(snap.as_ref(), &[org.clone()], None).unwrap();
        prop_assert_eq!(first, second);
    }
}
