//! Statement index: target group -> applicable statements.

use std::collections::{BTreeSet, HashMap};

use tessera_types::{AttributeStatement, GroupPath, StatementAssignment};

use crate::{Result, StatementError};

/// A statement together with the group that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedStatement {
    /// Group whose statement list contains the statement.
    pub owner: GroupPath,
    /// Position in the owner's statement list.
    pub position: usize,
    pub statement: AttributeStatement,
}

impl IndexedStatement {
    /// Group the statement's output is written against.
    pub fn target(&self) -> &GroupPath {
        self.statement.target_group(&self.owner)
    }

    pub fn is_redirected(&self) -> bool {
        self.target() != &self.owner
    }

    /// True if the statement can produce `name`.
    pub fn produces(&self, name: &str) -> bool {
        self.statement.assigned_attribute_name() == name
    }
}

/// Lookup of statements by the group their output lands in.
///
/// Built once per statement-set load. For each target group, statements are
/// ordered by owner path (ancestors before the group itself, the group
/// before its descendants) and, within one owner, by stored position.
/// Since later statements win, a group's own statements take precedence over
/// ones redirected into it from its ancestors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementIndex {
    by_target: HashMap<GroupPath, Vec<IndexedStatement>>,
    statement_count: usize,
}

impl StatementIndex {
    /// An index with no statements.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validates and indexes the statement lists of every known group.
    ///
    /// `groups` must list every existing group (with an empty slice for
    /// groups without statements), since redirect targets are checked
    /// against it.
    pub fn build<'a, I>(groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a GroupPath, &'a [AttributeStatement])>,
    {
        let mut owners: Vec<(&GroupPath, &[AttributeStatement])> = groups.into_iter().collect();
        owners.sort_by(|a, b| a.0.cmp(b.0));
        let known: BTreeSet<&GroupPath> = owners.iter().map(|(group, _)| *group).collect();

        let mut index = Self::default();
        for (owner, statements) in owners {
            for (position, statement) in statements.iter().enumerate() {
                validate(owner, position, statement, &known)?;
                let entry = IndexedStatement {
                    owner: owner.clone(),
                    position,
                    statement: statement.clone(),
                };
                index
                    .by_target
                    .entry(entry.target().clone())
                    .or_default()
                    .push(entry);
                index.statement_count += 1;
            }
        }
        Ok(index)
    }

    /// Statements whose output lands in `group`, in evaluation order.
    pub fn for_group(&self, group: &GroupPath) -> &[IndexedStatement] {
        self.by_target.get(group).map_or(&[], Vec::as_slice)
    }

    pub fn has_statements(&self, group: &GroupPath) -> bool {
        !self.for_group(group).is_empty()
    }

    /// Groups other than `group` whose statements redirect into it.
    pub fn source_groups(&self, group: &GroupPath) -> BTreeSet<GroupPath> {
        self.for_group(group)
            .iter()
            .filter(|s| s.is_redirected())
            .map(|s| s.owner.clone())
            .collect()
    }

    /// Total number of indexed statements.
    pub fn len(&self) -> usize {
        self.statement_count
    }

    pub fn is_empty(&self) -> bool {
        self.statement_count == 0
    }
}

fn validate(
    owner: &GroupPath,
    position: usize,
    statement: &AttributeStatement,
    known: &BTreeSet<&GroupPath>,
) -> Result<()> {
    let invalid = |reason: String| StatementError::Configuration {
        group: owner.clone(),
        position,
        reason,
    };

    statement.validate().map_err(|e| invalid(e.to_string()))?;

    let target = statement.target_group(owner);
    if target != owner {
        if !known.contains(target) {
            return Err(invalid(format!("extra attributes group {target} does not exist")));
        }
        if !target.is_related_to(owner) {
            return Err(invalid(format!(
                "extra attributes group {target} is neither an ancestor nor a descendant"
            )));
        }
    }

    if let StatementAssignment::Fixed { attribute } = &statement.assignment
        && &attribute.group != target
    {
        return Err(invalid(format!(
            "fixed attribute '{}' is bound to {} instead of {target}",
            attribute.name, attribute.group
        )));
    }

    Ok(())
}
