//! # tessera-statements: Group attribute statements
//!
//! Groups carry ordered lists of [`AttributeStatement`]s that synthesize or
//! override attributes for their members. This crate provides:
//!
//! - [`StatementIndex`]: validated lookup from a group to every statement
//!   whose output lands in it, including statements redirected from other
//!   groups through `extra_attributes_group`.
//! - [`StatementEvaluator`]: computes the candidate attribute map of one
//!   entity in one group from its direct attributes and the applicable
//!   statements.
//!
//! Evaluation is purely computational. A statement whose expression fails, or
//! whose dynamic attribute type is unknown, is logged and skipped; it never
//! fails the resolution as a whole.
//!
//! # Example
//!
//! ```
//! use std::collections::{BTreeSet, HashMap};
//! use std::sync::Arc;
//!
//! use tessera_expr::RegistryEvaluator;
//! use tessera_statements::{StatementEvaluator, StatementIndex, Subject};
//! use tessera_types::{Attribute, AttributeStatement, EntityId, GroupPath, TypeCatalog};
//!
//! let dept = GroupPath::new("/org/dept").unwrap();
//! let statements = vec![AttributeStatement::everybody(Attribute::new(
//!     "role",
//!     dept.clone(),
//!     ["employee"],
//! ))];
//! let index = StatementIndex::build([(&dept, statements.as_slice())]).unwrap();
//!
//! let groups: BTreeSet<_> = [GroupPath::root(), dept.clone()].into_iter().collect();
//! let attributes = HashMap::new();
//! let subject = Subject::new(EntityId::new(1), &groups, &attributes);
//!
//! let evaluator = StatementEvaluator::new(Arc::new(RegistryEvaluator::new()));
//! let resolved = evaluator.evaluate(&subject, &dept, index.for_group(&dept), &TypeCatalog::new(), None);
//! assert_eq!(resolved["role"].values, vec!["employee"]);
//! ```

mod evaluator;
mod index;


pub use evaluator::{AttributesByGroup, GroupAttributes, StatementEvaluator, Subject, context_keys};
pub use index::{IndexedStatement, StatementIndex};
pub use tessera_types::{AttributeStatement, ConflictResolution, StatementAssignment};

use tessera_types::GroupPath;

/// Error type for statement definitions.
///
/// Raised at load time, before any evaluation takes place.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatementError {
    /// A statement of `group` is malformed or points at an invalid target.
    #[error("invalid attribute statement #{position} of group {group}: {reason}")]
    Configuration {
        group: GroupPath,
        position: usize,
        reason: String,
    },
}

/// Result type for statement operations.
pub type Result<T> = std::result::Result<T, StatementError>;
