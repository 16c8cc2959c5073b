//! # tessera-bulk: Bulk attribute resolution
//!
//! Computes effective attribute maps for many entities across one or more
//! groups with a bounded number of batch reads, independent of the number
//! of entities involved:
//!
//! 1. The attribute type catalog and statement index are loaded once.
//! 2. Direct attributes are read for the requested groups (plus groups whose
//!    statements redirect into them), and the global subset for `/`.
//! 3. Memberships, and where statements apply the members' full group sets
//!    and identities, are read in one batch each.
//! 4. Rows are grouped per entity and per group; statements are evaluated
//!    over the fetched data, and global values from `/` fill in names with no
//!    group-scoped value.
//!
//! Every read of one call goes through a single
//! [`DirectoryReader`](tessera_store::DirectoryReader) snapshot. A failed
//! batch read aborts the call; no partial result is ever returned.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_store::StoreError;
use tessera_types::GroupPath;

mod instrumentation;
mod resolver;

#[cfg(test)]
mod tests;

pub use instrumentation::{
    AtomicInstrumentation, Instrumentation, NoopInstrumentation, OperationStats, operations,
};
pub use resolver::{BulkResolver, EntityInGroup, GroupStructure, ResolvedAttributes};
pub use tessera_statements::GroupAttributes;

/// Error type for bulk resolution.
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    /// A batch read failed; the whole call is aborted.
    #[error("batch read '{operation}' failed")]
    BatchRead {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// The call would resolve more entities than permitted.
    #[error("resolution covers {count} entities, the limit is {limit}")]
    TooManyEntities { count: usize, limit: usize },

    /// A structural query referenced a group that does not exist.
    #[error("group not found: {0}")]
    GroupNotFound(GroupPath),
}

/// Result type for bulk resolution.
pub type Result<T> = std::result::Result<T, BulkError>;

/// Tuning of the bulk resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOptions {
    /// Batch reads slower than this are logged as warnings.
    pub slow_read_threshold: Duration,
    /// Overlay values of global attribute types stored in `/`.
    pub include_global_attributes: bool,
    /// Apply group attribute statements. When off, only direct and global
    /// values are returned.
    pub evaluate_statements: bool,
    /// Upper bound on entities per call, 0 for unlimited.
    pub max_entities: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            slow_read_threshold: Duration::from_millis(500),
            include_global_attributes: true,
            evaluate_statements: true,
            max_entities: 0,
        }
    }
}
