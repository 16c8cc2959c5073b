//! # Tessera
//!
//! Attribute resolution and registration translation for identity platforms.
//!
//! Tessera computes the *effective* attributes of entities inside a
//! hierarchy of groups and turns registration requests into a declarative
//! result through rule-based translation profiles:
//!
//! - **Statements** - per-group rules that assign, copy or compute
//!   attributes for members, with conflict resolution
//! - **Bulk resolution** - effective attributes for many entities across
//!   many groups in a bounded number of batch reads
//! - **Translation** - ordered condition/action rules producing identities,
//!   attributes, group memberships and processing decisions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Tessera                            │
//! │  ┌──────────┐   ┌────────────┐   ┌──────────┐               │
//! │  │  Store   │ → │ Statements │ → │   Bulk   │               │
//! │  │(snapshot)│   │(evaluator) │   │(resolver)│               │
//! │  └──────────┘   └────────────┘   └──────────┘               │
//! │  ┌──────────┐   ┌────────────┐                              │
//! │  │ Profiles │ → │Translation │ → TranslatedResult           │
//! │  └──────────┘   └────────────┘                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tessera::{GroupPath, InMemoryDirectory, RegistryEvaluator, Tessera, TesseraConfig};
//!
//! let store = Arc::new(InMemoryDirectory::new());
//! let mut tessera = Tessera::new(
//!     TesseraConfig::load()?,
//!     store,
//!     Arc::new(RegistryEvaluator::new()),
//! )?;
//! tessera.load_profiles()?;
//!
//! let resolved = tessera.resolve_many(&[GroupPath::new("/org")?], None)?;
//! ```

mod error;
mod tessera;


pub use error::{Result, TesseraError};
pub use tessera::{Tessera, init_tracing};

// Re-export the data model
pub use tessera_types::{
    Attribute, AttributeStatement, AttributeType, ConflictResolution, EntityId, EntityInfo,
    EntityScheduledChange, EntityScheduledOperation, EntityState, GroupMembership, GroupPath,
    GroupPathError, Identity, TypeCatalog, ValueSyntax,
};

// Re-export the expression contract
pub use tessera_expr::{EvalContext, ExpressionError, ExpressionEvaluator, RegistryEvaluator};

// Re-export the store contract
pub use tessera_store::{DirectoryReader, DirectoryStore, InMemoryDirectory, StoreError};

// Re-export statement evaluation
pub use tessera_statements::{GroupAttributes, StatementError, StatementEvaluator, StatementIndex};

// Re-export bulk resolution
pub use tessera_bulk::{
    AtomicInstrumentation, BulkError, BulkOptions, BulkResolver, EntityInGroup, GroupStructure,
    Instrumentation, ResolvedAttributes,
};

// Re-export translation
pub use tessera_translation::{
    Action, AutomaticRequestAction, ProfileType, RegistrationRequest, RequestSubmitStatus,
    TranslatedResult, TranslationEngine, TranslationError, TranslationProfile, Trigger,
    TriggeringMode,
};

// Re-export configuration
pub use tessera_config::{ConfigError, ConfigLoader, TesseraConfig};
