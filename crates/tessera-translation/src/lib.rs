//! # tessera-translation: Translation profiles for Tessera
//!
//! A translation profile is an ordered list of `condition -> action` rules
//! that turns raw registration or enquiry input into a normalized set of
//! changes to commit: identities, attributes, group memberships and entity
//! state.
//!
//! The engine makes a single linear pass over the rules:
//!
//! 1. The accumulator ([`TranslatedResult`]) is seeded from the request.
//! 2. Each rule's condition is evaluated against the context; when it holds,
//!    the rule's [`Action`] mutates the accumulator.
//! 3. A [`Action::Break`] stops the pass, keeping everything accumulated.
//!
//! Unlike attribute statements, a failing expression aborts the whole pass:
//! a broken profile is a configuration error, not a data issue.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tessera_expr::{EvalContext, RegistryEvaluator};
//! use tessera_translation::{
//!     Action, AutomaticRequestAction, ProfileType, TranslationEngine, TranslationProfile,
//! };
//!
//! let profile = TranslationProfile::new("auto-accept", ProfileType::Registration)
//!     .with_rule("true", Action::SetAutoAction { decision: AutomaticRequestAction::Accept })
//!     .with_rule("true", Action::Break);
//!
//! let engine = TranslationEngine::new(Arc::new(RegistryEvaluator::new()));
//! let result = engine.run(&profile, &EvalContext::new(), None).unwrap();
//! assert_eq!(result.auto_action(), AutomaticRequestAction::Accept);
//! ```

use tessera_expr::ExpressionError;

mod action;
mod context;
mod engine;
mod profile;
mod result;

#[cfg(test)]
mod tests;

pub use action::{Action, ActionKind, Pattern};
pub use context::{
    ConfirmedElement, ConfirmedElementType, GroupSelection, RegistrationContextBuilder,
    RegistrationRequest, RequestSubmitStatus, Retrieval, Submitted, Trigger, TriggeringMode,
    context_keys,
};
pub use engine::{TranslationEngine, TranslationOutcome};
pub use profile::{ProfileType, TranslationProfile, TranslationRule};
pub use result::{AutomaticRequestAction, SelectedGroup, TranslatedResult};

/// Error type for translation profiles.
#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    /// A condition or action expression failed; the pass is aborted.
    #[error("profile '{profile}', rule {rule}: {source}")]
    Expression {
        profile: String,
        rule: usize,
        #[source]
        source: ExpressionError,
    },

    /// An action produced a value that cannot be represented.
    #[error("profile '{profile}', rule {rule} produced invalid output: {reason}")]
    InvalidOutput {
        profile: String,
        rule: usize,
        reason: String,
    },

    /// The profile definition is malformed.
    #[error("invalid profile '{profile}': {reason}")]
    Configuration { profile: String, reason: String },
}

/// Result type for translation.
pub type Result<T> = std::result::Result<T, TranslationError>;
