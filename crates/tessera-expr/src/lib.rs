//! # tessera-expr: Expression evaluation contract
//!
//! Conditions of attribute statements and translation rules, as well as
//! value-producing expressions, are opaque strings handed to an
//! [`ExpressionEvaluator`] together with an [`EvalContext`]. The language
//! itself is owned by the embedding application; this crate only defines
//! the contract the Tessera core consumes:
//!
//! - `evaluate_value(expr, ctx) -> Value`
//! - `evaluate_boolean(expr, ctx) -> bool` (null counts as `false`)
//! - `check(expr)` for load-time validation of profile and statement definitions
//!
//! Evaluators must be pure and deterministic for a given context.
//!
//! [`RegistryEvaluator`] is a ready-made implementation that maps expression
//! strings to Rust closures, with built-in literals and context variables.
//!
//! ```
//! use serde_json::json;
//! use tessera_expr::{EvalContext, ExpressionEvaluator, RegistryEvaluator};
//!
//! let evaluator = RegistryEvaluator::new().register("isCorp", |ctx| {
//!     let email = ctx.lookup(&["attr", "email"]).and_then(|v| v.as_str()).unwrap_or("");
//!     Ok(json!(email.ends_with("@corp")))
//! });
//!
//! let ctx = EvalContext::new().with("attr", json!({ "email": "alice@corp" }));
//! assert!(evaluator.evaluate_boolean("isCorp", &ctx).unwrap());
//! assert!(evaluator.evaluate_boolean("true", &ctx).unwrap());
//! ```

use std::fmt::Display;

pub use serde_json::Value;

mod context;
mod registry;

pub use context::EvalContext;
pub use registry::RegistryEvaluator;

/// Error type for expression evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    /// The expression is syntactically invalid.
    #[error("malformed expression '{expression}': {reason}")]
    Malformed { expression: String, reason: String },

    /// The evaluator does not know the expression.
    #[error("unknown expression '{0}'")]
    Unknown(String),

    /// The expression produced a value of the wrong kind.
    #[error("expression '{expression}' evaluated to {found}, expected {expected}")]
    TypeMismatch {
        expression: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The expression raised an error while running.
    #[error("evaluation of '{expression}' failed: {reason}")]
    Evaluation { expression: String, reason: String },
}

impl ExpressionError {
    pub fn evaluation(expression: &str, reason: impl Display) -> Self {
        Self::Evaluation {
            expression: expression.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for expression evaluation.
pub type Result<T> = std::result::Result<T, ExpressionError>;

/// Pure, side-effect-free evaluator of condition and value expressions.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluates a value-producing expression.
    fn evaluate_value(&self, expression: &str, context: &EvalContext) -> Result<Value>;

    /// Evaluates a condition. A null result is treated as `false`.
    fn evaluate_boolean(&self, expression: &str, context: &EvalContext) -> Result<bool> {
        match self.evaluate_value(expression, context)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(ExpressionError::TypeMismatch {
                expression: expression.to_string(),
                expected: "boolean",
                found: value_kind(&other),
            }),
        }
    }

    /// Validates an expression without evaluating it.
    fn check(&self, expression: &str) -> Result<()> {
        if expression.trim().is_empty() {
            return Err(ExpressionError::Malformed {
                expression: expression.to_string(),
                reason: "empty expression".to_string(),
            });
        }
        Ok(())
    }
}

/// Coerces an evaluated value to an attribute value list.
///
/// Returns `None` for null (no value produced). Arrays yield one entry per
/// non-null element; scalars yield a single entry.
pub fn value_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Null => None,
        Value::Array(items) => Some(
            items
                .iter()
                .filter(|v| !v.is_null())
                .map(scalar_string)
                .collect(),
        ),
        other => Some(vec![scalar_string(other)]),
    }
}

/// Renders a value as a plain string (strings unquoted).
pub fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Human-readable name of a value's kind.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
