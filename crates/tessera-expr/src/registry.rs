//! Closure-backed expression evaluator.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;

use crate::{EvalContext, ExpressionError, ExpressionEvaluator, Result};

type ExprFn = Arc<dyn Fn(&EvalContext) -> Result<Value> + Send + Sync>;

/// Evaluator resolving expressions against a registry of named closures.
///
/// Resolution order for an expression string:
///
/// 1. Literals: `true`, `false`, `null`, integers, and quoted strings
///    (`'text'` or `"text"`).
/// 2. Registered expressions, matched on the trimmed expression text.
/// 3. Bare identifiers naming a context variable.
///
/// Anything else is [`ExpressionError::Unknown`].
#[derive(Clone, Default)]
pub struct RegistryEvaluator {
    expressions: BTreeMap<String, ExprFn>,
}

impl RegistryEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure under `expression`.
    pub fn register<F>(mut self, expression: impl Into<String>, f: F) -> Self
    where
        F: Fn(&EvalContext) -> Result<Value> + Send + Sync + 'static,
    {
        self.expressions
            .insert(expression.into().trim().to_string(), Arc::new(f));
        self
    }

    /// Registers an expression that always yields `value`.
    pub fn register_value(self, expression: impl Into<String>, value: Value) -> Self {
        self.register(expression, move |_| Ok(value.clone()))
    }

    pub fn is_registered(&self, expression: &str) -> bool {
        self.expressions.contains_key(expression.trim())
    }
}

impl Debug for RegistryEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEvaluator")
            .field("expressions", &self.expressions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExpressionEvaluator for RegistryEvaluator {
    fn evaluate_value(&self, expression: &str, context: &EvalContext) -> Result<Value> {
        let expr = expression.trim();
        if let Some(value) = literal(expr)? {
            return Ok(value);
        }
        if let Some(f) = self.expressions.get(expr) {
            return f(context);
        }
        if is_identifier(expr)
            && let Some(value) = context.get(expr)
        {
            return Ok(value.clone());
        }
        Err(ExpressionError::Unknown(expr.to_string()))
    }

    fn check(&self, expression: &str) -> Result<()> {
        let expr = expression.trim();
        if expr.is_empty() {
            return Err(ExpressionError::Malformed {
                expression: expression.to_string(),
                reason: "empty expression".to_string(),
            });
        }
        if literal(expr)?.is_some() || self.expressions.contains_key(expr) || is_identifier(expr) {
            Ok(())
        } else {
            Err(ExpressionError::Unknown(expr.to_string()))
        }
    }
}

/// Parses a literal, `Ok(None)` if `expr` is not one.
fn literal(expr: &str) -> Result<Option<Value>> {
    match expr {
        "true" => return Ok(Some(Value::Bool(true))),
        "false" => return Ok(Some(Value::Bool(false))),
        "null" => return Ok(Some(Value::Null)),
        _ => {}
    }

    if let Some(quote) = expr.chars().next().filter(|c| *c == '\'' || *c == '"') {
        let inner = &expr[1..];
        return match inner.strip_suffix(quote) {
            Some(text) if !text.contains(quote) => Ok(Some(Value::String(text.to_string()))),
            _ => Err(ExpressionError::Malformed {
                expression: expr.to_string(),
                reason: "unterminated string literal".to_string(),
            }),
        };
    }

    let digits = expr.strip_prefix('-').unwrap_or(expr);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return expr
            .parse::<i64>()
            .map(|n| Some(Value::from(n)))
            .map_err(|e| ExpressionError::Malformed {
                expression: expr.to_string(),
                reason: e.to_string(),
            });
    }

    Ok(None)
}

fn is_identifier(expr: &str) -> bool {
    let mut chars = expr.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
