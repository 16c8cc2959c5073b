//! Evaluation context: the key/value environment expressions run against.

use std::fmt::Display;

use serde_json::{Map, Value};

/// Ephemeral variable environment, built fresh for each evaluation.
///
/// Keys are kept in sorted order so dumps and serialized forms are stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalContext {
    vars: Map<String, Value>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Adds a variable (builder pattern).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Resolves a nested path: object keys, or numeric indexes into lists.
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.vars.get(*first)?;
        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(*segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// The whole context as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.vars.clone())
    }
}

impl Display for EvalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (key, value)) in self.vars.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{key} = {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_lookup() {
        let ctx = EvalContext::new()
            .with("attrs", json!({ "email": ["a@x", "b@x"] }))
            .with("groupName", "/org");

        assert_eq!(ctx.lookup(&["attrs", "email", "1"]), Some(&json!("b@x")));
        assert_eq!(ctx.lookup(&["groupName"]), Some(&json!("/org")));
        assert_eq!(ctx.lookup(&["attrs", "missing"]), None);
        assert_eq!(ctx.lookup(&["groupName", "x"]), None);
        assert_eq!(ctx.lookup(&[]), None);
    }

    #[test]
    fn dump_is_sorted() {
        let ctx = EvalContext::new().with("b", 2).with("a", 1);
        assert_eq!(ctx.to_string(), "a = 1\nb = 2");
        assert_eq!(ctx.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
