//! Attribute value syntaxes.
//!
//! Every attribute type declares the syntax of its values. Values are carried
//! as strings in canonical form; [`ValueSyntax::normalize`] converts raw input
//! (e.g. the output of a dynamic statement expression) into that form.

use serde::{Deserialize, Serialize};

/// Error raised when a raw value does not conform to a syntax.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("value '{value}' is not a valid {syntax}: {reason}")]
pub struct SyntaxError {
    pub syntax: &'static str,
    pub value: String,
    pub reason: String,
}

/// The value syntax of an attribute type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "syntax", content = "allowed")]
pub enum ValueSyntax {
    /// Free-form text.
    #[default]
    String,
    /// Signed 64-bit integer.
    Integer,
    /// Finite floating point number.
    Floating,
    /// `true` or `false`.
    Boolean,
    /// E-mail address (`local@domain`).
    Email,
    /// One of a closed set of values.
    Enumeration(Vec<String>),
}

impl ValueSyntax {
    /// Stable identifier of the syntax.
    pub fn syntax_id(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Floating => "floating",
            Self::Boolean => "boolean",
            Self::Email => "email",
            Self::Enumeration(_) => "enumeration",
        }
    }

    /// Converts a raw value into the canonical string form of this syntax.
    pub fn normalize(&self, raw: &str) -> Result<String, SyntaxError> {
        let invalid = |reason: &str| SyntaxError {
            syntax: self.syntax_id(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        match self {
            Self::String => Ok(raw.to_string()),
            Self::Integer => raw
                .trim()
                .parse::<i64>()
                .map(|v| v.to_string())
                .map_err(|e| invalid(&e.to_string())),
            Self::Floating => {
                let parsed = raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| invalid(&e.to_string()))?;
                if parsed.is_finite() {
                    Ok(parsed.to_string())
                } else {
                    Err(invalid("not a finite number"))
                }
            }
            Self::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok("true".to_string()),
                "false" => Ok("false".to_string()),
                _ => Err(invalid("expected true or false")),
            },
            Self::Email => {
                let trimmed = raw.trim();
                match trimmed.split_once('@') {
                    Some((local, domain))
                        if !local.is_empty()
                            && !domain.is_empty()
                            && !domain.contains('@')
                            && !trimmed.chars().any(char::is_whitespace) =>
                    {
                        Ok(trimmed.to_string())
                    }
                    _ => Err(invalid("expected local@domain")),
                }
            }
            Self::Enumeration(allowed) => {
                if allowed.iter().any(|a| a == raw) {
                    Ok(raw.to_string())
                } else {
                    Err(invalid("not one of the allowed values"))
                }
            }
        }
    }
}
