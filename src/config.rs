//! Expansion settings.
//!
//! Hosts usually build an [`ExpansionConfig`] in code, but it can also be read
//! from YAML or JSON (every field is optional and falls back to its default):
//!
//! ```rust
//! use stagecraft::config::{ExpansionConfig, MissingArgumentPolicy};
//! let config = ExpansionConfig::from_yaml_str("max_expansion_depth: 16\nmissing_arguments: placeholder\n").unwrap();
//! assert_eq!(config.max_expansion_depth, 16);
//! assert_eq!(config.missing_arguments, MissingArgumentPolicy::Placeholder);
//! assert!(config.catch_panics);
//! ```

use serde::{Deserialize, Serialize};

use crate::diagnostics::ExpansionError;
use crate::err_msg;

/// Upper bound on nested expansions reached from one statement.
pub const MAX_EXPANSION_DEPTH: usize = 128;

/// What to pass for a required parameter that received no usable argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingArgumentPolicy {
    /// Report a binding error at the call site.
    #[default]
    Error,
    /// Pass `MacroArg::Missing` and report a warning.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Bounds the per-statement fixpoint, recursion into inserted fragments
    /// and enclosing-function replacement rounds.
    pub max_expansion_depth: usize,
    pub missing_arguments: MissingArgumentPolicy,
    /// Turn panics escaping a macro body into invocation errors.
    pub catch_panics: bool,
    /// Keep an [`ExpansionStep`](crate::macros::ExpansionStep) per expanded call.
    pub record_trace: bool,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            max_expansion_depth: MAX_EXPANSION_DEPTH,
            missing_arguments: MissingArgumentPolicy::Error,
            catch_panics: true,
            record_trace: true,
        }
    }
}

impl ExpansionConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ExpansionError> {
        serde_yaml::from_str(text)
            .map_err(|e| err_msg!(Internal, "invalid expansion config: {}", e).with_source(Box::new(e)))
    }

    pub fn from_json_str(text: &str) -> Result<Self, ExpansionError> {
        serde_json::from_str(text)
            .map_err(|e| err_msg!(Internal, "invalid expansion config: {}", e).with_source(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_documents_yield_defaults() {
        assert_eq!(ExpansionConfig::from_json_str("{}").unwrap(), ExpansionConfig::default());
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = ExpansionConfig::from_yaml_str("missing_arguments: ignore").unwrap_err();
        assert!(err.to_string().contains("invalid expansion config"));
    }
}
