//! Engine error taxonomy.
//!
//! Every error names the offending key and, where possible, the value or
//! the reason, so a failed batch can be diagnosed from the message alone.
//! Validation and unknown-key errors surface at the boundary they
//! originate from; the resolving phase rolls the plotter back before
//! re-raising (see `plotter.rs`).

use arrayplot_config::RcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FmtError {
    /// A validator rejected a proposed value.
    #[error("key {key}: {message}")]
    Validation { key: String, message: String },

    /// A caller referenced a key the plotter does not declare.
    #[error("unknown formatoption keyword {key}!{}", suggestion_text(.similar))]
    UnknownKey { key: String, similar: Vec<String> },

    /// A formatoption's update hook failed.
    #[error("updating {key} failed: {message}")]
    Update { key: String, message: String },

    /// Data selection or re-selection failed.
    #[error("data error: {0}")]
    Data(String),

    /// Collection-level error (duplicate names, missing members, ...).
    #[error("project error: {0}")]
    Project(String),

    /// Configuration store error.
    #[error(transparent)]
    Rc(#[from] RcError),
}

fn suggestion_text(similar: &[String]) -> String {
    if similar.is_empty() {
        String::new()
    } else {
        format!(" Did you mean one of {}?", similar.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_key_lists_suggestions() {
        let err = FmtError::UnknownKey {
            key: "titel".to_string(),
            similar: vec!["title".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("titel"));
        assert!(msg.contains("Did you mean one of title?"));
    }

    #[test]
    fn test_unknown_key_without_suggestions() {
        let err = FmtError::UnknownKey {
            key: "zzz".to_string(),
            similar: vec![],
        };
        assert!(!err.to_string().contains("Did you mean"));
    }

    #[test]
    fn test_validation_names_key() {
        let err = FmtError::Validation {
            key: "grid".to_string(),
            message: "expected a boolean, got \"x\"".to_string(),
        };
        assert!(err.to_string().starts_with("key grid:"));
    }
}
