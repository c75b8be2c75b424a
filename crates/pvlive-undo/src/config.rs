//! Undo engine configuration.

use serde::{Deserialize, Serialize};

/// Options for [`UndoStack`](crate::stack::UndoStack) and
/// [`UndoStackBuilder`](crate::builder::UndoStackBuilder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// Collapse consecutive modifications of the same proxy property into
    /// one element. Off unless asked for.
    pub merge_property_modifications: bool,
    /// Maximum number of undo sets kept in the undo history. `None` keeps
    /// everything.
    pub stack_depth: Option<usize>,
}

impl Default for UndoConfig {
    fn default() -> Self {
        UndoConfig {
            merge_property_modifications: false,
            stack_depth: Some(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: UndoConfig =
            serde_json::from_str(r#"{ "merge_property_modifications": true }"#).unwrap();
        assert!(config.merge_property_modifications);
        assert_eq!(config.stack_depth, Some(10));

        let unbounded: UndoConfig = serde_json::from_str(r#"{ "stack_depth": null }"#).unwrap();
        assert_eq!(unbounded.stack_depth, None);
    }
}
