//! Tracked entity instances
//!
//! An `EntityInstance` is a column-value map plus the entity name it belongs
//! to. The unit of work owns instances for their tracked lifetime and keeps
//! the original-value snapshot used for dirty-checking; instances only leave
//! tracking through an explicit detach.

use std::collections::BTreeMap;

use crate::value::DatabaseValue;

/// Lifecycle state of a tracked instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedState {
    /// Loaded and identical to its snapshot
    Unchanged,
    /// Registered for insertion
    Added,
    /// Loaded and divergent from its snapshot (computed, not stored)
    Modified,
    /// Registered for deletion
    Deleted,
    /// No longer tracked by the unit of work
    Detached,
}

/// A column-value map for one entity row.
///
/// Values are kept in a BTreeMap so generated statements list columns in a
/// deterministic order.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInstance {
    entity: String,
    values: BTreeMap<String, DatabaseValue>,
}

impl EntityInstance {
    /// Create an empty instance of the named entity
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            values: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment
    pub fn with(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.values.insert(column.to_string(), value.into());
        self
    }

    /// Assign a field
    pub fn set(&mut self, column: &str, value: impl Into<DatabaseValue>) {
        self.values.insert(column.to_string(), value.into());
    }

    /// Read a field
    pub fn value(&self, column: &str) -> Option<&DatabaseValue> {
        self.values.get(column)
    }

    /// The entity this instance belongs to
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// All assigned column values, in column-name order
    pub fn values(&self) -> &BTreeMap<String, DatabaseValue> {
        &self.values
    }

    pub(crate) fn from_values(entity: &str, values: BTreeMap<String, DatabaseValue>) -> Self {
        Self {
            entity: entity.to_string(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_access() {
        let instance = EntityInstance::new("authors")
            .with("id", 1i64)
            .with("name", "someone");
        assert_eq!(instance.entity(), "authors");
        assert_eq!(
            instance.value("name"),
            Some(&DatabaseValue::String("someone".to_string()))
        );
        assert!(instance.value("missing").is_none());
    }

    #[test]
    fn test_values_iterate_in_column_order() {
        let instance = EntityInstance::new("authors")
            .with("z", 1i64)
            .with("a", 2i64);
        let columns: Vec<_> = instance.values().keys().cloned().collect();
        assert_eq!(columns, vec!["a".to_string(), "z".to_string()]);
    }
}
