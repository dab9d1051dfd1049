//! Schema snapshots
//!
//! A `SchemaSnapshot` is a deep-immutable, serializable value capturing the
//! full model metadata at a point in time. Snapshots are what the migration
//! differ compares; they are also what gets persisted alongside history.

use serde::{Deserialize, Serialize};

use super::descriptor::{ColumnDef, EntityDescriptor, IndexDef};

/// Point-in-time copy of the full model metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSnapshot>,
}

impl SchemaSnapshot {
    /// An empty snapshot: the state of a database before any migration
    pub fn empty() -> Self {
        Self { tables: Vec::new() }
    }

    /// Look up a table by name
    pub fn table(&self, name: &str) -> Option<&TableSnapshot> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// One table within a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeySnapshot>,
    pub indexes: Vec<IndexDef>,
}

impl TableSnapshot {
    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a foreign key by constraint name
    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKeySnapshot> {
        self.foreign_keys.iter().find(|f| f.name == name)
    }

    /// Look up an index by name
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// A foreign-key constraint captured in a snapshot.
///
/// Only the owning side (`BelongsTo`) contributes a constraint; the inverse
/// declarations on the target entity describe the same columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySnapshot {
    pub name: String,
    pub columns: Vec<String>,
    pub references_table: String,
    pub references_columns: Vec<String>,
}

/// Capture one entity descriptor as a table snapshot.
///
/// `key_of` resolves a target entity name to its table and key columns so
/// the constraint records physical names, not logical ones.
pub(crate) fn table_snapshot<F>(descriptor: &EntityDescriptor, key_of: F) -> TableSnapshot
where
    F: Fn(&str) -> Option<(String, Vec<String>)>,
{
    let mut foreign_keys = Vec::new();
    for rel in descriptor.relationships() {
        if !rel.cardinality.owns_foreign_key() {
            continue;
        }
        if let Some((target_table, target_key)) = key_of(&rel.target) {
            foreign_keys.push(ForeignKeySnapshot {
                name: format!("fk_{}_{}", descriptor.table(), rel.foreign_key.join("_")),
                columns: rel.foreign_key.clone(),
                references_table: target_table,
                references_columns: target_key,
            });
        }
    }

    TableSnapshot {
        name: descriptor.table().to_string(),
        columns: descriptor.columns().to_vec(),
        primary_key: descriptor.key_columns().to_vec(),
        foreign_keys,
        indexes: descriptor.indexes().to_vec(),
    }
}
