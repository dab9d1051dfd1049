//! Model registry
//!
//! Holds the immutable per-entity metadata for the whole model. Shapes are
//! registered during startup, the registry is sealed, and from then on it is
//! process-wide read-only state. Iteration order is registration order;
//! the differ and the write-batch orderer both rely on it being stable.

use std::collections::HashMap;

use tracing::debug;

use super::descriptor::{EntityDef, EntityDescriptor};
use super::snapshot::{table_snapshot, SchemaSnapshot};
use crate::error::{OrmError, OrmResult};

/// Registry of entity descriptors, iterated in registration order
#[derive(Debug, Default)]
pub struct ModelRegistry {
    entities: Vec<EntityDescriptor>,
    by_name: HashMap<String, usize>,
    sealed: bool,
}

impl ModelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a definition and add it to the registry.
    ///
    /// Relationship targets registered later are re-checked by `seal`;
    /// everything local to the definition is validated here.
    pub fn register(&mut self, def: EntityDef) -> OrmResult<&EntityDescriptor> {
        if self.sealed {
            return Err(OrmError::schema(
                &def.name,
                "registry is sealed; no shapes can be registered",
            ));
        }

        let descriptor = EntityDescriptor::build(def)?;

        if self.by_name.contains_key(descriptor.name()) {
            return Err(OrmError::schema(
                descriptor.name(),
                "entity name already registered",
            ));
        }
        if self
            .entities
            .iter()
            .any(|e| e.table() == descriptor.table())
        {
            return Err(OrmError::schema(
                descriptor.name(),
                format!("table name '{}' already in use", descriptor.table()),
            ));
        }

        // Targets that already exist can be validated eagerly.
        for rel in descriptor.relationships() {
            if let Some(&idx) = self.by_name.get(&rel.target) {
                validate_relationship(&descriptor, rel, &self.entities[idx])?;
            }
        }

        debug!(
            "registered entity '{}' (table '{}')",
            descriptor.name(),
            descriptor.table()
        );
        self.by_name
            .insert(descriptor.name().to_string(), self.entities.len());
        self.entities.push(descriptor);
        Ok(self.entities.last().expect("just pushed"))
    }

    /// Run cross-entity validation and freeze the registry.
    ///
    /// After sealing, `register` fails and the registry can be shared freely.
    pub fn seal(&mut self) -> OrmResult<()> {
        for entity in &self.entities {
            for rel in entity.relationships() {
                let target = self.by_name.get(&rel.target).map(|&i| &self.entities[i]);
                let target = target.ok_or_else(|| {
                    OrmError::schema(
                        entity.name(),
                        format!(
                            "relationship '{}' targets unregistered entity '{}'",
                            rel.name, rel.target
                        ),
                    )
                })?;
                validate_relationship(entity, rel, target)?;
            }
        }
        self.sealed = true;
        debug!("registry sealed with {} entities", self.entities.len());
        Ok(())
    }

    /// Whether `seal` has completed
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Look up a descriptor by entity name
    pub fn descriptor(&self, name: &str) -> OrmResult<&EntityDescriptor> {
        self.by_name
            .get(name)
            .map(|&i| &self.entities[i])
            .ok_or_else(|| OrmError::schema(name, "entity is not registered"))
    }

    /// Look up a descriptor by backing table name
    pub fn descriptor_for_table(&self, table: &str) -> Option<&EntityDescriptor> {
        self.entities.iter().find(|e| e.table() == table)
    }

    /// All descriptors, in stable registration order
    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.iter()
    }

    /// Registration position of an entity, used as a deterministic tie-break
    pub fn registration_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Capture the current model metadata as a deep-immutable snapshot
    pub fn snapshot(&self) -> SchemaSnapshot {
        let tables = self
            .entities
            .iter()
            .map(|entity| {
                table_snapshot(entity, |target| {
                    self.by_name.get(target).map(|&i| {
                        let t = &self.entities[i];
                        (t.table().to_string(), t.key_columns().to_vec())
                    })
                })
            })
            .collect();
        SchemaSnapshot { tables }
    }
}

/// Check that a relationship's foreign-key columns exist on the side that
/// carries them and line up with the referenced key.
fn validate_relationship(
    entity: &EntityDescriptor,
    rel: &crate::schema::RelationshipDef,
    target: &EntityDescriptor,
) -> OrmResult<()> {
    let (fk_side, key_side) = if rel.cardinality.owns_foreign_key() {
        (entity, target)
    } else {
        (target, entity)
    };

    for fk in &rel.foreign_key {
        if fk_side.column(fk).is_none() {
            return Err(OrmError::schema(
                entity.name(),
                format!(
                    "relationship '{}': foreign-key column '{}' does not exist on '{}'",
                    rel.name,
                    fk,
                    fk_side.name()
                ),
            ));
        }
    }

    if rel.foreign_key.len() != key_side.key_columns().len() {
        return Err(OrmError::schema(
            entity.name(),
            format!(
                "relationship '{}': {} foreign-key column(s) against a {}-column key on '{}'",
                rel.name,
                rel.foreign_key.len(),
                key_side.key_columns().len(),
                key_side.name()
            ),
        ));
    }

    Ok(())
}
