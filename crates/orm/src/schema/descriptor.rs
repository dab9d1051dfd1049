//! Entity descriptors and the fluent definition builder
//!
//! An `EntityDef` is the mutable shape an application declares; registering it
//! produces an immutable `EntityDescriptor` owned by the registry.

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};
use crate::value::{DatabaseValue, KeyTuple, KeyValue};
use std::collections::BTreeMap;

/// Column types understood by the statement and DDL generators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Text,
    VarChar(u32),
    Uuid,
    Timestamp,
    Date,
    Json,
    Bytes,
}

impl ColumnType {
    /// SQL type name for DDL generation
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::VarChar(len) => format!("VARCHAR({})", len),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Timestamp => "TIMESTAMPTZ".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Json => "JSONB".to_string(),
            ColumnType::Bytes => "BYTEA".to_string(),
        }
    }
}

/// One column of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub is_key: bool,
}

impl ColumnDef {
    /// Column fragment for CREATE TABLE / ADD COLUMN statements
    pub fn sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.sql());
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        sql
    }
}

/// Cardinality of a declared relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    /// One related row on the target side, foreign key on the target
    HasOne,
    /// Many related rows on the target side, foreign key on the target
    HasMany,
    /// This entity carries the foreign key referencing the target's key
    BelongsTo,
}

impl Cardinality {
    /// Returns true if this relationship materializes a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Cardinality::HasMany)
    }

    /// Returns true if the foreign key lives on the declaring entity
    pub fn owns_foreign_key(self) -> bool {
        matches!(self, Cardinality::BelongsTo)
    }
}

/// A declared relationship between two entities.
///
/// For `BelongsTo` the foreign-key columns are on the declaring entity; for
/// `HasOne`/`HasMany` they are on the target entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub foreign_key: Vec<String>,
}

/// A declared secondary index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Fluent builder for declaring an entity shape
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) columns: Vec<ColumnDef>,
    pub(crate) relationships: Vec<RelationshipDef>,
    pub(crate) indexes: Vec<IndexDef>,
}

impl EntityDef {
    /// Start a definition; the table name defaults to the entity name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: name.to_string(),
            columns: Vec::new(),
            relationships: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Override the backing table name
    pub fn table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    /// Add a primary-key column
    pub fn key(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            column_type,
            nullable: false,
            is_key: true,
        });
        self
    }

    /// Add a non-nullable column
    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            column_type,
            nullable: false,
            is_key: false,
        });
        self
    }

    /// Add a nullable column
    pub fn nullable_column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            column_type,
            nullable: true,
            is_key: false,
        });
        self
    }

    /// Declare that this entity carries a foreign key referencing `target`
    pub fn belongs_to(mut self, name: &str, target: &str, foreign_key: &[&str]) -> Self {
        self.relationships.push(RelationshipDef {
            name: name.to_string(),
            target: target.to_string(),
            cardinality: Cardinality::BelongsTo,
            foreign_key: foreign_key.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// Declare a one-to-many relationship; the foreign key is on `target`
    pub fn has_many(mut self, name: &str, target: &str, foreign_key: &[&str]) -> Self {
        self.relationships.push(RelationshipDef {
            name: name.to_string(),
            target: target.to_string(),
            cardinality: Cardinality::HasMany,
            foreign_key: foreign_key.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// Declare a one-to-one relationship; the foreign key is on `target`
    pub fn has_one(mut self, name: &str, target: &str, foreign_key: &[&str]) -> Self {
        self.relationships.push(RelationshipDef {
            name: name.to_string(),
            target: target.to_string(),
            cardinality: Cardinality::HasOne,
            foreign_key: foreign_key.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// Add a secondary index over the given columns
    pub fn index(mut self, columns: &[&str]) -> Self {
        self.indexes.push(IndexDef {
            name: format!("idx_{}_{}", self.table, columns.join("_")),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        });
        self
    }

    /// Add a unique index over the given columns
    pub fn unique_index(mut self, columns: &[&str]) -> Self {
        self.indexes.push(IndexDef {
            name: format!("uniq_{}_{}", self.table, columns.join("_")),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: true,
        });
        self
    }
}

/// Immutable per-entity metadata: columns, keys, relationships, indexes.
/// Built once by the registry; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    columns: Vec<ColumnDef>,
    key_columns: Vec<String>,
    relationships: Vec<RelationshipDef>,
    indexes: Vec<IndexDef>,
}

impl EntityDescriptor {
    /// Validate a definition and freeze it into a descriptor
    pub(crate) fn build(def: EntityDef) -> OrmResult<Self> {
        let key_columns: Vec<String> = def
            .columns
            .iter()
            .filter(|c| c.is_key)
            .map(|c| c.name.clone())
            .collect();

        if key_columns.is_empty() {
            return Err(OrmError::schema(&def.name, "no key column declared"));
        }

        let mut seen = std::collections::HashSet::new();
        for column in &def.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(OrmError::schema(
                    &def.name,
                    format!("duplicate column '{}'", column.name),
                ));
            }
            if column.is_key && column.nullable {
                return Err(OrmError::schema(
                    &def.name,
                    format!("key column '{}' cannot be nullable", column.name),
                ));
            }
        }

        // BelongsTo foreign keys live on this entity and must exist here;
        // the target side is validated when the registry is sealed.
        for rel in &def.relationships {
            if rel.foreign_key.is_empty() {
                return Err(OrmError::schema(
                    &def.name,
                    format!("relationship '{}' declares no foreign-key column", rel.name),
                ));
            }
            if rel.cardinality.owns_foreign_key() {
                for fk in &rel.foreign_key {
                    if !def.columns.iter().any(|c| &c.name == fk) {
                        return Err(OrmError::schema(
                            &def.name,
                            format!(
                                "relationship '{}' references unknown column '{}'",
                                rel.name, fk
                            ),
                        ));
                    }
                }
            }
        }

        for index in &def.indexes {
            for col in &index.columns {
                if !def.columns.iter().any(|c| &c.name == col) {
                    return Err(OrmError::schema(
                        &def.name,
                        format!("index '{}' references unknown column '{}'", index.name, col),
                    ));
                }
            }
        }

        Ok(Self {
            name: def.name,
            table: def.table,
            columns: def.columns,
            key_columns,
            relationships: def.relationships,
            indexes: def.indexes,
        })
    }

    /// Entity name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// All columns, declaration order
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary-key column names, declaration order
    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// All declared relationships
    pub fn relationships(&self) -> &[RelationshipDef] {
        &self.relationships
    }

    /// Look up a relationship by name
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Declared secondary indexes
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Extract the primary-key tuple from a column-value map
    pub fn identity_of(&self, values: &BTreeMap<String, DatabaseValue>) -> OrmResult<KeyTuple> {
        let mut key = Vec::with_capacity(self.key_columns.len());
        for column in &self.key_columns {
            let value = values.get(column).ok_or_else(|| {
                OrmError::tracking(&self.name, format!("missing key column '{}'", column))
            })?;
            let key_value = KeyValue::from_database_value(value).ok_or_else(|| {
                OrmError::tracking(
                    &self.name,
                    format!("key column '{}' holds a non-key value {:?}", column, value),
                )
            })?;
            key.push(key_value);
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author_def() -> EntityDef {
        EntityDef::new("authors")
            .key("id", ColumnType::Uuid)
            .column("name", ColumnType::Text)
            .nullable_column("email", ColumnType::Text)
    }

    #[test]
    fn test_descriptor_build() {
        let descriptor = EntityDescriptor::build(author_def()).unwrap();
        assert_eq!(descriptor.key_columns(), &["id".to_string()]);
        assert_eq!(descriptor.columns().len(), 3);
        assert!(descriptor.column("email").unwrap().nullable);
    }

    #[test]
    fn test_missing_key_rejected() {
        let def = EntityDef::new("notes").column("body", ColumnType::Text);
        let err = EntityDescriptor::build(def).unwrap_err();
        assert!(matches!(err, OrmError::SchemaDefinition { .. }));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let def = author_def().column("name", ColumnType::Text);
        assert!(EntityDescriptor::build(def).is_err());
    }

    #[test]
    fn test_belongs_to_unknown_fk_rejected() {
        let def = EntityDef::new("books")
            .key("id", ColumnType::Uuid)
            .belongs_to("author", "authors", &["author_id"]);
        assert!(EntityDescriptor::build(def).is_err());
    }

    #[test]
    fn test_column_type_sql() {
        assert_eq!(ColumnType::VarChar(255).sql(), "VARCHAR(255)");
        assert_eq!(ColumnType::Timestamp.sql(), "TIMESTAMPTZ");
    }
}
