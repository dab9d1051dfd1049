//! Model Registry - immutable per-entity metadata and schema snapshots

pub mod descriptor;
pub mod registry;
pub mod snapshot;

pub use descriptor::{
    Cardinality, ColumnDef, ColumnType, EntityDef, EntityDescriptor, IndexDef, RelationshipDef,
};
pub use registry::ModelRegistry;
pub use snapshot::{ForeignKeySnapshot, SchemaSnapshot, TableSnapshot};
