//! # loam-orm: an object-relational persistence core
//!
//! Four cooperating pieces behind one narrow storage boundary:
//! a model registry holding immutable entity metadata, a query translator
//! turning composed expression trees into parameterized SQL, a unit of work
//! tracking in-memory mutations and committing them atomically, and a
//! migration engine that diffs model snapshots into ordered, reversible
//! operation lists.
//!
//! The physical driver, CLI, and configuration loading live outside this
//! crate; storage is consumed through the traits in [`backend`].

pub mod backend;
pub mod error;
pub mod migrate;
pub mod query;
pub mod schema;
pub mod uow;
pub mod value;

// Re-export core types
pub use backend::{DatabaseConnection, DatabasePool, DatabaseRow, DatabaseTransaction, PoolConfig};
pub use error::{OrmError, OrmResult};
pub use migrate::{MigrationApplier, MigrationOperation, MigrationPlan, MigrationRecord};
pub use query::{Aggregate, Materializer, Predicate, Query, QueryTranslator, TranslatedQuery};
pub use schema::{
    Cardinality, ColumnDef, ColumnType, EntityDef, EntityDescriptor, ModelRegistry, SchemaSnapshot,
};
pub use uow::{CommitSummary, EntityInstance, InstanceHandle, TrackedState, UnitOfWork};
pub use value::{DatabaseValue, KeyTuple, KeyValue};
