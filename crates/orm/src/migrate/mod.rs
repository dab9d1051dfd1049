//! Migrations - snapshot diffing, reversible operations, sequenced application

pub mod applier;
pub mod checksum;
pub mod differ;
pub mod history;
pub mod operation;

pub use applier::{MigrationApplier, MigrationPlan, MIGRATION_LOCK_KEY};
pub use checksum::compute_checksum;
pub use differ::diff;
pub use history::{MigrationHistory, MigrationRecord, MigrationScripts, HISTORY_TABLE};
pub use operation::MigrationOperation;
