//! Change Tracker / Unit of Work - identity-mapped tracking and atomic commits

pub mod batch;
pub mod instance;
pub mod unit_of_work;

pub use batch::{WriteKind, WriteOp};
pub use instance::{EntityInstance, TrackedState};
pub use unit_of_work::{CommitSummary, InstanceHandle, UnitOfWork};
