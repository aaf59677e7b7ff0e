//! Persistence for signals, rules, workflows and the records workflows write.
//!
//! Every operation runs inside a [`Transaction`] obtained from a
//! [`Database`]. Two backends ship:
//!
//! - [`PgDatabase`]: PostgreSQL via `sqlx`, schema in `migrations/`
//! - [`MemoryDatabase`]: in-process, used by tests and the CLI

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::{Result, StorageError};
pub use memory::{MemoryDatabase, MemorySnapshot, MemoryTransaction};
pub use postgres::{PgDatabase, PgTransaction};
pub use traits::{Database, MutationStore, RuleStore, SignalStore, Transaction, WorkflowStore};
