//! Domain model shared across the workspace.
//!
//! Field names serialize in camelCase, matching the JSON the API layer
//! exchanges with callers.

mod execution;
mod record;
mod rule;
mod signal;
mod workflow;

pub use execution::*;
pub use record::*;
pub use rule::*;
pub use signal::*;
pub use workflow::*;
