//! Versioned business rules over scoped signal context.
//!
//! This crate provides:
//! - the condition operators, including percent-change and z-score trend checks
//! - [`RuleEngine`]: published-version evaluation with an audit row per call
//! - YAML rule/workflow definitions with a recursive filesystem loader

pub mod context;
pub mod definitions;
pub mod engine;
pub mod error;
pub mod operators;
pub mod stats;

pub use context::RuleContext;
pub use engine::{ConditionSetOutcome, RuleEngine, RuleOutcome};
pub use error::{Result, RuleError};
