//! Workflow execution: step handlers, the transactional engine and signal
//! routing.
//!
//! ```text
//! signal ──▶ SignalRouter ──▶ RuleEngine (per enabled rule)
//!                   │
//!                   └──▶ WorkflowEngine::execute ──▶ StepHandlers ──▶ Transaction
//! ```

pub mod engine;
pub mod error;
pub mod handlers;
pub mod router;
pub mod template;

pub use engine::{ExecuteOptions, WorkflowEngine};
pub use error::{EngineError, Result, StepError};
pub use handlers::{NextStep, StepContext, StepHandler, StepHandlers, StepOutcome};
pub use router::{RouteReport, SignalRouter};
pub use template::{Template, TemplateError};
