//! Step handlers, one per [`StepKind`].
//!
//! The engine looks up the handler for a step's kind in [`StepHandlers`] and
//! hands it a [`StepContext`] holding the run's transaction and every result
//! produced so far. Custom handlers replace the defaults through the
//! `with_*` builders.

mod action;
mod ai;
mod branch;
mod parallel;
mod rule;
mod signal;

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use uuid::Uuid;

use signalflow_core::model::{Step, StepKind};
use signalflow_llm::TextGenerator;
use signalflow_rules::RuleContext;
use signalflow_storage::Transaction;

use crate::error::StepError;

pub use action::ActionHandler;
pub use ai::AiHandler;
pub use branch::BranchHandler;
pub use parallel::ParallelHandler;
pub use rule::RuleHandler;
pub use signal::SignalHandler;

/// Where the run goes after a successful step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// Follow the step's static `next` pointer.
    Default,
    Goto(String),
    /// End the path; the run completes.
    Halt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub output: Value,
    pub next: NextStep,
}

impl StepOutcome {
    pub fn next(output: Value) -> Self {
        Self {
            output,
            next: NextStep::Default,
        }
    }

    pub fn goto(output: Value, step_id: impl Into<String>) -> Self {
        Self {
            output,
            next: NextStep::Goto(step_id.into()),
        }
    }

    pub fn halt(output: Value) -> Self {
        Self {
            output,
            next: NextStep::Halt,
        }
    }
}

/// Everything a handler may read or write while running one step.
pub struct StepContext<'a> {
    pub tx: &'a mut dyn Transaction,
    pub agency_id: Uuid,
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub trigger: &'a Value,
    pub step_results: &'a IndexMap<String, Value>,
}

impl StepContext<'_> {
    /// Prior step results keyed by step id.
    pub fn results_value(&self) -> Value {
        Value::Object(
            self.step_results
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Template root: step results plus `trigger`.
    pub fn template_root(&self) -> Value {
        let mut root: Map<String, Value> = self
            .step_results
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        root.insert("trigger".to_string(), self.trigger.clone());
        Value::Object(root)
    }

    pub fn rule_context(&self) -> RuleContext {
        RuleContext::from_trigger(self.trigger, &self.results_value())
    }
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, step: &Step, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError>;
}

/// Handler per step kind.
#[derive(Clone)]
pub struct StepHandlers {
    signal: Arc<dyn StepHandler>,
    rule: Arc<dyn StepHandler>,
    ai: Arc<dyn StepHandler>,
    action: Arc<dyn StepHandler>,
    branch: Arc<dyn StepHandler>,
    parallel: Arc<dyn StepHandler>,
}

impl StepHandlers {
    /// Default handlers; AI steps call `generator` with `default_model`
    /// unless the step names its own model.
    pub fn new(generator: Arc<dyn TextGenerator>, default_model: impl Into<String>) -> Self {
        Self {
            signal: Arc::new(SignalHandler),
            rule: Arc::new(RuleHandler::default()),
            ai: Arc::new(AiHandler::new(generator, default_model)),
            action: Arc::new(ActionHandler),
            branch: Arc::new(BranchHandler::default()),
            parallel: Arc::new(ParallelHandler),
        }
    }

    pub fn with_signal(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.signal = handler;
        self
    }

    pub fn with_rule(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.rule = handler;
        self
    }

    pub fn with_ai(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.ai = handler;
        self
    }

    pub fn with_action(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.action = handler;
        self
    }

    pub fn with_branch(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.branch = handler;
        self
    }

    pub fn with_parallel(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.parallel = handler;
        self
    }

    pub fn for_kind(&self, kind: &StepKind) -> &dyn StepHandler {
        match kind {
            StepKind::Signal(_) => self.signal.as_ref(),
            StepKind::Rule(_) => self.rule.as_ref(),
            StepKind::Ai(_) => self.ai.as_ref(),
            StepKind::Action(_) => self.action.as_ref(),
            StepKind::Branch(_) => self.branch.as_ref(),
            StepKind::Parallel(_) => self.parallel.as_ref(),
        }
    }
}

fn kind_mismatch(expected: &'static str, step: &Step) -> StepError {
    StepError::KindMismatch {
        expected,
        actual: step.kind.type_name(),
    }
}
