use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use signalflow_core::model::{Step, StepKind};

use super::{kind_mismatch, StepContext, StepHandler, StepOutcome};
use crate::error::StepError;

/// Records the declared fan-out set and continues along `next`.
///
/// Dispatch of the declared steps is left to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelHandler;

#[async_trait]
impl StepHandler for ParallelHandler {
    async fn run(&self, step: &Step, _ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let StepKind::Parallel(cfg) = &step.kind else {
            return Err(kind_mismatch("parallel", step));
        };
        debug!(step_id = %step.id, branches = cfg.steps.len(), "parallel step declared");
        Ok(StepOutcome::next(json!({
            "steps": cfg.steps,
            "dispatched": false,
        })))
    }
}
