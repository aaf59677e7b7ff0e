use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use signalflow_core::model::{Step, StepKind};
use signalflow_core::JsonPath;

use super::{kind_mismatch, StepContext, StepHandler, StepOutcome};
use crate::error::StepError;

/// Exact-match filter over the trigger's signal data.
///
/// Filter keys are dot paths into `trigger.signal` (or the trigger itself
/// when it carries no `signal` key). A mismatch ends the path without
/// failing the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalHandler;

#[async_trait]
impl StepHandler for SignalHandler {
    async fn run(&self, step: &Step, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let StepKind::Signal(cfg) = &step.kind else {
            return Err(kind_mismatch("signal", step));
        };
        let data = ctx.trigger.get("signal").unwrap_or(ctx.trigger);

        let mut mismatched = Vec::new();
        for (key, expected) in &cfg.filter {
            let actual = JsonPath::parse(key).ok().and_then(|p| p.resolve(data));
            if actual != Some(expected) {
                mismatched.push(Value::String(key.clone()));
            }
        }

        if mismatched.is_empty() {
            Ok(StepOutcome::next(ctx.trigger.clone()))
        } else {
            debug!(step_id = %step.id, "signal filter did not match");
            Ok(StepOutcome::halt(json!({
                "matched": false,
                "mismatched": mismatched,
            })))
        }
    }
}
