use async_trait::async_trait;
use serde_json::{json, Value};

use signalflow_core::model::{Step, StepKind};
use signalflow_rules::RuleEngine;

use super::{kind_mismatch, StepContext, StepHandler, StepOutcome};
use crate::error::StepError;

/// First matching arm wins; otherwise `default`, otherwise the path ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchHandler {
    engine: RuleEngine,
}

#[async_trait]
impl StepHandler for BranchHandler {
    async fn run(&self, step: &Step, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let StepKind::Branch(cfg) = &step.kind else {
            return Err(kind_mismatch("branch", step));
        };
        let rule_ctx = ctx.rule_context();

        for (index, arm) in cfg.branches.iter().enumerate() {
            let outcome = self
                .engine
                .evaluate_conditions(&arm.conditions, arm.condition_logic, &rule_ctx);
            if outcome.matched {
                return Ok(StepOutcome::goto(
                    json!({"matchedBranch": index, "nextStep": arm.next}),
                    arm.next.clone(),
                ));
            }
        }

        let output = json!({
            "matchedBranch": Value::Null,
            "nextStep": cfg.default,
        });
        Ok(match &cfg.default {
            Some(default) => StepOutcome::goto(output, default.clone()),
            None => StepOutcome::halt(output),
        })
    }
}
