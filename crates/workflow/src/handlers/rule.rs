use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use signalflow_core::model::{Step, StepKind};
use signalflow_rules::RuleEngine;

use super::{kind_mismatch, StepContext, StepHandler, StepOutcome};
use crate::error::StepError;

/// Gate on a stored rule or an inline condition list.
///
/// A stored rule is evaluated through its published version and audited.
/// A non-match ends the path; a missing rule is a step failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleHandler {
    engine: RuleEngine,
}

#[async_trait]
impl StepHandler for RuleHandler {
    async fn run(&self, step: &Step, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let StepKind::Rule(cfg) = &step.kind else {
            return Err(kind_mismatch("rule", step));
        };
        let rule_ctx = ctx.rule_context();

        let (matched, output) = match cfg.rule_id {
            Some(rule_id) => {
                let eval = self.engine.evaluate_rule_by_id(&mut *ctx.tx, rule_id, &rule_ctx).await?;
                (
                    eval.matched,
                    json!({
                        "matched": eval.matched,
                        "ruleId": rule_id,
                        "evaluationId": eval.id,
                        "noPublishedVersion": eval.no_published_version,
                        "conditionResults": eval.condition_results,
                    }),
                )
            }
            None => {
                let outcome = self
                    .engine
                    .evaluate_conditions(&cfg.conditions, cfg.condition_logic, &rule_ctx);
                (
                    outcome.matched,
                    json!({
                        "matched": outcome.matched,
                        "conditionResults": outcome.results,
                    }),
                )
            }
        };

        if matched {
            Ok(StepOutcome::next(output))
        } else {
            debug!(step_id = %step.id, "rule did not match, ending path");
            Ok(StepOutcome::halt(output))
        }
    }
}
