//! Route a stored signal through the agency's rules into workflows.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use signalflow_core::model::{RuleEvaluation, Signal, WorkflowExecution};
use signalflow_rules::{RuleContext, RuleEngine};
use signalflow_signals::{mark_failed, mark_processed};
use signalflow_storage::{Database, SignalStore, StorageError};

use crate::engine::{ExecuteOptions, WorkflowEngine};
use crate::error::Result;

/// What happened to one signal.
#[derive(Debug, Default)]
pub struct RouteReport {
    pub signal_id: Uuid,
    pub evaluations: Vec<RuleEvaluation>,
    pub executions: Vec<WorkflowExecution>,
    /// `(rule_id, error)` for rules whose evaluation or workflow run errored.
    pub failures: Vec<(Uuid, String)>,
}

pub struct SignalRouter {
    rules: RuleEngine,
    workflows: Arc<WorkflowEngine>,
}

impl SignalRouter {
    pub fn new(workflows: Arc<WorkflowEngine>) -> Self {
        Self {
            rules: RuleEngine::new(),
            workflows,
        }
    }

    /// Evaluate every enabled rule against the signal and run the workflow
    /// of each matching rule, one transaction per run.
    ///
    /// The signal ends `processed` when every rule evaluated and every
    /// triggered run returned an execution record, and `failed` otherwise.
    pub async fn route(&self, db: &dyn Database, signal_id: Uuid) -> Result<RouteReport> {
        let mut tx = db.begin().await?;
        let signal: Signal = tx
            .get_signal(signal_id)
            .await?
            .ok_or_else(|| StorageError::not_found("signal", signal_id))?;
        if signal.status.is_final() {
            return Err(StorageError::Immutable(format!(
                "signal {} is {}",
                signal_id,
                signal.status.as_str()
            ))
            .into());
        }

        let ctx = RuleContext::for_signal(&signal);
        let outcomes = self
            .rules
            .evaluate_rules_for_signal(&mut *tx, signal.agency_id, &ctx)
            .await?;
        tx.commit().await?;

        let mut report = RouteReport {
            signal_id,
            ..RouteReport::default()
        };
        for outcome in outcomes {
            let rule_id = outcome.rule.id;
            let evaluation = match outcome.result {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    report.failures.push((rule_id, e.to_string()));
                    continue;
                }
            };
            let matched = evaluation.matched;
            report.evaluations.push(evaluation);

            let Some(workflow_id) = outcome.rule.workflow_id.filter(|_| matched) else {
                continue;
            };
            let trigger = json!({
                "signal": signal.payload,
                "signalId": signal.id,
                "ruleId": rule_id,
            });
            let options = ExecuteOptions::triggered_by("signal", signal.id.to_string());
            match self.workflows.execute(db, workflow_id, trigger, options).await {
                Ok(execution) => report.executions.push(execution),
                Err(e) => {
                    warn!(%signal_id, %rule_id, %workflow_id, error = %e, "routed workflow errored");
                    report.failures.push((rule_id, e.to_string()));
                }
            }
        }

        let mut tx = db.begin().await?;
        if report.failures.is_empty() {
            mark_processed(&mut *tx, signal_id).await?;
        } else {
            mark_failed(&mut *tx, signal_id).await?;
        }
        tx.commit().await?;

        info!(
            %signal_id,
            matched = report.evaluations.iter().filter(|e| e.matched).count(),
            executions = report.executions.len(),
            failures = report.failures.len(),
            "signal routed"
        );
        Ok(report)
    }
}
