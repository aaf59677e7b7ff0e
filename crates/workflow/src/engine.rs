//! Idempotent, transactional workflow execution.
//!
//! One call to [`WorkflowEngine::execute`] opens a single transaction that
//! holds the execution row, every step event, every mutation the steps make
//! and the terminal status. A run that fails logically still commits its
//! audit trail; only infrastructure faults roll it back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use signalflow_core::config::EngineConfig;
use signalflow_core::hash_value;
use signalflow_core::model::{
    ExecutionStatus, OnError, Step, StepEventType, Workflow, WorkflowEvent, WorkflowExecution,
};
use signalflow_llm::TextGenerator;
use signalflow_storage::{Database, StorageError, Transaction, WorkflowStore};

use crate::error::{EngineError, Result, StepError};
use crate::handlers::{NextStep, StepContext, StepHandlers, StepOutcome};

/// Caller-supplied trigger metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOptions {
    pub trigger_id: Option<String>,
    pub trigger_type: Option<String>,
    /// Always create a new execution, even for a payload seen before.
    pub skip_idempotency_check: bool,
    /// Overrides the configured run deadline.
    pub deadline: Option<Duration>,
}

impl ExecuteOptions {
    pub fn triggered_by(trigger_type: impl Into<String>, trigger_id: impl Into<String>) -> Self {
        Self {
            trigger_id: Some(trigger_id.into()),
            trigger_type: Some(trigger_type.into()),
            ..Self::default()
        }
    }

    pub fn skip_idempotency(mut self) -> Self {
        self.skip_idempotency_check = true;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Result of walking the step graph.
enum RunOutcome {
    Completed,
    Failed { step_id: String, error: String },
}

pub struct WorkflowEngine {
    handlers: StepHandlers,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(handlers: StepHandlers, config: EngineConfig) -> Self {
        Self { handlers, config }
    }

    /// Default handlers with AI steps served by `generator`.
    pub fn with_generator(generator: Arc<dyn TextGenerator>, config: EngineConfig) -> Self {
        let handlers = StepHandlers::new(generator, config.default_ai_model.clone());
        Self::new(handlers, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `workflow_id` against `trigger`, at most once per distinct payload.
    ///
    /// Returns the execution record, completed or failed. An execution that
    /// already exists for the same payload is returned unchanged, even if the
    /// workflow has since been disabled.
    pub async fn execute(
        &self,
        db: &dyn Database,
        workflow_id: Uuid,
        trigger: Value,
        options: ExecuteOptions,
    ) -> Result<WorkflowExecution> {
        let input_hash = input_hash(&trigger, options.skip_idempotency_check);
        let mut tx = db.begin().await?;

        if !options.skip_idempotency_check {
            let existing = tx.find_execution(workflow_id, &input_hash).await?;
            if let Some(existing) = existing {
                debug!(%workflow_id, execution_id = %existing.id, "idempotent hit, returning existing execution");
                tx.rollback().await?;
                return Ok(existing);
            }
        }

        let workflow = tx
            .get_workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
        if !workflow.enabled {
            return Err(EngineError::WorkflowDisabled(workflow_id));
        }
        if workflow.steps.is_empty() {
            return Err(EngineError::EmptyWorkflow(workflow_id));
        }

        let mut execution = WorkflowExecution::pending(
            workflow_id,
            workflow.agency_id,
            input_hash,
            trigger,
            options.trigger_id.clone(),
            options.trigger_type.clone(),
        );
        let inserted = tx.insert_execution(&execution).await;
        match inserted {
            Ok(()) => {}
            Err(e) if e.is_unique_violation() => {
                debug!(%workflow_id, "concurrent duplicate execution, re-fetching");
                tx.rollback().await?;
                return refetch(db, workflow_id, &execution.input_hash).await;
            }
            Err(e) => return Err(e.into()),
        }

        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        tx.update_execution(&execution).await?;
        info!(%workflow_id, execution_id = %execution.id, "workflow run started");

        let deadline = options.deadline.or_else(|| self.config.run_deadline());
        let mut results = IndexMap::new();
        let outcome = match self
            .run_steps(&mut *tx, &workflow, &mut execution, &mut results, deadline)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    %workflow_id,
                    execution_id = %execution.id,
                    error = %e,
                    "workflow run aborted, rolling back"
                );
                return Err(e);
            }
        };

        let results_value = Value::Object(results.into_iter().collect());
        match outcome {
            RunOutcome::Completed => {
                execution.status = ExecutionStatus::Completed;
                execution.output_hash = Some(hash_value(&results_value));
                execution.result = Some(results_value);
            }
            RunOutcome::Failed { step_id, error } => {
                execution.status = ExecutionStatus::Failed;
                execution.result = Some(json!({
                    "failedStep": step_id,
                    "error": error,
                    "stepResults": results_value,
                }));
                execution.error = Some(error);
            }
        }
        execution.completed_at = Some(Utc::now());
        tx.update_execution(&execution).await?;
        tx.commit().await?;

        info!(
            %workflow_id,
            execution_id = %execution.id,
            status = execution.status.as_str(),
            "workflow run finished"
        );
        Ok(execution)
    }

    async fn run_steps(
        &self,
        tx: &mut dyn Transaction,
        workflow: &Workflow,
        execution: &mut WorkflowExecution,
        results: &mut IndexMap<String, Value>,
        deadline: Option<Duration>,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        let mut current = workflow.steps.first().map(|s| s.id.clone());
        let mut visits: u32 = 0;

        while let Some(step_id) = current.take() {
            if deadline.is_some_and(|d| started.elapsed() >= d) {
                return Ok(RunOutcome::Failed {
                    step_id,
                    error: "deadline exceeded".to_string(),
                });
            }
            visits += 1;
            if visits > self.config.max_steps {
                return Ok(RunOutcome::Failed {
                    step_id,
                    error: format!("exceeded max steps ({})", self.config.max_steps),
                });
            }
            let Some(step) = workflow.step(&step_id) else {
                return Ok(RunOutcome::Failed {
                    error: format!("unknown step '{}'", step_id),
                    step_id,
                });
            };

            execution.current_step = Some(step_id.clone());
            tx.update_execution(execution).await?;

            let mut event = WorkflowEvent::new(execution.id, &step.id, step.kind.type_name(), StepEventType::Started);
            event.input = serde_json::to_value(&step.kind).ok();
            tx.append_event(&event).await?;

            let step_started = Instant::now();
            let result = {
                let mut ctx = StepContext {
                    tx: &mut *tx,
                    agency_id: workflow.agency_id,
                    workflow_id: workflow.id,
                    execution_id: execution.id,
                    trigger: &execution.trigger_payload,
                    step_results: results,
                };
                self.run_with_retry(workflow, step, &mut ctx).await
            };
            let duration_ms = step_started.elapsed().as_millis() as u64;

            match result {
                Ok(outcome) => {
                    let mut event =
                        WorkflowEvent::new(execution.id, &step.id, step.kind.type_name(), StepEventType::Completed);
                    event.duration_ms = Some(duration_ms);
                    event.output = Some(outcome.output.clone());
                    tx.append_event(&event).await?;

                    results.insert(step.id.clone(), outcome.output);
                    current = match outcome.next {
                        NextStep::Default => step.next.clone(),
                        NextStep::Goto(target) => Some(target),
                        NextStep::Halt => None,
                    };
                }
                Err(err) => {
                    let message = err.to_string();
                    let mut event =
                        WorkflowEvent::new(execution.id, &step.id, step.kind.type_name(), StepEventType::Failed);
                    event.duration_ms = Some(duration_ms);
                    event.error = Some(message.clone());
                    tx.append_event(&event).await?;
                    warn!(
                        execution_id = %execution.id,
                        step_id = %step.id,
                        error = %message,
                        "workflow step failed"
                    );

                    if step.on_error == OnError::Skip {
                        results.insert(step.id.clone(), json!({"skipped": true, "error": message}));
                        current = step.next.clone();
                    } else {
                        return Ok(RunOutcome::Failed {
                            step_id: step.id.clone(),
                            error: message,
                        });
                    }
                }
            }
        }

        Ok(RunOutcome::Completed)
    }

    /// Invoke the step's handler under the step timeout, re-attempting
    /// retryable failures per the workflow's retry policy.
    async fn run_with_retry(
        &self,
        workflow: &Workflow,
        step: &Step,
        ctx: &mut StepContext<'_>,
    ) -> std::result::Result<StepOutcome, StepError> {
        let handler = self.handlers.for_kind(&step.kind);
        let timeout = self.config.step_timeout();
        let max_attempts = workflow.retry_policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(timeout, handler.run(step, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(StepError::Timeout(timeout)),
            };
            match result {
                Err(err) if err.is_retryable(&step.kind) && attempt < max_attempts => {
                    let backoff = Duration::from_millis(workflow.retry_policy.backoff_ms * u64::from(attempt));
                    warn!(
                        step_id = %step.id,
                        attempt,
                        max_attempts,
                        error = %err,
                        "retrying workflow step"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Content hash of the trigger; with idempotency skipped, a fresh nonce
/// keeps the hash unique per call.
fn input_hash(trigger: &Value, skip_idempotency_check: bool) -> String {
    if skip_idempotency_check {
        hash_value(&json!({
            "trigger": trigger,
            "nonce": Uuid::new_v4().to_string(),
        }))
    } else {
        hash_value(trigger)
    }
}

async fn refetch(db: &dyn Database, workflow_id: Uuid, input_hash: &str) -> Result<WorkflowExecution> {
    let mut tx = db.begin().await?;
    let found = tx.find_execution(workflow_id, input_hash).await?;
    tx.rollback().await?;
    found.ok_or_else(|| StorageError::not_found("workflow execution", input_hash).into())
}
