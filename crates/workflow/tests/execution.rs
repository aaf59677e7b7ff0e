mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use signalflow_core::config::EngineConfig;
use signalflow_core::hash_value;
use signalflow_core::model::{ExecutionStatus, RecordKind, RetryPolicy, Step, WorkflowExecution};
use signalflow_llm::{LlmError, StaticGenerator, TextGenerator};
use signalflow_storage::{Database, MemoryDatabase, WorkflowStore};
use signalflow_workflow::{
    EngineError, ExecuteOptions, StepContext, StepError, StepHandler, StepHandlers, StepOutcome, WorkflowEngine,
};

use common::*;

fn project_pipeline() -> Vec<Step> {
    steps(json!([
        {
            "id": "create_project",
            "type": "action",
            "action": "create_project",
            "params": {"name": "Recovery for {{trigger.clientId}}", "clientId": "{{trigger.clientId}}"},
            "next": "create_task_list"
        },
        {
            "id": "create_task_list",
            "type": "action",
            "action": "create_task_list",
            "params": {"projectId": "{{create_project.id}}", "name": "Triage"},
            "next": "create_task"
        },
        {
            "id": "create_task",
            "type": "action",
            "action": "create_task",
            "params": {
                "title": "Review sessions ({{trigger.sessions}})",
                "taskListId": "{{create_task_list.id}}",
                "projectId": "{{create_project.id}}"
            }
        }
    ]))
}

#[tokio::test]
async fn completed_run_chains_results_between_steps() {
    let (db, wf) = setup(project_pipeline()).await;
    let trigger = json!({"clientId": "c-42", "sessions": 12});

    let exec = engine()
        .execute(&db, wf.id, trigger, ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let result = exec.result.clone().unwrap();
    assert_eq!(result["create_project"]["name"], json!("Recovery for c-42"));
    assert_eq!(result["create_task"]["title"], json!("Review sessions (12)"));
    assert_eq!(result["create_task"]["status"], json!("open"));
    assert_eq!(exec.output_hash, Some(hash_value(&result)));
    assert!(exec.completed_at.is_some());

    let trail = event_trail(&db, exec.id).await;
    assert_eq!(
        trail,
        vec![
            ("create_project".to_string(), "started"),
            ("create_project".to_string(), "completed"),
            ("create_task_list".to_string(), "started"),
            ("create_task_list".to_string(), "completed"),
            ("create_task".to_string(), "started"),
            ("create_task".to_string(), "completed"),
        ]
    );

    let snapshot = db.snapshot();
    assert_eq!(snapshot.records.len(), 3);
    assert!(snapshot
        .records
        .values()
        .all(|r| r.execution_id == Some(exec.id) && r.agency_id == wf.agency_id));
}

#[tokio::test]
async fn failing_rule_step_fails_run_before_later_steps() {
    let (db, wf) = setup(steps(json!([
        {"id": "gate", "type": "rule", "ruleId": Uuid::new_v4(), "next": "notify"},
        {"id": "notify", "type": "action", "action": "send_notification", "params": {"message": "hi"}}
    ])))
    .await;

    let exec = engine()
        .execute(&db, wf.id, json!({"sessions": 5}), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error.as_deref().unwrap().contains("rule not found"));
    assert_eq!(exec.result.as_ref().unwrap()["failedStep"], json!("gate"));
    assert_eq!(
        event_trail(&db, exec.id).await,
        vec![("gate".to_string(), "started"), ("gate".to_string(), "failed")]
    );
    assert!(db.snapshot().records.is_empty());
}

#[tokio::test]
async fn non_matching_rule_ends_run_as_completed() {
    let (db, wf) = setup(steps(json!([
        {
            "id": "gate",
            "type": "rule",
            "conditions": [{"field": "sessions", "operator": "lt", "value": 20}],
            "next": "notify"
        },
        {"id": "notify", "type": "action", "action": "send_notification", "params": {"message": "hi"}}
    ])))
    .await;

    let exec = engine()
        .execute(&db, wf.id, json!({"sessions": 50}), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.result.as_ref().unwrap()["gate"]["matched"], json!(false));
    assert!(exec.result.as_ref().unwrap().get("notify").is_none());
    assert!(db.snapshot().records.is_empty());
}

#[tokio::test]
async fn identical_trigger_returns_existing_execution() {
    let (db, wf) = setup(project_pipeline()).await;
    let engine = engine();

    let first = engine
        .execute(&db, wf.id, json!({"clientId": "c-1", "sessions": 3}), ExecuteOptions::default())
        .await
        .unwrap();
    let second = engine
        .execute(&db, wf.id, json!({"sessions": 3, "clientId": "c-1"}), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first, second);
    let snapshot = db.snapshot();
    assert_eq!(snapshot.executions.len(), 1);
    assert_eq!(snapshot.records.len(), 3);
}

#[tokio::test]
async fn concurrent_identical_triggers_create_one_execution() {
    let (db, wf) = setup(project_pipeline()).await;
    let engine = engine();
    let trigger = json!({"clientId": "c-7", "sessions": 1});

    let (a, b) = futures::join!(
        engine.execute(&db, wf.id, trigger.clone(), ExecuteOptions::default()),
        engine.execute(&db, wf.id, trigger.clone(), ExecuteOptions::default()),
    );

    assert_eq!(a.unwrap().id, b.unwrap().id);
    let snapshot = db.snapshot();
    assert_eq!(snapshot.executions.len(), 1);
    assert_eq!(snapshot.records.len(), 3);
}

#[tokio::test]
async fn skipping_idempotency_creates_new_executions() {
    let (db, wf) = setup(steps(json!([
        {"id": "log", "type": "action", "action": "log", "params": {"message": "tick"}}
    ])))
    .await;
    let engine = engine();
    let options = ExecuteOptions::triggered_by("manual", "run-1").skip_idempotency();

    let first = engine.execute(&db, wf.id, json!({}), options.clone()).await.unwrap();
    let second = engine.execute(&db, wf.id, json!({}), options).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_ne!(first.input_hash, second.input_hash);
    assert_eq!(first.trigger_type.as_deref(), Some("manual"));
    assert_eq!(db.snapshot().executions.len(), 2);
}

#[tokio::test]
async fn skip_policy_records_failure_and_continues() {
    let (db, wf) = setup(steps(json!([
        {
            "id": "task_list",
            "type": "action",
            "action": "create_task_list",
            "params": {"projectId": "{{missing.id}}", "name": "Orphan"},
            "onError": "skip",
            "next": "task"
        },
        {
            "id": "task",
            "type": "action",
            "action": "create_task",
            "params": {"title": "Standalone", "taskListId": "{{task_list.id}}"}
        }
    ])))
    .await;

    let exec = engine()
        .execute(&db, wf.id, json!({}), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let result = exec.result.unwrap();
    assert_eq!(result["task_list"]["skipped"], json!(true));
    assert!(result["task_list"]["error"]
        .as_str()
        .unwrap()
        .contains("missing required parameter 'projectId'"));
    assert_eq!(result["task"]["title"], json!("Standalone"));
    assert!(result["task"].get("taskListId").is_none());
}

#[tokio::test]
async fn failed_run_commits_audit_trail_and_earlier_mutations() {
    let missing_project = Uuid::new_v4();
    let (db, wf) = setup(steps(json!([
        {
            "id": "project",
            "type": "action",
            "action": "create_project",
            "params": {"name": "Kept"},
            "next": "list"
        },
        {
            "id": "list",
            "type": "action",
            "action": "create_task_list",
            "params": {"projectId": missing_project, "name": "Broken"}
        }
    ])))
    .await;

    let exec = engine()
        .execute(&db, wf.id, json!({"n": 1}), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error.as_deref().unwrap().contains("project not found"));
    let result = exec.result.unwrap();
    assert_eq!(result["failedStep"], json!("list"));
    assert_eq!(result["stepResults"]["project"]["name"], json!("Kept"));

    let snapshot = db.snapshot();
    assert_eq!(snapshot.executions[&exec.id].status, ExecutionStatus::Failed);
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.events.len(), 4);
}

#[tokio::test]
async fn branch_falls_back_to_default() {
    let (db, wf) = setup(steps(json!([
        {
            "id": "route",
            "type": "branch",
            "branches": [
                {"conditions": [{"field": "tier", "operator": "eq", "value": "gold"}], "next": "A"}
            ],
            "default": "B"
        },
        {"id": "A", "type": "action", "action": "log", "params": {"message": "gold"}},
        {"id": "B", "type": "action", "action": "log", "params": {"message": "standard"}}
    ])))
    .await;

    let exec = engine()
        .execute(&db, wf.id, json!({"tier": "silver"}), ExecuteOptions::default())
        .await
        .unwrap();

    let result = exec.result.unwrap();
    assert_eq!(result["route"]["nextStep"], json!("B"));
    assert_eq!(result["B"]["message"], json!("standard"));
    assert!(result.get("A").is_none());
}

#[tokio::test]
async fn branch_without_default_ends_path() {
    let (db, wf) = setup(steps(json!([
        {
            "id": "route",
            "type": "branch",
            "branches": [
                {"conditions": [{"field": "tier", "operator": "eq", "value": "gold"}], "next": "A"}
            ],
            "next": "after"
        },
        {"id": "A", "type": "action", "action": "log", "params": {"message": "gold"}},
        {"id": "after", "type": "action", "action": "log", "params": {"message": "after"}}
    ])))
    .await;

    let exec = engine()
        .execute(&db, wf.id, json!({"tier": "silver"}), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let result = exec.result.unwrap();
    assert_eq!(result["route"]["nextStep"], Value::Null);
    assert_eq!(result["route"]["matchedBranch"], Value::Null);
    assert!(result.get("A").is_none());
    assert!(result.get("after").is_none());
    assert_eq!(
        event_trail(&db, exec.id).await,
        vec![
            ("route".to_string(), "started"),
            ("route".to_string(), "completed"),
        ]
    );
}

#[tokio::test]
async fn branch_takes_first_matching_arm() {
    let (db, wf) = setup(steps(json!([
        {
            "id": "route",
            "type": "branch",
            "branches": [
                {"conditions": [{"field": "tier", "operator": "eq", "value": "bronze"}], "next": "A"},
                {"conditions": [{"field": "tier", "operator": "in", "value": ["gold", "silver"]}], "next": "B"},
                {"conditions": [{"field": "tier", "operator": "eq", "value": "gold"}], "next": "A"}
            ]
        },
        {"id": "A", "type": "action", "action": "log", "params": {"message": "a"}},
        {"id": "B", "type": "action", "action": "log", "params": {"message": "b"}}
    ])))
    .await;

    let exec = engine()
        .execute(&db, wf.id, json!({"tier": "gold"}), ExecuteOptions::default())
        .await
        .unwrap();

    let result = exec.result.unwrap();
    assert_eq!(result["route"]["matchedBranch"], json!(1));
    assert!(result.get("B").is_some());
    assert!(result.get("A").is_none());
}

#[tokio::test]
async fn signal_filter_mismatch_ends_path_quietly() {
    let (db, wf) = setup(steps(json!([
        {"id": "only_ga4", "type": "signal", "filter": {"source": "ga4"}, "next": "log"},
        {"id": "log", "type": "action", "action": "log", "params": {"message": "seen"}}
    ])))
    .await;
    let engine = engine();

    let hit = engine
        .execute(&db, wf.id, json!({"signal": {"source": "ga4"}}), ExecuteOptions::default())
        .await
        .unwrap();
    assert!(hit.result.unwrap().get("log").is_some());

    let miss = engine
        .execute(&db, wf.id, json!({"signal": {"source": "hubspot"}}), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(miss.status, ExecutionStatus::Completed);
    let result = miss.result.unwrap();
    assert_eq!(result["only_ga4"]["matched"], json!(false));
    assert!(result.get("log").is_none());
}

#[tokio::test]
async fn parallel_step_records_declared_branches() {
    let (db, wf) = setup(steps(json!([
        {"id": "fan", "type": "parallel", "steps": ["a", "b"], "next": "a"},
        {"id": "a", "type": "action", "action": "log", "params": {"message": "a"}},
        {"id": "b", "type": "action", "action": "log", "params": {"message": "b"}}
    ])))
    .await;

    let exec = engine()
        .execute(&db, wf.id, json!({}), ExecuteOptions::default())
        .await
        .unwrap();

    let result = exec.result.unwrap();
    assert_eq!(result["fan"]["steps"], json!(["a", "b"]));
    assert!(result.get("a").is_some());
    assert!(result.get("b").is_none());
}

#[tokio::test]
async fn ai_schema_response_feeds_later_steps() {
    let generator = Arc::new(StaticGenerator::fixed("```json\n{\"summary\": \"traffic fell\"}\n```"));
    let (db, wf) = setup(steps(json!([
        {
            "id": "analyze",
            "type": "ai",
            "prompt": "Summarize: sessions={{trigger.sessions}}",
            "schema": {"type": "object", "required": ["summary"]},
            "next": "notify"
        },
        {
            "id": "notify",
            "type": "action",
            "action": "send_notification",
            "params": {"message": "{{analyze.data.summary}}"}
        }
    ])))
    .await;

    let exec = engine_with(generator.clone())
        .execute(&db, wf.id, json!({"sessions": 4}), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let result = exec.result.unwrap();
    assert_eq!(result["analyze"]["model"], json!(EngineConfig::default().default_ai_model));
    assert_eq!(result["notify"]["message"], json!("traffic fell"));
    assert_eq!(result["notify"]["kind"], json!(RecordKind::Notification.as_str()));
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn ai_prompt_is_rendered_from_results() {
    let (db, wf) = setup(steps(json!([
        {"id": "ask", "type": "ai", "prompt": "Client {{trigger.clientId}} dropped", "model": "small"}
    ])))
    .await;

    let exec = engine()
        .execute(&db, wf.id, json!({"clientId": "c-9"}), ExecuteOptions::default())
        .await
        .unwrap();

    let result = exec.result.unwrap();
    assert_eq!(result["ask"]["text"], json!("Client c-9 dropped"));
    assert_eq!(result["ask"]["model"], json!("small"));
}

#[tokio::test]
async fn ai_response_that_is_not_json_fails_schema_step() {
    let (db, wf) = setup(steps(json!([
        {"id": "analyze", "type": "ai", "prompt": "p", "schema": {"type": "object"}}
    ])))
    .await;

    let exec = engine_with(Arc::new(StaticGenerator::fixed("definitely not json")))
        .execute(&db, wf.id, json!({}), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error.unwrap().contains("not valid JSON"));
}

/// Fails with a timeout until `failures` calls have been made.
struct FlakyGenerator {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for FlakyGenerator {
    async fn generate_text(&self, prompt: &str, _model: &str) -> Result<String, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(LlmError::Timeout)
        } else {
            Ok(prompt.to_string())
        }
    }
}

async fn run_flaky(max_attempts: u32) -> (WorkflowExecution, usize) {
    let db = MemoryDatabase::new();
    let mut wf = workflow(Uuid::new_v4(), steps(json!([{"id": "ask", "type": "ai", "prompt": "hello"}])));
    wf.retry_policy = RetryPolicy {
        max_attempts,
        backoff_ms: 1,
    };
    store_workflow(&db, &wf).await;

    let generator = Arc::new(FlakyGenerator {
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let exec = engine_with(generator.clone())
        .execute(&db, wf.id, json!({}), ExecuteOptions::default())
        .await
        .unwrap();
    (exec, generator.calls.load(Ordering::SeqCst))
}

#[tokio::test]
async fn retryable_failures_are_retried_per_policy() {
    let (exec, calls) = run_flaky(3).await;
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(calls, 3);

    let (exec, calls) = run_flaky(1).await;
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(calls, 1);
}

#[tokio::test]
async fn non_retryable_failures_are_not_retried() {
    let db = MemoryDatabase::new();
    let mut wf = workflow(Uuid::new_v4(), steps(json!([{"id": "ask", "type": "ai", "prompt": "hello"}])));
    wf.retry_policy = RetryPolicy {
        max_attempts: 5,
        backoff_ms: 0,
    };
    store_workflow(&db, &wf).await;
    let generator = Arc::new(StaticGenerator::failing(LlmError::NotConfigured("no api key".into())));

    let exec = engine_with(generator.clone())
        .execute(&db, wf.id, json!({}), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn unknown_step_pointer_fails_run() {
    let (db, wf) = setup(steps(json!([
        {"id": "start", "type": "action", "action": "log", "params": {"message": "x"}, "next": "ghost"}
    ])))
    .await;

    let exec = engine()
        .execute(&db, wf.id, json!({}), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error.as_deref(), Some("unknown step 'ghost'"));
}

#[tokio::test]
async fn cyclic_graph_hits_step_limit() {
    let (db, wf) = setup(steps(json!([
        {"id": "loop", "type": "action", "action": "log", "params": {"message": "again"}, "next": "loop"}
    ])))
    .await;
    let config = EngineConfig {
        max_steps: 5,
        ..EngineConfig::default()
    };
    let engine = WorkflowEngine::with_generator(Arc::new(StaticGenerator::echo()), config);

    let exec = engine.execute(&db, wf.id, json!({}), ExecuteOptions::default()).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error.as_deref(), Some("exceeded max steps (5)"));
    assert_eq!(db.snapshot().events.len(), 10);
}

#[tokio::test]
async fn elapsed_deadline_fails_run() {
    let (db, wf) = setup(steps(json!([
        {"id": "log", "type": "action", "action": "log", "params": {"message": "late"}}
    ])))
    .await;

    let exec = engine()
        .execute(
            &db,
            wf.id,
            json!({}),
            ExecuteOptions::default().with_deadline(Duration::ZERO),
        )
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error.as_deref(), Some("deadline exceeded"));
}

#[tokio::test]
async fn disabled_or_missing_workflow_is_rejected_before_any_row() {
    let db = MemoryDatabase::new();
    let mut wf = workflow(Uuid::new_v4(), steps(json!([{"id": "a", "type": "parallel", "steps": []}])));
    wf.enabled = false;
    store_workflow(&db, &wf).await;
    let engine = engine();

    let err = engine
        .execute(&db, wf.id, json!({}), ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WorkflowDisabled(id) if id == wf.id));

    let missing = Uuid::new_v4();
    let err = engine
        .execute(&db, missing, json!({}), ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WorkflowNotFound(id) if id == missing));

    assert!(db.snapshot().executions.is_empty());
}

#[tokio::test]
async fn replay_after_disable_returns_existing_execution() {
    let (db, mut wf) = setup(steps(json!([
        {"id": "log", "type": "action", "action": "log", "params": {"message": "once"}}
    ])))
    .await;
    let engine = engine();
    let first = engine
        .execute(&db, wf.id, json!({"n": 1}), ExecuteOptions::default())
        .await
        .unwrap();

    wf.enabled = false;
    let mut tx = db.begin().await.unwrap();
    tx.update_workflow(&wf).await.unwrap();
    tx.commit().await.unwrap();

    let replay = engine
        .execute(&db, wf.id, json!({"n": 1}), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(replay.id, first.id);
    assert_eq!(replay.status, ExecutionStatus::Completed);

    let err = engine
        .execute(&db, wf.id, json!({"n": 2}), ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WorkflowDisabled(id) if id == wf.id));
    assert_eq!(db.snapshot().executions.len(), 1);
}

/// Handler that outlives any step timeout.
struct StalledHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl StepHandler for StalledHandler {
    async fn run(&self, step: &Step, _ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(StepOutcome::next(json!({ "handled": step.id })))
    }
}

/// Run a single stalled step under a one-second step timeout.
async fn run_stalled(step: Value) -> (WorkflowExecution, usize) {
    let db = MemoryDatabase::new();
    let mut wf = workflow(Uuid::new_v4(), steps(json!([step])));
    wf.retry_policy = RetryPolicy {
        max_attempts: 3,
        backoff_ms: 10,
    };
    store_workflow(&db, &wf).await;

    let stalled = Arc::new(StalledHandler {
        calls: AtomicUsize::new(0),
    });
    let handlers = StepHandlers::new(Arc::new(StaticGenerator::echo()), "m")
        .with_ai(stalled.clone())
        .with_action(stalled.clone());
    let config = EngineConfig {
        step_timeout_secs: 1,
        ..EngineConfig::default()
    };
    let exec = WorkflowEngine::new(handlers, config)
        .execute(&db, wf.id, json!({}), ExecuteOptions::default())
        .await
        .unwrap();
    (exec, stalled.calls.load(Ordering::SeqCst))
}

#[tokio::test(start_paused = true)]
async fn timed_out_action_step_fails_without_retry() {
    let (exec, calls) = run_stalled(json!(
        {"id": "create", "type": "action", "action": "create_project", "params": {"name": "slow"}}
    ))
    .await;

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error.as_deref(), Some("step timed out after 1s"));
    assert_eq!(exec.result.unwrap()["failedStep"], json!("create"));
    assert_eq!(calls, 1);
}

#[tokio::test(start_paused = true)]
async fn timed_out_ai_step_is_retried_per_policy() {
    let (exec, calls) = run_stalled(json!({"id": "ask", "type": "ai", "prompt": "hello"})).await;

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error.as_deref(), Some("step timed out after 1s"));
    assert_eq!(calls, 3);
}

/// Action handler that records the rendered trigger instead of writing.
struct RecordingHandler {
    seen: std::sync::Mutex<Vec<Value>>,
}

#[async_trait]
impl StepHandler for RecordingHandler {
    async fn run(&self, step: &Step, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        self.seen.lock().unwrap().push(ctx.trigger.clone());
        Ok(StepOutcome::next(json!({ "handled": step.id })))
    }
}

#[tokio::test]
async fn injected_handler_replaces_default() {
    let (db, wf) = setup(steps(json!([
        {"id": "create", "type": "action", "action": "create_project", "params": {"name": "never stored"}}
    ])))
    .await;
    let recorder = Arc::new(RecordingHandler {
        seen: std::sync::Mutex::new(Vec::new()),
    });
    let handlers = StepHandlers::new(Arc::new(StaticGenerator::echo()), "m").with_action(recorder.clone());
    let engine = WorkflowEngine::new(handlers, EngineConfig::default());

    let exec = engine
        .execute(&db, wf.id, json!({"k": "v"}), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(exec.result.unwrap()["create"]["handled"], json!("create"));
    assert_eq!(recorder.seen.lock().unwrap().as_slice(), &[json!({"k": "v"})]);
    assert!(db.snapshot().records.is_empty());
}

#[tokio::test]
async fn executions_are_listed_per_workflow() {
    let (db, wf) = setup(steps(json!([
        {"id": "log", "type": "action", "action": "log", "params": {"message": "{{trigger.n}}"}}
    ])))
    .await;
    let engine = engine();
    for n in 0..3 {
        engine
            .execute(&db, wf.id, json!({"n": n}), ExecuteOptions::default())
            .await
            .unwrap();
    }

    let mut tx = db.begin().await.unwrap();
    let executions = tx.list_executions(wf.id).await.unwrap();
    assert_eq!(executions.len(), 3);
    assert!(executions.iter().all(|e| e.status == ExecutionStatus::Completed));
}
