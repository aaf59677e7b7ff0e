#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use signalflow_core::config::EngineConfig;
use signalflow_core::model::{RetryPolicy, Step, Workflow, WorkflowEvent};
use signalflow_llm::{StaticGenerator, TextGenerator};
use signalflow_storage::{Database, MemoryDatabase, WorkflowStore};
use signalflow_workflow::WorkflowEngine;

pub fn steps(value: Value) -> Vec<Step> {
    serde_json::from_value(value).expect("valid step list")
}

pub fn workflow(agency_id: Uuid, steps: Vec<Step>) -> Workflow {
    Workflow {
        id: Uuid::new_v4(),
        agency_id,
        name: format!("wf-{}", Uuid::new_v4()),
        description: None,
        enabled: true,
        steps,
        retry_policy: RetryPolicy::default(),
        created_at: Utc::now(),
    }
}

pub async fn store_workflow(db: &MemoryDatabase, workflow: &Workflow) {
    let mut tx = db.begin().await.unwrap();
    tx.insert_workflow(workflow).await.unwrap();
    tx.commit().await.unwrap();
}

pub async fn setup(steps: Vec<Step>) -> (MemoryDatabase, Workflow) {
    let db = MemoryDatabase::new();
    let wf = workflow(Uuid::new_v4(), steps);
    store_workflow(&db, &wf).await;
    (db, wf)
}

pub fn engine_with(generator: Arc<dyn TextGenerator>) -> WorkflowEngine {
    WorkflowEngine::with_generator(generator, EngineConfig::default())
}

pub fn engine() -> WorkflowEngine {
    engine_with(Arc::new(StaticGenerator::echo()))
}

pub async fn events(db: &MemoryDatabase, execution_id: Uuid) -> Vec<WorkflowEvent> {
    let mut tx = db.begin().await.unwrap();
    tx.list_events(execution_id).await.unwrap()
}

/// `(step_id, event_type)` pairs in append order.
pub async fn event_trail(db: &MemoryDatabase, execution_id: Uuid) -> Vec<(String, &'static str)> {
    events(db, execution_id)
        .await
        .into_iter()
        .map(|e| (e.step_id, e.event_type.as_str()))
        .collect()
}
