//! Storage collaborator interfaces.
//!
//! Every method takes `&mut self`: a store handle is a transaction, and all
//! reads and writes of one workflow run go through the same handle. Engines
//! receive the handle explicitly; nothing here is ambient.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use signalflow_core::model::{
    NewInvoice, NewNotification, NewProject, NewTask, NewTaskList, Record, RecordKind, RuleCondition,
    RuleEvaluation, RuleVersion, Signal, VersionStatus, Workflow, WorkflowEvent, WorkflowExecution,
    WorkflowRule,
};

use crate::error::{Result, StorageError};

/// Opens transactions. One transaction spans every write of a workflow run.
#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// A unit of work. Dropping it without `commit` discards every write.
#[async_trait]
pub trait Transaction: SignalStore + RuleStore + WorkflowStore + MutationStore + Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

// ── Signals ─────────────────────────────────────────────────────────

#[async_trait]
pub trait SignalStore: Send {
    async fn get_signal(&mut self, id: Uuid) -> Result<Option<Signal>>;

    async fn find_signal_by_hash(&mut self, agency_id: Uuid, dedup_hash: &str) -> Result<Option<Signal>>;

    /// Fails with [`StorageError::UniqueViolation`] when `(agency_id, dedup_hash)` exists.
    async fn insert_signal(&mut self, signal: &Signal) -> Result<()>;

    /// Fails with [`StorageError::Immutable`] when the stored row is processed or discarded.
    async fn update_signal(&mut self, signal: &Signal) -> Result<()>;
}

// ── Rules ───────────────────────────────────────────────────────────

#[async_trait]
pub trait RuleStore: Send {
    async fn get_rule(&mut self, id: Uuid) -> Result<Option<WorkflowRule>>;

    async fn list_enabled_rules(&mut self, agency_id: Uuid) -> Result<Vec<WorkflowRule>>;

    async fn find_rule_by_name(&mut self, agency_id: Uuid, name: &str) -> Result<Option<WorkflowRule>>;

    async fn insert_rule(&mut self, rule: &WorkflowRule) -> Result<()>;

    /// Overwrite description, enabled flag and linked workflow.
    async fn update_rule(&mut self, rule: &WorkflowRule) -> Result<()>;

    async fn list_versions(&mut self, rule_id: Uuid) -> Result<Vec<RuleVersion>>;

    /// The single published version of a rule, if any.
    async fn published_version(&mut self, rule_id: Uuid) -> Result<Option<RuleVersion>>;

    async fn insert_version(&mut self, version: &RuleVersion, conditions: &[RuleCondition]) -> Result<()>;

    async fn set_version_status(
        &mut self,
        version_id: Uuid,
        status: VersionStatus,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Conditions of a version ordered by `position`.
    async fn list_conditions(&mut self, version_id: Uuid) -> Result<Vec<RuleCondition>>;

    async fn insert_evaluation(&mut self, evaluation: &RuleEvaluation) -> Result<()>;

    async fn list_evaluations(&mut self, rule_id: Uuid) -> Result<Vec<RuleEvaluation>>;
}

// ── Workflows, executions, events ───────────────────────────────────

#[async_trait]
pub trait WorkflowStore: Send {
    async fn get_workflow(&mut self, id: Uuid) -> Result<Option<Workflow>>;

    async fn find_workflow_by_name(&mut self, agency_id: Uuid, name: &str) -> Result<Option<Workflow>>;

    async fn insert_workflow(&mut self, workflow: &Workflow) -> Result<()>;

    /// Overwrite description, enabled flag, steps and retry policy.
    async fn update_workflow(&mut self, workflow: &Workflow) -> Result<()>;

    async fn get_execution(&mut self, id: Uuid) -> Result<Option<WorkflowExecution>>;

    async fn find_execution(&mut self, workflow_id: Uuid, input_hash: &str) -> Result<Option<WorkflowExecution>>;

    async fn list_executions(&mut self, workflow_id: Uuid) -> Result<Vec<WorkflowExecution>>;

    /// Fails with [`StorageError::UniqueViolation`] when `(workflow_id, input_hash)` exists.
    async fn insert_execution(&mut self, execution: &WorkflowExecution) -> Result<()>;

    async fn update_execution(&mut self, execution: &WorkflowExecution) -> Result<()>;

    async fn append_event(&mut self, event: &WorkflowEvent) -> Result<()>;

    /// Events of an execution in append order.
    async fn list_events(&mut self, execution_id: Uuid) -> Result<Vec<WorkflowEvent>>;
}

// ── Domain mutation primitives ──────────────────────────────────────

/// Record persistence plus the named primitives action steps dispatch to.
///
/// Backends implement the four record methods; the primitives are built on
/// top of them and validate parent references.
#[async_trait]
pub trait MutationStore: Send {
    async fn insert_record(&mut self, record: &Record) -> Result<()>;

    async fn get_record(&mut self, id: Uuid) -> Result<Option<Record>>;

    async fn save_record(&mut self, record: &Record) -> Result<()>;

    async fn list_records(&mut self, agency_id: Uuid, kind: RecordKind) -> Result<Vec<Record>>;

    async fn create_project(
        &mut self,
        agency_id: Uuid,
        execution_id: Option<Uuid>,
        input: &NewProject,
    ) -> Result<Record> {
        if let Some(initiative_id) = input.initiative_id {
            self.require_record(agency_id, RecordKind::Initiative, initiative_id).await?;
        }
        let record = Record::new(RecordKind::Project, agency_id, serde_json::to_value(input)?, execution_id);
        self.insert_record(&record).await?;
        Ok(record)
    }

    async fn create_task_list(
        &mut self,
        agency_id: Uuid,
        execution_id: Option<Uuid>,
        input: &NewTaskList,
    ) -> Result<Record> {
        self.require_record(agency_id, RecordKind::Project, input.project_id).await?;
        let record = Record::new(RecordKind::TaskList, agency_id, serde_json::to_value(input)?, execution_id);
        self.insert_record(&record).await?;
        Ok(record)
    }

    async fn create_task(
        &mut self,
        agency_id: Uuid,
        execution_id: Option<Uuid>,
        input: &NewTask,
    ) -> Result<Record> {
        if let Some(list_id) = input.task_list_id {
            self.require_record(agency_id, RecordKind::TaskList, list_id).await?;
        }
        if let Some(project_id) = input.project_id {
            self.require_record(agency_id, RecordKind::Project, project_id).await?;
        }
        let mut body = serde_json::to_value(input)?;
        if let Value::Object(map) = &mut body {
            map.entry("status").or_insert_with(|| Value::String("open".to_string()));
        }
        let record = Record::new(RecordKind::Task, agency_id, body, execution_id);
        self.insert_record(&record).await?;
        Ok(record)
    }

    async fn send_notification(
        &mut self,
        agency_id: Uuid,
        execution_id: Option<Uuid>,
        input: &NewNotification,
    ) -> Result<Record> {
        let mut body = serde_json::to_value(input)?;
        if let Value::Object(map) = &mut body {
            map.insert("read".to_string(), Value::Bool(false));
        }
        let record = Record::new(RecordKind::Notification, agency_id, body, execution_id);
        self.insert_record(&record).await?;
        Ok(record)
    }

    async fn create_invoice(
        &mut self,
        agency_id: Uuid,
        execution_id: Option<Uuid>,
        input: &NewInvoice,
    ) -> Result<Record> {
        if let Some(project_id) = input.project_id {
            self.require_record(agency_id, RecordKind::Project, project_id).await?;
        }
        let mut body = serde_json::to_value(input)?;
        if let Value::Object(map) = &mut body {
            map.insert("status".to_string(), Value::String("draft".to_string()));
        }
        let record = Record::new(RecordKind::Invoice, agency_id, body, execution_id);
        self.insert_record(&record).await?;
        Ok(record)
    }

    /// Shallow-merge `patch` into an existing record of the given kind.
    async fn update_record(
        &mut self,
        agency_id: Uuid,
        kind: RecordKind,
        id: Uuid,
        patch: &Map<String, Value>,
    ) -> Result<Record> {
        let mut record = self.require_record(agency_id, kind, id).await?;
        record.apply_patch(patch);
        self.save_record(&record).await?;
        Ok(record)
    }

    async fn update_initiative(
        &mut self,
        agency_id: Uuid,
        id: Uuid,
        patch: &Map<String, Value>,
    ) -> Result<Record> {
        self.update_record(agency_id, RecordKind::Initiative, id, patch).await
    }

    /// Fetch a record, failing unless it exists with the expected kind and owner.
    async fn require_record(&mut self, agency_id: Uuid, kind: RecordKind, id: Uuid) -> Result<Record> {
        match self.get_record(id).await? {
            Some(record) if record.kind == kind && record.agency_id == agency_id => Ok(record),
            _ => Err(StorageError::not_found(kind.as_str(), id)),
        }
    }
}
