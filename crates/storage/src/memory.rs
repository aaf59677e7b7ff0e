//! In-process backend.
//!
//! Transactions stage their writes and publish them on commit; rollback or
//! drop discards them. Unique keys are reserved at insert time: a second
//! in-flight inserter of the same key waits for the holder to finish and
//! then either takes the key (holder rolled back) or gets
//! [`StorageError::UniqueViolation`] (holder committed). That mirrors how a
//! PostgreSQL unique index arbitrates concurrent inserts.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use signalflow_core::model::{
    Record, RecordKind, RuleCondition, RuleEvaluation, RuleVersion, Signal, VersionStatus, Workflow,
    WorkflowEvent, WorkflowExecution, WorkflowRule,
};

use crate::error::{Result, StorageError};
use crate::traits::{Database, MutationStore, RuleStore, SignalStore, Transaction, WorkflowStore};

type ExecutionKey = (Uuid, String);
type SignalKey = (Uuid, String);

/// Committed rows (or one transaction's staged rows).
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    pub signals: HashMap<Uuid, Signal>,
    pub rules: HashMap<Uuid, WorkflowRule>,
    pub versions: HashMap<Uuid, RuleVersion>,
    pub conditions: HashMap<Uuid, RuleCondition>,
    pub evaluations: Vec<RuleEvaluation>,
    pub workflows: HashMap<Uuid, Workflow>,
    pub executions: HashMap<Uuid, WorkflowExecution>,
    pub events: Vec<WorkflowEvent>,
    pub records: HashMap<Uuid, Record>,
}

impl MemorySnapshot {
    fn merge(&mut self, staged: MemorySnapshot) {
        self.signals.extend(staged.signals);
        self.rules.extend(staged.rules);
        self.versions.extend(staged.versions);
        self.conditions.extend(staged.conditions);
        self.evaluations.extend(staged.evaluations);
        self.workflows.extend(staged.workflows);
        self.executions.extend(staged.executions);
        self.events.extend(staged.events);
        self.records.extend(staged.records);
    }

    fn has_execution_key(&self, key: &ExecutionKey) -> bool {
        self.executions
            .values()
            .any(|e| e.workflow_id == key.0 && e.input_hash == key.1)
    }

    fn has_signal_key(&self, key: &SignalKey) -> bool {
        self.signals
            .values()
            .any(|s| s.agency_id == key.0 && s.dedup_hash == key.1)
    }
}

#[derive(Default)]
struct Inner {
    committed: MemorySnapshot,
    execution_keys: HashSet<ExecutionKey>,
    signal_keys: HashSet<SignalKey>,
}

struct Shared {
    inner: Mutex<Inner>,
    released: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared in-memory database. Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                released: Notify::new(),
            }),
        }
    }

    /// Copy of every committed row.
    pub fn snapshot(&self) -> MemorySnapshot {
        self.shared.lock().committed.clone()
    }

    pub fn transaction(&self) -> MemoryTransaction {
        MemoryTransaction {
            shared: Arc::clone(&self.shared),
            staged: MemorySnapshot::default(),
            execution_keys: Vec::new(),
            signal_keys: Vec::new(),
            finished: false,
        }
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(self.transaction()))
    }
}

pub struct MemoryTransaction {
    shared: Arc<Shared>,
    staged: MemorySnapshot,
    execution_keys: Vec<ExecutionKey>,
    signal_keys: Vec<SignalKey>,
    finished: bool,
}

impl MemoryTransaction {
    /// Read through staged rows first, then committed ones.
    fn read<T>(&self, f: impl Fn(&MemorySnapshot) -> Option<T>) -> Option<T> {
        f(&self.staged).or_else(|| f(&self.shared.lock().committed))
    }

    fn release_keys(&mut self) {
        if self.execution_keys.is_empty() && self.signal_keys.is_empty() {
            return;
        }
        {
            let mut inner = self.shared.lock();
            for key in self.execution_keys.drain(..) {
                inner.execution_keys.remove(&key);
            }
            for key in self.signal_keys.drain(..) {
                inner.signal_keys.remove(&key);
            }
        }
        self.shared.released.notify_waiters();
    }

    async fn reserve_execution_key(&mut self, key: ExecutionKey) -> Result<()> {
        if self.execution_keys.contains(&key) || self.staged.has_execution_key(&key) {
            return Err(StorageError::UniqueViolation("workflow_executions_workflow_input_key".into()));
        }
        loop {
            let released = self.shared.released.notified();
            {
                let mut inner = self.shared.lock();
                if inner.committed.has_execution_key(&key) {
                    return Err(StorageError::UniqueViolation(
                        "workflow_executions_workflow_input_key".into(),
                    ));
                }
                if inner.execution_keys.insert(key.clone()) {
                    break;
                }
            }
            debug!(workflow_id = %key.0, "execution key held by another transaction, waiting");
            released.await;
        }
        self.execution_keys.push(key);
        Ok(())
    }

    async fn reserve_signal_key(&mut self, key: SignalKey) -> Result<()> {
        if self.signal_keys.contains(&key) || self.staged.has_signal_key(&key) {
            return Err(StorageError::UniqueViolation("signals_agency_dedup_key".into()));
        }
        loop {
            let released = self.shared.released.notified();
            {
                let mut inner = self.shared.lock();
                if inner.committed.has_signal_key(&key) {
                    return Err(StorageError::UniqueViolation("signals_agency_dedup_key".into()));
                }
                if inner.signal_keys.insert(key.clone()) {
                    break;
                }
            }
            debug!(agency_id = %key.0, "signal key held by another transaction, waiting");
            released.await;
        }
        self.signal_keys.push(key);
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.release_keys();
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        self.shared.lock().committed.merge(staged);
        self.release_keys();
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.staged = MemorySnapshot::default();
        self.release_keys();
        self.finished = true;
        Ok(())
    }
}

// ── Signals ─────────────────────────────────────────────────────────

#[async_trait]
impl SignalStore for MemoryTransaction {
    async fn get_signal(&mut self, id: Uuid) -> Result<Option<Signal>> {
        Ok(self.read(|s| s.signals.get(&id).cloned()))
    }

    async fn find_signal_by_hash(&mut self, agency_id: Uuid, dedup_hash: &str) -> Result<Option<Signal>> {
        Ok(self.read(|s| {
            s.signals
                .values()
                .find(|sig| sig.agency_id == agency_id && sig.dedup_hash == dedup_hash)
                .cloned()
        }))
    }

    async fn insert_signal(&mut self, signal: &Signal) -> Result<()> {
        self.reserve_signal_key((signal.agency_id, signal.dedup_hash.clone()))
            .await?;
        self.staged.signals.insert(signal.id, signal.clone());
        Ok(())
    }

    async fn update_signal(&mut self, signal: &Signal) -> Result<()> {
        let stored = self
            .read(|s| s.signals.get(&signal.id).cloned())
            .ok_or_else(|| StorageError::not_found("signal", signal.id))?;
        if stored.status.is_final() {
            return Err(StorageError::Immutable(format!(
                "signal {} is {}",
                signal.id,
                stored.status.as_str()
            )));
        }
        self.staged.signals.insert(signal.id, signal.clone());
        Ok(())
    }
}

// ── Rules ───────────────────────────────────────────────────────────

#[async_trait]
impl RuleStore for MemoryTransaction {
    async fn get_rule(&mut self, id: Uuid) -> Result<Option<WorkflowRule>> {
        Ok(self.read(|s| s.rules.get(&id).cloned()))
    }

    async fn list_enabled_rules(&mut self, agency_id: Uuid) -> Result<Vec<WorkflowRule>> {
        let mut rules: HashMap<Uuid, WorkflowRule> = self
            .shared
            .lock()
            .committed
            .rules
            .values()
            .filter(|r| r.agency_id == agency_id)
            .map(|r| (r.id, r.clone()))
            .collect();
        for rule in self.staged.rules.values().filter(|r| r.agency_id == agency_id) {
            rules.insert(rule.id, rule.clone());
        }
        let mut rules: Vec<WorkflowRule> = rules.into_values().filter(|r| r.enabled).collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(rules)
    }

    async fn find_rule_by_name(&mut self, agency_id: Uuid, name: &str) -> Result<Option<WorkflowRule>> {
        Ok(self.read(|s| {
            s.rules
                .values()
                .find(|r| r.agency_id == agency_id && r.name == name)
                .cloned()
        }))
    }

    async fn insert_rule(&mut self, rule: &WorkflowRule) -> Result<()> {
        self.staged.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn update_rule(&mut self, rule: &WorkflowRule) -> Result<()> {
        if self.read(|s| s.rules.get(&rule.id).map(|_| ())).is_none() {
            return Err(StorageError::not_found("rule", rule.id));
        }
        self.staged.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn list_versions(&mut self, rule_id: Uuid) -> Result<Vec<RuleVersion>> {
        let mut versions: HashMap<Uuid, RuleVersion> = self
            .shared
            .lock()
            .committed
            .versions
            .values()
            .filter(|v| v.rule_id == rule_id)
            .map(|v| (v.id, v.clone()))
            .collect();
        for v in self.staged.versions.values().filter(|v| v.rule_id == rule_id) {
            versions.insert(v.id, v.clone());
        }
        let mut versions: Vec<RuleVersion> = versions.into_values().collect();
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    async fn published_version(&mut self, rule_id: Uuid) -> Result<Option<RuleVersion>> {
        Ok(self
            .list_versions(rule_id)
            .await?
            .into_iter()
            .find(|v| v.status == VersionStatus::Published))
    }

    async fn insert_version(&mut self, version: &RuleVersion, conditions: &[RuleCondition]) -> Result<()> {
        self.staged.versions.insert(version.id, version.clone());
        for c in conditions {
            self.staged.conditions.insert(c.id, c.clone());
        }
        Ok(())
    }

    async fn set_version_status(
        &mut self,
        version_id: Uuid,
        status: VersionStatus,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut version = self
            .read(|s| s.versions.get(&version_id).cloned())
            .ok_or_else(|| StorageError::not_found("rule version", version_id))?;
        version.status = status;
        if published_at.is_some() {
            version.published_at = published_at;
        }
        self.staged.versions.insert(version_id, version);
        Ok(())
    }

    async fn list_conditions(&mut self, version_id: Uuid) -> Result<Vec<RuleCondition>> {
        let mut conditions: HashMap<Uuid, RuleCondition> = self
            .shared
            .lock()
            .committed
            .conditions
            .values()
            .filter(|c| c.version_id == version_id)
            .map(|c| (c.id, c.clone()))
            .collect();
        for c in self.staged.conditions.values().filter(|c| c.version_id == version_id) {
            conditions.insert(c.id, c.clone());
        }
        let mut conditions: Vec<RuleCondition> = conditions.into_values().collect();
        conditions.sort_by_key(|c| c.position);
        Ok(conditions)
    }

    async fn insert_evaluation(&mut self, evaluation: &RuleEvaluation) -> Result<()> {
        self.staged.evaluations.push(evaluation.clone());
        Ok(())
    }

    async fn list_evaluations(&mut self, rule_id: Uuid) -> Result<Vec<RuleEvaluation>> {
        let mut out: Vec<RuleEvaluation> = self
            .shared
            .lock()
            .committed
            .evaluations
            .iter()
            .filter(|e| e.rule_id == rule_id)
            .cloned()
            .collect();
        out.extend(self.staged.evaluations.iter().filter(|e| e.rule_id == rule_id).cloned());
        Ok(out)
    }
}

// ── Workflows, executions, events ───────────────────────────────────

#[async_trait]
impl WorkflowStore for MemoryTransaction {
    async fn get_workflow(&mut self, id: Uuid) -> Result<Option<Workflow>> {
        Ok(self.read(|s| s.workflows.get(&id).cloned()))
    }

    async fn find_workflow_by_name(&mut self, agency_id: Uuid, name: &str) -> Result<Option<Workflow>> {
        Ok(self.read(|s| {
            s.workflows
                .values()
                .find(|w| w.agency_id == agency_id && w.name == name)
                .cloned()
        }))
    }

    async fn insert_workflow(&mut self, workflow: &Workflow) -> Result<()> {
        self.staged.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn update_workflow(&mut self, workflow: &Workflow) -> Result<()> {
        if self.read(|s| s.workflows.get(&workflow.id).map(|_| ())).is_none() {
            return Err(StorageError::not_found("workflow", workflow.id));
        }
        self.staged.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_execution(&mut self, id: Uuid) -> Result<Option<WorkflowExecution>> {
        Ok(self.read(|s| s.executions.get(&id).cloned()))
    }

    async fn find_execution(&mut self, workflow_id: Uuid, input_hash: &str) -> Result<Option<WorkflowExecution>> {
        Ok(self.read(|s| {
            s.executions
                .values()
                .find(|e| e.workflow_id == workflow_id && e.input_hash == input_hash)
                .cloned()
        }))
    }

    async fn list_executions(&mut self, workflow_id: Uuid) -> Result<Vec<WorkflowExecution>> {
        let mut executions: HashMap<Uuid, WorkflowExecution> = self
            .shared
            .lock()
            .committed
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .map(|e| (e.id, e.clone()))
            .collect();
        for e in self.staged.executions.values().filter(|e| e.workflow_id == workflow_id) {
            executions.insert(e.id, e.clone());
        }
        let mut executions: Vec<WorkflowExecution> = executions.into_values().collect();
        executions.sort_by_key(|e| e.created_at);
        Ok(executions)
    }

    async fn insert_execution(&mut self, execution: &WorkflowExecution) -> Result<()> {
        self.reserve_execution_key((execution.workflow_id, execution.input_hash.clone()))
            .await?;
        self.staged.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&mut self, execution: &WorkflowExecution) -> Result<()> {
        if self.read(|s| s.executions.get(&execution.id).map(|_| ())).is_none() {
            return Err(StorageError::not_found("workflow execution", execution.id));
        }
        self.staged.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn append_event(&mut self, event: &WorkflowEvent) -> Result<()> {
        self.staged.events.push(event.clone());
        Ok(())
    }

    async fn list_events(&mut self, execution_id: Uuid) -> Result<Vec<WorkflowEvent>> {
        let mut out: Vec<WorkflowEvent> = self
            .shared
            .lock()
            .committed
            .events
            .iter()
            .filter(|e| e.execution_id == execution_id)
            .cloned()
            .collect();
        out.extend(
            self.staged
                .events
                .iter()
                .filter(|e| e.execution_id == execution_id)
                .cloned(),
        );
        Ok(out)
    }
}

// ── Records ─────────────────────────────────────────────────────────

#[async_trait]
impl MutationStore for MemoryTransaction {
    async fn insert_record(&mut self, record: &Record) -> Result<()> {
        self.staged.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_record(&mut self, id: Uuid) -> Result<Option<Record>> {
        Ok(self.read(|s| s.records.get(&id).cloned()))
    }

    async fn save_record(&mut self, record: &Record) -> Result<()> {
        self.staged.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn list_records(&mut self, agency_id: Uuid, kind: RecordKind) -> Result<Vec<Record>> {
        let mut records: HashMap<Uuid, Record> = self
            .shared
            .lock()
            .committed
            .records
            .values()
            .filter(|r| r.agency_id == agency_id && r.kind == kind)
            .map(|r| (r.id, r.clone()))
            .collect();
        for r in self
            .staged
            .records
            .values()
            .filter(|r| r.agency_id == agency_id && r.kind == kind)
        {
            records.insert(r.id, r.clone());
        }
        let mut records: Vec<Record> = records.into_values().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use signalflow_core::model::{NewProject, NewTaskList, SignalSource, SignalStatus, Urgency};
    use std::time::Duration;

    fn execution(workflow_id: Uuid, hash: &str) -> WorkflowExecution {
        WorkflowExecution::pending(workflow_id, Uuid::nil(), hash.to_string(), json!({}), None, None)
    }

    fn signal(agency_id: Uuid, hash: &str, status: SignalStatus) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            agency_id,
            source: SignalSource::Ga4,
            signal_type: "session_drop".into(),
            payload: json!({}),
            client_id: None,
            urgency: Urgency::Normal,
            dedup_hash: hash.into(),
            status,
            processed: status == SignalStatus::Processed,
            retry_count: 0,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn commit_publishes_and_drop_discards() {
        let db = MemoryDatabase::new();
        let wf = Uuid::new_v4();

        let mut tx = db.begin().await.unwrap();
        tx.insert_execution(&execution(wf, "a")).await.unwrap();
        tx.commit().await.unwrap();

        {
            let mut tx = db.begin().await.unwrap();
            tx.insert_execution(&execution(wf, "b")).await.unwrap();
            // dropped without commit
        }

        let snap = db.snapshot();
        assert_eq!(snap.executions.len(), 1);
        assert!(snap.has_execution_key(&(wf, "a".into())));
    }

    #[tokio::test]
    async fn committed_key_rejects_duplicate_insert() {
        let db = MemoryDatabase::new();
        let wf = Uuid::new_v4();

        let mut tx = db.begin().await.unwrap();
        tx.insert_execution(&execution(wf, "same")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let err = tx.insert_execution(&execution(wf, "same")).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn in_flight_key_blocks_until_holder_finishes() {
        let db = MemoryDatabase::new();
        let wf = Uuid::new_v4();

        let mut first = db.begin().await.unwrap();
        first.insert_execution(&execution(wf, "k")).await.unwrap();

        let db2 = db.clone();
        let waiter = tokio::spawn(async move {
            let mut second = db2.begin().await.unwrap();
            second.insert_execution(&execution(wf, "k")).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        first.commit().await.unwrap();

        let result = waiter.await.unwrap();
        assert!(result.unwrap_err().is_unique_violation());
    }

    #[tokio::test]
    async fn rolled_back_holder_frees_key() {
        let db = MemoryDatabase::new();
        let wf = Uuid::new_v4();

        let mut first = db.begin().await.unwrap();
        first.insert_execution(&execution(wf, "k")).await.unwrap();

        let db2 = db.clone();
        let waiter = tokio::spawn(async move {
            let mut second = db2.begin().await.unwrap();
            second.insert_execution(&execution(wf, "k")).await?;
            second.commit().await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.rollback().await.unwrap();

        waiter.await.unwrap().unwrap();
        assert_eq!(db.snapshot().executions.len(), 1);
    }

    #[tokio::test]
    async fn final_signals_are_immutable() {
        let db = MemoryDatabase::new();
        let agency = Uuid::new_v4();
        let sig = signal(agency, "h", SignalStatus::Processed);

        let mut tx = db.begin().await.unwrap();
        tx.insert_signal(&sig).await.unwrap();
        let mut changed = sig.clone();
        changed.retry_count = 3;
        let err = tx.update_signal(&changed).await.unwrap_err();
        assert!(matches!(err, StorageError::Immutable(_)));
    }

    #[tokio::test]
    async fn task_list_requires_existing_project() {
        let db = MemoryDatabase::new();
        let agency = Uuid::new_v4();
        let mut tx = db.begin().await.unwrap();

        let missing = NewTaskList {
            project_id: Uuid::new_v4(),
            name: "Launch".into(),
        };
        let err = tx.create_task_list(agency, None, &missing).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { entity: "project", .. }));

        let project = tx
            .create_project(
                agency,
                None,
                &NewProject {
                    name: "Recovery".into(),
                    client_id: None,
                    description: None,
                    initiative_id: None,
                },
            )
            .await
            .unwrap();
        let list = tx
            .create_task_list(
                agency,
                None,
                &NewTaskList {
                    project_id: project.id,
                    name: "Launch".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(list.kind, RecordKind::TaskList);
        assert_eq!(tx.list_records(agency, RecordKind::Project).await.unwrap().len(), 1);
    }
}
