//! PostgreSQL backend.
//!
//! Each [`PgTransaction`] wraps one `sqlx` transaction; every store method
//! runs on its connection. Unique keys are enforced by indexes in the
//! migrations, and violations surface as [`StorageError::UniqueViolation`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use tracing::info;
use uuid::Uuid;

use signalflow_core::config::DatabaseConfig;
use signalflow_core::model::{
    Condition, ConditionResult, Record, RecordKind, RetryPolicy, RuleCondition, RuleEvaluation, RuleVersion,
    Signal, Step, VersionStatus, Workflow, WorkflowEvent, WorkflowExecution, WorkflowRule,
};

use crate::error::{Result, StorageError};
use crate::traits::{Database, MutationStore, RuleStore, SignalStore, Transaction, WorkflowStore};

#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Connect using the configured credentials.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        info!("PostgreSQL connected: {}", config.host);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied successfully");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

fn parse<T>(raw: &str) -> Result<T>
where
    T: std::str::FromStr<Err = signalflow_core::SignalflowError>,
{
    Ok(raw.parse::<T>()?)
}

#[derive(sqlx::FromRow)]
struct SignalRow {
    id: Uuid,
    agency_id: Uuid,
    source: String,
    signal_type: String,
    payload: Value,
    client_id: Option<String>,
    urgency: String,
    dedup_hash: String,
    status: String,
    processed: bool,
    retry_count: i32,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<SignalRow> for Signal {
    type Error = StorageError;

    fn try_from(row: SignalRow) -> Result<Self> {
        Ok(Signal {
            id: row.id,
            agency_id: row.agency_id,
            source: parse(&row.source)?,
            signal_type: row.signal_type,
            payload: row.payload,
            client_id: row.client_id,
            urgency: parse(&row.urgency)?,
            dedup_hash: row.dedup_hash,
            status: parse(&row.status)?,
            processed: row.processed,
            retry_count: row.retry_count.max(0) as u32,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

const SIGNAL_COLUMNS: &str = "id, agency_id, source, signal_type, payload, client_id, urgency, \
     dedup_hash, status, processed, retry_count, created_at, processed_at";

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: Uuid,
    agency_id: Uuid,
    name: String,
    description: Option<String>,
    enabled: bool,
    workflow_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<RuleRow> for WorkflowRule {
    fn from(row: RuleRow) -> Self {
        WorkflowRule {
            id: row.id,
            agency_id: row.agency_id,
            name: row.name,
            description: row.description,
            enabled: row.enabled,
            workflow_id: row.workflow_id,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    id: Uuid,
    rule_id: Uuid,
    version: i32,
    status: String,
    condition_logic: String,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

impl TryFrom<VersionRow> for RuleVersion {
    type Error = StorageError;

    fn try_from(row: VersionRow) -> Result<Self> {
        Ok(RuleVersion {
            id: row.id,
            rule_id: row.rule_id,
            version: row.version,
            status: parse(&row.status)?,
            condition_logic: parse(&row.condition_logic)?,
            created_at: row.created_at,
            published_at: row.published_at,
        })
    }
}

const VERSION_COLUMNS: &str = "id, rule_id, version, status, condition_logic, created_at, published_at";

#[derive(sqlx::FromRow)]
struct ConditionRow {
    id: Uuid,
    version_id: Uuid,
    position: i32,
    field: String,
    operator: String,
    value: Value,
    scope: String,
    options: Json<serde_json::Map<String, Value>>,
}

impl TryFrom<ConditionRow> for RuleCondition {
    type Error = StorageError;

    fn try_from(row: ConditionRow) -> Result<Self> {
        Ok(RuleCondition {
            id: row.id,
            version_id: row.version_id,
            position: row.position,
            condition: Condition {
                field: row.field,
                operator: parse(&row.operator)?,
                value: row.value,
                scope: parse(&row.scope)?,
                options: row.options.0,
            },
        })
    }
}

#[derive(sqlx::FromRow)]
struct EvaluationRow {
    id: Uuid,
    rule_id: Uuid,
    agency_id: Uuid,
    version_id: Option<Uuid>,
    signal_id: Option<Uuid>,
    matched: bool,
    no_published_version: bool,
    condition_results: Json<Vec<ConditionResult>>,
    context_snapshot: Value,
    duration_ms: i64,
    evaluated_at: DateTime<Utc>,
}

impl From<EvaluationRow> for RuleEvaluation {
    fn from(row: EvaluationRow) -> Self {
        RuleEvaluation {
            id: row.id,
            rule_id: row.rule_id,
            agency_id: row.agency_id,
            version_id: row.version_id,
            signal_id: row.signal_id,
            matched: row.matched,
            no_published_version: row.no_published_version,
            condition_results: row.condition_results.0,
            context_snapshot: row.context_snapshot,
            duration_ms: row.duration_ms.max(0) as u64,
            evaluated_at: row.evaluated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: Uuid,
    agency_id: Uuid,
    name: String,
    description: Option<String>,
    enabled: bool,
    steps: Json<Vec<Step>>,
    retry_policy: Json<RetryPolicy>,
    created_at: DateTime<Utc>,
}

impl From<WorkflowRow> for Workflow {
    fn from(row: WorkflowRow) -> Self {
        Workflow {
            id: row.id,
            agency_id: row.agency_id,
            name: row.name,
            description: row.description,
            enabled: row.enabled,
            steps: row.steps.0,
            retry_policy: row.retry_policy.0,
            created_at: row.created_at,
        }
    }
}

const WORKFLOW_COLUMNS: &str = "id, agency_id, name, description, enabled, steps, retry_policy, created_at";

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: Uuid,
    workflow_id: Uuid,
    agency_id: Uuid,
    status: String,
    current_step: Option<String>,
    input_hash: String,
    trigger_payload: Value,
    trigger_id: Option<String>,
    trigger_type: Option<String>,
    result: Option<Value>,
    output_hash: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExecutionRow> for WorkflowExecution {
    type Error = StorageError;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        Ok(WorkflowExecution {
            id: row.id,
            workflow_id: row.workflow_id,
            agency_id: row.agency_id,
            status: parse(&row.status)?,
            current_step: row.current_step,
            input_hash: row.input_hash,
            trigger_payload: row.trigger_payload,
            trigger_id: row.trigger_id,
            trigger_type: row.trigger_type,
            result: row.result,
            output_hash: row.output_hash,
            error: row.error,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

const EXECUTION_COLUMNS: &str = "id, workflow_id, agency_id, status, current_step, input_hash, \
     trigger_payload, trigger_id, trigger_type, result, output_hash, error, created_at, started_at, \
     completed_at";

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    execution_id: Uuid,
    step_id: String,
    step_type: String,
    event_type: String,
    duration_ms: Option<i64>,
    input: Option<Value>,
    output: Option<Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for WorkflowEvent {
    type Error = StorageError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(WorkflowEvent {
            id: row.id,
            execution_id: row.execution_id,
            step_id: row.step_id,
            step_type: row.step_type,
            event_type: parse(&row.event_type)?,
            duration_ms: row.duration_ms.map(|d| d.max(0) as u64),
            input: row.input,
            output: row.output,
            error: row.error,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    kind: String,
    agency_id: Uuid,
    data: Value,
    execution_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for Record {
    type Error = StorageError;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(Record {
            id: row.id,
            kind: parse::<RecordKind>(&row.kind)?,
            agency_id: row.agency_id,
            data: row.data,
            execution_id: row.execution_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = StorageError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ── Signals ─────────────────────────────────────────────────────────

#[async_trait]
impl SignalStore for PgTransaction {
    async fn get_signal(&mut self, id: Uuid) -> Result<Option<Signal>> {
        let row = sqlx::query_as::<_, SignalRow>(&format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Signal::try_from).transpose()
    }

    async fn find_signal_by_hash(&mut self, agency_id: Uuid, dedup_hash: &str) -> Result<Option<Signal>> {
        let row = sqlx::query_as::<_, SignalRow>(&format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals WHERE agency_id = $1 AND dedup_hash = $2"
        ))
        .bind(agency_id)
        .bind(dedup_hash)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Signal::try_from).transpose()
    }

    async fn insert_signal(&mut self, signal: &Signal) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO signals ({SIGNAL_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(signal.id)
        .bind(signal.agency_id)
        .bind(signal.source.as_str())
        .bind(&signal.signal_type)
        .bind(&signal.payload)
        .bind(&signal.client_id)
        .bind(signal.urgency.as_str())
        .bind(&signal.dedup_hash)
        .bind(signal.status.as_str())
        .bind(signal.processed)
        .bind(signal.retry_count as i32)
        .bind(signal.created_at)
        .bind(signal.processed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_signal(&mut self, signal: &Signal) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE signals
             SET payload = $2, status = $3, processed = $4, retry_count = $5, processed_at = $6
             WHERE id = $1 AND status NOT IN ('processed', 'discarded')",
        )
        .bind(signal.id)
        .bind(&signal.payload)
        .bind(signal.status.as_str())
        .bind(signal.processed)
        .bind(signal.retry_count as i32)
        .bind(signal.processed_at)
        .execute(&mut *self.tx)
        .await?;

        if updated.rows_affected() == 0 {
            return match self.get_signal(signal.id).await? {
                Some(stored) => Err(StorageError::Immutable(format!(
                    "signal {} is {}",
                    signal.id,
                    stored.status.as_str()
                ))),
                None => Err(StorageError::not_found("signal", signal.id)),
            };
        }
        Ok(())
    }
}

// ── Rules ───────────────────────────────────────────────────────────

#[async_trait]
impl RuleStore for PgTransaction {
    async fn get_rule(&mut self, id: Uuid) -> Result<Option<WorkflowRule>> {
        let row = sqlx::query_as::<_, RuleRow>(
            "SELECT id, agency_id, name, description, enabled, workflow_id, created_at
             FROM workflow_rules WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(WorkflowRule::from))
    }

    async fn list_enabled_rules(&mut self, agency_id: Uuid) -> Result<Vec<WorkflowRule>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            "SELECT id, agency_id, name, description, enabled, workflow_id, created_at
             FROM workflow_rules WHERE agency_id = $1 AND enabled
             ORDER BY created_at, name",
        )
        .bind(agency_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(WorkflowRule::from).collect())
    }

    async fn find_rule_by_name(&mut self, agency_id: Uuid, name: &str) -> Result<Option<WorkflowRule>> {
        let row = sqlx::query_as::<_, RuleRow>(
            "SELECT id, agency_id, name, description, enabled, workflow_id, created_at
             FROM workflow_rules WHERE agency_id = $1 AND name = $2",
        )
        .bind(agency_id)
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(WorkflowRule::from))
    }

    async fn insert_rule(&mut self, rule: &WorkflowRule) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflow_rules (id, agency_id, name, description, enabled, workflow_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(rule.id)
        .bind(rule.agency_id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.enabled)
        .bind(rule.workflow_id)
        .bind(rule.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_rule(&mut self, rule: &WorkflowRule) -> Result<()> {
        let done = sqlx::query(
            "UPDATE workflow_rules SET description = $2, enabled = $3, workflow_id = $4 WHERE id = $1",
        )
        .bind(rule.id)
        .bind(&rule.description)
        .bind(rule.enabled)
        .bind(rule.workflow_id)
        .execute(&mut *self.tx)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StorageError::not_found("rule", rule.id));
        }
        Ok(())
    }

    async fn list_versions(&mut self, rule_id: Uuid) -> Result<Vec<RuleVersion>> {
        let rows = sqlx::query_as::<_, VersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM rule_versions WHERE rule_id = $1 ORDER BY version"
        ))
        .bind(rule_id)
        .fetch_all(&mut *self.tx)
        .await?;
        collect(rows)
    }

    async fn published_version(&mut self, rule_id: Uuid) -> Result<Option<RuleVersion>> {
        let row = sqlx::query_as::<_, VersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM rule_versions
             WHERE rule_id = $1 AND status = 'published' LIMIT 1"
        ))
        .bind(rule_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(RuleVersion::try_from).transpose()
    }

    async fn insert_version(&mut self, version: &RuleVersion, conditions: &[RuleCondition]) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO rule_versions ({VERSION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(version.id)
        .bind(version.rule_id)
        .bind(version.version)
        .bind(version.status.as_str())
        .bind(version.condition_logic.as_str())
        .bind(version.created_at)
        .bind(version.published_at)
        .execute(&mut *self.tx)
        .await?;

        for c in conditions {
            sqlx::query(
                "INSERT INTO rule_conditions (id, version_id, position, field, operator, value, scope, options)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(c.id)
            .bind(c.version_id)
            .bind(c.position)
            .bind(&c.condition.field)
            .bind(c.condition.operator.as_str())
            .bind(&c.condition.value)
            .bind(c.condition.scope.as_str())
            .bind(Json(&c.condition.options))
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn set_version_status(
        &mut self,
        version_id: Uuid,
        status: VersionStatus,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE rule_versions
             SET status = $2, published_at = COALESCE($3, published_at)
             WHERE id = $1",
        )
        .bind(version_id)
        .bind(status.as_str())
        .bind(published_at)
        .execute(&mut *self.tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StorageError::not_found("rule version", version_id));
        }
        Ok(())
    }

    async fn list_conditions(&mut self, version_id: Uuid) -> Result<Vec<RuleCondition>> {
        let rows = sqlx::query_as::<_, ConditionRow>(
            "SELECT id, version_id, position, field, operator, value, scope, options
             FROM rule_conditions WHERE version_id = $1 ORDER BY position",
        )
        .bind(version_id)
        .fetch_all(&mut *self.tx)
        .await?;
        collect(rows)
    }

    async fn insert_evaluation(&mut self, evaluation: &RuleEvaluation) -> Result<()> {
        sqlx::query(
            "INSERT INTO rule_evaluations
                 (id, rule_id, agency_id, version_id, signal_id, matched, no_published_version,
                  condition_results, context_snapshot, duration_ms, evaluated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(evaluation.id)
        .bind(evaluation.rule_id)
        .bind(evaluation.agency_id)
        .bind(evaluation.version_id)
        .bind(evaluation.signal_id)
        .bind(evaluation.matched)
        .bind(evaluation.no_published_version)
        .bind(Json(&evaluation.condition_results))
        .bind(&evaluation.context_snapshot)
        .bind(evaluation.duration_ms as i64)
        .bind(evaluation.evaluated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_evaluations(&mut self, rule_id: Uuid) -> Result<Vec<RuleEvaluation>> {
        let rows = sqlx::query_as::<_, EvaluationRow>(
            "SELECT id, rule_id, agency_id, version_id, signal_id, matched, no_published_version,
                    condition_results, context_snapshot, duration_ms, evaluated_at
             FROM rule_evaluations WHERE rule_id = $1 ORDER BY evaluated_at",
        )
        .bind(rule_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(RuleEvaluation::from).collect())
    }
}

// ── Workflows, executions, events ───────────────────────────────────

#[async_trait]
impl WorkflowStore for PgTransaction {
    async fn get_workflow(&mut self, id: Uuid) -> Result<Option<Workflow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Workflow::from))
    }

    async fn find_workflow_by_name(&mut self, agency_id: Uuid, name: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE agency_id = $1 AND name = $2"
        ))
        .bind(agency_id)
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Workflow::from))
    }

    async fn insert_workflow(&mut self, workflow: &Workflow) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO workflows ({WORKFLOW_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(workflow.id)
        .bind(workflow.agency_id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.enabled)
        .bind(Json(&workflow.steps))
        .bind(Json(&workflow.retry_policy))
        .bind(workflow.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_workflow(&mut self, workflow: &Workflow) -> Result<()> {
        let done = sqlx::query(
            "UPDATE workflows SET description = $2, enabled = $3, steps = $4, retry_policy = $5 WHERE id = $1",
        )
        .bind(workflow.id)
        .bind(&workflow.description)
        .bind(workflow.enabled)
        .bind(Json(&workflow.steps))
        .bind(Json(&workflow.retry_policy))
        .execute(&mut *self.tx)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StorageError::not_found("workflow", workflow.id));
        }
        Ok(())
    }

    async fn get_execution(&mut self, id: Uuid) -> Result<Option<WorkflowExecution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(WorkflowExecution::try_from).transpose()
    }

    async fn find_execution(&mut self, workflow_id: Uuid, input_hash: &str) -> Result<Option<WorkflowExecution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE workflow_id = $1 AND input_hash = $2"
        ))
        .bind(workflow_id)
        .bind(input_hash)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(WorkflowExecution::try_from).transpose()
    }

    async fn list_executions(&mut self, workflow_id: Uuid) -> Result<Vec<WorkflowExecution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE workflow_id = $1 ORDER BY created_at"
        ))
        .bind(workflow_id)
        .fetch_all(&mut *self.tx)
        .await?;
        collect(rows)
    }

    async fn insert_execution(&mut self, execution: &WorkflowExecution) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO workflow_executions ({EXECUTION_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(execution.agency_id)
        .bind(execution.status.as_str())
        .bind(&execution.current_step)
        .bind(&execution.input_hash)
        .bind(&execution.trigger_payload)
        .bind(&execution.trigger_id)
        .bind(&execution.trigger_type)
        .bind(&execution.result)
        .bind(&execution.output_hash)
        .bind(&execution.error)
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_execution(&mut self, execution: &WorkflowExecution) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE workflow_executions
             SET status = $2, current_step = $3, result = $4, output_hash = $5, error = $6,
                 started_at = $7, completed_at = $8
             WHERE id = $1",
        )
        .bind(execution.id)
        .bind(execution.status.as_str())
        .bind(&execution.current_step)
        .bind(&execution.result)
        .bind(&execution.output_hash)
        .bind(&execution.error)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&mut *self.tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StorageError::not_found("workflow execution", execution.id));
        }
        Ok(())
    }

    async fn append_event(&mut self, event: &WorkflowEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflow_events
                 (id, execution_id, step_id, step_type, event_type, duration_ms, input, output, error, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(event.id)
        .bind(event.execution_id)
        .bind(&event.step_id)
        .bind(&event.step_type)
        .bind(event.event_type.as_str())
        .bind(event.duration_ms.map(|d| d as i64))
        .bind(&event.input)
        .bind(&event.output)
        .bind(&event.error)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_events(&mut self, execution_id: Uuid) -> Result<Vec<WorkflowEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT id, execution_id, step_id, step_type, event_type, duration_ms, input, output, error, created_at
             FROM workflow_events WHERE execution_id = $1 ORDER BY seq",
        )
        .bind(execution_id)
        .fetch_all(&mut *self.tx)
        .await?;
        collect(rows)
    }
}

// ── Records ─────────────────────────────────────────────────────────

#[async_trait]
impl MutationStore for PgTransaction {
    async fn insert_record(&mut self, record: &Record) -> Result<()> {
        sqlx::query(
            "INSERT INTO records (id, kind, agency_id, data, execution_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(record.kind.as_str())
        .bind(record.agency_id)
        .bind(&record.data)
        .bind(record.execution_id)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_record(&mut self, id: Uuid) -> Result<Option<Record>> {
        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT id, kind, agency_id, data, execution_id, created_at, updated_at FROM records WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Record::try_from).transpose()
    }

    async fn save_record(&mut self, record: &Record) -> Result<()> {
        sqlx::query("UPDATE records SET data = $2, updated_at = $3 WHERE id = $1")
            .bind(record.id)
            .bind(&record.data)
            .bind(record.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn list_records(&mut self, agency_id: Uuid, kind: RecordKind) -> Result<Vec<Record>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT id, kind, agency_id, data, execution_id, created_at, updated_at
             FROM records WHERE agency_id = $1 AND kind = $2 ORDER BY created_at",
        )
        .bind(agency_id)
        .bind(kind.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        collect(rows)
    }
}
