use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use signalflow_core::config::Config;
use signalflow_llm::{CachedGenerator, LruResponseCache, StaticGenerator, TextGenerator};
use signalflow_rules::definitions::{seed_definitions, DefinitionLoader, LoadStatus, SeedReport};
use signalflow_rules::{RuleContext, RuleEngine};
use signalflow_signals::{RawSignal, SignalIngestor, SignalNormalizer};
use signalflow_storage::{Database, MemoryDatabase, PgDatabase, WorkflowStore};
use signalflow_workflow::{ExecuteOptions, SignalRouter, WorkflowEngine};

use crate::cli::StoreArgs;

// ── Commands ────────────────────────────────────────────────────────

pub fn normalize(agency: Uuid, file: &Path) -> Result<Value> {
    let raw = RawSignal::from_value(&read_json(file)?).context("invalid raw signal")?;
    let normalized = SignalNormalizer::new()
        .normalize(agency, &raw)
        .context("failed to normalize signal")?;
    Ok(serde_json::to_value(normalized)?)
}

pub async fn evaluate(config: &Config, store: &StoreArgs, context: &Path) -> Result<Value> {
    let db = open_database(config, store).await?;
    seed(db.as_ref(), store).await?;
    let ctx = RuleContext::from_trigger(&read_json(context)?, &json!({}));

    let mut tx = db.begin().await?;
    let outcomes = RuleEngine::new()
        .evaluate_rules_for_signal(&mut *tx, store.agency, &ctx)
        .await?;
    tx.commit().await?;

    let rendered = outcomes
        .into_iter()
        .map(|outcome| match outcome.result {
            Ok(evaluation) => json!({
                "rule": outcome.rule.name,
                "matched": evaluation.matched,
                "evaluation": evaluation,
            }),
            Err(e) => json!({
                "rule": outcome.rule.name,
                "matched": false,
                "error": e.to_string(),
            }),
        })
        .collect();
    Ok(Value::Array(rendered))
}

pub async fn run(
    config: &Config,
    store: &StoreArgs,
    workflow: &str,
    skip_idempotency_check: bool,
    trigger: &Path,
) -> Result<Value> {
    let db = open_database(config, store).await?;
    let report = seed(db.as_ref(), store).await?;
    let trigger = read_json(trigger)?;

    let workflow_id = match report.workflows.get(workflow) {
        Some(id) => *id,
        None => {
            let mut tx = db.begin().await?;
            let found = tx.find_workflow_by_name(store.agency, workflow).await?;
            tx.rollback().await?;
            found
                .map(|wf| wf.id)
                .with_context(|| format!("unknown workflow '{}'", workflow))?
        }
    };

    let mut options = ExecuteOptions::triggered_by("cli", trigger_label(&trigger));
    options.skip_idempotency_check = skip_idempotency_check;
    let execution = engine(config)
        .execute(db.as_ref(), workflow_id, trigger, options)
        .await?;

    let mut tx = db.begin().await?;
    let events = tx.list_events(execution.id).await?;
    tx.rollback().await?;

    info!(execution_id = %execution.id, status = execution.status.as_str(), "run complete");
    Ok(json!({ "execution": execution, "events": events }))
}

pub async fn route(config: &Config, store: &StoreArgs, file: &Path) -> Result<Value> {
    let db = open_database(config, store).await?;
    seed(db.as_ref(), store).await?;
    let raw = RawSignal::from_value(&read_json(file)?).context("invalid raw signal")?;

    let ingested = SignalIngestor::new(SignalNormalizer::new())
        .ingest(db.as_ref(), store.agency, &raw)
        .await?;
    let signal_id = ingested.signal().id;
    if ingested.is_duplicate() {
        warn!(%signal_id, "signal already ingested");
    }

    let report = SignalRouter::new(Arc::new(engine(config)))
        .route(db.as_ref(), signal_id)
        .await?;
    Ok(json!({
        "signalId": signal_id,
        "duplicate": ingested.is_duplicate(),
        "evaluations": report.evaluations,
        "executions": report.executions,
        "failures": report
            .failures
            .iter()
            .map(|(rule_id, error)| json!({ "ruleId": rule_id, "error": error }))
            .collect::<Vec<_>>(),
    }))
}

// ── Helpers ─────────────────────────────────────────────────────────

async fn open_database(config: &Config, store: &StoreArgs) -> Result<Arc<dyn Database>> {
    if !store.postgres {
        return Ok(Arc::new(MemoryDatabase::new()));
    }
    let db = PgDatabase::connect(&config.database)
        .await
        .context("failed to connect to PostgreSQL")?;
    db.migrate().await.context("failed to apply migrations")?;
    Ok(Arc::new(db))
}

async fn seed(db: &dyn Database, store: &StoreArgs) -> Result<SeedReport> {
    let set = DefinitionLoader::load_dir(&store.definitions)
        .with_context(|| format!("failed to scan {}", store.definitions.display()))?;
    for failure in set.failures() {
        if let LoadStatus::Failed { error } = &failure.status {
            warn!(path = %failure.path.display(), error = %error, "definition not loaded");
        }
    }

    let mut tx = db.begin().await?;
    let report = seed_definitions(&mut *tx, store.agency, &set.definitions).await?;
    tx.commit().await?;
    info!(
        workflows = report.workflows.len(),
        rules = report.rules.len(),
        "definitions seeded"
    );
    Ok(report)
}

/// Echo generator, behind the response cache when it is enabled.
fn generator(config: &Config) -> Arc<dyn TextGenerator> {
    let echo = StaticGenerator::echo();
    if config.ai_cache.is_enabled() {
        let cache = LruResponseCache::new(config.ai_cache.capacity as usize, config.ai_cache.ttl());
        Arc::new(CachedGenerator::new(echo, Arc::new(cache)))
    } else {
        Arc::new(echo)
    }
}

fn engine(config: &Config) -> WorkflowEngine {
    WorkflowEngine::with_generator(generator(config), config.engine.clone())
}

fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// `id` field of the trigger when present, else its content hash.
fn trigger_label(trigger: &Value) -> String {
    match trigger.get("id") {
        Some(Value::String(s)) => s.clone(),
        _ => signalflow_core::hash_value(trigger),
    }
}
