//! Versioned rule evaluation with an audit row per call.

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use signalflow_core::model::{
    Condition, ConditionLogic, ConditionResult, RuleCondition, RuleEvaluation, RuleVersion, VersionStatus,
    WorkflowRule,
};
use signalflow_storage::RuleStore;

use crate::context::RuleContext;
use crate::error::{Result, RuleError};
use crate::operators::{combine, evaluate_condition};

/// Outcome of an inline condition set (no stored rule, no audit row).
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionSetOutcome {
    pub matched: bool,
    pub results: Vec<ConditionResult>,
}

/// Per-rule result of [`RuleEngine::evaluate_rules_for_signal`].
#[derive(Debug)]
pub struct RuleOutcome {
    pub rule: WorkflowRule,
    pub result: Result<RuleEvaluation>,
}

impl RuleOutcome {
    pub fn matched(&self) -> bool {
        self.result.as_ref().is_ok_and(|e| e.matched)
    }
}

/// Evaluates rules through a [`RuleStore`].
///
/// Holds no state; one engine can serve any number of concurrent callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    // ── Evaluation ──────────────────────────────────────────────────

    /// Evaluate a rule's published version and persist the audit row.
    ///
    /// A rule without a published version yields `matched = false,
    /// no_published_version = true`; that is an outcome, not an error.
    pub async fn evaluate_rule<S>(&self, store: &mut S, rule: &WorkflowRule, ctx: &RuleContext) -> Result<RuleEvaluation>
    where
        S: RuleStore + ?Sized,
    {
        let started = Instant::now();

        let (version_id, matched, results) = match store.published_version(rule.id).await? {
            Some(version) => {
                let conditions = store.list_conditions(version.id).await?;
                let results: Vec<ConditionResult> = conditions
                    .iter()
                    .map(|rc| {
                        let mut r = evaluate_condition(&rc.condition, ctx);
                        r.condition_id = Some(rc.id);
                        r
                    })
                    .collect();
                let matched = combine(version.condition_logic, &results);
                (Some(version.id), matched, results)
            }
            None => (None, false, Vec::new()),
        };

        for r in results.iter().filter(|r| r.error.is_some()) {
            warn!(
                rule_id = %rule.id,
                field = %r.field,
                operator = %r.operator,
                error = r.error.as_deref().unwrap_or_default(),
                "condition evaluation error"
            );
        }

        let evaluation = RuleEvaluation {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            agency_id: rule.agency_id,
            version_id,
            signal_id: ctx.signal_id,
            matched,
            no_published_version: version_id.is_none(),
            condition_results: results,
            context_snapshot: ctx.snapshot(),
            duration_ms: started.elapsed().as_millis() as u64,
            evaluated_at: Utc::now(),
        };
        store.insert_evaluation(&evaluation).await?;

        debug!(
            rule_id = %rule.id,
            matched,
            no_published_version = evaluation.no_published_version,
            duration_ms = evaluation.duration_ms,
            "rule evaluated"
        );
        Ok(evaluation)
    }

    pub async fn evaluate_rule_by_id<S>(&self, store: &mut S, rule_id: Uuid, ctx: &RuleContext) -> Result<RuleEvaluation>
    where
        S: RuleStore + ?Sized,
    {
        let rule = store.get_rule(rule_id).await?.ok_or(RuleError::RuleNotFound(rule_id))?;
        self.evaluate_rule(store, &rule, ctx).await
    }

    /// Evaluate every enabled rule of an agency independently.
    ///
    /// A failure in one rule is captured in its [`RuleOutcome`] and does not
    /// affect the others.
    pub async fn evaluate_rules_for_signal<S>(
        &self,
        store: &mut S,
        agency_id: Uuid,
        ctx: &RuleContext,
    ) -> Result<Vec<RuleOutcome>>
    where
        S: RuleStore + ?Sized,
    {
        let rules = store.list_enabled_rules(agency_id).await?;
        let mut outcomes = Vec::with_capacity(rules.len());
        for rule in rules {
            let result = self.evaluate_rule(store, &rule, ctx).await;
            if let Err(e) = &result {
                warn!(rule_id = %rule.id, error = %e, "rule evaluation failed");
            }
            outcomes.push(RuleOutcome { rule, result });
        }
        let matched = outcomes.iter().filter(|o| o.matched()).count();
        info!(%agency_id, evaluated = outcomes.len(), matched, "rules evaluated");
        Ok(outcomes)
    }

    /// Evaluate an inline condition list without persisting anything.
    pub fn evaluate_conditions(
        &self,
        conditions: &[Condition],
        logic: ConditionLogic,
        ctx: &RuleContext,
    ) -> ConditionSetOutcome {
        let results: Vec<ConditionResult> = conditions.iter().map(|c| evaluate_condition(c, ctx)).collect();
        ConditionSetOutcome {
            matched: combine(logic, &results),
            results,
        }
    }

    // ── Versioning ──────────────────────────────────────────────────

    /// Store a new draft version numbered after the rule's latest.
    pub async fn create_version<S>(
        &self,
        store: &mut S,
        rule_id: Uuid,
        logic: ConditionLogic,
        conditions: Vec<Condition>,
    ) -> Result<RuleVersion>
    where
        S: RuleStore + ?Sized,
    {
        if store.get_rule(rule_id).await?.is_none() {
            return Err(RuleError::RuleNotFound(rule_id));
        }
        let latest = store
            .list_versions(rule_id)
            .await?
            .iter()
            .map(|v| v.version)
            .max()
            .unwrap_or(0);

        let version = RuleVersion {
            id: Uuid::new_v4(),
            rule_id,
            version: latest + 1,
            status: VersionStatus::Draft,
            condition_logic: logic,
            created_at: Utc::now(),
            published_at: None,
        };
        let rows: Vec<RuleCondition> = conditions
            .into_iter()
            .enumerate()
            .map(|(i, condition)| RuleCondition {
                id: Uuid::new_v4(),
                version_id: version.id,
                position: i as i32,
                condition,
            })
            .collect();
        store.insert_version(&version, &rows).await?;
        Ok(version)
    }

    /// Make `version_id` the rule's only published version.
    ///
    /// The previously published version, if any, is archived first.
    pub async fn publish_version<S>(&self, store: &mut S, rule_id: Uuid, version_id: Uuid) -> Result<RuleVersion>
    where
        S: RuleStore + ?Sized,
    {
        let versions = store.list_versions(rule_id).await?;
        let mut target = versions
            .iter()
            .find(|v| v.id == version_id)
            .cloned()
            .ok_or(RuleError::VersionNotFound(version_id))?;
        if target.status == VersionStatus::Published {
            return Ok(target);
        }

        for current in versions.iter().filter(|v| v.status == VersionStatus::Published) {
            store
                .set_version_status(current.id, VersionStatus::Archived, None)
                .await?;
        }

        let now = Utc::now();
        store
            .set_version_status(version_id, VersionStatus::Published, Some(now))
            .await?;
        target.status = VersionStatus::Published;
        target.published_at = Some(now);
        info!(%rule_id, version = target.version, "rule version published");
        Ok(target)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use signalflow_core::model::Operator;
    use signalflow_storage::{Database, MemoryDatabase};

    fn rule(agency_id: Uuid, name: &str) -> WorkflowRule {
        WorkflowRule {
            id: Uuid::new_v4(),
            agency_id,
            name: name.to_string(),
            description: None,
            enabled: true,
            workflow_id: None,
            created_at: Utc::now(),
        }
    }

    async fn published_rule(
        store: &mut (dyn signalflow_storage::Transaction),
        agency_id: Uuid,
        name: &str,
        logic: ConditionLogic,
        conditions: Vec<Condition>,
    ) -> WorkflowRule {
        let engine = RuleEngine::new();
        let r = rule(agency_id, name);
        store.insert_rule(&r).await.unwrap();
        let v = engine.create_version(store, r.id, logic, conditions).await.unwrap();
        engine.publish_version(store, r.id, v.id).await.unwrap();
        r
    }

    #[tokio::test]
    async fn session_drop_rule_matches() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        let agency = Uuid::new_v4();
        let r = published_rule(
            &mut *tx,
            agency,
            "session drop",
            ConditionLogic::All,
            vec![Condition::new("sessions", Operator::Lt, json!(20))],
        )
        .await;

        let ctx = RuleContext::new(json!({"sessions": 10}));
        let eval = RuleEngine::new().evaluate_rule(&mut *tx, &r, &ctx).await.unwrap();
        assert!(eval.matched);
        assert_eq!(eval.condition_results.len(), 1);
        assert!(eval.condition_results[0].passed);
        assert!(eval.condition_results[0].condition_id.is_some());
        tx.commit().await.unwrap();

        assert_eq!(db.snapshot().evaluations.len(), 1);
    }

    #[tokio::test]
    async fn unpublished_rule_is_audited_as_no_version() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        let r = rule(Uuid::new_v4(), "draft only");
        tx.insert_rule(&r).await.unwrap();
        RuleEngine::new()
            .create_version(&mut *tx, r.id, ConditionLogic::All, vec![Condition::new("a", Operator::Eq, json!(1))])
            .await
            .unwrap();

        let eval = RuleEngine::new()
            .evaluate_rule(&mut *tx, &r, &RuleContext::new(json!({"a": 1})))
            .await
            .unwrap();
        assert!(!eval.matched);
        assert!(eval.no_published_version);
        assert!(eval.version_id.is_none());
        assert_eq!(tx.list_evaluations(r.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn all_any_and_empty_logic() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        let agency = Uuid::new_v4();
        let two = || {
            vec![
                Condition::new("a", Operator::Eq, json!(1)),
                Condition::new("b", Operator::Eq, json!(2)),
            ]
        };
        let all = published_rule(&mut *tx, agency, "all", ConditionLogic::All, two()).await;
        let any = published_rule(&mut *tx, agency, "any", ConditionLogic::Any, two()).await;
        let empty = published_rule(&mut *tx, agency, "empty", ConditionLogic::All, vec![]).await;

        let engine = RuleEngine::new();
        let one_passes = RuleContext::new(json!({"a": 1, "b": 3}));
        let both_pass = RuleContext::new(json!({"a": 1, "b": 2}));

        assert!(!engine.evaluate_rule(&mut *tx, &all, &one_passes).await.unwrap().matched);
        assert!(engine.evaluate_rule(&mut *tx, &all, &both_pass).await.unwrap().matched);
        assert!(engine.evaluate_rule(&mut *tx, &any, &one_passes).await.unwrap().matched);
        assert!(!engine.evaluate_rule(&mut *tx, &empty, &both_pass).await.unwrap().matched);
    }

    #[tokio::test]
    async fn condition_errors_stay_local_to_their_rule() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        let agency = Uuid::new_v4();
        published_rule(
            &mut *tx,
            agency,
            "bad regex",
            ConditionLogic::All,
            vec![Condition::new("title", Operator::Matches, json!("[oops"))],
        )
        .await;
        published_rule(
            &mut *tx,
            agency,
            "good",
            ConditionLogic::All,
            vec![Condition::new("title", Operator::Contains, json!("oops"))],
        )
        .await;

        let outcomes = RuleEngine::new()
            .evaluate_rules_for_signal(&mut *tx, agency, &RuleContext::new(json!({"title": "oops"})))
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);

        let bad = outcomes.iter().find(|o| o.rule.name == "bad regex").unwrap();
        let bad_eval = bad.result.as_ref().unwrap();
        assert!(!bad_eval.matched);
        assert!(bad_eval.condition_results[0].error.is_some());

        let good = outcomes.iter().find(|o| o.rule.name == "good").unwrap();
        assert!(good.matched());
    }

    #[tokio::test]
    async fn publishing_archives_previous_version() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        let engine = RuleEngine::new();
        let r = rule(Uuid::new_v4(), "versioned");
        tx.insert_rule(&r).await.unwrap();

        let v1 = engine
            .create_version(&mut *tx, r.id, ConditionLogic::All, vec![Condition::new("a", Operator::Eq, json!(1))])
            .await
            .unwrap();
        engine.publish_version(&mut *tx, r.id, v1.id).await.unwrap();
        let v2 = engine
            .create_version(&mut *tx, r.id, ConditionLogic::All, vec![Condition::new("a", Operator::Eq, json!(2))])
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        engine.publish_version(&mut *tx, r.id, v2.id).await.unwrap();

        let versions = tx.list_versions(r.id).await.unwrap();
        assert_eq!(versions[0].status, VersionStatus::Archived);
        assert_eq!(versions[1].status, VersionStatus::Published);

        let eval = engine
            .evaluate_rule(&mut *tx, &r, &RuleContext::new(json!({"a": 2})))
            .await
            .unwrap();
        assert!(eval.matched);
        assert_eq!(eval.version_id, Some(v2.id));
    }
}
