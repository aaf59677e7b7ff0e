//! Materialize definitions into storage.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use signalflow_core::model::{Workflow, WorkflowRule};
use signalflow_storage::{RuleStore, WorkflowStore};

use crate::engine::RuleEngine;
use crate::error::{Result, RuleError};

use super::document::{Definition, RuleSpec};

/// Storage ids assigned to seeded definitions, keyed by `metadata.id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedReport {
    pub workflows: HashMap<String, Uuid>,
    pub rules: HashMap<String, Uuid>,
}

/// Store workflows, then rules with a published version.
///
/// Workflows and rules whose name already exists for the agency are reused,
/// so seeding the same set twice duplicates nothing. A reused rule gets a
/// new published version only when its conditions changed.
pub async fn seed_definitions<S>(store: &mut S, agency_id: Uuid, definitions: &[Definition]) -> Result<SeedReport>
where
    S: RuleStore + WorkflowStore + ?Sized,
{
    let mut report = SeedReport::default();

    for def in definitions {
        let Definition::Workflow(wf) = def else {
            continue;
        };
        let id = match store.find_workflow_by_name(agency_id, &wf.metadata.name).await? {
            Some(mut existing) => {
                existing.description = wf.metadata.description.clone();
                existing.enabled = wf.metadata.enabled;
                existing.steps = wf.spec.steps.clone();
                existing.retry_policy = wf.spec.retry_policy;
                store.update_workflow(&existing).await?;
                existing.id
            }
            None => {
                let workflow = Workflow {
                    id: Uuid::new_v4(),
                    agency_id,
                    name: wf.metadata.name.clone(),
                    description: wf.metadata.description.clone(),
                    enabled: wf.metadata.enabled,
                    steps: wf.spec.steps.clone(),
                    retry_policy: wf.spec.retry_policy,
                    created_at: Utc::now(),
                };
                store.insert_workflow(&workflow).await?;
                info!(workflow_id = %workflow.id, name = %workflow.name, "seeded workflow");
                workflow.id
            }
        };
        report.workflows.insert(wf.metadata.id.clone(), id);
    }

    let engine = RuleEngine::new();
    for def in definitions {
        let Definition::Rule(rd) = def else {
            continue;
        };
        let workflow_id = match &rd.spec.workflow {
            Some(key) => Some(*report.workflows.get(key).ok_or_else(|| {
                RuleError::Validation(format!(
                    "rule '{}' references unknown workflow '{}'",
                    rd.metadata.id, key
                ))
            })?),
            None => None,
        };

        let rule = match store.find_rule_by_name(agency_id, &rd.metadata.name).await? {
            Some(mut existing) => {
                existing.description = rd.metadata.description.clone();
                existing.enabled = rd.metadata.enabled;
                existing.workflow_id = workflow_id;
                store.update_rule(&existing).await?;
                existing
            }
            None => {
                let rule = WorkflowRule {
                    id: Uuid::new_v4(),
                    agency_id,
                    name: rd.metadata.name.clone(),
                    description: rd.metadata.description.clone(),
                    enabled: rd.metadata.enabled,
                    workflow_id,
                    created_at: Utc::now(),
                };
                store.insert_rule(&rule).await?;
                rule
            }
        };

        if published_matches(store, rule.id, &rd.spec).await? {
            debug!(rule_id = %rule.id, name = %rule.name, "rule unchanged");
        } else {
            let version = engine
                .create_version(store, rule.id, rd.spec.condition_logic, rd.spec.conditions.clone())
                .await?;
            engine.publish_version(store, rule.id, version.id).await?;
            info!(rule_id = %rule.id, name = %rule.name, version = version.version, "seeded rule");
        }
        report.rules.insert(rd.metadata.id.clone(), rule.id);
    }

    Ok(report)
}

/// Whether the rule's published version already carries `spec`'s conditions.
async fn published_matches<S>(store: &mut S, rule_id: Uuid, spec: &RuleSpec) -> Result<bool>
where
    S: RuleStore + ?Sized,
{
    let Some(version) = store.published_version(rule_id).await? else {
        return Ok(false);
    };
    if version.condition_logic != spec.condition_logic {
        return Ok(false);
    }
    let stored = store.list_conditions(version.id).await?;
    Ok(stored.len() == spec.conditions.len()
        && stored.iter().zip(&spec.conditions).all(|(rc, c)| &rc.condition == c))
}
