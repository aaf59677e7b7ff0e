use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use signalflow_core::model::{
    ActionKind, NewInvoice, NewNotification, NewProject, NewTask, NewTaskList, RecordKind, Step, StepKind,
};
use signalflow_storage::MutationStore;

use super::{kind_mismatch, StepContext, StepHandler, StepOutcome};
use crate::error::StepError;
use crate::template::render_map;

/// Dispatch to the named mutation primitive inside the run's transaction.
///
/// Parameters are rendered against prior results first. Parameters that
/// render to `null` or an empty string are dropped, so optional ids carried
/// from skipped steps are simply absent; required ones fail the step.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionHandler;

#[async_trait]
impl StepHandler for ActionHandler {
    async fn run(&self, step: &Step, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let StepKind::Action(cfg) = &step.kind else {
            return Err(kind_mismatch("action", step));
        };
        let params = prune(render_map(&cfg.params, &ctx.template_root())?);
        let agency = ctx.agency_id;
        let exec = Some(ctx.execution_id);
        let action = cfg.action;

        let record = match action {
            ActionKind::CreateProject => {
                let input: NewProject = typed(action, &params, &["name"])?;
                ctx.tx.create_project(agency, exec, &input).await?
            }
            ActionKind::CreateTaskList => {
                let input: NewTaskList = typed(action, &params, &["projectId", "name"])?;
                ctx.tx.create_task_list(agency, exec, &input).await?
            }
            ActionKind::CreateTask => {
                let input: NewTask = typed(action, &params, &["title"])?;
                ctx.tx.create_task(agency, exec, &input).await?
            }
            ActionKind::SendNotification => {
                let input: NewNotification = typed(action, &params, &["message"])?;
                ctx.tx.send_notification(agency, exec, &input).await?
            }
            ActionKind::CreateInvoice => {
                let input: NewInvoice = typed(action, &params, &["clientId", "amount"])?;
                ctx.tx.create_invoice(agency, exec, &input).await?
            }
            ActionKind::UpdateRecord => {
                let table = required_str(&params, "table")?;
                let kind: RecordKind = table.parse().map_err(|e| invalid(action, e))?;
                let id = required_uuid(action, &params, "id")?;
                let patch = patch_of(action, &params)?;
                ctx.tx.update_record(agency, kind, id, &patch).await?
            }
            ActionKind::UpdateInitiative => {
                let id = match params.get("initiativeId") {
                    Some(_) => required_uuid(action, &params, "initiativeId")?,
                    None => required_uuid(action, &params, "id")?,
                };
                let patch = patch_of(action, &params)?;
                ctx.tx.update_initiative(agency, id, &patch).await?
            }
            ActionKind::Log => {
                let message = params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                info!(
                    execution_id = %ctx.execution_id,
                    step_id = %step.id,
                    text = %message,
                    "workflow log action"
                );
                return Ok(StepOutcome::next(json!({ "logged": true, "message": message })));
            }
        };

        info!(
            execution_id = %ctx.execution_id,
            step_id = %step.id,
            action = %action,
            record_id = %record.id,
            "action applied"
        );
        Ok(StepOutcome::next(record.to_output()))
    }
}

fn prune(params: Map<String, Value>) -> Map<String, Value> {
    params
        .into_iter()
        .filter(|(_, v)| !v.is_null() && v.as_str() != Some(""))
        .collect()
}

fn invalid(action: ActionKind, reason: impl ToString) -> StepError {
    StepError::InvalidParams {
        action: action.to_string(),
        reason: reason.to_string(),
    }
}

fn typed<T: DeserializeOwned>(action: ActionKind, params: &Map<String, Value>, required: &[&str]) -> Result<T, StepError> {
    if let Some(missing) = required.iter().find(|k| !params.contains_key(**k)) {
        return Err(StepError::MissingParam(missing.to_string()));
    }
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| invalid(action, e))
}

fn required_str<'p>(params: &'p Map<String, Value>, key: &str) -> Result<&'p str, StepError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::MissingParam(key.to_string()))
}

fn required_uuid(action: ActionKind, params: &Map<String, Value>, key: &str) -> Result<Uuid, StepError> {
    required_str(params, key)?
        .parse()
        .map_err(|e| invalid(action, format!("{key}: {e}")))
}

/// The `data` object of an update action.
fn patch_of(action: ActionKind, params: &Map<String, Value>) -> Result<Map<String, Value>, StepError> {
    match params.get("data") {
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(invalid(action, "data must be an object")),
        None => Err(StepError::MissingParam("data".to_string())),
    }
}
