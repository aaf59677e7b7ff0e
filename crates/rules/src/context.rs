//! Scoped evaluation context.
//!
//! A condition reads one of four scopes. `signal`, `client` and `project`
//! are JSON objects supplied by the caller; `context` is the shallow merge
//! of all three plus any caller-supplied extras, later scopes winning.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use signalflow_core::model::{Scope, Signal};

#[derive(Debug, Clone, PartialEq)]
pub struct RuleContext {
    pub signal: Value,
    pub client: Value,
    pub project: Value,
    /// Caller extras, merged last into the `context` scope.
    pub extra: Value,
    /// Stored signal that produced this context, recorded on audit rows.
    pub signal_id: Option<Uuid>,
    /// Reference time for `inactivity_days_gt`.
    pub now: DateTime<Utc>,
    merged: Value,
}

impl Default for RuleContext {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl RuleContext {
    pub fn new(signal: Value) -> Self {
        let mut ctx = Self {
            signal,
            client: Value::Object(Map::new()),
            project: Value::Object(Map::new()),
            extra: Value::Object(Map::new()),
            signal_id: None,
            now: Utc::now(),
            merged: Value::Null,
        };
        ctx.remerge();
        ctx
    }

    /// Context for a stored signal: its payload plus identifying fields.
    pub fn for_signal(signal: &Signal) -> Self {
        let mut scope = match &signal.payload {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        scope.insert("source".to_string(), json!(signal.source.as_str()));
        scope.insert("type".to_string(), json!(signal.signal_type));
        scope.insert("urgency".to_string(), json!(signal.urgency.as_str()));
        if let Some(client_id) = &signal.client_id {
            scope.insert("clientId".to_string(), json!(client_id));
        }
        let mut ctx = Self::new(Value::Object(scope));
        ctx.signal_id = Some(signal.id);
        ctx
    }

    /// Context for a workflow step.
    ///
    /// `signal` is `trigger.signal` when present, else the trigger itself;
    /// `client`/`project` come from the same-named trigger keys; extras are
    /// `trigger.context` plus `steps` (results of earlier steps).
    pub fn from_trigger(trigger: &Value, step_results: &Value) -> Self {
        let signal = trigger.get("signal").cloned().unwrap_or_else(|| trigger.clone());
        let mut extra = match trigger.get("context") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        extra.insert("steps".to_string(), step_results.clone());

        let mut ctx = Self::new(signal);
        ctx.client = object_or_empty(trigger.get("client"));
        ctx.project = object_or_empty(trigger.get("project"));
        ctx.extra = Value::Object(extra);
        ctx.signal_id = trigger
            .get("signalId")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
        ctx.remerge();
        ctx
    }

    pub fn with_client(mut self, client: Value) -> Self {
        self.client = client;
        self.remerge();
        self
    }

    pub fn with_project(mut self, project: Value) -> Self {
        self.project = project;
        self.remerge();
        self
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self.remerge();
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn scope(&self, scope: Scope) -> &Value {
        match scope {
            Scope::Signal => &self.signal,
            Scope::Client => &self.client,
            Scope::Project => &self.project,
            Scope::Context => &self.merged,
        }
    }

    /// Chronological history for trend operators: `context.history`, else `signal.history`.
    pub fn history(&self) -> Option<&Vec<Value>> {
        self.extra
            .get("history")
            .and_then(Value::as_array)
            .or_else(|| self.signal.get("history").and_then(Value::as_array))
    }

    /// `signal._previousValue`, consulted by `changed_to`/`changed_from`.
    pub fn previous_values(&self) -> Option<&Value> {
        self.signal.get("_previousValue")
    }

    /// JSON copy of every scope, stored on the evaluation audit row.
    pub fn snapshot(&self) -> Value {
        json!({
            "signal": self.signal,
            "client": self.client,
            "project": self.project,
            "context": self.extra,
            "now": self.now.to_rfc3339(),
        })
    }

    fn remerge(&mut self) {
        let mut merged = Map::new();
        for scope in [&self.signal, &self.client, &self.project, &self.extra] {
            if let Value::Object(map) = scope {
                for (k, v) in map {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        self.merged = Value::Object(merged);
    }
}

fn object_or_empty(value: Option<&Value>) -> Value {
    match value {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => Value::Object(Map::new()),
    }
}
