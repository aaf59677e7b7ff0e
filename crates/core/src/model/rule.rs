//! Versioned rules, their conditions and evaluation audit rows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::SignalflowError;

/// A business rule. Only its published version is ever evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRule {
    pub id: Uuid,
    pub agency_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Workflow triggered by the signal router when this rule matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Draft => "draft",
            VersionStatus::Published => "published",
            VersionStatus::Archived => "archived",
        }
    }
}

impl FromStr for VersionStatus {
    type Err = SignalflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(VersionStatus::Draft),
            "published" => Ok(VersionStatus::Published),
            "archived" => Ok(VersionStatus::Archived),
            other => Err(SignalflowError::InvalidValue {
                field: "version status",
                value: other.to_string(),
            }),
        }
    }
}

/// How a version's condition results combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionLogic {
    /// Every condition must pass.
    #[default]
    All,
    /// At least one condition must pass.
    Any,
}

impl ConditionLogic {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionLogic::All => "all",
            ConditionLogic::Any => "any",
        }
    }
}

impl FromStr for ConditionLogic {
    type Err = SignalflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(ConditionLogic::All),
            "any" => Ok(ConditionLogic::Any),
            other => Err(SignalflowError::InvalidValue {
                field: "condition logic",
                value: other.to_string(),
            }),
        }
    }
}

/// An immutable snapshot of a rule's conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleVersion {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub version: i32,
    pub status: VersionStatus,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// Which part of the evaluation context a condition reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Signal,
    Client,
    Project,
    /// Shallow merge of every scope plus caller-supplied context.
    Context,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Signal => "signal",
            Scope::Client => "client",
            Scope::Project => "project",
            Scope::Context => "context",
        }
    }
}

impl FromStr for Scope {
    type Err = SignalflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signal" => Ok(Scope::Signal),
            "client" => Ok(Scope::Client),
            "project" => Ok(Scope::Project),
            "context" => Ok(Scope::Context),
            other => Err(SignalflowError::InvalidValue {
                field: "scope",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
    Contains,
    NotContains,
    Matches,
    In,
    NotIn,
    PercentChangeGt,
    PercentChangeLt,
    AnomalyZscoreGt,
    InactivityDaysGt,
    ChangedTo,
    ChangedFrom,
}

impl Operator {
    pub const ALL: [Operator; 17] = [
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::Eq,
        Operator::Neq,
        Operator::Contains,
        Operator::NotContains,
        Operator::Matches,
        Operator::In,
        Operator::NotIn,
        Operator::PercentChangeGt,
        Operator::PercentChangeLt,
        Operator::AnomalyZscoreGt,
        Operator::InactivityDaysGt,
        Operator::ChangedTo,
        Operator::ChangedFrom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::Matches => "matches",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::PercentChangeGt => "percent_change_gt",
            Operator::PercentChangeLt => "percent_change_lt",
            Operator::AnomalyZscoreGt => "anomaly_zscore_gt",
            Operator::InactivityDaysGt => "inactivity_days_gt",
            Operator::ChangedTo => "changed_to",
            Operator::ChangedFrom => "changed_from",
        }
    }
}

impl FromStr for Operator {
    type Err = SignalflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| SignalflowError::InvalidValue {
                field: "operator",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One comparison: `scope.field <operator> value`.
///
/// `options` carries operator-specific knobs (`baselineType`,
/// `historyField`, `field`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            scope: Scope::default(),
            options: Map::new(),
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_option(mut self, key: &str, value: Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

/// A stored condition belonging to a rule version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub id: Uuid,
    pub version_id: Uuid,
    pub position: i32,
    #[serde(flatten)]
    pub condition: Condition,
}

/// Outcome of one condition inside an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_id: Option<Uuid>,
    pub field: String,
    pub operator: Operator,
    pub scope: Scope,
    pub expected: Value,
    /// `None` when the path did not resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Immutable audit row written for every rule evaluation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluation {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub agency_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<Uuid>,
    pub matched: bool,
    pub no_published_version: bool,
    pub condition_results: Vec<ConditionResult>,
    pub context_snapshot: Value,
    pub duration_ms: u64,
    pub evaluated_at: DateTime<Utc>,
}
