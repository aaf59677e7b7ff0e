//! Definition document types and two-pass envelope parsing.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use signalflow_core::model::{Condition, ConditionLogic, RetryPolicy, Step, StepKind};

/// Supported document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefinitionKind {
    Rule,
    Workflow,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionKind::Rule => write!(f, "Rule"),
            DefinitionKind::Workflow => write!(f, "Workflow"),
        }
    }
}

impl FromStr for DefinitionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Rule" => Ok(DefinitionKind::Rule),
            "Workflow" => Ok(DefinitionKind::Workflow),
            other => Err(format!("unknown definition kind: '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DefinitionMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// First-pass header: everything except the typed `spec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionEnvelope {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: DefinitionMetadata,
    #[serde(default)]
    pub spec: serde_yaml::Value,
}

impl DefinitionEnvelope {
    pub fn definition_kind(&self) -> std::result::Result<DefinitionKind, String> {
        self.kind.parse()
    }

    /// Second pass: deserialize `spec` into the kind-specific type.
    pub fn parse_full(&self) -> std::result::Result<Definition, String> {
        match self.definition_kind()? {
            DefinitionKind::Rule => {
                let spec: RuleSpec = serde_yaml::from_value(self.spec.clone()).map_err(|e| e.to_string())?;
                Ok(Definition::Rule(RuleDefinition {
                    metadata: self.metadata.clone(),
                    spec,
                }))
            }
            DefinitionKind::Workflow => {
                let spec: WorkflowSpec = serde_yaml::from_value(self.spec.clone()).map_err(|e| e.to_string())?;
                spec.validate()?;
                Ok(Definition::Workflow(WorkflowDefinition {
                    metadata: self.metadata.clone(),
                    spec,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    /// `metadata.id` of the workflow to run when the rule matches.
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    pub steps: Vec<Step>,
}

impl WorkflowSpec {
    /// Step ids are unique and every pointer names a defined step.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.steps.is_empty() {
            return Err("workflow must declare at least one step".to_string());
        }
        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(format!("duplicate step id '{}'", step.id));
            }
        }

        let check = |from: &str, to: &str| {
            if ids.contains(to) {
                Ok(())
            } else {
                Err(format!("step '{}' points to unknown step '{}'", from, to))
            }
        };
        for step in &self.steps {
            if let Some(next) = &step.next {
                check(&step.id, next)?;
            }
            match &step.kind {
                StepKind::Branch(cfg) => {
                    for arm in &cfg.branches {
                        check(&step.id, &arm.next)?;
                    }
                    if let Some(default) = &cfg.default {
                        check(&step.id, default)?;
                    }
                }
                StepKind::Parallel(cfg) => {
                    for target in &cfg.steps {
                        check(&step.id, target)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleDefinition {
    pub metadata: DefinitionMetadata,
    pub spec: RuleSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub metadata: DefinitionMetadata,
    pub spec: WorkflowSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Rule(RuleDefinition),
    Workflow(WorkflowDefinition),
}

impl Definition {
    pub fn metadata(&self) -> &DefinitionMetadata {
        match self {
            Definition::Rule(d) => &d.metadata,
            Definition::Workflow(d) => &d.metadata,
        }
    }

    pub fn kind(&self) -> DefinitionKind {
        match self {
            Definition::Rule(_) => DefinitionKind::Rule,
            Definition::Workflow(_) => DefinitionKind::Workflow,
        }
    }
}
