use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use signalflow_core::model::{Step, StepKind};
use signalflow_llm::TextGenerator;

use super::{kind_mismatch, StepContext, StepHandler, StepOutcome};
use crate::error::StepError;
use crate::template::Template;

/// Render the prompt, call the generator, and check the response shape.
pub struct AiHandler {
    generator: Arc<dyn TextGenerator>,
    default_model: String,
}

impl AiHandler {
    pub fn new(generator: Arc<dyn TextGenerator>, default_model: impl Into<String>) -> Self {
        Self {
            generator,
            default_model: default_model.into(),
        }
    }
}

#[async_trait]
impl StepHandler for AiHandler {
    async fn run(&self, step: &Step, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let StepKind::Ai(cfg) = &step.kind else {
            return Err(kind_mismatch("ai", step));
        };
        let prompt = Template::parse(&cfg.prompt)?.render_string(&ctx.template_root());
        let model = cfg.model.as_deref().unwrap_or(&self.default_model);

        let text = self.generator.generate_text(&prompt, model).await?;
        debug!(step_id = %step.id, model, chars = text.len(), "ai response received");

        let mut output = json!({ "text": text, "model": model });
        if let Some(schema) = &cfg.schema {
            output["data"] = parse_structured(&text, schema)?;
        }
        Ok(StepOutcome::next(output))
    }
}

/// Parse a JSON response, tolerating a Markdown code fence around it, and
/// check the schema's top-level `required` keys.
fn parse_structured(text: &str, schema: &Value) -> Result<Value, StepError> {
    let body = strip_code_fence(text);
    let parsed: Value =
        serde_json::from_str(body).map_err(|e| StepError::InvalidAiResponse(e.to_string()))?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if parsed.get(key).is_none() {
                return Err(StepError::MissingAiField(key.to_string()));
            }
        }
    }
    Ok(parsed)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // Drop an info string such as `json` on the opening fence line.
    match inner.split_once('\n') {
        Some((lang, rest)) if !lang.trim_start().starts_with(['{', '[']) => rest.trim(),
        _ => inner.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn schema_requires_json() {
        let schema = json!({"type": "object"});
        assert!(matches!(
            parse_structured("not json", &schema),
            Err(StepError::InvalidAiResponse(_))
        ));
        assert_eq!(parse_structured("{\"a\":1}", &schema).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn schema_required_keys_are_checked() {
        let schema = json!({"required": ["summary", "priority"]});
        let err = parse_structured("{\"summary\":\"x\"}", &schema).unwrap_err();
        assert!(matches!(err, StepError::MissingAiField(f) if f == "priority"));
    }
}
