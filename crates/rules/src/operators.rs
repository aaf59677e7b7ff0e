//! Condition operators.
//!
//! Evaluation never fails as a whole: a bad path, pattern or option is
//! recorded on the [`ConditionResult`] with `passed = false`. Missing
//! values and non-numeric operands simply fail the comparison.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;

use signalflow_core::model::{Condition, ConditionLogic, ConditionResult, Operator};
use signalflow_core::{JsonPath, PathError};

use crate::context::RuleContext;
use crate::stats;

/// Date field read by `inactivity_days_gt` when the condition names none.
pub const DEFAULT_ACTIVITY_FIELD: &str = "lastActivityAt";

#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("pattern must be a string")]
    PatternNotString,

    #[error("expected value must be an array")]
    ExpectedArray,

    #[error("unknown baselineType '{0}'")]
    UnknownBaseline(String),
}

// ── Entry points ────────────────────────────────────────────────────

/// Evaluate one condition against its scope.
pub fn evaluate_condition(condition: &Condition, ctx: &RuleContext) -> ConditionResult {
    let mut result = ConditionResult {
        condition_id: None,
        field: condition.field.clone(),
        operator: condition.operator,
        scope: condition.scope,
        expected: condition.value.clone(),
        actual: None,
        passed: false,
        error: None,
    };

    let path = match condition_path(condition) {
        Ok(p) => p,
        Err(e) => {
            result.error = Some(e.to_string());
            return result;
        }
    };

    let actual = path.resolve(ctx.scope(condition.scope));
    result.actual = actual.cloned();
    match apply(condition, &path, actual, ctx) {
        Ok(passed) => result.passed = passed,
        Err(e) => result.error = Some(e.to_string()),
    }
    result
}

/// Combine per-condition outcomes. An empty set never matches.
pub fn combine(logic: ConditionLogic, results: &[ConditionResult]) -> bool {
    if results.is_empty() {
        return false;
    }
    match logic {
        ConditionLogic::All => results.iter().all(|r| r.passed),
        ConditionLogic::Any => results.iter().any(|r| r.passed),
    }
}

fn condition_path(condition: &Condition) -> Result<JsonPath, PathError> {
    if condition.operator != Operator::InactivityDaysGt {
        return JsonPath::parse(&condition.field);
    }
    let raw = match condition.option_str("field") {
        Some(f) if !f.trim().is_empty() => f,
        _ if !condition.field.trim().is_empty() => condition.field.as_str(),
        _ => DEFAULT_ACTIVITY_FIELD,
    };
    JsonPath::parse(raw)
}

fn apply(
    c: &Condition,
    path: &JsonPath,
    actual: Option<&Value>,
    ctx: &RuleContext,
) -> Result<bool, ConditionError> {
    let expected = &c.value;
    let passed = match c.operator {
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            match (actual.and_then(as_number), as_number(expected)) {
                (Some(a), Some(e)) => match c.operator {
                    Operator::Gt => a > e,
                    Operator::Gte => a >= e,
                    Operator::Lt => a < e,
                    _ => a <= e,
                },
                _ => false,
            }
        }
        Operator::Eq => values_equal(actual, expected),
        Operator::Neq => !values_equal(actual, expected),
        Operator::Contains => contains(actual, expected),
        Operator::NotContains => match actual {
            Some(Value::String(_)) | Some(Value::Array(_)) => !contains(actual, expected),
            _ => false,
        },
        Operator::Matches => {
            let pattern = expected.as_str().ok_or(ConditionError::PatternNotString)?;
            let re = Regex::new(pattern)?;
            actual.and_then(Value::as_str).is_some_and(|s| re.is_match(s))
        }
        Operator::In => {
            let list = expected.as_array().ok_or(ConditionError::ExpectedArray)?;
            actual.is_some() && list.iter().any(|v| values_equal(actual, v))
        }
        Operator::NotIn => {
            let list = expected.as_array().ok_or(ConditionError::ExpectedArray)?;
            !list.iter().any(|v| values_equal(actual, v))
        }
        Operator::PercentChangeGt | Operator::PercentChangeLt => percent_change(c, path, actual, ctx)?,
        Operator::AnomalyZscoreGt => anomaly_zscore(c, path, actual, ctx)?,
        Operator::InactivityDaysGt => inactivity_days(expected, actual, ctx),
        Operator::ChangedTo | Operator::ChangedFrom => changed(c, path, actual, ctx),
    };
    Ok(passed)
}

// ── Value helpers ───────────────────────────────────────────────────

/// Numbers, and strings that parse as finite numbers.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Numbers compare by value; everything else structurally. Undefined equals nothing.
fn values_equal(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, _) => false,
        (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Some(a), b) => a == b,
    }
}

fn contains(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        Some(Value::String(s)) => expected.as_str().is_some_and(|needle| s.contains(needle)),
        Some(Value::Array(items)) => items.iter().any(|item| values_equal(Some(item), expected)),
        _ => false,
    }
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// ── Trend operators ─────────────────────────────────────────────────

/// Numeric history points. Records are read at `historyField`, else the condition path.
fn history_values(c: &Condition, path: &JsonPath, ctx: &RuleContext) -> Result<Vec<f64>, ConditionError> {
    let Some(entries) = ctx.history() else {
        return Ok(Vec::new());
    };
    let record_path = match c.option_str("historyField") {
        Some(f) => JsonPath::parse(f)?,
        None => path.clone(),
    };
    Ok(entries
        .iter()
        .filter_map(|entry| match entry {
            Value::Object(_) => record_path.resolve(entry).and_then(as_number),
            other => as_number(other),
        })
        .collect())
}

fn percent_change(
    c: &Condition,
    path: &JsonPath,
    actual: Option<&Value>,
    ctx: &RuleContext,
) -> Result<bool, ConditionError> {
    let (Some(current), Some(threshold)) = (actual.and_then(as_number), as_number(&c.value)) else {
        return Ok(false);
    };
    let history = history_values(c, path, ctx)?;
    let baseline = match c.option_str("baselineType").unwrap_or("previous") {
        "previous" => history.last().copied(),
        "average" => stats::mean(&history),
        other => return Err(ConditionError::UnknownBaseline(other.to_string())),
    };
    let Some(change) = baseline.and_then(|b| stats::percent_change(current, b)) else {
        return Ok(false);
    };
    Ok(match c.operator {
        Operator::PercentChangeGt => change > threshold,
        _ => change < threshold,
    })
}

fn anomaly_zscore(
    c: &Condition,
    path: &JsonPath,
    actual: Option<&Value>,
    ctx: &RuleContext,
) -> Result<bool, ConditionError> {
    let (Some(current), Some(threshold)) = (actual.and_then(as_number), as_number(&c.value)) else {
        return Ok(false);
    };
    let history = history_values(c, path, ctx)?;
    Ok(stats::z_score(current, &history).is_some_and(|z| z > threshold))
}

fn inactivity_days(expected: &Value, actual: Option<&Value>, ctx: &RuleContext) -> bool {
    let (Some(threshold), Some(last)) = (as_number(expected), actual.and_then(parse_date)) else {
        return false;
    };
    let days = (ctx.now - last).num_days();
    days as f64 > threshold
}

/// Previous value from `signal._previousValue`, keyed by the raw field or by path.
fn previous_value<'a>(c: &Condition, path: &JsonPath, ctx: &'a RuleContext) -> Option<&'a Value> {
    let prev = ctx.previous_values()?;
    prev.get(c.field.trim()).or_else(|| path.resolve(prev))
}

fn changed(c: &Condition, path: &JsonPath, actual: Option<&Value>, ctx: &RuleContext) -> bool {
    let Some(previous) = previous_value(c, path, ctx) else {
        return false;
    };
    let target = &c.value;
    match c.operator {
        Operator::ChangedTo => values_equal(actual, target) && !values_equal(Some(previous), target),
        _ => values_equal(Some(previous), target) && !values_equal(actual, target),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
