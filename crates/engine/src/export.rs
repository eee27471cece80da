//! Plan export format, schema version 1.0.
//!
//! Exports are pretty-printed UTF-8 JSON with LF line endings and a trailing newline. Field order
//! is fixed by the DTOs below and keys inside free-form maps (request input, step inputs,
//! expected state) are sorted. Values under credential-like keys are redacted and session
//! handles never appear.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use idle_types::{ConditionKind, ExecutionResult, ExecutionStatus, Plan, PlanMode, PlanStep, Request};
use idle_util::{redact_sensitive_values, sort_keys};

use crate::{
    config::EngineConfig,
    error::{EngineError, EngineResult},
};

pub const SCHEMA_VERSION: &str = "1.0";
const SUPPORTED_MAJOR: u64 = 1;
pub const ENGINE_NAME: &str = "IdLE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanExport {
    pub schema_version: String,
    pub engine: EngineInfo,
    pub request: RequestExport,
    pub plan: PlanBody,
    pub metadata: ExportMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestExport {
    pub lifecycle_event: String,
    pub correlation_id: String,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub desired_state: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanBody {
    pub id: String,
    pub created_at: String,
    pub mode: PlanMode,
    pub steps: Vec<StepExport>,
    #[serde(default)]
    pub on_failure_steps: Vec<StepExport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExport {
    pub id: String,
    pub name: String,
    pub step_type: String,
    #[serde(default)]
    pub provider: Option<String>,
    pub condition: ConditionExport,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub expected_state: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionExport {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default)]
    pub expression: Option<String>,
    /// Frozen build-time outcome; `true` means the step runs.
    #[serde(default = "default_condition_result")]
    pub result: bool,
}

fn default_condition_result() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub workflow_name: String,
    pub step_count: usize,
    pub on_failure_step_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_status: Option<ExecutionStatus>,
}

/// Renders `plan` as an export document.
pub fn export_plan(plan: &Plan, config: &EngineConfig) -> EngineResult<String> {
    render(&build_export(plan, plan.mode, None, &config.redact_keys))
}

/// Renders the plan behind `result`, reporting mode `Executed` and the final status.
pub fn export_execution(plan: &Plan, result: &ExecutionResult, config: &EngineConfig) -> EngineResult<String> {
    if result.plan_id != plan.id {
        return Err(EngineError::export(format!(
            "execution result belongs to plan '{}', not '{}'",
            result.plan_id, plan.id
        )));
    }
    render(&build_export(plan, PlanMode::Executed, Some(result.status), &config.redact_keys))
}

/// Builds the export document for `plan` without rendering it.
pub fn build_export(
    plan: &Plan,
    mode: PlanMode,
    execution_status: Option<ExecutionStatus>,
    redact_keys: &[String],
) -> PlanExport {
    PlanExport {
        schema_version: SCHEMA_VERSION.to_string(),
        engine: EngineInfo {
            name: ENGINE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        request: export_request(&plan.request, redact_keys),
        plan: PlanBody {
            id: plan.id.clone(),
            created_at: plan.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            mode,
            steps: plan.steps.iter().map(|step| export_step(step, redact_keys)).collect(),
            on_failure_steps: plan
                .on_failure_steps
                .iter()
                .map(|step| export_step(step, redact_keys))
                .collect(),
        },
        metadata: ExportMetadata {
            workflow_name: plan.workflow_name.clone(),
            step_count: plan.steps.len(),
            on_failure_step_count: plan.on_failure_steps.len(),
            execution_status,
        },
    }
}

fn export_request(request: &Request, redact_keys: &[String]) -> RequestExport {
    RequestExport {
        lifecycle_event: request.lifecycle_event.to_string(),
        correlation_id: request.correlation_id.clone(),
        actor: request.actor.clone(),
        input: clean(&map_value(request.input.iter()), redact_keys),
        desired_state: clean(&map_value(request.desired_state.iter()), redact_keys),
    }
}

fn export_step(step: &PlanStep, redact_keys: &[String]) -> StepExport {
    StepExport {
        id: step.id.clone(),
        name: step.name.clone(),
        step_type: step.step_type.clone(),
        provider: step.provider.clone(),
        condition: ConditionExport {
            kind: step.condition.kind,
            expression: step.condition.expression.clone(),
            result: step.condition.result,
        },
        inputs: clean(&map_value(step.inputs.iter()), redact_keys),
        expected_state: step.expected_state.as_ref().map(|value| clean(value, redact_keys)),
    }
}

fn map_value<'a>(entries: impl Iterator<Item = (&'a String, &'a Value)>) -> Value {
    Value::Object(entries.map(|(key, value)| (key.clone(), value.clone())).collect())
}

fn clean(value: &Value, redact_keys: &[String]) -> Value {
    sort_keys(&redact_sensitive_values(value, redact_keys))
}

fn render(export: &PlanExport) -> EngineResult<String> {
    let mut text = serde_json::to_string_pretty(export).map_err(|error| EngineError::export(error.to_string()))?;
    text.push('\n');
    debug!(plan_id = %export.plan.id, bytes = text.len(), "plan exported");
    Ok(text)
}

/// Parses an export document, accepting any `1.x` schema version.
pub fn read_plan_export(text: &str) -> EngineResult<PlanExport> {
    let document: Value = serde_json::from_str(text).map_err(|error| EngineError::export(format!("invalid JSON: {error}")))?;
    let version = document
        .get("schemaVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::export("missing schemaVersion"))?;
    check_schema_version(version)?;
    serde_json::from_value(document).map_err(|error| EngineError::export(format!("invalid plan export: {error}")))
}

fn check_schema_version(version: &str) -> EngineResult<()> {
    let mut parts = version.split('.');
    let major = parts
        .next()
        .and_then(|part| part.parse::<u64>().ok())
        .ok_or_else(|| EngineError::export(format!("malformed schemaVersion '{version}'")))?;
    if parts.any(|part| part.parse::<u64>().is_err()) {
        return Err(EngineError::export(format!("malformed schemaVersion '{version}'")));
    }
    if major != SUPPORTED_MAJOR {
        return Err(EngineError::export(format!(
            "unsupported schemaVersion '{version}'; this engine reads {SUPPORTED_MAJOR}.x"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use idle_types::{AUTH_SESSION_NAME_KEY, AUTH_SESSION_OPTIONS_KEY, FrozenCondition, LifecycleEvent};
    use indexmap::IndexMap;
    use serde_json::json;

    fn plan() -> Plan {
        let inputs = IndexMap::from([
            ("Zeta".to_string(), json!(1)),
            ("Alpha".to_string(), json!({"b": 2, "a": 1})),
            (AUTH_SESSION_NAME_KEY.to_string(), json!("Directory")),
            (AUTH_SESSION_OPTIONS_KEY.to_string(), json!({"ClientSecret": "s3cr3t"})),
        ]);
        Plan {
            id: "plan-1".into(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            mode: PlanMode::Ready,
            workflow_name: "joiner".into(),
            request: Request::new(LifecycleEvent::Joiner)
                .with_correlation_id("corr-1")
                .with_input("UserId", json!("jdoe"))
                .with_input("Password", json!("hunter2")),
            steps: vec![PlanStep {
                id: "step-01".into(),
                name: "ensure".into(),
                step_type: "IdLE.Step.EnsureAttribute".into(),
                provider: Some("Identity".into()),
                condition: FrozenCondition::always(),
                skip_reason: None,
                inputs,
                expected_state: Some(json!({"Department": "IT"})),
                required_capabilities: vec!["IdLE.Identity.Read".into()],
            }],
            on_failure_steps: Vec::new(),
        }
    }

    #[test]
    fn export_is_pretty_sorted_and_redacted() {
        let text = export_plan(&plan(), &EngineConfig::default()).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(!text.contains('\r'));
        assert!(!text.contains("s3cr3t"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains("\"schemaVersion\": \"1.0\""));
        assert!(text.contains("\"createdAt\": \"2026-01-02T03:04:05.000Z\""));

        let alpha = text.find("\"Alpha\"").unwrap();
        let zeta = text.find("\"Zeta\"").unwrap();
        assert!(alpha < zeta);

        let value: Value = serde_json::from_str(&text).unwrap();
        let step = &value["plan"]["steps"][0];
        assert_eq!(step["inputs"][AUTH_SESSION_NAME_KEY], json!("Directory"));
        assert_eq!(step["inputs"][AUTH_SESSION_OPTIONS_KEY], json!("[REDACTED]"));
        assert_eq!(step["condition"], json!({"type": "Always", "expression": null, "result": true}));
        assert_eq!(value["request"]["input"]["Password"], json!("[REDACTED]"));
    }

    #[test]
    fn export_reads_back_and_rejects_future_majors() {
        let text = export_plan(&plan(), &EngineConfig::default()).unwrap();
        let parsed = read_plan_export(&text).unwrap();
        assert_eq!(parsed.plan.steps[0].name, "ensure");
        assert_eq!(parsed.metadata.step_count, 1);

        let older_minor = text.replace("\"schemaVersion\": \"1.0\"", "\"schemaVersion\": \"1.0.3\"");
        assert!(read_plan_export(&older_minor).is_ok());

        let future = text.replace("\"schemaVersion\": \"1.0\"", "\"schemaVersion\": \"2.0\"");
        let error = read_plan_export(&future).unwrap_err();
        assert!(error.to_string().contains("unsupported schemaVersion '2.0'"));

        assert!(read_plan_export("{\"schemaVersion\": \"one\"}").is_err());
    }

    #[test]
    fn extra_redact_keys_come_from_config() {
        let mut plan = plan();
        plan.request = plan.request.with_input("EmployeePin", json!("1234"));
        let config = EngineConfig {
            redact_keys: vec!["pin".into()],
            ..EngineConfig::default()
        };
        let text = export_plan(&plan, &config).unwrap();
        assert!(!text.contains("1234"));
    }
}
