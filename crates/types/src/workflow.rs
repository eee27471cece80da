//! Declarative workflow definitions.
//!
//! Workflows are pure data: an ordered list of steps, each naming a step type, an optional
//! condition, and a `with` map whose string values may carry `{{Request.*}}` placeholders.
//! Step order is preserved exactly as authored; `with` maps keep authoring order via `IndexMap`.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::LifecycleEvent;

pub mod validation;

/// Reserved `with` key naming the auth session a step's provider calls should use.
pub const AUTH_SESSION_NAME_KEY: &str = "AuthSessionName";
/// Reserved `with` key carrying the options used to acquire the named auth session.
pub const AUTH_SESSION_OPTIONS_KEY: &str = "AuthSessionOptions";

/// Authored workflow for a single lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    /// Workflow name used in plans, exports, and logs.
    pub name: String,
    /// Lifecycle event this workflow handles.
    pub lifecycle_event: LifecycleEvent,
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered primary steps.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    /// Ordered compensation steps run after the first primary failure.
    #[serde(default)]
    pub on_failure_steps: Vec<StepDefinition>,
}

/// One authored step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    /// Step name, unique within the workflow.
    pub name: String,
    /// Step type resolved through the step metadata catalog and step registry.
    #[serde(rename = "type")]
    pub step_type: String,
    /// Optional run condition; absent means [`Condition::Always`].
    #[serde(default)]
    pub condition: Option<Condition>,
    /// Step parameters; string values may contain template placeholders.
    #[serde(default)]
    pub with: IndexMap<String, Value>,
    /// Provider alias the step talks to; falls back to the engine's default alias.
    #[serde(default)]
    pub provider: Option<String>,
    /// Capabilities required in addition to the step type's catalog entry.
    #[serde(default)]
    pub requires_capabilities: Vec<String>,
    /// Optional expected state handed to the step executor; may contain placeholders.
    #[serde(default)]
    pub expected_state: Option<Value>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.into(),
            ..Default::default()
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.with.insert(key.into(), value);
        self
    }

    pub fn with_provider(mut self, alias: impl Into<String>) -> Self {
        self.provider = Some(alias.into());
        self
    }

    pub fn requiring(mut self, capability: impl Into<String>) -> Self {
        self.requires_capabilities.push(capability.into());
        self
    }

    pub fn with_expected_state(mut self, expected_state: Value) -> Self {
        self.expected_state = Some(expected_state);
        self
    }

    /// Effective condition, treating an absent condition as `Always`.
    pub fn effective_condition(&self) -> Condition {
        self.condition.clone().unwrap_or(Condition::Always)
    }
}

/// Declarative run condition attached to a step.
///
/// Serialized as `always` or as a single-key map such as `{ when: "Request.Input.Enabled == true" }`.
/// YAML documents reach this type through a JSON tree so the map form is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Run unconditionally.
    Always,
    /// Run when the expression is true.
    When(String),
    /// Run when the expression is false.
    Unless(String),
    /// Run when the expression is true; the raw-expression form.
    Expression(String),
}

impl Condition {
    pub fn kind(&self) -> ConditionKind {
        match self {
            Condition::Always => ConditionKind::Always,
            Condition::When(_) => ConditionKind::When,
            Condition::Unless(_) => ConditionKind::Unless,
            Condition::Expression(_) => ConditionKind::Expression,
        }
    }

    /// Raw expression text, `None` for `Always`.
    pub fn expression(&self) -> Option<&str> {
        match self {
            Condition::Always => None,
            Condition::When(expression) | Condition::Unless(expression) | Condition::Expression(expression) => {
                Some(expression.as_str())
            }
        }
    }
}

/// Tag of a [`Condition`] without its expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionKind {
    Always,
    When,
    Unless,
    Expression,
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConditionKind::Always => "Always",
            ConditionKind::When => "When",
            ConditionKind::Unless => "Unless",
            ConditionKind::Expression => "Expression",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reads YAML the way document loaders do: into a JSON tree, then into the typed model.
    fn from_yaml(yaml: &str) -> Result<WorkflowDefinition, serde_json::Error> {
        let tree: Value = serde_yaml::from_str(yaml).expect("yaml syntax");
        serde_json::from_value(tree)
    }

    #[test]
    fn workflow_yaml_preserves_step_order_and_conditions() {
        let yaml = r#"
name: joiner-standard
lifecycle_event: Joiner
steps:
  - name: ensure-account
    type: IdLE.Step.EnsureAccount
    with:
      UserId: "{{Request.Input.UserId}}"
      Enabled: true
  - name: grant-mailbox
    type: IdLE.Step.EnsureMailbox
    condition:
      when: "Request.Input.NeedsMailbox == true"
  - name: notify
    type: IdLE.Step.Notify
    condition: always
on_failure_steps:
  - name: disable-account
    type: IdLE.Step.DisableAccount
"#;

        let workflow = from_yaml(yaml).expect("workflow");
        let names: Vec<&str> = workflow.steps.iter().map(|step| step.name.as_str()).collect();
        assert_eq!(names, vec!["ensure-account", "grant-mailbox", "notify"]);
        assert_eq!(workflow.lifecycle_event, LifecycleEvent::Joiner);
        assert_eq!(
            workflow.steps[1].condition,
            Some(Condition::When("Request.Input.NeedsMailbox == true".into()))
        );
        assert_eq!(workflow.steps[2].condition, Some(Condition::Always));
        let with_keys: Vec<&str> = workflow.steps[0].with.keys().map(String::as_str).collect();
        assert_eq!(with_keys, vec!["UserId", "Enabled"]);
        assert_eq!(workflow.on_failure_steps.len(), 1);
    }

    #[test]
    fn unknown_step_fields_are_rejected() {
        let yaml = r#"
name: broken
lifecycle_event: Leaver
steps:
  - name: s1
    type: IdLE.Step.Disable
    script: "Remove-Everything"
"#;
        let error = from_yaml(yaml).expect_err("unknown field");
        assert!(error.to_string().contains("unknown field"), "unexpected error: {error}");
    }

    #[test]
    fn absent_condition_is_always() {
        let step = StepDefinition::new("s1", "IdLE.Step.Noop");
        assert_eq!(step.effective_condition(), Condition::Always);
        assert_eq!(step.effective_condition().kind().to_string(), "Always");
        assert!(step.effective_condition().expression().is_none());
    }
}
