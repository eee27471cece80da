//! Structural validation for workflow definitions.
//!
//! These checks run before any template or condition work and guarantee that a workflow is
//! plain data: bounded nesting, no empty keys, no shell or script substitution markers, unique
//! step names, well-formed capability ids, and correctly typed reserved `with` keys.

use std::collections::HashSet;

use serde_json::Value;

use super::{AUTH_SESSION_NAME_KEY, AUTH_SESSION_OPTIONS_KEY, StepDefinition, WorkflowDefinition};
use crate::capability::is_valid_capability_id;

/// Character sequences that introduce executable content in common host shells.
const EXECUTABLE_MARKERS: &[&str] = &["$(", "`", "<%"];

/// Validates a whole workflow, returning the first problem found.
pub fn validate_workflow_definition(workflow: &WorkflowDefinition, max_depth: usize) -> Result<(), String> {
    if workflow.name.trim().is_empty() {
        return Err("workflow name cannot be empty".to_string());
    }
    if workflow.steps.is_empty() {
        return Err(format!("workflow '{}' has no steps", workflow.name));
    }

    let mut seen_names = HashSet::new();
    let all_steps = workflow
        .steps
        .iter()
        .map(|step| ("steps", step))
        .chain(workflow.on_failure_steps.iter().map(|step| ("on_failure_steps", step)));

    for (index, (section, step)) in all_steps.enumerate() {
        let location = format!("{section}[{}]", position_in_section(workflow, section, index));
        validate_step_definition(step, &location, max_depth)?;
        if !seen_names.insert(step.name.to_ascii_lowercase()) {
            return Err(format!("{location}: duplicate step name '{}'", step.name));
        }
    }

    Ok(())
}

fn position_in_section(workflow: &WorkflowDefinition, section: &str, index: usize) -> usize {
    if section == "steps" { index } else { index - workflow.steps.len() }
}

/// Validates one step definition; `location` prefixes error messages.
pub fn validate_step_definition(step: &StepDefinition, location: &str, max_depth: usize) -> Result<(), String> {
    if step.name.trim().is_empty() {
        return Err(format!("{location}: step name cannot be empty"));
    }
    if step.step_type.trim().is_empty() {
        return Err(format!("{location}: step '{}' has an empty type", step.name));
    }
    if let Some(alias) = &step.provider
        && alias.trim().is_empty()
    {
        return Err(format!("{location}: step '{}' has an empty provider alias", step.name));
    }

    for capability in &step.requires_capabilities {
        if !is_valid_capability_id(capability) {
            return Err(format!(
                "{location}: step '{}' declares malformed capability id '{capability}'",
                step.name
            ));
        }
    }

    if let Some(expression) = step.condition.as_ref().and_then(|condition| condition.expression())
        && expression.trim().is_empty()
    {
        return Err(format!("{location}: step '{}' has an empty condition expression", step.name));
    }

    for (key, value) in &step.with {
        let value_path = format!("{location}.with.{key}");
        validate_key(key, &value_path)?;
        validate_data_only(value, &value_path, 1, max_depth)?;
    }
    validate_reserved_with_keys(step, location)?;

    if let Some(expected_state) = &step.expected_state {
        validate_data_only(expected_state, &format!("{location}.expected_state"), 0, max_depth)?;
    }

    Ok(())
}

/// Checks the shape of authored `AuthSessionName` / `AuthSessionOptions` values.
///
/// A whole-placeholder string is accepted for the options here; the resolved value must pass
/// [`validate_resolved_reserved_keys`].
pub fn validate_reserved_with_keys(step: &StepDefinition, location: &str) -> Result<(), String> {
    check_reserved_with_keys(step, location, true)
}

/// Checks reserved keys after template resolution, where the options must be a map.
pub fn validate_resolved_reserved_keys(step: &StepDefinition, location: &str) -> Result<(), String> {
    check_reserved_with_keys(step, location, false)
}

fn check_reserved_with_keys(step: &StepDefinition, location: &str, allow_placeholder: bool) -> Result<(), String> {
    if let Some(name) = step.with.get(AUTH_SESSION_NAME_KEY) {
        match name {
            Value::String(text) if !text.trim().is_empty() => {}
            _ => {
                return Err(format!(
                    "{location}: step '{}' must use a non-empty string for {AUTH_SESSION_NAME_KEY}",
                    step.name
                ));
            }
        }
    }
    if let Some(options) = step.with.get(AUTH_SESSION_OPTIONS_KEY) {
        let templated =
            allow_placeholder && options.as_str().is_some_and(|text| text.trim_start().starts_with("{{"));
        if !templated && !matches!(options, Value::Object(_) | Value::Null) {
            return Err(format!(
                "{location}: step '{}' must use a map for {AUTH_SESSION_OPTIONS_KEY}",
                step.name
            ));
        }
        if !step.with.contains_key(AUTH_SESSION_NAME_KEY) {
            return Err(format!(
                "{location}: step '{}' sets {AUTH_SESSION_OPTIONS_KEY} without {AUTH_SESSION_NAME_KEY}",
                step.name
            ));
        }
    }
    Ok(())
}

/// Walks a value and rejects anything that is not plain, bounded data.
pub fn validate_data_only(value: &Value, path: &str, depth: usize, max_depth: usize) -> Result<(), String> {
    if depth > max_depth {
        return Err(format!("{path}: nesting exceeds the maximum depth of {max_depth}"));
    }

    match value {
        Value::String(text) => {
            if let Some(marker) = EXECUTABLE_MARKERS.iter().find(|marker| text.contains(**marker)) {
                return Err(format!("{path}: value contains executable content marker '{marker}'"));
            }
            Ok(())
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                validate_data_only(item, &format!("{path}[{index}]"), depth + 1, max_depth)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (key, nested) in map {
                let nested_path = format!("{path}.{key}");
                validate_key(key, &nested_path)?;
                validate_data_only(nested, &nested_path, depth + 1, max_depth)?;
            }
            Ok(())
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
    }
}

fn validate_key(key: &str, path: &str) -> Result<(), String> {
    if key.trim().is_empty() {
        return Err(format!("{path}: keys cannot be empty"));
    }
    if key.contains("{{") || key.contains("}}") {
        return Err(format!("{path}: keys cannot contain template placeholders"));
    }
    Ok(())
}
