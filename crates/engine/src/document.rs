//! Loading workflow and request documents from YAML or JSON.
//!
//! Documents are parsed into a generic YAML tree first so explicit tags (`!Tag value`) can be
//! rejected. The tree is then converted to JSON and deserialized from there, which reads
//! single-key maps such as `condition: { when: ... }` as enum variants. JSON is a subset of
//! YAML, so both formats go through the same path.

use std::{fs, path::Path};

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use tracing::debug;

use idle_types::{Request, WorkflowDefinition};

use crate::error::{EngineError, EngineResult};

/// Parses a workflow definition from YAML or JSON text.
pub fn parse_workflow(text: &str) -> EngineResult<WorkflowDefinition> {
    parse_document(text, "workflow")
}

/// Parses a lifecycle request from YAML or JSON text.
pub fn parse_request(text: &str) -> EngineResult<Request> {
    parse_document(text, "request")
}

pub fn load_workflow_file(path: &Path) -> EngineResult<WorkflowDefinition> {
    let workflow = parse_workflow(&read(path)?).map_err(|error| annotate(error, path))?;
    debug!(path = %path.display(), workflow = %workflow.name, steps = workflow.steps.len(), "workflow loaded");
    Ok(workflow)
}

pub fn load_request_file(path: &Path) -> EngineResult<Request> {
    let request = parse_request(&read(path)?).map_err(|error| annotate(error, path))?;
    debug!(path = %path.display(), correlation_id = %request.correlation_id, "request loaded");
    Ok(request)
}

fn read(path: &Path) -> EngineResult<String> {
    fs::read_to_string(path).map_err(|error| EngineError::validation(format!("failed to read {}: {error}", path.display())))
}

fn annotate(error: EngineError, path: &Path) -> EngineError {
    match error {
        EngineError::Validation { message } => EngineError::validation(format!("{}: {message}", path.display())),
        other => other,
    }
}

fn parse_document<T: DeserializeOwned>(text: &str, kind: &str) -> EngineResult<T> {
    let tree: YamlValue =
        serde_yaml::from_str(text).map_err(|error| EngineError::validation(format!("invalid {kind} document: {error}")))?;
    reject_tags(&tree, kind)?;
    let value: JsonValue =
        serde_json::to_value(&tree).map_err(|error| EngineError::validation(format!("invalid {kind} document: {error}")))?;
    serde_json::from_value(value).map_err(|error| EngineError::validation(format!("invalid {kind} document: {error}")))
}

fn reject_tags(value: &YamlValue, kind: &str) -> EngineResult<()> {
    match value {
        YamlValue::Tagged(tagged) => Err(EngineError::validation(format!(
            "{kind} document uses YAML tag '{}'; documents must be plain data",
            tagged.tag
        ))),
        YamlValue::Sequence(items) => items.iter().try_for_each(|item| reject_tags(item, kind)),
        YamlValue::Mapping(map) => map.iter().try_for_each(|(key, nested)| {
            reject_tags(key, kind)?;
            reject_tags(nested, kind)
        }),
        _ => Ok(()),
    }
}
