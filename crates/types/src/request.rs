//! Lifecycle request value object.
//!
//! A [`Request`] captures the business intent handed to the engine: which lifecycle event is
//! happening, who asked for it, and the input/desired-state data workflow templates read from.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value, json};

/// Category of identity change a request or workflow is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LifecycleEvent {
    /// A new identity enters the organization.
    Joiner,
    /// An existing identity changes role, department, or location.
    Mover,
    /// An identity leaves the organization.
    Leaver,
    /// Host-defined lifecycle event.
    Custom(String),
}

impl LifecycleEvent {
    /// Case-insensitive comparison used when matching requests against workflows.
    pub fn matches(&self, other: &LifecycleEvent) -> bool {
        self.to_string().eq_ignore_ascii_case(&other.to_string())
    }
}

impl From<String> for LifecycleEvent {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "joiner" => LifecycleEvent::Joiner,
            "mover" => LifecycleEvent::Mover,
            "leaver" => LifecycleEvent::Leaver,
            _ => LifecycleEvent::Custom(value.trim().to_string()),
        }
    }
}

impl From<&str> for LifecycleEvent {
    fn from(value: &str) -> Self {
        LifecycleEvent::from(value.to_string())
    }
}

impl From<LifecycleEvent> for String {
    fn from(value: LifecycleEvent) -> Self {
        value.to_string()
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Joiner => f.write_str("Joiner"),
            LifecycleEvent::Mover => f.write_str("Mover"),
            LifecycleEvent::Leaver => f.write_str("Leaver"),
            LifecycleEvent::Custom(name) => f.write_str(name),
        }
    }
}

/// Business request driving a single plan build.
///
/// Requests are plain data. The engine only ever borrows them, so once a request has been
/// handed to the plan builder it is effectively frozen for the lifetime of the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    /// Lifecycle event this request represents.
    pub lifecycle_event: LifecycleEvent,
    /// Correlation identifier propagated to plans, results, and events.
    #[serde(default = "generate_correlation_id")]
    pub correlation_id: String,
    /// Optional identity of whoever initiated the request.
    #[serde(default)]
    pub actor: Option<String>,
    /// Free-form input data, readable from templates as `Request.Input.*`.
    #[serde(default)]
    pub input: IndexMap<String, Value>,
    /// Desired target state, readable from templates as `Request.DesiredState.*`.
    #[serde(default)]
    pub desired_state: IndexMap<String, Value>,
}

impl Request {
    /// Creates a request with a freshly generated correlation identifier.
    pub fn new(lifecycle_event: impl Into<LifecycleEvent>) -> Self {
        Self {
            lifecycle_event: lifecycle_event.into(),
            correlation_id: generate_correlation_id(),
            actor: None,
            input: IndexMap::new(),
            desired_state: IndexMap::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }

    pub fn with_desired_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.desired_state.insert(key.into(), value);
        self
    }

    /// Builds the JSON document templates and conditions are resolved against.
    ///
    /// The document is rooted at `Request` and uses the same PascalCase names authors write in
    /// placeholders, e.g. `{{Request.Input.UserId}}` or `{{Request.CorrelationId}}`.
    pub fn template_context(&self) -> Value {
        json!({
            "Request": {
                "LifecycleEvent": self.lifecycle_event.to_string(),
                "CorrelationId": self.correlation_id,
                "Actor": self.actor,
                "Input": to_json_object(&self.input),
                "DesiredState": to_json_object(&self.desired_state),
            }
        })
    }
}

fn to_json_object(values: &IndexMap<String, Value>) -> Value {
    let map: JsonMap<String, Value> = values.iter().map(|(key, value)| (key.clone(), value.clone())).collect();
    Value::Object(map)
}

fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
