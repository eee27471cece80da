//! Execution outcomes: per-step results, engine events, and the overall execution result.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SkipReason;

/// Status of an executed step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepStatus {
    /// Step did not run (condition, cancellation, or plan-only).
    Skipped,
    /// Step converged, with or without changes.
    Succeeded,
    /// Step attempted but failed.
    Failed,
}

/// Terminal status of one execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// `Failed` exactly when a primary step failed.
    pub fn from_primary_results(results: &[StepResult]) -> Self {
        if results.iter().any(|result| result.status == StepStatus::Failed) {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Completed => f.write_str("Completed"),
            ExecutionStatus::Failed => f.write_str("Failed"),
        }
    }
}

/// Error category recorded on a failed step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepFailureKind {
    MethodNotImplemented,
    StepExecution,
    SessionAcquisition,
}

/// Serializable failure attached to a [`StepResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepFailure {
    pub kind: StepFailureKind,
    pub message: String,
}

/// Event emitted by a step executor while running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepEvent {
    /// Short event type, e.g. `AttributeChanged`.
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl StepEvent {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Result of one plan step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step_id: String,
    pub name: String,
    pub step_type: String,
    pub status: StepStatus,
    /// True when the step changed the target system.
    pub changed: bool,
    pub skip_reason: Option<SkipReason>,
    pub error: Option<StepFailure>,
    /// Events emitted by the step executor.
    pub events: Vec<StepEvent>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// Lifecycle milestones emitted by the execution engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineEventKind {
    RunStarted,
    StepStarted,
    StepCompleted,
    StepSkipped,
    StepFailed,
    OnFailureStarted,
    OnFailureCompleted,
    SessionDisposalFailed,
    RunCompleted,
}

/// Engine-level event delivered to event sinks and kept on the execution result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineEvent {
    pub kind: EngineEventKind,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    /// Step name, when the event concerns a step.
    pub step: Option<String>,
    pub message: String,
}

/// Non-fatal bookkeeping gathered during an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ExecutionMetadata {
    /// Number of distinct auth sessions acquired.
    pub sessions_acquired: usize,
    /// Disposal failures reported by the session acquirer at teardown.
    pub session_disposal_errors: Vec<String>,
}

/// Outcome of executing one plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub correlation_id: String,
    pub status: ExecutionStatus,
    /// True when the run stopped because of cancellation.
    pub cancelled: bool,
    /// Primary step results in plan order, ending at the first failure.
    pub step_results: Vec<StepResult>,
    /// Compensation step results, recorded separately.
    pub on_failure_results: Vec<StepResult>,
    pub events: Vec<EngineEvent>,
    pub metadata: ExecutionMetadata,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// First failed primary step, if any.
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.step_results.iter().find(|result| result.is_failed())
    }

    pub fn result_for(&self, step_name: &str) -> Option<&StepResult> {
        self.step_results
            .iter()
            .chain(self.on_failure_results.iter())
            .find(|result| result.name == step_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: StepStatus) -> StepResult {
        StepResult {
            step_id: format!("id-{name}"),
            name: name.into(),
            step_type: "IdLE.Step.Noop".into(),
            status,
            changed: false,
            skip_reason: None,
            error: None,
            events: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn status_is_failed_only_with_a_failed_primary_step() {
        let ok = vec![result("a", StepStatus::Succeeded), result("b", StepStatus::Skipped)];
        assert_eq!(ExecutionStatus::from_primary_results(&ok), ExecutionStatus::Completed);

        let failed = vec![result("a", StepStatus::Succeeded), result("b", StepStatus::Failed)];
        assert_eq!(ExecutionStatus::from_primary_results(&failed), ExecutionStatus::Failed);
        assert_eq!(ExecutionStatus::from_primary_results(&[]), ExecutionStatus::Completed);
    }

    #[test]
    fn step_event_carries_optional_data() {
        let event = StepEvent::new("AttributeChanged", "Department updated").with_data(serde_json::json!({"from": "IT"}));
        assert_eq!(event.kind, "AttributeChanged");
        assert_eq!(event.data.as_ref().and_then(|data| data.get("from")), Some(&serde_json::json!("IT")));
    }
}
