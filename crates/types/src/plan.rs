//! Built plans: frozen, ordered, auditable step sequences.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConditionKind, Request, workflow::AUTH_SESSION_NAME_KEY};

/// Lifecycle mode of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PlanMode {
    /// Preview only; executing it records every step as skipped.
    PlanOnly,
    /// Built and ready to execute.
    #[default]
    Ready,
    /// Reported by exports produced from an execution result.
    Executed,
}

impl fmt::Display for PlanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlanMode::PlanOnly => "PlanOnly",
            PlanMode::Ready => "Ready",
            PlanMode::Executed => "Executed",
        };
        f.write_str(label)
    }
}

/// Why a step did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The build-time condition evaluated to "do not run".
    ConditionNotMet { condition: String },
    /// Execution was cancelled before the step started.
    Cancelled,
    /// The plan was built in plan-only mode.
    PlanOnly,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ConditionNotMet { condition } => write!(f, "condition not met: {condition}"),
            SkipReason::Cancelled => f.write_str("cancelled"),
            SkipReason::PlanOnly => f.write_str("plan-only"),
        }
    }
}

/// Condition as authored plus the outcome frozen at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenCondition {
    pub kind: ConditionKind,
    /// Raw expression text, absent for `Always`.
    pub expression: Option<String>,
    /// True when the step should run.
    pub result: bool,
}

impl FrozenCondition {
    pub fn always() -> Self {
        Self {
            kind: ConditionKind::Always,
            expression: None,
            result: true,
        }
    }
}

/// One resolved step inside a [`Plan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Deterministic identifier, e.g. `step-01` or `onfailure-02`.
    pub id: String,
    pub name: String,
    pub step_type: String,
    /// Provider alias the step dispatches to.
    pub provider: Option<String>,
    pub condition: FrozenCondition,
    /// Set when the condition decided the step must not run.
    pub skip_reason: Option<SkipReason>,
    /// `with` values resolved once at build time.
    pub inputs: IndexMap<String, Value>,
    pub expected_state: Option<Value>,
    /// Union of catalog and declared capabilities, sorted.
    pub required_capabilities: Vec<String>,
}

impl PlanStep {
    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    /// Auth session name requested through the reserved `AuthSessionName` input.
    pub fn auth_session_name(&self) -> Option<&str> {
        self.inputs.get(AUTH_SESSION_NAME_KEY).and_then(Value::as_str)
    }
}

/// Immutable result of compiling a workflow against a request.
///
/// `id` and `created_at` are the only fields that differ between two builds of identical inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub mode: PlanMode,
    pub workflow_name: String,
    pub request: Request,
    /// Primary steps in workflow order, skipped steps included.
    pub steps: Vec<PlanStep>,
    /// Compensation steps in workflow order.
    pub on_failure_steps: Vec<PlanStep>,
}

impl Plan {
    pub fn step(&self, name: &str) -> Option<&PlanStep> {
        self.steps
            .iter()
            .chain(self.on_failure_steps.iter())
            .find(|step| step.name == name)
    }

    /// Steps that will run when the plan executes.
    pub fn runnable_steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|step| !step.is_skipped())
    }

    pub fn is_plan_only(&self) -> bool {
        self.mode == PlanMode::PlanOnly
    }
}
