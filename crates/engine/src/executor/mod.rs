//! Execution engine: runs a built plan's steps in order through a host step registry.
//!
//! - `execute_plan`: the per-execution state machine and failure/compensation handling
//! - `events`: engine event sinks
//!
//! Step executors are host code. They receive a [`StepContext`] giving access to the step's
//! frozen inputs, the execution's providers, and its auth session broker.

mod events;
mod execute_plan;

pub use events::{EventSink, MemoryEventSink, TracingEventSink};
pub use execute_plan::ExecutionEngine;

use std::{collections::BTreeMap, fmt, sync::Arc};

use indexmap::IndexMap;
use serde_json::Value;

use idle_types::{Plan, PlanStep, StepEvent};

use crate::{
    error::EngineResult,
    provider::{Provider, ProviderMap, ProviderMethodInvoker},
    session::{AuthSession, AuthSessionBroker},
};

/// What a step executor reports after `invoke`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// True when the target system was modified.
    pub changed: bool,
    /// Set when the step ran but could not converge.
    pub failure: Option<String>,
    pub events: Vec<StepEvent>,
}

impl StepOutcome {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn changed() -> Self {
        Self {
            changed: true,
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_event(mut self, event: StepEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// Host implementation of one step type.
///
/// `test` reports whether the target is already converged; when it returns `true` the engine
/// records success without calling `invoke`.
pub trait StepExecutor: Send + Sync {
    fn test(&self, _context: &StepContext<'_>, _with: &IndexMap<String, Value>, _expected_state: Option<&Value>) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn invoke(
        &self,
        context: &StepContext<'_>,
        with: &IndexMap<String, Value>,
        expected_state: Option<&Value>,
    ) -> anyhow::Result<StepOutcome>;
}

/// Resolves step types to executors.
pub trait StepRegistry: Send + Sync {
    fn executor(&self, step_type: &str) -> Option<Arc<dyn StepExecutor>>;
}

/// In-memory step registry.
#[derive(Clone, Default)]
pub struct StaticStepRegistry {
    executors: BTreeMap<String, Arc<dyn StepExecutor>>,
}

impl StaticStepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, step_type: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        self.executors.insert(step_type.into(), executor);
        self
    }
}

impl StepRegistry for StaticStepRegistry {
    fn executor(&self, step_type: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(step_type).cloned()
    }
}

impl fmt::Debug for StaticStepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticStepRegistry")
            .field("step_types", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Execution context handed to step executors.
pub struct StepContext<'a> {
    plan: &'a Plan,
    step: &'a PlanStep,
    providers: &'a ProviderMap,
    broker: &'a AuthSessionBroker,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(plan: &'a Plan, step: &'a PlanStep, providers: &'a ProviderMap, broker: &'a AuthSessionBroker) -> Self {
        Self {
            plan,
            step,
            providers,
            broker,
        }
    }

    pub fn plan(&self) -> &Plan {
        self.plan
    }

    pub fn step(&self) -> &PlanStep {
        self.step
    }

    pub fn correlation_id(&self) -> &str {
        &self.plan.request.correlation_id
    }

    pub fn provider_alias(&self) -> Option<&str> {
        self.step.provider.as_deref()
    }

    /// The provider registered under this step's alias.
    pub fn provider(&self) -> Option<&Arc<dyn Provider>> {
        self.provider_alias().and_then(|alias| self.providers.get(alias))
    }

    pub fn providers(&self) -> &ProviderMap {
        self.providers
    }

    /// Calls `method` on this step's provider, passing the step's frozen inputs so any
    /// `AuthSessionName` / `AuthSessionOptions` are honored.
    pub fn invoke_provider(&self, method: &str, arguments: Vec<Value>) -> EngineResult<Value> {
        let alias = self.provider_alias().unwrap_or_default();
        ProviderMethodInvoker::new(self.providers, self.broker, &self.step.name).invoke(
            alias,
            method,
            arguments,
            &self.step.inputs,
        )
    }

    /// Acquires (or reuses) a named session directly.
    pub fn session(&self, name: &str, options: &Value) -> EngineResult<AuthSession> {
        self.broker.acquire(name, options)
    }
}
