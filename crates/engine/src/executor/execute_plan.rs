use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use idle_types::{
    EngineEvent, EngineEventKind, ExecutionMetadata, ExecutionResult, ExecutionStatus, Plan, PlanStep, SkipReason,
    StepFailure, StepFailureKind, StepResult, StepStatus,
};
use idle_util::redact_sensitive;

use super::{EventSink, StepContext, StepOutcome, StepRegistry, TracingEventSink};
use crate::{
    config::EngineConfig,
    error::{EngineError, panic_message},
    provider::{Provider, ProviderMap},
    session::{AuthSessionBroker, SessionAcquirer},
};

/// Runs built plans. One engine may run many plans, even concurrently; every execution gets
/// its own session broker and result accumulator.
pub struct ExecutionEngine {
    registry: Arc<dyn StepRegistry>,
    providers: ProviderMap,
    acquirer: Option<Arc<dyn SessionAcquirer>>,
    event_sink: Arc<dyn EventSink>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<dyn StepRegistry>) -> Self {
        Self {
            registry,
            providers: ProviderMap::new(),
            acquirer: None,
            event_sink: Arc::new(TracingEventSink),
            config: EngineConfig::default(),
        }
    }

    pub fn with_provider(mut self, alias: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(alias.into(), provider);
        self
    }

    pub fn with_providers(mut self, providers: ProviderMap) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn with_session_acquirer(mut self, acquirer: Arc<dyn SessionAcquirer>) -> Self {
        self.acquirer = Some(acquirer);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn providers(&self) -> &ProviderMap {
        &self.providers
    }

    /// Executes `plan` to completion.
    pub fn execute(&self, plan: &Plan) -> ExecutionResult {
        self.execute_with_cancellation(plan, &CancellationToken::new())
    }

    /// Executes `plan`, checking `cancellation` before each primary step.
    ///
    /// Steps run strictly in plan order. The first failed step ends the primary phase; the
    /// plan's on-failure steps then run once, and their own failures are only recorded.
    /// Cancellation marks the remaining steps skipped and does not trigger on-failure steps.
    pub fn execute_with_cancellation(&self, plan: &Plan, cancellation: &CancellationToken) -> ExecutionResult {
        let mut run = Run {
            engine: self,
            plan,
            broker: AuthSessionBroker::new(self.acquirer.clone()),
            events: Vec::new(),
        };
        let started_at = Utc::now();

        info!(
            plan_id = %plan.id,
            workflow = %plan.workflow_name,
            correlation_id = %plan.request.correlation_id,
            mode = %plan.mode,
            step_count = plan.steps.len(),
            "plan execution started"
        );
        run.emit(EngineEventKind::RunStarted, None, format!("executing workflow '{}'", plan.workflow_name));

        let mut step_results = Vec::with_capacity(plan.steps.len());
        let mut cancelled = false;
        let mut failed = false;

        for step in &plan.steps {
            if cancelled || cancellation.is_cancelled() {
                cancelled = true;
                step_results.push(run.skip(step, SkipReason::Cancelled));
                continue;
            }

            let result = run.run_step(step);
            failed = result.is_failed();
            step_results.push(result);
            if failed {
                break;
            }
        }

        let mut on_failure_results = Vec::new();
        if failed && !plan.on_failure_steps.is_empty() {
            run.emit(
                EngineEventKind::OnFailureStarted,
                None,
                format!("running {} on-failure step(s)", plan.on_failure_steps.len()),
            );
            for step in &plan.on_failure_steps {
                on_failure_results.push(run.run_step(step));
            }
            let failures = on_failure_results.iter().filter(|result| result.is_failed()).count();
            run.emit(
                EngineEventKind::OnFailureCompleted,
                None,
                format!("on-failure steps finished with {failures} failure(s)"),
            );
        }

        let metadata = run.teardown();
        let status = ExecutionStatus::from_primary_results(&step_results);
        let completed_at = Utc::now();

        info!(
            plan_id = %plan.id,
            correlation_id = %plan.request.correlation_id,
            status = %status,
            cancelled,
            steps_recorded = step_results.len(),
            on_failure_steps_run = on_failure_results.len(),
            sessions = metadata.sessions_acquired,
            "plan execution finished"
        );
        run.emit(EngineEventKind::RunCompleted, None, format!("execution {status}"));

        ExecutionResult {
            plan_id: plan.id.clone(),
            correlation_id: plan.request.correlation_id.clone(),
            status,
            cancelled,
            step_results,
            on_failure_results,
            events: run.events,
            metadata,
            started_at,
            completed_at,
        }
    }
}

/// State owned by exactly one execution.
struct Run<'a> {
    engine: &'a ExecutionEngine,
    plan: &'a Plan,
    broker: AuthSessionBroker,
    events: Vec<EngineEvent>,
}

impl Run<'_> {
    fn emit(&mut self, kind: EngineEventKind, step: Option<&str>, message: String) {
        let event = EngineEvent {
            kind,
            timestamp: Utc::now(),
            correlation_id: self.plan.request.correlation_id.clone(),
            step: step.map(str::to_string),
            message,
        };
        self.engine.event_sink.emit(&event);
        self.events.push(event);
    }

    fn skip(&mut self, step: &PlanStep, reason: SkipReason) -> StepResult {
        debug!(step = %step.name, reason = %reason, "step skipped");
        self.emit(EngineEventKind::StepSkipped, Some(&step.name), format!("skipped: {reason}"));
        StepResult {
            step_id: step.id.clone(),
            name: step.name.clone(),
            step_type: step.step_type.clone(),
            status: StepStatus::Skipped,
            changed: false,
            skip_reason: Some(reason),
            error: None,
            events: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    fn run_step(&mut self, step: &PlanStep) -> StepResult {
        if let Some(reason) = &step.skip_reason {
            return self.skip(step, reason.clone());
        }
        if self.plan.is_plan_only() {
            return self.skip(step, SkipReason::PlanOnly);
        }

        self.emit(EngineEventKind::StepStarted, Some(&step.name), format!("running {}", step.step_type));
        let started_at = Utc::now();
        let outcome = self.invoke(step);
        let completed_at = Utc::now();

        let (status, changed, error, events) = match outcome {
            Ok(outcome) => match outcome.failure {
                Some(message) => (
                    StepStatus::Failed,
                    outcome.changed,
                    Some(StepFailure {
                        kind: StepFailureKind::StepExecution,
                        message: redact_sensitive(&message),
                    }),
                    outcome.events,
                ),
                None => (StepStatus::Succeeded, outcome.changed, None, outcome.events),
            },
            Err(error) => (StepStatus::Failed, false, Some(error.to_step_failure()), Vec::new()),
        };

        match &error {
            Some(failure) => {
                warn!(step = %step.name, step_type = %step.step_type, kind = ?failure.kind, error = %failure.message, "step failed");
                self.emit(EngineEventKind::StepFailed, Some(&step.name), failure.message.clone());
            }
            None => {
                debug!(step = %step.name, changed, "step succeeded");
                self.emit(
                    EngineEventKind::StepCompleted,
                    Some(&step.name),
                    if changed { "changed".to_string() } else { "no change".to_string() },
                );
            }
        }

        StepResult {
            step_id: step.id.clone(),
            name: step.name.clone(),
            step_type: step.step_type.clone(),
            status,
            changed,
            skip_reason: None,
            error,
            events,
            started_at: Some(started_at),
            completed_at: Some(completed_at),
        }
    }

    /// Runs `test` then, unless already converged, `invoke`. Panics are contained.
    fn invoke(&self, step: &PlanStep) -> Result<StepOutcome, EngineError> {
        let alias = step.provider.as_deref().unwrap_or_default();
        if !step.required_capabilities.is_empty() && !self.engine.providers.contains_key(alias) {
            return Err(EngineError::step_execution(
                &step.name,
                format!("provider '{alias}' is not available to this execution"),
            ));
        }

        let executor = self.engine.registry.executor(&step.step_type).ok_or_else(|| {
            EngineError::step_execution(&step.name, format!("no executor registered for step type '{}'", step.step_type))
        })?;
        let context = StepContext::new(self.plan, step, &self.engine.providers, &self.broker);
        let expected_state = step.expected_state.as_ref();

        let attempt = catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<StepOutcome> {
            if executor.test(&context, &step.inputs, expected_state)? {
                debug!(step = %step.name, "step already converged");
                return Ok(StepOutcome::unchanged());
            }
            executor.invoke(&context, &step.inputs, expected_state)
        }));

        match attempt {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(error)) => Err(classify(&step.name, error)),
            Err(payload) => Err(EngineError::step_execution(
                &step.name,
                format!("step executor panicked: {}", panic_message(payload.as_ref())),
            )),
        }
    }

    fn teardown(&mut self) -> ExecutionMetadata {
        let sessions_acquired = self.broker.session_count();
        let session_disposal_errors = if self.engine.config.dispose_sessions {
            self.broker.dispose_all()
        } else {
            Vec::new()
        };
        for message in &session_disposal_errors {
            self.emit(EngineEventKind::SessionDisposalFailed, None, message.clone());
        }
        ExecutionMetadata {
            sessions_acquired,
            session_disposal_errors,
        }
    }
}

/// Keeps typed engine errors raised inside executors; wraps anything else.
fn classify(step: &str, error: anyhow::Error) -> EngineError {
    match error.downcast::<EngineError>() {
        Ok(engine_error) => engine_error,
        Err(other) => EngineError::step_execution(step, format!("{other:#}")),
    }
}
