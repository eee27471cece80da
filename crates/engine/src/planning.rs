//! Plan building: compiles a workflow and a request into an immutable [`Plan`].
//!
//! Each step is validated as plain data, its condition is evaluated once and frozen, its `with`
//! block is resolved into a snapshot of inputs, and its provider's capabilities are checked.
//! Capability gaps are collected across every step and reported together; any other problem
//! aborts the build immediately. No partial plan is ever returned.

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info};

use idle_types::{
    Condition, FrozenCondition, Plan, PlanMode, PlanStep, ProviderCapabilityDescriptor, Request, SkipReason,
    StepDefinition, WorkflowDefinition,
    workflow::validation::{validate_resolved_reserved_keys, validate_workflow_definition},
};
use idle_util::canonical_json;

use crate::{
    capability::{CapabilityResolver, StepMetadataCatalog, derive_required_capabilities},
    condition::evaluate_condition,
    config::EngineConfig,
    error::{EngineError, EngineResult},
    templates::{TemplateContext, resolve_map, resolve_value},
};

/// Section of a workflow a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Primary,
    OnFailure,
}

impl Section {
    fn location(self, index: usize) -> String {
        match self {
            Section::Primary => format!("steps[{index}]"),
            Section::OnFailure => format!("on_failure_steps[{index}]"),
        }
    }

    /// Deterministic step id, one-based: `step-01`, `onfailure-01`.
    fn step_id(self, index: usize) -> String {
        match self {
            Section::Primary => format!("step-{:02}", index + 1),
            Section::OnFailure => format!("onfailure-{:02}", index + 1),
        }
    }
}

/// Builds plans from workflows, a step catalog, and provider capability descriptors.
pub struct PlanBuilder<'a> {
    catalog: &'a dyn StepMetadataCatalog,
    descriptors: &'a ProviderCapabilityDescriptor,
    config: EngineConfig,
    mode: PlanMode,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(catalog: &'a dyn StepMetadataCatalog, descriptors: &'a ProviderCapabilityDescriptor) -> Self {
        Self {
            catalog,
            descriptors,
            config: EngineConfig::default(),
            mode: PlanMode::Ready,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Marks built plans as previews that never invoke step executors.
    pub fn plan_only(mut self) -> Self {
        self.mode = PlanMode::PlanOnly;
        self
    }

    /// Compiles `workflow` against `request`.
    pub fn build(&self, workflow: &WorkflowDefinition, request: &Request) -> EngineResult<Plan> {
        validate_workflow_definition(workflow, self.config.max_value_depth).map_err(EngineError::validation)?;

        if !workflow.lifecycle_event.matches(&request.lifecycle_event) {
            return Err(EngineError::validation(format!(
                "workflow '{}' handles {} requests but the request is {}",
                workflow.name, workflow.lifecycle_event, request.lifecycle_event
            )));
        }

        let context = TemplateContext::from_request(request);
        let mut resolver = CapabilityResolver::new(self.descriptors);

        let steps = self.build_section(Section::Primary, &workflow.steps, &context, &mut resolver)?;
        let on_failure_steps = self.build_section(Section::OnFailure, &workflow.on_failure_steps, &context, &mut resolver)?;

        resolver.finish()?;

        let plan = Plan {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            mode: self.mode,
            workflow_name: workflow.name.clone(),
            request: request.clone(),
            steps,
            on_failure_steps,
        };

        info!(
            plan_id = %plan.id,
            workflow = %plan.workflow_name,
            correlation_id = %request.correlation_id,
            mode = %plan.mode,
            steps = plan.steps.len(),
            runnable = plan.runnable_steps().count(),
            on_failure_steps = plan.on_failure_steps.len(),
            "plan built"
        );
        Ok(plan)
    }

    fn build_section(
        &self,
        section: Section,
        definitions: &[StepDefinition],
        context: &TemplateContext,
        resolver: &mut CapabilityResolver<'_>,
    ) -> EngineResult<Vec<PlanStep>> {
        definitions
            .iter()
            .enumerate()
            .map(|(index, definition)| self.build_step(section, index, definition, context, resolver))
            .collect()
    }

    fn build_step(
        &self,
        section: Section,
        index: usize,
        definition: &StepDefinition,
        context: &TemplateContext,
        resolver: &mut CapabilityResolver<'_>,
    ) -> EngineResult<PlanStep> {
        let location = section.location(index);

        let catalog_capabilities = self.catalog.required_capabilities(&definition.step_type).ok_or_else(|| {
            EngineError::validation(format!(
                "{location}: step '{}' uses unknown step type '{}'",
                definition.name, definition.step_type
            ))
        })?;
        let required_capabilities =
            derive_required_capabilities(&catalog_capabilities, &definition.requires_capabilities);

        let condition = definition.effective_condition();
        let should_run =
            evaluate_condition(&condition, context).map_err(|message| EngineError::condition(&definition.name, message))?;

        let inputs = resolve_map(&definition.with, context, &format!("{location}.with"))?;
        let resolved = StepDefinition {
            with: inputs,
            ..definition.clone()
        };
        validate_resolved_reserved_keys(&resolved, &location).map_err(EngineError::validation)?;

        let expected_state = definition
            .expected_state
            .as_ref()
            .map(|value| resolve_value(value, context, &format!("{location}.expected_state")))
            .transpose()?;

        let provider = definition
            .provider
            .clone()
            .unwrap_or_else(|| self.config.default_provider.clone());
        resolver.check(&definition.name, &definition.step_type, &provider, &required_capabilities);

        let skip_reason = (!should_run).then(|| SkipReason::ConditionNotMet {
            condition: describe_condition(&condition),
        });

        debug!(
            step = %definition.name,
            step_type = %definition.step_type,
            provider = %provider,
            condition = %condition.kind(),
            run = should_run,
            "plan step resolved"
        );

        Ok(PlanStep {
            id: section.step_id(index),
            name: definition.name.clone(),
            step_type: definition.step_type.clone(),
            provider: Some(provider),
            condition: FrozenCondition {
                kind: condition.kind(),
                expression: condition.expression().map(str::to_string),
                result: should_run,
            },
            skip_reason,
            inputs: resolved.with,
            expected_state,
            required_capabilities,
        })
    }
}

fn describe_condition(condition: &Condition) -> String {
    match condition.expression() {
        Some(expression) => format!("{}: {expression}", condition.kind()),
        None => condition.kind().to_string(),
    }
}

/// Canonical rendering of everything in a plan except its id and creation time.
///
/// Two builds from identical inputs produce identical fingerprints.
pub fn plan_fingerprint(plan: &Plan) -> EngineResult<String> {
    let steps = serde_json::to_value(&plan.steps).map_err(|error| EngineError::export(error.to_string()))?;
    let on_failure =
        serde_json::to_value(&plan.on_failure_steps).map_err(|error| EngineError::export(error.to_string()))?;
    let document: Value = json!({
        "mode": plan.mode,
        "workflow": plan.workflow_name,
        "steps": steps,
        "on_failure_steps": on_failure,
    });
    Ok(canonical_json(&document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::StaticStepCatalog;
    use idle_types::{AUTH_SESSION_NAME_KEY, AUTH_SESSION_OPTIONS_KEY, LifecycleEvent};
    use serde_json::json;

    fn catalog() -> StaticStepCatalog {
        StaticStepCatalog::new()
            .register("IdLE.Step.EnsureAttribute", ["IdLE.Identity.Read", "IdLE.Identity.Attribute.Ensure"])
            .register("IdLE.Step.Disable", ["IdLE.Identity.Disable"])
            .register("IdLE.Step.Notify", Vec::<String>::new())
    }

    fn descriptors() -> ProviderCapabilityDescriptor {
        ProviderCapabilityDescriptor::new().with_provider(
            "Identity",
            ["IdLE.Identity.Read", "IdLE.Identity.Attribute.Ensure", "IdLE.Identity.Disable"],
        )
    }

    fn request() -> Request {
        Request::new(LifecycleEvent::Joiner)
            .with_correlation_id("corr-1")
            .with_input("UserId", json!("jdoe"))
            .with_input("Mailbox", json!(false))
            .with_desired_state("Department", json!("IT"))
    }

    fn workflow(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "joiner".into(),
            lifecycle_event: LifecycleEvent::Joiner,
            description: None,
            steps,
            on_failure_steps: Vec::new(),
        }
    }

    #[test]
    fn resolves_inputs_and_freezes_conditions() {
        let catalog = catalog();
        let descriptors = descriptors();
        let definition = workflow(vec![
            StepDefinition::new("ensure", "IdLE.Step.EnsureAttribute")
                .with_param("IdentityKey", json!("{{Request.Input.UserId}}"))
                .with_param("Attributes", json!({"Department": "{{Request.DesiredState.Department}}"})),
            StepDefinition::new("mailbox", "IdLE.Step.Notify").with_condition(Condition::When("Request.Input.Mailbox".into())),
        ]);

        let plan = PlanBuilder::new(&catalog, &descriptors).build(&definition, &request()).expect("plan");

        let ensure = &plan.steps[0];
        assert_eq!(ensure.id, "step-01");
        assert_eq!(ensure.inputs["IdentityKey"], json!("jdoe"));
        assert_eq!(ensure.inputs["Attributes"]["Department"], json!("IT"));
        assert_eq!(ensure.provider.as_deref(), Some("Identity"));
        assert_eq!(
            ensure.required_capabilities,
            vec!["IdLE.Identity.Attribute.Ensure".to_string(), "IdLE.Identity.Read".to_string()]
        );

        let mailbox = &plan.steps[1];
        assert!(!mailbox.condition.result);
        assert_eq!(
            mailbox.skip_reason,
            Some(SkipReason::ConditionNotMet {
                condition: "When: Request.Input.Mailbox".into()
            })
        );
        assert_eq!(plan.mode, PlanMode::Ready);
    }

    #[test]
    fn lifecycle_mismatch_is_a_validation_error() {
        let catalog = catalog();
        let descriptors = descriptors();
        let leaver = Request::new(LifecycleEvent::Leaver);
        let error = PlanBuilder::new(&catalog, &descriptors)
            .build(&workflow(vec![StepDefinition::new("notify", "IdLE.Step.Notify")]), &leaver)
            .expect_err("mismatch");
        assert!(matches!(error, EngineError::Validation { .. }), "{error}");
        assert!(error.to_string().contains("Leaver"), "{error}");
    }

    #[test]
    fn unknown_step_type_is_rejected() {
        let catalog = catalog();
        let descriptors = descriptors();
        let definition = workflow(vec![StepDefinition::new("x", "IdLE.Step.DoesNotExist")]);
        let error = PlanBuilder::new(&catalog, &descriptors)
            .build(&definition, &request())
            .expect_err("unknown type");
        assert!(error.to_string().contains("IdLE.Step.DoesNotExist"));
    }

    #[test]
    fn malformed_template_and_condition_abort_the_build() {
        let catalog = catalog();
        let descriptors = descriptors();

        let definition =
            workflow(vec![StepDefinition::new("x", "IdLE.Step.Notify").with_param("Message", json!("{{Request.Input"))]);
        let error = PlanBuilder::new(&catalog, &descriptors).build(&definition, &request()).unwrap_err();
        assert!(matches!(error, EngineError::TemplateResolution { .. }), "{error}");

        let definition = workflow(vec![
            StepDefinition::new("x", "IdLE.Step.Notify").with_condition(Condition::When("Invoke-Thing()".into())),
        ]);
        let error = PlanBuilder::new(&catalog, &descriptors).build(&definition, &request()).unwrap_err();
        assert!(matches!(error, EngineError::ConditionEvaluation { ref step, .. } if step == "x"), "{error}");
    }

    #[test]
    fn resolved_session_name_must_be_a_string() {
        let catalog = catalog();
        let descriptors = descriptors();
        let definition = workflow(vec![
            StepDefinition::new("x", "IdLE.Step.Notify")
                .with_param(AUTH_SESSION_NAME_KEY, json!("{{Request.Input.Missing}}"))
                .with_param(AUTH_SESSION_OPTIONS_KEY, json!({"Role": "Reader"})),
        ]);
        let error = PlanBuilder::new(&catalog, &descriptors).build(&definition, &request()).unwrap_err();
        assert!(error.to_string().contains(AUTH_SESSION_NAME_KEY), "{error}");
    }

    #[test]
    fn resolved_session_options_must_be_a_map() {
        let catalog = catalog();
        let descriptors = descriptors();
        let definition = workflow(vec![
            StepDefinition::new("x", "IdLE.Step.Notify")
                .with_param(AUTH_SESSION_NAME_KEY, json!("Directory"))
                .with_param(AUTH_SESSION_OPTIONS_KEY, json!("{{Request.Input.SessionOptions}}")),
        ]);

        let injected = request().with_input("SessionOptions", json!("{{Request.Input.UserId}}"));
        let error = PlanBuilder::new(&catalog, &descriptors).build(&definition, &injected).unwrap_err();
        assert!(matches!(error, EngineError::Validation { .. }), "{error}");
        assert!(error.to_string().contains(AUTH_SESSION_OPTIONS_KEY), "{error}");

        let mapped = request().with_input("SessionOptions", json!({"Role": "Reader"}));
        let plan = PlanBuilder::new(&catalog, &descriptors).build(&definition, &mapped).expect("plan");
        assert_eq!(plan.steps[0].inputs[AUTH_SESSION_OPTIONS_KEY], json!({"Role": "Reader"}));
    }

    #[test]
    fn skipped_steps_still_need_capabilities() {
        let catalog = catalog();
        let descriptors = ProviderCapabilityDescriptor::new().with_provider("Identity", ["IdLE.Identity.Read"]);
        let definition = workflow(vec![
            StepDefinition::new("disable", "IdLE.Step.Disable").with_condition(Condition::When("false".into())),
        ]);
        let error = PlanBuilder::new(&catalog, &descriptors).build(&definition, &request()).unwrap_err();
        let EngineError::CapabilityMismatch(mismatch) = error else {
            panic!("expected capability mismatch");
        };
        assert_eq!(mismatch.missing_capabilities(), vec!["IdLE.Identity.Disable"]);
    }

    #[test]
    fn on_failure_steps_get_their_own_ids_and_plan_only_mode_sticks() {
        let catalog = catalog();
        let descriptors = descriptors();
        let mut definition = workflow(vec![StepDefinition::new("notify", "IdLE.Step.Notify")]);
        definition.on_failure_steps.push(StepDefinition::new("rollback", "IdLE.Step.Disable").with_provider("Identity"));

        let plan = PlanBuilder::new(&catalog, &descriptors)
            .plan_only()
            .build(&definition, &request())
            .expect("plan");
        assert_eq!(plan.on_failure_steps[0].id, "onfailure-01");
        assert!(plan.is_plan_only());
    }

    #[test]
    fn fingerprint_ignores_id_and_timestamp() {
        let catalog = catalog();
        let descriptors = descriptors();
        let definition = workflow(vec![
            StepDefinition::new("ensure", "IdLE.Step.EnsureAttribute").with_param("IdentityKey", json!("{{Request.Input.UserId}}")),
        ]);
        let builder = PlanBuilder::new(&catalog, &descriptors);
        let first = builder.build(&definition, &request()).expect("first");
        let second = builder.build(&definition, &request()).expect("second");

        assert_ne!(first.id, second.id);
        assert_eq!(plan_fingerprint(&first).unwrap(), plan_fingerprint(&second).unwrap());
        assert_eq!(first.steps, second.steps);
    }
}
