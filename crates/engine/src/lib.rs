//! # IdLE Engine
//!
//! Plan builder and execution engine for Joiner/Mover/Leaver identity lifecycle workflows.
//!
//! A host hands the [`PlanBuilder`] a declarative [`WorkflowDefinition`](idle_types::WorkflowDefinition)
//! and a [`Request`](idle_types::Request). The builder validates that the workflow is plain data,
//! resolves `{{Request.*}}` templates, evaluates conditions once, and checks that every step's
//! provider declares the capabilities it needs. The resulting [`Plan`](idle_types::Plan) is frozen.
//!
//! The [`ExecutionEngine`] then runs the plan's steps in order through a host [`StepRegistry`],
//! dispatching provider calls through capability-indexed method tables and caching auth sessions
//! per execution. The first failure stops the primary steps and runs the plan's on-failure steps.
//!
//! ```no_run
//! use std::sync::Arc;
//! use idle_engine::{ExecutionEngine, PlanBuilder, StaticStepCatalog, StaticStepRegistry, describe_providers};
//! use idle_types::{LifecycleEvent, Request};
//!
//! # fn main() -> Result<(), idle_engine::EngineError> {
//! let workflow = idle_engine::load_workflow_file(std::path::Path::new("joiner.yaml"))?;
//! let request = Request::new(LifecycleEvent::Joiner);
//! let catalog = StaticStepCatalog::new();
//! let engine = ExecutionEngine::new(Arc::new(StaticStepRegistry::new()));
//! let descriptors = describe_providers(engine.providers());
//!
//! let plan = PlanBuilder::new(&catalog, &descriptors).build(&workflow, &request)?;
//! let result = engine.execute(&plan);
//! println!("{}", result.status);
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod condition;
pub mod config;
pub mod document;
pub mod error;
pub mod executor;
pub mod export;
pub mod planning;
pub mod provider;
pub mod session;
pub mod templates;

pub use capability::{CapabilityResolver, StaticStepCatalog, StepMetadataCatalog, derive_required_capabilities};
pub use condition::{evaluate_condition, evaluate_expression};
pub use config::{EngineConfig, default_config_path, load_config, load_config_from_path};
pub use document::{load_request_file, load_workflow_file, parse_request, parse_workflow};
pub use error::{CapabilityGap, CapabilityMismatchError, EngineError, EngineResult};
pub use executor::{
    EventSink, ExecutionEngine, MemoryEventSink, StaticStepRegistry, StepContext, StepExecutor, StepOutcome, StepRegistry,
    TracingEventSink,
};
pub use export::{PlanExport, SCHEMA_VERSION, export_execution, export_plan, read_plan_export};
pub use planning::{PlanBuilder, plan_fingerprint};
pub use provider::{
    MethodSignature, Provider, ProviderCall, ProviderMap, ProviderMethodInvoker, ProviderMethodTable, TableProvider,
    describe_providers,
};
pub use session::{AuthSession, AuthSessionBroker, SessionAcquirer, SessionHandle, options_key, session_acquirer};
pub use templates::{TemplateContext, resolve_map, resolve_value};
