//! # IdLE Types
//!
//! Value objects shared by the IdLE plan builder and execution engine: the lifecycle
//! [`Request`], the declarative [`WorkflowDefinition`], the built [`Plan`], and the
//! [`ExecutionResult`] produced by running it. Everything here is plain data and serializable.

pub mod capability;
pub mod execution;
pub mod plan;
pub mod request;
pub mod workflow;

pub use capability::{CapabilitySet, ProviderCapabilityDescriptor, is_valid_capability_id};
pub use execution::{
    EngineEvent, EngineEventKind, ExecutionMetadata, ExecutionResult, ExecutionStatus, StepEvent, StepFailure, StepFailureKind,
    StepResult, StepStatus,
};
pub use plan::{FrozenCondition, Plan, PlanMode, PlanStep, SkipReason};
pub use request::{LifecycleEvent, Request};
pub use workflow::{AUTH_SESSION_NAME_KEY, AUTH_SESSION_OPTIONS_KEY, Condition, ConditionKind, StepDefinition, WorkflowDefinition};
