//! Error taxonomy for plan building and execution.

use std::{any::Any, fmt};

use idle_types::{StepFailure, StepFailureKind};
use idle_util::redact_sensitive;
use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Main error type for IdLE plan building and execution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The workflow is malformed or not data-only, or does not fit the request.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A template placeholder is syntactically malformed.
    #[error("template resolution error at {path}: {message}")]
    TemplateResolution { path: String, message: String },

    /// A condition expression could not be parsed or was rejected as unsafe.
    #[error("condition evaluation error in step '{step}': {message}")]
    ConditionEvaluation { step: String, message: String },

    /// One or more steps need capabilities their provider does not declare.
    #[error(transparent)]
    CapabilityMismatch(#[from] CapabilityMismatchError),

    /// The provider has no method registered for the requested capability.
    #[error("provider '{provider}' does not implement method '{method}'")]
    MethodNotImplemented { provider: String, method: String },

    /// A step failed while running.
    #[error("step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },

    /// The session acquirer failed to produce a session.
    #[error("failed to acquire auth session '{name}': {message}")]
    SessionAcquisition { name: String, message: String },

    /// Plan export could not be rendered or read.
    #[error("plan export error: {message}")]
    Export { message: String },

    /// Engine configuration could not be loaded or is invalid.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn template(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TemplateResolution {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn condition(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConditionEvaluation {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn method_not_implemented(provider: impl Into<String>, method: impl Into<String>) -> Self {
        Self::MethodNotImplemented {
            provider: provider.into(),
            method: method.into(),
        }
    }

    pub fn step_execution(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepExecution {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn session_acquisition(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SessionAcquisition {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn export(message: impl Into<String>) -> Self {
        Self::Export { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Category recorded when this error ends a step.
    pub fn failure_kind(&self) -> StepFailureKind {
        match self {
            EngineError::MethodNotImplemented { .. } => StepFailureKind::MethodNotImplemented,
            EngineError::SessionAcquisition { .. } => StepFailureKind::SessionAcquisition,
            _ => StepFailureKind::StepExecution,
        }
    }

    /// Serializable, redacted form stored on a failed `StepResult`.
    pub fn to_step_failure(&self) -> StepFailure {
        StepFailure {
            kind: self.failure_kind(),
            message: redact_sensitive(&self.to_string()),
        }
    }
}

/// A single step whose provider lacks required capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityGap {
    pub step: String,
    pub step_type: String,
    pub provider: String,
    /// Required capability ids the provider does not declare, sorted.
    pub missing: Vec<String>,
    /// False when the provider alias is not known at all.
    pub provider_registered: bool,
}

impl fmt::Display for CapabilityGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step '{}' ({}) requires [{}] from provider '{}'",
            self.step,
            self.step_type,
            self.missing.join(", "),
            self.provider
        )?;
        if !self.provider_registered {
            f.write_str(" (provider not registered)")?;
        }
        Ok(())
    }
}

/// Aggregated capability mismatches for a whole workflow.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("capability mismatch in {} step(s): {}", .gaps.len(), describe_gaps(.gaps))]
pub struct CapabilityMismatchError {
    pub gaps: Vec<CapabilityGap>,
}

impl CapabilityMismatchError {
    /// Every missing capability id across all gaps, sorted and de-duplicated.
    pub fn missing_capabilities(&self) -> Vec<&str> {
        let mut missing: Vec<&str> = self
            .gaps
            .iter()
            .flat_map(|gap| gap.missing.iter().map(String::as_str))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }
}

fn describe_gaps(gaps: &[CapabilityGap]) -> String {
    gaps.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
