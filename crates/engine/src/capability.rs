//! Capability negotiation between steps and providers.
//!
//! A step's required capabilities come from the step metadata catalog plus whatever the
//! workflow declares. They are checked against the provider alias's declared capability set;
//! every gap across the whole workflow is collected before the build reports a mismatch.

use std::collections::{BTreeMap, BTreeSet};

use idle_types::ProviderCapabilityDescriptor;
use tracing::debug;

use crate::error::{CapabilityGap, CapabilityMismatchError};

/// Maps step types to the capabilities they require.
///
/// Returning `None` means the step type is unknown, which fails the plan build.
pub trait StepMetadataCatalog: Send + Sync {
    fn required_capabilities(&self, step_type: &str) -> Option<Vec<String>>;
}

/// In-memory catalog keyed by step type.
#[derive(Debug, Clone, Default)]
pub struct StaticStepCatalog {
    entries: BTreeMap<String, Vec<String>>,
}

impl StaticStepCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `step_type` with its required capabilities.
    pub fn register<I, S>(mut self, step_type: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .insert(step_type.into(), capabilities.into_iter().map(Into::into).collect());
        self
    }

    pub fn step_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl StepMetadataCatalog for StaticStepCatalog {
    fn required_capabilities(&self, step_type: &str) -> Option<Vec<String>> {
        self.entries.get(step_type).cloned()
    }
}

/// Sorted, de-duplicated union of catalog and declared capabilities.
pub fn derive_required_capabilities(catalog: &[String], declared: &[String]) -> Vec<String> {
    catalog
        .iter()
        .chain(declared.iter())
        .map(|capability| capability.trim().to_string())
        .filter(|capability| !capability.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Accumulates capability gaps over one plan build.
#[derive(Debug)]
pub struct CapabilityResolver<'a> {
    descriptors: &'a ProviderCapabilityDescriptor,
    gaps: Vec<CapabilityGap>,
}

impl<'a> CapabilityResolver<'a> {
    pub fn new(descriptors: &'a ProviderCapabilityDescriptor) -> Self {
        Self {
            descriptors,
            gaps: Vec::new(),
        }
    }

    /// Checks one step. A step with no requirements always passes, even without a provider.
    ///
    /// An unknown provider alias reports every required capability as missing.
    pub fn check(&mut self, step: &str, step_type: &str, provider: &str, required: &[String]) {
        if required.is_empty() {
            return;
        }

        let declared = self.descriptors.capabilities(provider);
        let missing: Vec<String> = required
            .iter()
            .filter(|capability| declared.is_none_or(|set| !set.contains(capability.as_str())))
            .cloned()
            .collect();

        if missing.is_empty() {
            debug!(step, provider, "capabilities satisfied");
            return;
        }

        debug!(step, provider, missing = ?missing, "capability gap recorded");
        self.gaps.push(CapabilityGap {
            step: step.to_string(),
            step_type: step_type.to_string(),
            provider: provider.to_string(),
            missing,
            provider_registered: declared.is_some(),
        });
    }

    pub fn gaps(&self) -> &[CapabilityGap] {
        &self.gaps
    }

    /// Consumes the resolver, failing when any gap was recorded.
    pub fn finish(self) -> Result<(), CapabilityMismatchError> {
        if self.gaps.is_empty() {
            Ok(())
        } else {
            Err(CapabilityMismatchError { gaps: self.gaps })
        }
    }
}
