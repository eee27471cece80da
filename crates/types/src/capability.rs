//! Capability identifiers and provider capability descriptors.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Ordered set of capability identifiers.
pub type CapabilitySet = BTreeSet<String>;

static CAPABILITY_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*(\.[A-Za-z][A-Za-z0-9]*)+$").expect("capability id pattern"));

/// Returns true when `capability` looks like `Vendor.Area.Operation`.
pub fn is_valid_capability_id(capability: &str) -> bool {
    CAPABILITY_ID_PATTERN.is_match(capability)
}

/// Capability sets declared by providers, keyed by provider alias.
///
/// Descriptors are read-only to the engine; they are snapshotted by the host before a plan build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderCapabilityDescriptor {
    providers: BTreeMap<String, CapabilitySet>,
}

impl ProviderCapabilityDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the capability set declared for `alias`.
    pub fn with_provider<I, S>(mut self, alias: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(alias, capabilities);
        self
    }

    pub fn insert<I, S>(&mut self, alias: impl Into<String>, capabilities: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers
            .insert(alias.into(), capabilities.into_iter().map(Into::into).collect());
    }

    /// Capability set declared for `alias`, if the alias is known.
    pub fn capabilities(&self, alias: &str) -> Option<&CapabilitySet> {
        self.providers.get(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
