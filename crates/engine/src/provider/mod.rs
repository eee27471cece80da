//! Provider dispatch.
//!
//! Modules:
//! - `invoker`: calls a provider method, acquiring and passing an auth session when asked
//!
//! Providers expose a fixed dispatch table indexed by capability id. Each entry carries an
//! explicit [`MethodSignature`], so whether a method takes a trailing auth session is declared
//! by the provider rather than discovered at runtime.

mod invoker;

pub use invoker::ProviderMethodInvoker;

use std::{collections::BTreeMap, fmt, sync::Arc};

use idle_types::{CapabilitySet, ProviderCapabilityDescriptor};
use serde_json::Value;

use crate::session::AuthSession;

/// Declared shape of a provider method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodSignature {
    /// True when the method takes an auth session as its trailing argument.
    pub accepts_auth_session: bool,
}

impl MethodSignature {
    pub fn plain() -> Self {
        Self {
            accepts_auth_session: false,
        }
    }

    pub fn with_session() -> Self {
        Self {
            accepts_auth_session: true,
        }
    }
}

/// Arguments handed to a provider method.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    /// Capability id the method is registered under.
    pub method: String,
    pub arguments: Vec<Value>,
    /// Present only for methods whose signature accepts a session.
    pub session: Option<AuthSession>,
}

pub type ProviderMethod = Arc<dyn Fn(&ProviderCall) -> anyhow::Result<Value> + Send + Sync>;

/// One dispatch table entry.
#[derive(Clone)]
pub struct ProviderMethodEntry {
    pub signature: MethodSignature,
    pub handler: ProviderMethod,
}

impl fmt::Debug for ProviderMethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderMethodEntry")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Capability id to method lookup for a single provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderMethodTable {
    methods: BTreeMap<String, ProviderMethodEntry>,
}

impl ProviderMethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, capability: impl Into<String>, signature: MethodSignature, handler: F)
    where
        F: Fn(&ProviderCall) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.methods.insert(
            capability.into(),
            ProviderMethodEntry {
                signature,
                handler: Arc::new(handler),
            },
        );
    }

    pub fn get(&self, capability: &str) -> Option<&ProviderMethodEntry> {
        self.methods.get(capability)
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.methods.keys().cloned().collect()
    }
}

/// Adapter exposing a capability set to an external system.
pub trait Provider: Send + Sync {
    fn methods(&self) -> &ProviderMethodTable;

    /// Declared capability ids. Defaults to the registered methods.
    fn capabilities(&self) -> CapabilitySet {
        self.methods().capabilities()
    }
}

/// Provider assembled from closures, mostly for hosts with simple adapters and for tests.
///
/// Capabilities may be declared without a method; calling one of those fails with
/// `MethodNotImplemented`.
#[derive(Debug, Clone, Default)]
pub struct TableProvider {
    declared: CapabilitySet,
    methods: ProviderMethodTable,
}

impl TableProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(mut self, capability: impl Into<String>) -> Self {
        self.declared.insert(capability.into());
        self
    }

    pub fn method<F>(mut self, capability: impl Into<String>, signature: MethodSignature, handler: F) -> Self
    where
        F: Fn(&ProviderCall) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let capability = capability.into();
        self.declared.insert(capability.clone());
        self.methods.register(capability, signature, handler);
        self
    }
}

impl Provider for TableProvider {
    fn methods(&self) -> &ProviderMethodTable {
        &self.methods
    }

    fn capabilities(&self) -> CapabilitySet {
        self.declared.clone()
    }
}

/// Providers available to one execution, keyed by alias.
pub type ProviderMap = BTreeMap<String, Arc<dyn Provider>>;

/// Builds the capability descriptor the plan builder checks against.
pub fn describe_providers(providers: &ProviderMap) -> ProviderCapabilityDescriptor {
    let mut descriptor = ProviderCapabilityDescriptor::new();
    for (alias, provider) in providers {
        descriptor.insert(alias.clone(), provider.capabilities());
    }
    descriptor
}
