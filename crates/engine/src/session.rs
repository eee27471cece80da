//! Execution-scoped auth session cache.
//!
//! The broker keys sessions by `(name, canonical options)`. The first caller for a key runs the
//! host acquirer; concurrent callers for the same key block on that single in-flight call and
//! share its outcome. One broker serves exactly one plan execution and is never shared.

use std::{
    any::Any,
    collections::{BTreeMap, hash_map::DefaultHasher},
    fmt,
    hash::{Hash, Hasher},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use idle_util::{canonical_json, redact_sensitive};

use crate::error::{EngineError, EngineResult, panic_message};

/// Opaque session handle produced by the host. The engine never inspects it.
pub type SessionHandle = Arc<dyn Any + Send + Sync>;

/// A cached, authenticated session.
#[derive(Clone)]
pub struct AuthSession {
    pub name: String,
    /// Canonical JSON of the options the session was acquired with.
    pub options_key: String,
    pub acquired_at: DateTime<Utc>,
    handle: SessionHandle,
}

impl AuthSession {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Downcasts the handle to the host's concrete session type.
    pub fn handle_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("name", &self.name)
            .field("options_key", &key_digest(&self.options_key))
            .field("acquired_at", &self.acquired_at)
            .field("handle", &"<opaque>")
            .finish()
    }
}

/// Host-supplied session factory.
pub trait SessionAcquirer: Send + Sync {
    /// Produces a session handle for `name` using `options`.
    fn acquire(&self, name: &str, options: &Value) -> anyhow::Result<SessionHandle>;

    /// Releases a session at the end of an execution.
    fn dispose(&self, _session: &AuthSession) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Adapts a closure into a [`SessionAcquirer`] with no-op disposal.
pub struct FnSessionAcquirer<F>(F);

impl<F> SessionAcquirer for FnSessionAcquirer<F>
where
    F: Fn(&str, &Value) -> anyhow::Result<SessionHandle> + Send + Sync,
{
    fn acquire(&self, name: &str, options: &Value) -> anyhow::Result<SessionHandle> {
        (self.0)(name, options)
    }
}

pub fn session_acquirer<F>(factory: F) -> Arc<dyn SessionAcquirer>
where
    F: Fn(&str, &Value) -> anyhow::Result<SessionHandle> + Send + Sync + 'static,
{
    Arc::new(FnSessionAcquirer(factory))
}

/// Canonical cache key for session options; absent options equal an empty map.
pub fn options_key(options: &Value) -> String {
    match options {
        Value::Null => "{}".to_string(),
        other => canonical_json(other),
    }
}

/// Short digest of an options key, safe to log.
fn key_digest(key: &str) -> String {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

type SlotKey = (String, String);
type Slot = Arc<OnceCell<Result<AuthSession, String>>>;

/// Single-flight session cache for one execution.
pub struct AuthSessionBroker {
    acquirer: Option<Arc<dyn SessionAcquirer>>,
    slots: Mutex<BTreeMap<SlotKey, Slot>>,
    invocations: AtomicUsize,
}

impl AuthSessionBroker {
    pub fn new(acquirer: Option<Arc<dyn SessionAcquirer>>) -> Self {
        Self {
            acquirer,
            slots: Mutex::new(BTreeMap::new()),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Returns the cached session for `(name, options)`, acquiring it on first use.
    ///
    /// A failed acquisition is cached too, so every caller within the execution sees the same
    /// outcome.
    pub fn acquire(&self, name: &str, options: &Value) -> EngineResult<AuthSession> {
        let key = options_key(options);
        let slot = {
            let mut slots = self.slots.lock();
            slots.entry((name.to_string(), key.clone())).or_default().clone()
        };

        slot.get_or_init(|| self.invoke_factory(name, options, key))
            .clone()
            .map_err(|message| EngineError::session_acquisition(name, message))
    }

    fn invoke_factory(&self, name: &str, options: &Value, key: String) -> Result<AuthSession, String> {
        let Some(acquirer) = &self.acquirer else {
            return Err("no session acquirer is registered".to_string());
        };

        self.invocations.fetch_add(1, Ordering::SeqCst);
        let digest = key_digest(&key);
        debug!(session = name, options = %digest, "acquiring auth session");

        match acquirer.acquire(name, options) {
            Ok(handle) => Ok(AuthSession {
                name: name.to_string(),
                options_key: key,
                acquired_at: Utc::now(),
                handle,
            }),
            Err(error) => {
                let message = redact_sensitive(&format!("{error:#}"));
                warn!(session = name, options = %digest, error = %message, "auth session acquisition failed");
                Err(message)
            }
        }
    }

    /// Number of times the host acquirer has been called.
    pub fn factory_invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Number of successfully acquired sessions currently cached.
    pub fn session_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot.get(), Some(Ok(_))))
            .count()
    }

    /// Disposes every cached session, continuing past failures.
    ///
    /// A panicking `dispose` counts as a failure. Returns one message per failed disposal, in
    /// key order. The cache is empty afterwards.
    pub fn dispose_all(&self) -> Vec<String> {
        let slots = std::mem::take(&mut *self.slots.lock());
        let Some(acquirer) = &self.acquirer else {
            return Vec::new();
        };

        let mut failures = Vec::new();
        for slot in slots.into_values() {
            let Some(Ok(session)) = slot.get() else {
                continue;
            };
            let failure = match catch_unwind(AssertUnwindSafe(|| acquirer.dispose(session))) {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(format!("{error:#}")),
                Err(payload) => Some(format!("disposal panicked: {}", panic_message(payload.as_ref()))),
            };
            match failure {
                None => debug!(session = %session.name, "auth session disposed"),
                Some(reason) => {
                    let message = redact_sensitive(&format!("{}: {reason}", session.name));
                    warn!(session = %session.name, error = %message, "auth session disposal failed");
                    failures.push(message);
                }
            }
        }
        failures
    }
}

impl fmt::Debug for AuthSessionBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSessionBroker")
            .field("has_acquirer", &self.acquirer.is_some())
            .field("sessions", &self.session_count())
            .field("factory_invocations", &self.factory_invocations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{thread, time::Duration};

    fn counting_broker() -> AuthSessionBroker {
        AuthSessionBroker::new(Some(session_acquirer(|name, options| {
            thread::sleep(Duration::from_millis(20));
            Ok(Arc::new(format!("{name}:{options}")) as SessionHandle)
        })))
    }

    #[test]
    fn options_key_is_order_independent() {
        let first: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 1}}"#).unwrap();
        let second: Value = serde_json::from_str(r#"{"a": {"x": 1, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(options_key(&first), options_key(&second));
        assert_eq!(options_key(&Value::Null), options_key(&json!({})));
    }

    #[test]
    fn identical_requests_share_one_session() {
        let broker = counting_broker();
        let first = broker.acquire("Graph", &json!({"Role": "Admin"})).unwrap();
        let second = broker.acquire("Graph", &json!({"Role": "Admin"})).unwrap();
        assert_eq!(broker.factory_invocations(), 1);
        assert!(Arc::ptr_eq(first.handle(), second.handle()));

        broker.acquire("Graph", &json!({"Role": "Reader"})).unwrap();
        assert_eq!(broker.factory_invocations(), 2);
        assert_eq!(broker.session_count(), 2);
    }

    #[test]
    fn concurrent_callers_single_flight() {
        let broker = counting_broker();
        thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| broker.acquire("Graph", &json!({"Tenant": "contoso"})).map(|s| s.options_key)))
                .collect();
            for handle in handles {
                assert!(handle.join().expect("thread").is_ok());
            }
        });
        assert_eq!(broker.factory_invocations(), 1);
    }

    #[test]
    fn failures_are_cached_and_redacted() {
        let broker = AuthSessionBroker::new(Some(session_acquirer(|_, _| Err(anyhow::anyhow!("denied: password=hunter2")))));
        let error = broker.acquire("Directory", &Value::Null).unwrap_err();
        assert!(matches!(error, EngineError::SessionAcquisition { ref name, .. } if name == "Directory"));
        assert!(!error.to_string().contains("hunter2"));

        assert!(broker.acquire("Directory", &json!({})).is_err());
        assert_eq!(broker.factory_invocations(), 1);
        assert_eq!(broker.session_count(), 0);
    }

    #[test]
    fn missing_acquirer_is_an_acquisition_error() {
        let broker = AuthSessionBroker::new(None);
        let error = broker.acquire("Graph", &Value::Null).unwrap_err();
        assert!(error.to_string().contains("no session acquirer"));
    }

    struct FlakyDisposal;

    impl SessionAcquirer for FlakyDisposal {
        fn acquire(&self, name: &str, _options: &Value) -> anyhow::Result<SessionHandle> {
            Ok(Arc::new(name.to_string()))
        }

        fn dispose(&self, session: &AuthSession) -> anyhow::Result<()> {
            match session.name.as_str() {
                "A" => anyhow::bail!("connection already closed"),
                "B" => panic!("socket torn down twice"),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn disposal_continues_past_failures() {
        let broker = AuthSessionBroker::new(Some(Arc::new(FlakyDisposal)));
        broker.acquire("A", &Value::Null).unwrap();
        broker.acquire("B", &Value::Null).unwrap();
        let session = broker.acquire("C", &Value::Null).unwrap();
        assert_eq!(session.handle_as::<String>().map(String::as_str), Some("C"));

        let failures = broker.dispose_all();
        assert_eq!(
            failures,
            vec![
                "A: connection already closed".to_string(),
                "B: disposal panicked: socket torn down twice".to_string(),
            ]
        );
        assert_eq!(broker.session_count(), 0);
    }
}
