use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use idle_types::{AUTH_SESSION_NAME_KEY, AUTH_SESSION_OPTIONS_KEY};
use idle_util::redact_sensitive;

use super::{ProviderCall, ProviderMap};
use crate::{
    error::{EngineError, EngineResult},
    session::AuthSessionBroker,
};

/// Calls provider methods on behalf of one step.
///
/// When the step's `with` block names an `AuthSessionName`, the session is acquired through the
/// execution's broker before the method is looked up. It is passed along only when the method's
/// declared signature accepts it.
pub struct ProviderMethodInvoker<'a> {
    providers: &'a ProviderMap,
    broker: &'a AuthSessionBroker,
    step: &'a str,
}

impl<'a> ProviderMethodInvoker<'a> {
    pub fn new(providers: &'a ProviderMap, broker: &'a AuthSessionBroker, step: &'a str) -> Self {
        Self { providers, broker, step }
    }

    pub fn invoke(
        &self,
        alias: &str,
        method: &str,
        arguments: Vec<Value>,
        with: &IndexMap<String, Value>,
    ) -> EngineResult<Value> {
        let session = match with.get(AUTH_SESSION_NAME_KEY).and_then(Value::as_str) {
            Some(name) => {
                let options = with.get(AUTH_SESSION_OPTIONS_KEY).unwrap_or(&Value::Null);
                Some(self.broker.acquire(name, options)?)
            }
            None => None,
        };

        let provider = self
            .providers
            .get(alias)
            .ok_or_else(|| EngineError::step_execution(self.step, format!("provider '{alias}' is not registered")))?;
        let entry = provider
            .methods()
            .get(method)
            .ok_or_else(|| EngineError::method_not_implemented(alias, method))?;

        let session = session.filter(|_| entry.signature.accepts_auth_session);
        debug!(
            step = self.step,
            provider = alias,
            method,
            with_session = session.is_some(),
            "invoking provider method"
        );

        let call = ProviderCall {
            method: method.to_string(),
            arguments,
            session,
        };
        (entry.handler)(&call)
            .map_err(|error| EngineError::step_execution(self.step, redact_sensitive(&format!("{error:#}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        provider::{MethodSignature, Provider, TableProvider},
        session::{SessionHandle, session_acquirer},
    };
    use serde_json::json;
    use std::sync::Arc;

    fn providers() -> ProviderMap {
        let provider = TableProvider::new()
            .method("IdLE.Identity.Read", MethodSignature::plain(), |call| {
                Ok(json!({"args": call.arguments, "session": call.session.is_some()}))
            })
            .method("IdLE.Identity.Disable", MethodSignature::with_session(), |call| {
                let session = call.session.as_ref().ok_or_else(|| anyhow::anyhow!("session required"))?;
                Ok(json!({"session": session.handle_as::<String>().cloned()}))
            })
            .declare("IdLE.Identity.Delete");
        let mut providers = ProviderMap::new();
        providers.insert("Identity".into(), Arc::new(provider) as Arc<dyn Provider>);
        providers
    }

    fn broker() -> AuthSessionBroker {
        AuthSessionBroker::new(Some(session_acquirer(|name, _| Ok(Arc::new(format!("handle-{name}")) as SessionHandle))))
    }

    fn with_session() -> IndexMap<String, Value> {
        IndexMap::from([
            (AUTH_SESSION_NAME_KEY.to_string(), json!("Directory")),
            (AUTH_SESSION_OPTIONS_KEY.to_string(), json!({"Role": "Admin"})),
        ])
    }

    #[test]
    fn session_is_appended_only_when_the_signature_accepts_it() {
        let providers = providers();
        let broker = broker();
        let invoker = ProviderMethodInvoker::new(&providers, &broker, "disable");

        let legacy = invoker
            .invoke("Identity", "IdLE.Identity.Read", vec![json!("jdoe")], &with_session())
            .unwrap();
        assert_eq!(legacy, json!({"args": ["jdoe"], "session": false}));

        let modern = invoker.invoke("Identity", "IdLE.Identity.Disable", Vec::new(), &with_session()).unwrap();
        assert_eq!(modern, json!({"session": "handle-Directory"}));
        assert_eq!(broker.factory_invocations(), 1);
    }

    #[test]
    fn missing_method_is_not_implemented() {
        let providers = providers();
        let broker = broker();
        let invoker = ProviderMethodInvoker::new(&providers, &broker, "delete");
        let error = invoker
            .invoke("Identity", "IdLE.Identity.Delete", Vec::new(), &IndexMap::new())
            .unwrap_err();
        assert!(matches!(error, EngineError::MethodNotImplemented { ref method, .. } if method == "IdLE.Identity.Delete"));
    }

    #[test]
    fn session_failures_stop_before_dispatch() {
        let providers = providers();
        let broker = AuthSessionBroker::new(None);
        let invoker = ProviderMethodInvoker::new(&providers, &broker, "disable");
        let error = invoker
            .invoke("Identity", "IdLE.Identity.Disable", Vec::new(), &with_session())
            .unwrap_err();
        assert!(matches!(error, EngineError::SessionAcquisition { .. }));
    }

    #[test]
    fn provider_errors_become_step_execution_errors() {
        let providers = providers();
        let broker = broker();
        let invoker = ProviderMethodInvoker::new(&providers, &broker, "disable");
        let error = invoker
            .invoke("Identity", "IdLE.Identity.Disable", Vec::new(), &IndexMap::new())
            .unwrap_err();
        assert_eq!(error.to_string(), "step 'disable' failed: session required");

        let error = invoker.invoke("Mail", "IdLE.Mailbox.Read", Vec::new(), &IndexMap::new()).unwrap_err();
        assert!(error.to_string().contains("provider 'Mail' is not registered"));
    }
}
