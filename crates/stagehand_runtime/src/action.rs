//! Action Registry
//!
//! Maps action-type names ("TTS", "minecraft:command", "storage:set") to their
//! handlers. Rules name actions; the engine resolves them here at dispatch time,
//! so a handler registered after rules load is still picked up.
//!
//! Registration is last-writer-wins unless the registry is built with
//! [`RegistrationPolicy::Reject`]. Replacing a handler is logged.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stagehand_types::ActionInvocation;

use crate::context::EvalContext;
use crate::expr::ExprError;

// ─────────────────────────────────────────────────────────────────────────────
// Action Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while registering or invoking actions
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionError {
    #[error("No action registered under '{0}'")]
    NotFound(String),

    #[error("Action '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Invalid parameters for '{action}': {message}")]
    InvalidParams { action: String, message: String },

    #[error("Parameter template failed: {0}")]
    Template(#[from] ExprError),

    #[error("Action '{action}' timed out after {after:?}")]
    Timeout { action: String, after: Duration },

    #[error("Action failed: {0}")]
    Failed(String),
}

impl ActionError {
    /// Shorthand for a parameter error
    pub fn invalid_params(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a handler failure
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

/// Result type for action operations
pub type ActionResult<T> = Result<T, ActionError>;

// ─────────────────────────────────────────────────────────────────────────────
// Action Handler
// ─────────────────────────────────────────────────────────────────────────────

/// A named side effect a rule can invoke
///
/// `invocation.params` arrive with templates already rendered. The returned
/// value is appended to the dispatch's `results` and visible to later actions
/// of the same rule as `last`.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(&self, invocation: &ActionInvocation, ctx: &EvalContext) -> ActionResult<Value>;
}

/// Synchronous closure handler
pub struct FnActionHandler<F>
where
    F: Fn(&ActionInvocation, &EvalContext) -> ActionResult<Value> + Send + Sync,
{
    func: F,
}

impl<F> FnActionHandler<F>
where
    F: Fn(&ActionInvocation, &EvalContext) -> ActionResult<Value> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ActionHandler for FnActionHandler<F>
where
    F: Fn(&ActionInvocation, &EvalContext) -> ActionResult<Value> + Send + Sync,
{
    async fn invoke(&self, invocation: &ActionInvocation, ctx: &EvalContext) -> ActionResult<Value> {
        (self.func)(invocation, ctx)
    }
}

/// Async closure handler
///
/// The closure receives owned copies so the returned future can be `'static`.
pub struct AsyncFnActionHandler<F, Fut>
where
    F: Fn(ActionInvocation, EvalContext) -> Fut + Send + Sync,
    Fut: Future<Output = ActionResult<Value>> + Send,
{
    func: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnActionHandler<F, Fut>
where
    F: Fn(ActionInvocation, EvalContext) -> Fut + Send + Sync,
    Fut: Future<Output = ActionResult<Value>> + Send,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> ActionHandler for AsyncFnActionHandler<F, Fut>
where
    F: Fn(ActionInvocation, EvalContext) -> Fut + Send + Sync,
    Fut: Future<Output = ActionResult<Value>> + Send,
{
    async fn invoke(&self, invocation: &ActionInvocation, ctx: &EvalContext) -> ActionResult<Value> {
        (self.func)(invocation.clone(), ctx.clone()).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration Policy
// ─────────────────────────────────────────────────────────────────────────────

/// What happens when a name is registered twice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationPolicy {
    /// The newer handler replaces the older one
    #[default]
    Replace,
    /// The second registration fails with `AlreadyRegistered`
    Reject,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registrar Capability
// ─────────────────────────────────────────────────────────────────────────────

/// Capability handed to plugins that contribute actions
pub trait Registrar: Send + Sync {
    /// Register a handler under `name`
    fn register_action(&self, name: &str, handler: Arc<dyn ActionHandler>) -> ActionResult<()>;

    /// Look up a handler
    fn action(&self, name: &str) -> Option<Arc<dyn ActionHandler>>;

    /// All registered names, sorted
    fn action_names(&self) -> Vec<String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Action Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Concurrent map from action name to handler
pub struct ActionRegistry {
    handlers: DashMap<String, Arc<dyn ActionHandler>>,
    policy: RegistrationPolicy,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    /// Create an empty last-writer-wins registry
    pub fn new() -> Self {
        Self::with_policy(RegistrationPolicy::Replace)
    }

    /// Create an empty registry with an explicit duplicate policy
    pub fn with_policy(policy: RegistrationPolicy) -> Self {
        Self {
            handlers: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    /// Register a handler, applying the registry's policy on duplicates
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) -> ActionResult<()> {
        let name = name.into();
        match self.policy {
            RegistrationPolicy::Replace => {
                if self.handlers.insert(name.clone(), handler).is_some() {
                    tracing::warn!(action = %name, "Action handler replaced");
                } else {
                    tracing::debug!(action = %name, "Action registered");
                }
                Ok(())
            }
            RegistrationPolicy::Reject => self.register_unique(name, handler),
        }
    }

    /// Register a handler, failing if the name is taken
    pub fn register_unique(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) -> ActionResult<()> {
        use dashmap::mapref::entry::Entry;

        let name = name.into();
        match self.handlers.entry(name.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(action = %name, "Duplicate action registration rejected");
                Err(ActionError::AlreadyRegistered(name))
            }
            Entry::Vacant(slot) => {
                slot.insert(handler);
                tracing::debug!(action = %name, "Action registered");
                Ok(())
            }
        }
    }

    /// Register a synchronous closure
    pub fn register_fn<F>(&self, name: impl Into<String>, func: F) -> ActionResult<()>
    where
        F: Fn(&ActionInvocation, &EvalContext) -> ActionResult<Value> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnActionHandler::new(func)))
    }

    /// Register an async closure
    pub fn register_async<F, Fut>(&self, name: impl Into<String>, func: F) -> ActionResult<()>
    where
        F: Fn(ActionInvocation, EvalContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult<Value>> + Send + 'static,
    {
        self.register(name, Arc::new(AsyncFnActionHandler::new(func)))
    }

    /// Look up a handler
    pub fn get(&self, name: &str) -> ActionResult<Arc<dyn ActionHandler>> {
        self.handlers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ActionError::NotFound(name.to_string()))
    }

    /// Resolve `invocation.action_type` and run its handler
    pub async fn invoke(&self, invocation: &ActionInvocation, ctx: &EvalContext) -> ActionResult<Value> {
        // The map guard is released before awaiting the handler
        let handler = self.get(&invocation.action_type)?;
        handler.invoke(invocation, ctx).await
    }

    /// Remove a handler
    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    /// All registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Registrar for ActionRegistry {
    fn register_action(&self, name: &str, handler: Arc<dyn ActionHandler>) -> ActionResult<()> {
        self.register(name, handler)
    }

    fn action(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.get(name).ok()
    }

    fn action_names(&self) -> Vec<String> {
        self.names()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("policy", &self.policy)
            .field("actions", &self.names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::HelperSet;
    use serde_json::json;
    use stagehand_types::Event;

    fn ctx() -> EvalContext {
        EvalContext::new(&Event::new("test", json!({})), HelperSet::default())
    }

    fn noop() -> Arc<dyn ActionHandler> {
        Arc::new(FnActionHandler::new(
            |_: &ActionInvocation, _: &EvalContext| Ok(Value::Null),
        ))
    }

    #[test]
    fn test_empty_registry() {
        let registry = ActionRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(registry.get("TTS"), Err(ActionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reregistration_replaces() {
        let registry = ActionRegistry::new();
        registry.register_fn("x", |_, _| Ok(json!("A"))).unwrap();
        registry.register_fn("x", |_, _| Ok(json!("B"))).unwrap();

        assert_eq!(registry.len(), 1);
        let result = registry.invoke(&ActionInvocation::new("x"), &ctx()).await;
        assert_eq!(result.unwrap(), json!("B"));

        let handler = registry.get("x").unwrap();
        let result = handler.invoke(&ActionInvocation::new("x"), &ctx()).await;
        assert_eq!(result.unwrap(), json!("B"));
    }

    #[tokio::test]
    async fn test_reject_policy() {
        let registry = ActionRegistry::with_policy(RegistrationPolicy::Reject);
        registry.register_fn("x", |_, _| Ok(json!("A"))).unwrap();

        let err = registry.register_fn("x", |_, _| Ok(json!("B"))).unwrap_err();
        assert!(matches!(err, ActionError::AlreadyRegistered(name) if name == "x"));

        let result = registry.invoke(&ActionInvocation::new("x"), &ctx()).await;
        assert_eq!(result.unwrap(), json!("A"));

        // register_unique rejects regardless of policy
        let lenient = ActionRegistry::new();
        lenient.register_fn("y", |_, _| Ok(Value::Null)).unwrap();
        assert!(lenient
            .register_unique("y", noop())
            .is_err());
    }

    #[tokio::test]
    async fn test_handler_sees_params_and_context() {
        let registry = ActionRegistry::new();
        registry
            .register_fn("echo", |inv, ctx| {
                Ok(json!({
                    "message": inv.param_str("message"),
                    "event": ctx.event_name(),
                }))
            })
            .unwrap();
        registry
            .register_async("slow", |inv, _ctx| async move {
                tokio::task::yield_now().await;
                inv.param_f64("n")
                    .map(|n| json!(n * 2.0))
                    .ok_or_else(|| ActionError::invalid_params("slow", "missing 'n'"))
            })
            .unwrap();

        let result = registry
            .invoke(&ActionInvocation::new("echo").with_param("message", "hi"), &ctx())
            .await
            .unwrap();
        assert_eq!(result, json!({"message": "hi", "event": "test"}));

        let result = registry
            .invoke(&ActionInvocation::new("slow").with_param("n", 2), &ctx())
            .await
            .unwrap();
        assert_eq!(result, json!(4.0));

        let err = registry
            .invoke(&ActionInvocation::new("slow"), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidParams { .. }));
    }

    #[test]
    fn test_registrar_capability() {
        let registry = Arc::new(ActionRegistry::new());
        let registrar: Arc<dyn Registrar> = registry.clone();

        registrar.register_action("b", noop()).unwrap();
        registrar.register_action("a", noop()).unwrap();

        assert_eq!(registrar.action_names(), vec!["a", "b"]);
        assert!(registrar.action("a").is_some());
        assert!(registry.unregister("a"));
        assert!(registrar.action("a").is_none());
    }
}
