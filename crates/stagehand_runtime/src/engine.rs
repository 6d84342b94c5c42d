//! Rule Engine
//!
//! Turns one event into zero or more action invocations.
//!
//! # Dispatch
//!
//! 1. Take the current rule snapshot (never mutated while in use)
//! 2. Keep enabled rules bound to the event name, in store order
//! 3. For each rule: evaluate bindings, then the condition. An evaluation
//!    error counts as "false" for that rule only
//! 4. Run the rule's actions in declared order. A failing action is logged
//!    and the remaining actions and rules still run
//!
//! Each action result is appended to the rule's `results` so later actions of
//! the same rule can use it through templates and `when` guards. Skipped and
//! failed actions append `null` to keep `results[i]` aligned with action `i`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use stagehand_types::{ActionInvocation, Event};
use uuid::Uuid;

use crate::action::{ActionError, ActionRegistry, ActionResult};
use crate::context::EvalContext;
use crate::helper::{HelperRegistry, HelperSet};
use crate::store::{CompiledRule, RuleStore};

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch Report
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one action invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ActionStatus {
    /// Handler returned a value
    Completed(Value),
    /// The `when` guard evaluated false
    Skipped,
    /// Guard, template, lookup or handler failed
    Failed(String),
}

/// One action within a rule outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub index: usize,
    pub action: String,
    pub status: ActionStatus,
}

/// How a rule's evaluation ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum RuleStatus {
    /// Condition absent or true; actions ran
    Fired,
    /// Condition false
    NotMatched,
    /// Binding or condition evaluation failed
    EvaluationFailed(String),
}

/// One rule within a dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub status: RuleStatus,
    pub actions: Vec<ActionOutcome>,
}

/// Everything that happened for one event
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub dispatch_id: Uuid,
    pub event: String,
    /// Generation of the rule snapshot used for the whole dispatch
    pub generation: u64,
    pub rules: Vec<RuleOutcome>,
}

impl DispatchReport {
    /// Ids of the rules whose actions ran
    pub fn fired(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.status == RuleStatus::Fired)
            .map(|r| r.rule_id.as_str())
            .collect()
    }

    /// Every completed action value, in execution order
    pub fn results(&self) -> Vec<&Value> {
        self.rules
            .iter()
            .flat_map(|r| &r.actions)
            .filter_map(|a| match &a.status {
                ActionStatus::Completed(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Number of failed actions
    pub fn failures(&self) -> usize {
        self.rules
            .iter()
            .flat_map(|r| &r.actions)
            .filter(|a| matches!(a.status, ActionStatus::Failed(_)))
            .count()
    }

    /// Number of invoked actions (completed or failed after lookup)
    pub fn invocations(&self) -> usize {
        self.rules
            .iter()
            .flat_map(|r| &r.actions)
            .filter(|a| !matches!(a.status, ActionStatus::Skipped))
            .count()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rule Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Evaluates events against the active rule set
pub struct RuleEngine {
    store: Arc<RuleStore>,
    actions: Arc<ActionRegistry>,
    helpers: Arc<HelperRegistry>,
    action_timeout: Option<Duration>,
}

impl RuleEngine {
    /// Create an engine over shared registries
    pub fn new(store: Arc<RuleStore>, actions: Arc<ActionRegistry>, helpers: Arc<HelperRegistry>) -> Self {
        Self {
            store,
            actions,
            helpers,
            action_timeout: None,
        }
    }

    /// Bound every action invocation
    pub fn with_action_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    pub fn helpers(&self) -> &Arc<HelperRegistry> {
        &self.helpers
    }

    /// Dispatch an event, discarding the report
    pub async fn process_event(&self, event: &Event) {
        self.dispatch(event, self.helpers.get_all()).await;
    }

    /// Dispatch an event and return what happened
    pub async fn process_event_collect(&self, event: &Event) -> DispatchReport {
        self.dispatch(event, self.helpers.get_all()).await
    }

    /// Dispatch with an explicit helper snapshot
    pub async fn dispatch(&self, event: &Event, helpers: HelperSet) -> DispatchReport {
        let dispatch_id = Uuid::new_v4();
        let snapshot = self.store.snapshot();
        let mut report = DispatchReport {
            dispatch_id,
            event: event.name.clone(),
            generation: snapshot.generation(),
            rules: Vec::new(),
        };

        let mut candidates = snapshot.matching(&event.name).peekable();
        if candidates.peek().is_none() {
            tracing::trace!(%dispatch_id, event = %event.name, "No rules for event");
            return report;
        }

        let base = EvalContext::new(event, helpers);
        for rule in candidates {
            report.rules.push(self.run_rule(dispatch_id, rule, &base).await);
        }

        tracing::debug!(
            %dispatch_id,
            event = %event.name,
            platform = event.platform.as_deref().unwrap_or("-"),
            fired = report.fired().len(),
            failures = report.failures(),
            "Dispatch complete"
        );
        report
    }

    async fn run_rule(&self, dispatch_id: Uuid, rule: &CompiledRule, base: &EvalContext) -> RuleOutcome {
        let rule_id = rule.id();
        let mut ctx = base.for_rule(rule_id);
        let mut outcome = RuleOutcome {
            rule_id: rule_id.to_string(),
            status: RuleStatus::Fired,
            actions: Vec::new(),
        };

        // Bindings see the event, never each other
        let mut bound = Vec::with_capacity(rule.bindings().len());
        for (name, expr) in rule.bindings() {
            match expr.evaluate(&ctx) {
                Ok(value) => bound.push((name.clone(), value)),
                Err(e) => {
                    tracing::warn!(%dispatch_id, rule_id, binding = %name, error = %e, "Binding failed, rule skipped");
                    outcome.status = RuleStatus::EvaluationFailed(e.to_string());
                    return outcome;
                }
            }
        }
        for (name, value) in bound {
            ctx.set_var(name, value);
        }

        if let Some(condition) = rule.condition() {
            match condition.evaluate_bool(&ctx) {
                Ok(true) => {}
                Ok(false) => {
                    outcome.status = RuleStatus::NotMatched;
                    return outcome;
                }
                Err(e) => {
                    tracing::warn!(%dispatch_id, rule_id, condition = %condition, error = %e, "Condition failed, rule treated as false");
                    outcome.status = RuleStatus::EvaluationFailed(e.to_string());
                    return outcome;
                }
            }
        }

        let invocations = &rule.rule().actions;
        if invocations.is_empty() {
            tracing::info!(%dispatch_id, rule_id, "Rule matched with no actions");
            return outcome;
        }
        tracing::debug!(%dispatch_id, rule_id, actions = invocations.len(), "Rule matched");

        for (index, invocation) in invocations.iter().enumerate() {
            let status = self.run_action(dispatch_id, rule, index, invocation, &ctx).await;
            ctx.push_result(match &status {
                ActionStatus::Completed(value) => value.clone(),
                _ => Value::Null,
            });
            outcome.actions.push(ActionOutcome {
                index,
                action: invocation.action_type.clone(),
                status,
            });
        }

        outcome
    }

    async fn run_action(
        &self,
        dispatch_id: Uuid,
        rule: &CompiledRule,
        index: usize,
        invocation: &ActionInvocation,
        ctx: &EvalContext,
    ) -> ActionStatus {
        let rule_id = rule.id();
        let action = invocation.action_type.as_str();

        if let Some(guard) = rule.guard(index) {
            match guard.evaluate_bool(ctx) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(%dispatch_id, rule_id, action, "Action guard false, skipped");
                    return ActionStatus::Skipped;
                }
                Err(e) => {
                    tracing::warn!(%dispatch_id, rule_id, action, error = %e, "Action guard failed");
                    return ActionStatus::Failed(e.to_string());
                }
            }
        }

        match self.invoke(rule, index, invocation, ctx).await {
            Ok(value) => {
                tracing::debug!(%dispatch_id, rule_id, action, "Action completed");
                ActionStatus::Completed(value)
            }
            Err(e) => {
                tracing::warn!(%dispatch_id, rule_id, action, error = %e, "Action failed");
                ActionStatus::Failed(e.to_string())
            }
        }
    }

    async fn invoke(
        &self,
        rule: &CompiledRule,
        index: usize,
        invocation: &ActionInvocation,
        ctx: &EvalContext,
    ) -> ActionResult<Value> {
        let params = match rule.params(index) {
            Some(params) => params.render(ctx)?,
            None => invocation.params.clone(),
        };
        let rendered = ActionInvocation {
            action_type: invocation.action_type.clone(),
            params,
            when: invocation.when.clone(),
        };
        let handler = self.actions.get(&rendered.action_type)?;

        let call = AssertUnwindSafe(handler.invoke(&rendered, ctx)).catch_unwind();
        let result = match self.action_timeout {
            Some(after) => match tokio::time::timeout(after, call).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ActionError::Timeout {
                        action: invocation.action_type.clone(),
                        after,
                    });
                }
            },
            None => call.await,
        };

        result.unwrap_or_else(|_| Err(ActionError::failed("handler panicked")))
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("store", &self.store)
            .field("actions", &self.actions)
            .field("action_timeout", &self.action_timeout)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CompiledRule;
    use parking_lot::Mutex;
    use serde_json::json;
    use stagehand_types::Rule;

    /// Records every invocation's rendered params
    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl Recorder {
        fn register(&self, registry: &ActionRegistry, name: &'static str) {
            let calls = self.calls.clone();
            registry
                .register_fn(name, move |inv, _ctx| {
                    calls
                        .lock()
                        .push((name.to_string(), Value::Object(inv.params.clone())));
                    Ok(json!({"ok": name}))
                })
                .unwrap();
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().clone()
        }
    }

    fn engine(rules: Vec<Rule>) -> (RuleEngine, Recorder) {
        let store = Arc::new(RuleStore::new());
        store.replace(rules.into_iter().map(|r| CompiledRule::compile(r).unwrap()));
        let actions = Arc::new(ActionRegistry::new());
        let recorder = Recorder::default();
        recorder.register(&actions, "TTS");
        recorder.register(&actions, "log");
        let engine = RuleEngine::new(store, actions, Arc::new(HelperRegistry::with_builtins()));
        (engine, recorder)
    }

    #[tokio::test]
    async fn test_no_matching_rule_is_silent() {
        let (engine, recorder) = engine(vec![
            Rule::new("r1", "gift").with_action(ActionInvocation::new("TTS")),
        ]);

        let report = engine
            .process_event_collect(&Event::new("chat", json!({"comment": "hi"})))
            .await;

        assert!(report.rules.is_empty());
        assert_eq!(report.invocations(), 0);
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_chat_to_tts() {
        let (engine, recorder) = engine(vec![
            Rule::new("r1", "chat")
                .with_condition(r#"data.comment contains "hi""#)
                .with_action(ActionInvocation::new("TTS").with_param("message", "{{data.comment}}")),
        ]);

        engine
            .process_event(&Event::new("chat", json!({"comment": "hi there"})))
            .await;
        engine
            .process_event(&Event::new("chat", json!({"comment": "bye"})))
            .await;

        assert_eq!(
            recorder.calls(),
            vec![("TTS".to_string(), json!({"message": "hi there"}))]
        );
    }

    #[tokio::test]
    async fn test_failing_action_does_not_stop_the_rest() {
        let (engine, recorder) = engine(vec![
            Rule::new("r1", "chat")
                .with_action(ActionInvocation::new("log").with_param("n", 1))
                .with_action(ActionInvocation::new("boom"))
                .with_action(ActionInvocation::new("log").with_param("n", 3)),
            Rule::new("r2", "chat").with_action(ActionInvocation::new("TTS")),
        ]);
        engine
            .actions()
            .register_fn("boom", |_, _| Err(ActionError::failed("kaboom")))
            .unwrap();

        let report = engine.process_event_collect(&Event::new("chat", json!({}))).await;

        assert_eq!(report.failures(), 1);
        assert_eq!(report.fired(), vec!["r1", "r2"]);
        let names: Vec<_> = recorder.calls().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["log", "log", "TTS"]);
        assert!(matches!(
            &report.rules[0].actions[1].status,
            ActionStatus::Failed(msg) if msg.contains("kaboom")
        ));
    }

    #[tokio::test]
    async fn test_unknown_action_and_panic_are_isolated() {
        let (engine, recorder) = engine(vec![
            Rule::new("r1", "chat")
                .with_action(ActionInvocation::new("missing"))
                .with_action(ActionInvocation::new("panics"))
                .with_action(ActionInvocation::new("TTS")),
        ]);
        engine
            .actions()
            .register_fn("panics", |_, _| panic!("handler bug"))
            .unwrap();

        let report = engine.process_event_collect(&Event::new("chat", json!({}))).await;

        assert_eq!(report.failures(), 2);
        assert_eq!(recorder.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_first_false_second_true() {
        let (engine, recorder) = engine(vec![
            Rule::new("r1", "gift")
                .with_condition("data.count > 10")
                .with_action(ActionInvocation::new("log").with_param("rule", "r1")),
            Rule::new("r2", "gift")
                .with_condition("data.count > 1")
                .with_action(ActionInvocation::new("log").with_param("rule", "r2")),
        ]);

        let report = engine
            .process_event_collect(&Event::new("gift", json!({"count": 5})))
            .await;

        assert_eq!(report.fired(), vec!["r2"]);
        assert_eq!(report.rules[0].status, RuleStatus::NotMatched);
        assert_eq!(recorder.calls(), vec![("log".to_string(), json!({"rule": "r2"}))]);
    }

    #[tokio::test]
    async fn test_condition_error_is_false_for_that_rule_only() {
        let (engine, recorder) = engine(vec![
            Rule::new("r1", "chat")
                .with_condition("data.count / 0 > 1")
                .with_action(ActionInvocation::new("log")),
            Rule::new("r2", "chat").with_action(ActionInvocation::new("TTS")),
        ]);

        let report = engine
            .process_event_collect(&Event::new("chat", json!({"count": 1})))
            .await;

        assert!(matches!(report.rules[0].status, RuleStatus::EvaluationFailed(_)));
        assert_eq!(report.fired(), vec!["r2"]);
        assert_eq!(recorder.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_actions_and_disabled_rules() {
        let (engine, recorder) = engine(vec![
            Rule::new("quiet", "chat"),
            Rule::new("off", "chat")
                .enabled(false)
                .with_action(ActionInvocation::new("TTS")),
        ]);

        let report = engine.process_event_collect(&Event::new("chat", json!({}))).await;

        assert_eq!(report.fired(), vec!["quiet"]);
        assert_eq!(report.invocations(), 0);
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_chained_results_bindings_and_guards() {
        let (engine, recorder) = engine(vec![
            Rule::new("r1", "chat")
                .with_binding("who", "upper(data.user)")
                .with_condition("vars.who == 'ANN'")
                .with_action(ActionInvocation::new("score"))
                .with_action(
                    ActionInvocation::new("TTS")
                        .with_param("message", "{{vars.who}} scored {{last.score}}")
                        .with_when("last.score >= 5"),
                )
                .with_action(
                    ActionInvocation::new("log")
                        .with_param("first", "{{results[0].score}}")
                        .with_when("results[0].score < 5"),
                ),
        ]);
        engine
            .actions()
            .register_fn("score", |_, ctx| Ok(json!({"score": ctx.data()["points"].clone()})))
            .unwrap();

        let report = engine
            .process_event_collect(&Event::new("chat", json!({"user": "ann", "points": 7})))
            .await;

        assert_eq!(
            recorder.calls(),
            vec![("TTS".to_string(), json!({"message": "ANN scored 7"}))]
        );
        assert_eq!(report.rules[0].actions[2].status, ActionStatus::Skipped);
        assert_eq!(report.results().len(), 2);
    }

    #[tokio::test]
    async fn test_action_timeout() {
        let (engine, recorder) = engine(vec![
            Rule::new("r1", "chat")
                .with_action(ActionInvocation::new("hang"))
                .with_action(ActionInvocation::new("TTS")),
        ]);
        let engine = engine.with_action_timeout(Some(Duration::from_millis(20)));
        engine
            .actions()
            .register_async("hang", |_, _| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            })
            .unwrap();

        let report = engine.process_event_collect(&Event::new("chat", json!({}))).await;

        assert!(matches!(
            &report.rules[0].actions[0].status,
            ActionStatus::Failed(msg) if msg.contains("timed out")
        ));
        assert_eq!(recorder.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_swap_mid_dispatch_uses_one_snapshot() {
        let (engine, recorder) = engine(vec![
            Rule::new("r1", "chat").with_action(ActionInvocation::new("swap")),
            Rule::new("r2", "chat").with_action(ActionInvocation::new("TTS")),
        ]);
        let store = engine.store().clone();
        engine
            .actions()
            .register_fn("swap", move |_, _| {
                let replacement = CompiledRule::compile(
                    Rule::new("r3", "chat").with_action(ActionInvocation::new("log")),
                )
                .unwrap();
                Ok(json!(store.replace(vec![replacement])))
            })
            .unwrap();

        let report = engine.process_event_collect(&Event::new("chat", json!({}))).await;

        // The whole dispatch ran against the old set
        assert_eq!(report.generation, 1);
        assert_eq!(report.fired(), vec!["r1", "r2"]);
        assert_eq!(recorder.calls()[0].0, "TTS");

        // The next dispatch sees only the new set
        let report = engine.process_event_collect(&Event::new("chat", json!({}))).await;
        assert_eq!(report.generation, 2);
        assert_eq!(report.fired(), vec!["r3"]);
    }
}
