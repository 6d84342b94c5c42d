// Event Dispatcher - Feeds bus events into the rule engine
//
// Events are processed one at a time in arrival order. A dispatcher that
// falls more than the bus capacity behind loses the oldest events, logs how
// many it lost and carries on with the newest. Size the buffer with
// `[engine] event_capacity`.

use std::sync::Arc;

use stagehand_runtime::RuleEngine;
use stagehand_runtime::plugin::EventBus;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawn the dispatch loop
///
/// The subscription is taken before this returns, so every event published
/// afterwards is seen.
pub fn spawn_dispatcher(bus: &EventBus, engine: Arc<RuleEngine>) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => engine.process_event(&event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Dispatcher fell behind; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use stagehand_runtime::{ActionRegistry, CompiledRule, EvalContext, HelperRegistry, RuleStore};
    use stagehand_types::{ActionInvocation, Rule};
    use std::time::Duration;

    #[tokio::test]
    async fn test_bus_events_reach_rules_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let actions = Arc::new(ActionRegistry::new());
        actions
            .register_fn("record", move |inv: &ActionInvocation, _ctx: &EvalContext| {
                sink.lock().push(inv.param("n").cloned().unwrap_or(Value::Null));
                Ok(Value::Null)
            })
            .unwrap();

        let store = Arc::new(RuleStore::new());
        let rule = Rule::new("r", "tick")
            .with_condition("platform == \"sim\"")
            .with_action(ActionInvocation::new("record").with_param("n", "{{data.n}}"));
        store.replace([CompiledRule::compile(rule).unwrap()]);
        let engine = Arc::new(RuleEngine::new(store, actions, Arc::new(HelperRegistry::new())));

        let bus = EventBus::default();
        let task = spawn_dispatcher(&bus, engine);
        for n in 0..3 {
            bus.emit("sim", "tick", json!({"n": n}));
        }
        bus.emit("other", "tick", json!({"n": 99}));

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*seen.lock(), vec![json!(0), json!(1), json!(2)]);
        task.abort();
    }

    #[tokio::test]
    async fn test_lagging_dispatcher_keeps_newest_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let actions = Arc::new(ActionRegistry::new());
        actions
            .register_fn("record", move |inv: &ActionInvocation, _ctx: &EvalContext| {
                sink.lock().push(inv.param("n").cloned().unwrap_or(Value::Null));
                Ok(Value::Null)
            })
            .unwrap();

        let store = Arc::new(RuleStore::new());
        let rule = Rule::new("r", "tick").with_action(ActionInvocation::new("record").with_param("n", "{{data.n}}"));
        store.replace([CompiledRule::compile(rule).unwrap()]);
        let engine = Arc::new(RuleEngine::new(store, actions, Arc::new(HelperRegistry::new())));

        let bus = EventBus::new(4);
        let task = spawn_dispatcher(&bus, engine);
        // The dispatcher cannot run before this loop yields
        for n in 0..10 {
            bus.emit("sim", "tick", json!({"n": n}));
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().len() < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*seen.lock(), vec![json!(6), json!(7), json!(8), json!(9)]);
        assert!(!task.is_finished());
        task.abort();
    }
}
