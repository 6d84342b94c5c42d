// Actions Plugin - Publishes the action registry and the core actions
//
// Other plugins reach the registry through `ctx.registrar("actions")`.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use stagehand_runtime::expr::stringify;
use stagehand_runtime::playlist::{PlayOutcome, PlaylistManager};
use stagehand_runtime::plugin::{Plugin, PluginContext, PluginError, PluginResult};
use stagehand_runtime::{ActionError, ActionRegistry, ActionResult, EvalContext, Registrar};
use stagehand_types::{ActionInvocation, Track};

/// Platform name used by `emit` when none is given
pub const DEFAULT_EMIT_PLATFORM: &str = "stagehand";

/// Owner of the core actions
pub struct ActionsPlugin {
    name: String,
    actions: Arc<ActionRegistry>,
    playlist: Arc<PlaylistManager>,
    registered: Mutex<Vec<String>>,
}

impl ActionsPlugin {
    pub fn new(actions: Arc<ActionRegistry>, playlist: Arc<PlaylistManager>) -> Self {
        Self::named("actions", actions, playlist)
    }

    pub fn named(name: impl Into<String>, actions: Arc<ActionRegistry>, playlist: Arc<PlaylistManager>) -> Self {
        Self {
            name: name.into(),
            actions,
            playlist,
            registered: Mutex::new(Vec::new()),
        }
    }

    /// Names registered by the last load
    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().clone()
    }

    fn register_async<F, Fut>(&self, name: &str, func: F) -> PluginResult<()>
    where
        F: Fn(ActionInvocation, EvalContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult<Value>> + Send + 'static,
    {
        self.actions
            .register_async(name, func)
            .map_err(|e| PluginError::LoadFailed {
                plugin: self.name.clone(),
                reason: e.to_string(),
            })?;
        self.registered.lock().push(name.to_string());
        Ok(())
    }

    fn register_core(&self, ctx: &PluginContext) -> PluginResult<()> {
        let log = ctx.log().clone();
        self.register_async("log", move |inv, _ctx| {
            let log = log.clone();
            async move {
                let message = inv.param("message").map(stringify).unwrap_or_default();
                match inv.param_str("level").unwrap_or("info") {
                    "debug" => log.debug(&message),
                    "warn" => log.warn(&message),
                    "error" => log.error(&message),
                    _ => log.info(&message),
                }
                Ok(Value::String(message))
            }
        })?;

        let bus_ctx = ctx.clone();
        self.register_async("emit", move |inv, _ctx| {
            let ctx = bus_ctx.clone();
            async move {
                let event = required_str(&inv, "event")?;
                let platform = inv.param_str("platform").unwrap_or(DEFAULT_EMIT_PLATFORM);
                let data = inv.param("data").cloned().unwrap_or_else(|| json!({}));
                let receivers = ctx.emit(platform, event, data);
                Ok(json!(receivers))
            }
        })?;

        let storage = ctx.storage().clone();
        self.register_async("storage:set", move |inv, _ctx| {
            let storage = storage.clone();
            async move {
                let key = required_str(&inv, "key")?;
                let value = inv.param("value").cloned().unwrap_or(Value::Null);
                storage.set(key, value.clone()).await.map_err(ActionError::failed)?;
                Ok(value)
            }
        })?;

        let storage = ctx.storage().clone();
        self.register_async("storage:get", move |inv, _ctx| {
            let storage = storage.clone();
            async move {
                let key = required_str(&inv, "key")?;
                let stored = storage.get(key).await.map_err(ActionError::failed)?;
                Ok(stored
                    .or_else(|| inv.param("default").cloned())
                    .unwrap_or(Value::Null))
            }
        })?;

        self.register_async("delay", |inv, _ctx| async move {
            let ms = inv
                .param_f64("ms")
                .filter(|ms| *ms >= 0.0)
                .ok_or_else(|| ActionError::invalid_params(&inv.action_type, "'ms' must be a non-negative number"))?;
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
            Ok(json!(ms))
        })?;

        self.register_playlist()
    }

    fn register_playlist(&self) -> PluginResult<()> {
        let playlist = self.playlist.clone();
        self.register_async("playlist:add", move |inv, _ctx| {
            let playlist = playlist.clone();
            async move {
                let path = required_str(&inv, "path")?;
                let index = playlist
                    .add_track(Track::file(path))
                    .await
                    .map_err(ActionError::failed)?;
                Ok(json!(index))
            }
        })?;

        let playlist = self.playlist.clone();
        self.register_async("playlist:play", move |_inv, _ctx| {
            let playlist = playlist.clone();
            async move {
                let outcome = playlist.play_current_track().await.map_err(ActionError::failed)?;
                Ok(outcome_value(outcome))
            }
        })?;

        let playlist = self.playlist.clone();
        self.register_async("playlist:next", move |_inv, _ctx| {
            let playlist = playlist.clone();
            async move {
                let outcome = playlist.next_track().await.map_err(ActionError::failed)?;
                Ok(outcome_value(outcome))
            }
        })?;

        let playlist = self.playlist.clone();
        self.register_async("playlist:previous", move |_inv, _ctx| {
            let playlist = playlist.clone();
            async move {
                let outcome = playlist.previous_track().await.map_err(ActionError::failed)?;
                Ok(outcome_value(outcome))
            }
        })?;

        let playlist = self.playlist.clone();
        self.register_async("playlist:stop", move |_inv, _ctx| {
            let playlist = playlist.clone();
            async move {
                playlist.stop().await.map_err(ActionError::failed)?;
                Ok(Value::Null)
            }
        })?;

        let playlist = self.playlist.clone();
        self.register_async("playlist:loop", move |inv, _ctx| {
            let playlist = playlist.clone();
            async move {
                // No `enabled` param toggles
                let enabled = inv.param_bool("enabled").unwrap_or(!playlist.is_loop());
                playlist.set_loop(enabled);
                Ok(json!(enabled))
            }
        })
    }
}

fn required_str<'a>(inv: &'a ActionInvocation, key: &str) -> ActionResult<&'a str> {
    inv.param_str(key).ok_or_else(|| {
        ActionError::invalid_params(&inv.action_type, format!("missing string param '{}'", key))
    })
}

fn outcome_value(outcome: PlayOutcome) -> Value {
    match outcome {
        PlayOutcome::Started { index } => json!({"status": "started", "index": index}),
        PlayOutcome::Busy => json!({"status": "busy"}),
        PlayOutcome::Ended => json!({"status": "ended"}),
    }
}

#[async_trait]
impl Plugin for ActionsPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn on_load(&self, ctx: PluginContext) -> PluginResult<()> {
        self.register_core(&ctx)?;
        ctx.log()
            .info(format!("Registered {} core actions", self.registered.lock().len()));
        Ok(())
    }

    async fn on_unload(&self) -> PluginResult<()> {
        let names = std::mem::take(&mut *self.registered.lock());
        for name in names {
            self.actions.unregister(&name);
        }
        Ok(())
    }

    fn registrar(&self) -> Option<Arc<dyn Registrar>> {
        Some(self.actions.clone() as Arc<dyn Registrar>)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for ActionsPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionsPlugin")
            .field("name", &self.name)
            .field("registered", &self.registered.lock().len())
            .finish()
    }
}
