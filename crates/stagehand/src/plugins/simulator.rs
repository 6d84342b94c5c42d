// Simulator Plugin - A scripted platform adapter
//
// Replays a list of events under a configurable platform name. Useful for
// exercising rules without a live platform connection.
//
// [config]
// platform = "tiktok"
// interval_ms = 1000
// repeat = true
// random = false
// events = [
//   { event = "chat", data = { user = "ana", comment = "hi" } },
//   { event = "gift", data = { user = "bo", value = 100 }, delay_ms = 2500 },
// ]

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::{Value, json};
use stagehand_runtime::plugin::{Plugin, PluginContext, PluginError, PluginResult};
use tokio::task::JoinHandle;

/// One scripted event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptedEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    /// Wait before this event; defaults to the script interval
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

/// `[config]` of a simulator manifest
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub platform: String,
    pub interval_ms: u64,
    /// Start over after the last event
    pub repeat: bool,
    /// Pick events at random instead of in order
    pub random: bool,
    /// Seed for random picks
    pub seed: Option<u64>,
    /// Stop after this many events
    pub limit: Option<usize>,
    pub events: Vec<ScriptedEvent>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            platform: "simulator".to_string(),
            interval_ms: 1000,
            repeat: false,
            random: false,
            seed: None,
            limit: None,
            events: Vec::new(),
        }
    }
}

/// Platform adapter that emits a scripted event list
pub struct SimulatorPlugin {
    name: String,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatorPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task: Mutex::new(None),
        }
    }
}

async fn run_script(ctx: PluginContext, config: SimulatorConfig) {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut emitted = 0usize;

    loop {
        let round: Vec<ScriptedEvent> = if config.random {
            (0..config.events.len())
                .filter_map(|_| config.events.choose(&mut rng).cloned())
                .collect()
        } else {
            config.events.clone()
        };

        for scripted in round {
            if config.limit.is_some_and(|limit| emitted >= limit) {
                ctx.log().info(format!("Script limit reached after {} events", emitted));
                return;
            }
            let delay = scripted.delay_ms.unwrap_or(config.interval_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            let data = if scripted.data.is_null() { json!({}) } else { scripted.data };
            ctx.emit(&config.platform, &scripted.event, data);
            emitted += 1;
        }

        if !config.repeat {
            ctx.log().info(format!("Script finished after {} events", emitted));
            return;
        }
    }
}

#[async_trait]
impl Plugin for SimulatorPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn on_load(&self, ctx: PluginContext) -> PluginResult<()> {
        let config: SimulatorConfig = ctx.parse_config()?;
        if config.events.is_empty() {
            return Err(PluginError::Config {
                plugin: self.name.clone(),
                reason: "no events to simulate".to_string(),
            });
        }

        ctx.log().info(format!(
            "Simulating {} event(s) on platform '{}'",
            config.events.len(),
            config.platform
        ));
        let handle = tokio::spawn(run_script(ctx, config));
        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn on_unload(&self) -> PluginResult<()> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for SimulatorPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatorPlugin")
            .field("name", &self.name)
            .field("running", &self.task.lock().is_some())
            .finish()
    }
}
