//! Plugin System
//!
//! Plugins are compiled-in components with a load/unload lifecycle. Platform
//! adapters are plugins that push events onto the [`EventBus`]; the actions
//! plugin publishes a [`Registrar`] that other plugins use to contribute
//! action handlers.
//!
//! # Lifecycle
//!
//! - `on_load`: called once, in discovery order, with a [`PluginContext`].
//!   A call that does not settle within the load timeout fails that plugin
//!   only.
//! - `on_unload`: called in reverse load order on shutdown or reload.

mod catalog;
mod event;
mod manager;
mod storage;

pub use catalog::*;
pub use event::*;
pub use manager::*;
pub use storage::*;

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::action::Registrar;
use crate::helper::HelperRegistry;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by plugins and the plugin manager
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin '{0}' is already registered")]
    Duplicate(String),

    #[error("Plugin '{plugin}' failed to load: {reason}")]
    LoadFailed { plugin: String, reason: String },

    #[error("Plugin '{plugin}' did not load within {after:?}")]
    LoadTimeout { plugin: String, after: Duration },

    #[error("Plugin '{plugin}' failed to unload: {reason}")]
    UnloadFailed { plugin: String, reason: String },

    #[error("Invalid plugin manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("Plugin '{plugin}' has unknown kind '{kind}'")]
    UnknownKind { plugin: String, kind: String },

    #[error("Invalid configuration for plugin '{plugin}': {reason}")]
    Config { plugin: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Failed(String),
}

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A loadable host extension
///
/// Plugins are shared behind `Arc`, so hooks take `&self`; keep mutable state
/// behind interior mutability.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Unique plugin name
    fn name(&self) -> &str;

    /// Plugin version string
    fn version(&self) -> &str;

    /// Called once when the plugin is loaded
    ///
    /// The context can be cloned and kept for the plugin's lifetime.
    async fn on_load(&self, ctx: PluginContext) -> PluginResult<()>;

    /// Called when the plugin is unloaded
    async fn on_unload(&self) -> PluginResult<()> {
        Ok(())
    }

    /// Action registration capability this plugin publishes, if any
    fn registrar(&self) -> Option<Arc<dyn Registrar>> {
        None
    }

    /// Concrete type access for `downcast_ref`
    fn as_any(&self) -> &dyn Any;
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Logger
// ─────────────────────────────────────────────────────────────────────────────

/// Log facade that stamps the plugin name on every line
#[derive(Clone)]
pub struct PluginLogger {
    plugin: Arc<str>,
}

impl PluginLogger {
    pub fn new(plugin: &str) -> Self {
        Self {
            plugin: Arc::from(plugin),
        }
    }

    pub fn debug(&self, message: impl fmt::Display) {
        tracing::debug!(plugin = %self.plugin, "{}", message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        tracing::info!(plugin = %self.plugin, "{}", message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        tracing::warn!(plugin = %self.plugin, "{}", message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        tracing::error!(plugin = %self.plugin, "{}", message);
    }
}

impl fmt::Debug for PluginLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLogger").field("plugin", &self.plugin).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a plugin can reach while loaded
#[derive(Clone)]
pub struct PluginContext {
    plugin: String,
    config: Value,
    storage: PluginStorage,
    bus: EventBus,
    log: PluginLogger,
    helpers: Arc<HelperRegistry>,
    loaded: Arc<DashMap<String, Arc<dyn Plugin>>>,
}

impl PluginContext {
    pub(crate) fn new(
        plugin: &str,
        config: Value,
        storage: PluginStorage,
        bus: EventBus,
        helpers: Arc<HelperRegistry>,
        loaded: Arc<DashMap<String, Arc<dyn Plugin>>>,
    ) -> Self {
        Self {
            plugin: plugin.to_string(),
            config,
            storage,
            bus,
            log: PluginLogger::new(plugin),
            helpers,
            loaded,
        }
    }

    /// Name of the plugin this context belongs to
    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    /// Raw plugin configuration (`[config]` table of the manifest)
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Deserialize the whole configuration
    pub fn parse_config<T: serde::de::DeserializeOwned>(&self) -> PluginResult<T> {
        let config = if self.config.is_null() {
            Value::Object(Default::default())
        } else {
            self.config.clone()
        };
        serde_json::from_value(config).map_err(|e| PluginError::Config {
            plugin: self.plugin.clone(),
            reason: e.to_string(),
        })
    }

    /// Get a config value as a specific type
    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Key-value storage namespaced by plugin name
    pub fn storage(&self) -> &PluginStorage {
        &self.storage
    }

    /// Shared event bus
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Publish a platform event
    ///
    /// The emitting plugin becomes the recorded source of `platform`.
    pub fn emit(&self, platform: &str, event_name: &str, data: Value) -> usize {
        self.bus.emit_as(&self.plugin, platform, event_name, data)
    }

    /// Listen for events from platforms matching `pattern` (glob)
    ///
    /// Listeners are removed when this plugin unloads.
    pub fn on<F>(&self, pattern: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&stagehand_types::Event) + Send + Sync + 'static,
    {
        self.bus.on_owned(&self.plugin, pattern, callback)
    }

    /// Plugin-stamped logger
    pub fn log(&self) -> &PluginLogger {
        &self.log
    }

    /// Helper registry, for plugins that contribute expression helpers
    pub fn helpers(&self) -> &Arc<HelperRegistry> {
        &self.helpers
    }

    /// Another plugin that has finished loading
    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.loaded.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Action registration capability published by `name`
    pub fn registrar(&self, name: &str) -> Option<Arc<dyn Registrar>> {
        self.get_plugin(name).and_then(|plugin| plugin.registrar())
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.plugin)
            .field("config", &self.config)
            .finish()
    }
}
