//! Plugin Manager
//!
//! Owns every plugin instance and drives its lifecycle. Loading is sequential
//! in registration order; each `on_load` runs in its own task so that a plugin
//! that hangs or panics fails alone.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{
    EventBus, Plugin, PluginCatalog, PluginContext, PluginError, PluginResult, PluginStorage,
    StorageBackend, discover_manifests,
};
use crate::action::Registrar;
use crate::helper::HelperRegistry;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Registered, `on_load` not yet called
    Pending,
    /// `on_load` in progress
    Loading,
    Loaded,
    /// `on_load` failed, panicked or timed out
    Failed,
    Unloaded,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginState::Pending => write!(f, "pending"),
            PluginState::Loading => write!(f, "loading"),
            PluginState::Loaded => write!(f, "loaded"),
            PluginState::Failed => write!(f, "failed"),
            PluginState::Unloaded => write!(f, "unloaded"),
        }
    }
}

/// Snapshot of one plugin for status listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub state: PluginState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Entry {
    plugin: Arc<dyn Plugin>,
    config: Value,
    state: PluginState,
    error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Registry and lifecycle driver for plugins
pub struct PluginManager {
    /// Registration order
    entries: RwLock<Vec<Entry>>,

    /// Plugins whose `on_load` completed
    loaded: Arc<DashMap<String, Arc<dyn Plugin>>>,

    /// Names in the order they finished loading
    load_order: Mutex<Vec<String>>,

    bus: EventBus,
    storage: Arc<dyn StorageBackend>,
    helpers: Arc<HelperRegistry>,
    load_timeout: Duration,
    unload_timeout: Duration,
}

impl PluginManager {
    pub fn new(bus: EventBus, storage: Arc<dyn StorageBackend>, helpers: Arc<HelperRegistry>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            loaded: Arc::new(DashMap::new()),
            load_order: Mutex::new(Vec::new()),
            bus,
            storage,
            helpers,
            load_timeout: Duration::from_secs(30),
            unload_timeout: Duration::from_secs(10),
        }
    }

    /// Upper bound on a single `on_load`
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Upper bound on a single `on_unload`
    pub fn with_unload_timeout(mut self, timeout: Duration) -> Self {
        self.unload_timeout = timeout;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn helpers(&self) -> &Arc<HelperRegistry> {
        &self.helpers
    }

    /// Register a plugin instance; it is loaded by the next [`load_all`](Self::load_all)
    pub fn add(&self, plugin: Arc<dyn Plugin>, config: Value) -> PluginResult<()> {
        let name = plugin.name().to_string();
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.plugin.name() == name) {
            return Err(PluginError::Duplicate(name));
        }
        debug!("Registered plugin: {} v{}", name, plugin.version());
        entries.push(Entry {
            plugin,
            config,
            state: PluginState::Pending,
            error: None,
        });
        Ok(())
    }

    /// Instantiate every enabled manifest under `dir`
    ///
    /// Returns how many plugins were registered. Unknown kinds and duplicate
    /// names are logged and skipped.
    pub async fn discover_from(&self, dir: &Path, catalog: &PluginCatalog) -> PluginResult<usize> {
        let mut added = 0;
        for (path, manifest) in discover_manifests(dir).await? {
            if !manifest.enabled {
                info!("Plugin '{}' is disabled, skipping", manifest.name);
                continue;
            }
            let plugin = match catalog.create(&manifest) {
                Ok(plugin) => plugin,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            match self.add(plugin, manifest.config_json()) {
                Ok(()) => added += 1,
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(added)
    }

    /// Load every pending or unloaded plugin in registration order
    ///
    /// Returns the number of plugins that loaded. Failures are recorded on the
    /// plugin and never stop the remaining loads.
    pub async fn load_all(&self) -> usize {
        let queue: Vec<(Arc<dyn Plugin>, Value)> = self
            .entries
            .read()
            .iter()
            .filter(|e| matches!(e.state, PluginState::Pending | PluginState::Unloaded))
            .map(|e| (Arc::clone(&e.plugin), e.config.clone()))
            .collect();

        let mut count = 0;
        for (plugin, config) in queue {
            if self.load_one(plugin, config).await.is_ok() {
                count += 1;
            }
        }
        info!("Loaded {} plugin(s)", count);
        count
    }

    async fn load_one(&self, plugin: Arc<dyn Plugin>, config: Value) -> PluginResult<()> {
        let name = plugin.name().to_string();
        self.set_state(&name, PluginState::Loading, None);

        let ctx = PluginContext::new(
            &name,
            config,
            PluginStorage::new(name.clone(), Arc::clone(&self.storage)),
            self.bus.clone(),
            Arc::clone(&self.helpers),
            Arc::clone(&self.loaded),
        );

        let task_plugin = Arc::clone(&plugin);
        let mut handle = tokio::spawn(async move { task_plugin.on_load(ctx).await });

        let result = match tokio::time::timeout(self.load_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(PluginError::LoadFailed {
                plugin: name.clone(),
                reason: if join_error.is_panic() {
                    "on_load panicked".to_string()
                } else {
                    join_error.to_string()
                },
            }),
            Err(_) => {
                handle.abort();
                Err(PluginError::LoadTimeout {
                    plugin: name.clone(),
                    after: self.load_timeout,
                })
            }
        };

        match result {
            Ok(()) => {
                self.loaded.insert(name.clone(), plugin);
                self.load_order.lock().push(name.clone());
                self.set_state(&name, PluginState::Loaded, None);
                info!("Plugin loaded: {}", name);
                Ok(())
            }
            Err(e) => {
                let removed = self.bus.remove_owner(&name);
                if removed > 0 {
                    debug!("Removed {} listener(s) of failed plugin {}", removed, name);
                }
                error!("{}", e);
                self.set_state(&name, PluginState::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Unload loaded plugins in reverse load order
    pub async fn unload_all(&self) {
        let order: Vec<String> = std::mem::take(&mut *self.load_order.lock());

        for name in order.into_iter().rev() {
            let Some((_, plugin)) = self.loaded.remove(&name) else {
                continue;
            };

            let error = match tokio::time::timeout(self.unload_timeout, plugin.on_unload()).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("on_unload did not finish within {:?}", self.unload_timeout)),
            };
            self.bus.remove_owner(&name);

            match &error {
                None => info!("Plugin unloaded: {}", name),
                Some(reason) => warn!("Plugin '{}' unloaded with error: {}", name, reason),
            }
            self.set_state(&name, PluginState::Unloaded, error);
        }
    }

    /// Unload everything, then load it again
    pub async fn reload_all(&self) -> usize {
        self.unload_all().await;
        self.load_all().await
    }

    fn set_state(&self, name: &str, state: PluginState, error: Option<String>) {
        if let Some(entry) = self
            .entries
            .write()
            .iter_mut()
            .find(|e| e.plugin.name() == name)
        {
            entry.state = state;
            entry.error = error;
        }
    }

    /// A loaded plugin by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.loaded.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Action registration capability published by a loaded plugin
    pub fn registrar(&self, name: &str) -> Option<Arc<dyn Registrar>> {
        self.get(name).and_then(|plugin| plugin.registrar())
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.entries
            .read()
            .iter()
            .find(|e| e.plugin.name() == name)
            .map(|e| e.state)
    }

    /// Every registered plugin, in registration order
    pub fn list(&self) -> Vec<PluginInfo> {
        self.entries
            .read()
            .iter()
            .map(|e| PluginInfo {
                name: e.plugin.name().to_string(),
                version: e.plugin.version().to_string(),
                state: e.state,
                error: e.error.clone(),
            })
            .collect()
    }

    /// Plugin acting as the event source of `platform`
    pub fn platform_source(&self, platform: &str) -> Option<String> {
        self.bus.source_of(platform)
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.entries.read().len())
            .field("loaded", &self.loaded.len())
            .field("load_timeout", &self.load_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionRegistry, ActionResult};
    use crate::context::EvalContext;
    use crate::plugin::MemoryStorage;
    use async_trait::async_trait;
    use serde_json::json;
    use stagehand_types::ActionInvocation;
    use std::any::Any;

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        Fail,
        Hang,
        Panic,
    }

    struct TestPlugin {
        name: String,
        behavior: Behavior,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl TestPlugin {
        fn new(name: &str, behavior: Behavior, journal: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Plugin> {
            Arc::new(Self {
                name: name.to_string(),
                behavior,
                journal: journal.clone(),
            })
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn version(&self) -> &str {
            "0.1.0"
        }

        async fn on_load(&self, ctx: PluginContext) -> PluginResult<()> {
            ctx.on("*", |_| {});
            match self.behavior {
                Behavior::Ok => {
                    self.journal.lock().push(format!("load:{}", self.name));
                    Ok(())
                }
                Behavior::Fail => Err(PluginError::Failed("boom".into())),
                Behavior::Hang => std::future::pending().await,
                Behavior::Panic => panic!("plugin panicked"),
            }
        }

        async fn on_unload(&self) -> PluginResult<()> {
            self.journal.lock().push(format!("unload:{}", self.name));
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn manager() -> PluginManager {
        PluginManager::new(
            EventBus::default(),
            Arc::new(MemoryStorage::new()),
            Arc::new(HelperRegistry::with_builtins()),
        )
        .with_load_timeout(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_load_order_and_reverse_unload() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let manager = manager();
        for name in ["a", "b", "c"] {
            manager.add(TestPlugin::new(name, Behavior::Ok, &journal), Value::Null).unwrap();
        }
        assert!(matches!(
            manager.add(TestPlugin::new("b", Behavior::Ok, &journal), Value::Null),
            Err(PluginError::Duplicate(_))
        ));

        assert_eq!(manager.load_all().await, 3);
        assert_eq!(manager.bus().listener_count(), 3);

        manager.unload_all().await;
        assert_eq!(
            *journal.lock(),
            vec!["load:a", "load:b", "load:c", "unload:c", "unload:b", "unload:a"]
        );
        assert_eq!(manager.state("a"), Some(PluginState::Unloaded));
        assert_eq!(manager.bus().listener_count(), 0);
        assert!(manager.get("a").is_none());

        assert_eq!(manager.reload_all().await, 3);
        assert_eq!(manager.state("c"), Some(PluginState::Loaded));
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let manager = manager();
        manager.add(TestPlugin::new("hang", Behavior::Hang, &journal), Value::Null).unwrap();
        manager.add(TestPlugin::new("fail", Behavior::Fail, &journal), Value::Null).unwrap();
        manager.add(TestPlugin::new("panic", Behavior::Panic, &journal), Value::Null).unwrap();
        manager.add(TestPlugin::new("good", Behavior::Ok, &journal), Value::Null).unwrap();

        assert_eq!(manager.load_all().await, 1);

        let list = manager.list();
        let states: Vec<_> = list.iter().map(|p| (p.name.as_str(), p.state)).collect();
        assert_eq!(
            states,
            vec![
                ("hang", PluginState::Failed),
                ("fail", PluginState::Failed),
                ("panic", PluginState::Failed),
                ("good", PluginState::Loaded),
            ]
        );
        assert!(list[0].error.as_deref().unwrap().contains("did not load"));
        assert!(list[2].error.as_deref().unwrap().contains("panicked"));

        // Only the loaded plugin keeps its listener
        assert_eq!(manager.bus().listener_count(), 1);
        assert!(manager.get("fail").is_none());
        assert!(manager.get("good").is_some());
    }

    struct Provider {
        actions: Arc<ActionRegistry>,
    }

    #[async_trait]
    impl Plugin for Provider {
        fn name(&self) -> &str {
            "actions"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        async fn on_load(&self, _ctx: PluginContext) -> PluginResult<()> {
            Ok(())
        }

        fn registrar(&self) -> Option<Arc<dyn Registrar>> {
            Some(self.actions.clone() as Arc<dyn Registrar>)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Consumer;

    fn shout(invocation: &ActionInvocation, _ctx: &EvalContext) -> ActionResult<Value> {
        Ok(json!(invocation.param_str("text").unwrap_or_default().to_uppercase()))
    }

    #[async_trait]
    impl Plugin for Consumer {
        fn name(&self) -> &str {
            "consumer"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        async fn on_load(&self, ctx: PluginContext) -> PluginResult<()> {
            let provider = ctx
                .get_plugin("actions")
                .ok_or_else(|| PluginError::Failed("actions plugin not loaded".into()))?;
            assert!(provider.as_any().downcast_ref::<Provider>().is_some());

            let registrar = ctx
                .registrar("actions")
                .ok_or_else(|| PluginError::Failed("no registrar".into()))?;
            registrar
                .register_action("shout", Arc::new(crate::action::FnActionHandler::new(shout)))
                .map_err(|e| PluginError::Failed(e.to_string()))?;

            ctx.storage().set("ready", json!(true)).await?;
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn test_registrar_capability() {
        let actions = Arc::new(ActionRegistry::new());
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let manager = PluginManager::new(
            EventBus::default(),
            storage.clone(),
            Arc::new(HelperRegistry::new()),
        );
        manager
            .add(Arc::new(Provider { actions: actions.clone() }), Value::Null)
            .unwrap();
        manager.add(Arc::new(Consumer), Value::Null).unwrap();

        assert_eq!(manager.load_all().await, 2);
        assert!(actions.contains("shout"));
        assert!(manager.registrar("actions").is_some());
        assert!(manager.registrar("consumer").is_none());
        assert_eq!(storage.get("consumer", "ready").await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_consumer_before_provider_fails_alone() {
        let manager = manager();
        manager.add(Arc::new(Consumer), Value::Null).unwrap();
        manager
            .add(
                Arc::new(Provider {
                    actions: Arc::new(ActionRegistry::new()),
                }),
                Value::Null,
            )
            .unwrap();

        assert_eq!(manager.load_all().await, 1);
        assert_eq!(manager.state("consumer"), Some(PluginState::Failed));
        assert_eq!(manager.state("actions"), Some(PluginState::Loaded));
    }

    #[tokio::test]
    async fn test_discover_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        for (sub, body) in [
            ("01-one", "name = \"one\"\nkind = \"test\""),
            ("02-off", "name = \"off\"\nkind = \"test\"\nenabled = false"),
            ("03-unknown", "name = \"mystery\"\nkind = \"nope\""),
            ("04-dup", "name = \"one\"\nkind = \"test\""),
        ] {
            std::fs::create_dir(dir.path().join(sub)).unwrap();
            std::fs::write(dir.path().join(sub).join("plugin.toml"), body).unwrap();
        }

        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory_journal = journal.clone();
        let catalog = PluginCatalog::new().with("test", move |m: &crate::plugin::PluginManifest| {
            Ok(TestPlugin::new(&m.name, Behavior::Ok, &factory_journal))
        });

        let manager = manager();
        assert_eq!(manager.discover_from(dir.path(), &catalog).await.unwrap(), 1);
        assert_eq!(manager.load_all().await, 1);
        assert_eq!(*journal.lock(), vec!["load:one"]);
    }
}
