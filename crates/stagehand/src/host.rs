//! Host
//!
//! The composition root. Every registry and manager is constructed here once
//! and handed to the components that need it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stagehand_runtime::playlist::{PlaybackDevice, PlaylistManager, SilentDevice};
use stagehand_runtime::plugin::{
    EventBus, MemoryStorage, PluginError, PluginInfo, PluginManager, StorageBackend, StorageError,
};
use stagehand_runtime::{ActionRegistry, HelperRegistry, RuleEngine, RuleStore};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::device::CommandPlayer;
use crate::dispatcher::spawn_dispatcher;
use crate::plugins::{ActionsPlugin, builtin_catalog};
use crate::rules::{RuleLoadError, RuleWatcher, reload};
use crate::storage::RedbStorage;

/// Errors that prevent the host from starting
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Rules(#[from] RuleLoadError),
}

/// Result type for host startup
pub type HostResult<T> = Result<T, HostError>;

/// A running host
pub struct Host {
    config: Config,
    actions: Arc<ActionRegistry>,
    store: Arc<RuleStore>,
    engine: Arc<RuleEngine>,
    playlist: Arc<PlaylistManager>,
    storage: Arc<dyn StorageBackend>,
    bus: EventBus,
    plugins: Arc<PluginManager>,
    tasks: Vec<JoinHandle<()>>,
}

impl Host {
    /// Build every component, load rules and plugins, and start dispatching
    ///
    /// Bad rule files and failing plugins are logged and skipped; only an
    /// unusable storage backend stops startup.
    pub async fn start(config: Config) -> HostResult<Self> {
        let helpers = Arc::new(HelperRegistry::with_builtins());
        let actions = Arc::new(ActionRegistry::with_policy(config.engine.registration));
        let store = Arc::new(RuleStore::new());
        let engine = Arc::new(
            RuleEngine::new(store.clone(), actions.clone(), helpers.clone())
                .with_action_timeout(config.engine.action_timeout()),
        );

        let device: Arc<dyn PlaybackDevice> = match CommandPlayer::from_command(&config.playlist.player) {
            Some(player) => {
                info!("Playback via {:?}", config.playlist.player);
                Arc::new(player)
            }
            None => {
                info!("No player configured, using the silent device");
                Arc::new(SilentDevice::new(Duration::from_millis(config.playlist.silent_track_ms)))
            }
        };
        let playlist = Arc::new(PlaylistManager::new(device, config.playlist.to_playlist_config()));
        playlist.start();

        let storage: Arc<dyn StorageBackend> = if config.storage.memory {
            Arc::new(MemoryStorage::new())
        } else {
            Arc::new(RedbStorage::open(&config.storage.path)?)
        };

        // Dispatch is sequential; a slow action lets the bus fill up, and once
        // the dispatcher is more than `event_capacity` events behind the
        // oldest are dropped with a warning
        let bus = EventBus::new(config.engine.event_capacity);
        let mut tasks = vec![spawn_dispatcher(&bus, engine.clone())];

        // Rules
        let rules_dir = &config.rules.dir;
        if !rules_dir.exists() {
            tokio::fs::create_dir_all(rules_dir)
                .await
                .map_err(|e| RuleLoadError::io(rules_dir, e))?;
            info!("Created rules directory: {}", rules_dir.display());
        }
        if let Err(e) = reload(rules_dir, &store).await {
            warn!("{}", e);
        }
        if config.rules.watch {
            match RuleWatcher::new(rules_dir, store.clone(), config.rules.debounce()) {
                Ok(watcher) => {
                    tasks.push(tokio::spawn(log_watch_errors(watcher.errors())));
                    tasks.push(tokio::spawn(watcher.run()));
                }
                Err(e) => warn!("Rule hot reload disabled: {}", e),
            }
        }

        // Plugins
        let plugins = Arc::new(
            PluginManager::new(bus.clone(), storage.clone(), helpers)
                .with_load_timeout(config.plugins.load_timeout())
                .with_unload_timeout(config.plugins.unload_timeout()),
        );
        plugins.add(
            Arc::new(ActionsPlugin::new(actions.clone(), playlist.clone())),
            Value::Null,
        )?;
        let catalog = builtin_catalog(actions.clone(), playlist.clone());
        if let Err(e) = plugins.discover_from(&config.plugins.dir, &catalog).await {
            warn!("Plugin discovery failed: {}", e);
        }
        plugins.load_all().await;

        Ok(Self {
            config,
            actions,
            store,
            engine,
            playlist,
            storage,
            bus,
            plugins,
            tasks,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    pub fn playlist(&self) -> &Arc<PlaylistManager> {
        &self.playlist
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    /// Plugin states, in registration order
    pub fn plugin_status(&self) -> Vec<PluginInfo> {
        self.plugins.list()
    }

    /// Unload plugins, stop background tasks and halt playback
    pub async fn shutdown(self) {
        info!("Unloading plugins...");
        self.plugins.unload_all().await;
        for task in &self.tasks {
            task.abort();
        }
        self.playlist.shutdown().await;
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("rules", &self.store.snapshot().len())
            .field("actions", &self.actions.len())
            .field("plugins", &self.plugins)
            .finish()
    }
}

/// Watcher failures are not fatal: the last good rule set stays active
async fn log_watch_errors(mut errors: tokio::sync::broadcast::Receiver<RuleLoadError>) {
    loop {
        match errors.recv().await {
            Ok(e) => error!("{} (keeping the current rule set)", e),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}
