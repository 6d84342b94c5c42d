//! Built-in Plugins
//!
//! - `actions`: publishes the action registry and registers the core actions
//! - `simulator`: replays scripted platform events

mod actions;
mod simulator;

pub use actions::*;
pub use simulator::*;

use std::sync::Arc;

use stagehand_runtime::ActionRegistry;
use stagehand_runtime::playlist::PlaylistManager;
use stagehand_runtime::plugin::{Plugin, PluginCatalog, PluginManifest};

/// Catalog of every plugin kind compiled into the host
pub fn builtin_catalog(actions: Arc<ActionRegistry>, playlist: Arc<PlaylistManager>) -> PluginCatalog {
    PluginCatalog::new()
        .with("actions", move |manifest: &PluginManifest| {
            Ok(Arc::new(ActionsPlugin::named(
                manifest.name.clone(),
                actions.clone(),
                playlist.clone(),
            )) as Arc<dyn Plugin>)
        })
        .with("simulator", |manifest: &PluginManifest| {
            Ok(Arc::new(SimulatorPlugin::new(manifest.name.clone())) as Arc<dyn Plugin>)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_runtime::playlist::{PlaylistConfig, SilentDevice};
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn test_builtin_kinds() {
        let playlist = Arc::new(PlaylistManager::new(
            Arc::new(SilentDevice::new(Duration::from_millis(10))),
            PlaylistConfig::default(),
        ));
        let catalog = builtin_catalog(Arc::new(ActionRegistry::new()), playlist);
        assert_eq!(catalog.kinds(), vec!["actions", "simulator"]);

        let manifest = PluginManifest::parse("name = \"stream\"\nkind = \"simulator\"", Path::new("p")).unwrap();
        let plugin = catalog.create(&manifest).unwrap();
        assert_eq!(plugin.name(), "stream");
        assert!(plugin.as_any().downcast_ref::<SimulatorPlugin>().is_some());
    }
}
