// Plugin Catalog - Compiled-in plugin kinds and on-disk manifests
//
// A plugin directory holds one sub-directory per plugin instance:
//
//   plugins/
//     actions/plugin.toml
//     stream-sim/plugin.toml
//
// Each manifest names a `kind` the catalog knows how to build.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use super::{Plugin, PluginError, PluginResult};

/// Manifest file name inside each plugin directory
pub const MANIFEST_FILE: &str = "plugin.toml";

/// A `plugin.toml` file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginManifest {
    /// Instance name; unique across loaded plugins
    pub name: String,

    /// Catalog kind; defaults to the name
    #[serde(default)]
    pub kind: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub description: Option<String>,

    /// Free-form settings handed to the plugin
    #[serde(default)]
    pub config: toml::Table,
}

fn default_enabled() -> bool {
    true
}

impl PluginManifest {
    /// Effective catalog kind
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.name)
    }

    /// Settings as JSON
    pub fn config_json(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    /// Parse manifest text
    pub fn parse(text: &str, path: &Path) -> PluginResult<Self> {
        toml::from_str(text).map_err(|e| PluginError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Builds a plugin instance from its manifest
pub type PluginFactory = Arc<dyn Fn(&PluginManifest) -> PluginResult<Arc<dyn Plugin>> + Send + Sync>;

/// Registry of compiled-in plugin kinds
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&PluginManifest) -> PluginResult<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginManifest) -> PluginResult<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.register(kind, factory);
        self
    }

    /// Instantiate the plugin a manifest describes
    pub fn create(&self, manifest: &PluginManifest) -> PluginResult<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .get(manifest.kind())
            .ok_or_else(|| PluginError::UnknownKind {
                plugin: manifest.name.clone(),
                kind: manifest.kind().to_string(),
            })?;
        factory(manifest)
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Read every `<dir>/<name>/plugin.toml`, in directory-name order
///
/// A missing directory yields nothing. Unreadable or malformed manifests are
/// logged and skipped.
pub async fn discover_manifests(dir: &Path) -> PluginResult<Vec<(PathBuf, PluginManifest)>> {
    if !fs::try_exists(dir).await.unwrap_or(false) {
        debug!("No plugin directory at {}", dir.display());
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    let mut entries = fs::read_dir(dir).await.map_err(|e| PluginError::Manifest {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if path.is_dir() && !hidden {
            dirs.push(path);
        }
    }
    dirs.sort();

    let mut manifests = Vec::new();
    for plugin_dir in dirs {
        let path = plugin_dir.join(MANIFEST_FILE);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping plugin directory {}: {}", plugin_dir.display(), e);
                continue;
            }
        };
        match PluginManifest::parse(&text, &path) {
            Ok(manifest) => {
                debug!("Found plugin manifest: {} ({})", manifest.name, manifest.kind());
                manifests.push((path, manifest));
            }
            Err(e) => warn!("{}", e),
        }
    }

    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginContext;
    use async_trait::async_trait;
    use std::any::Any;

    struct Named(String);

    #[async_trait]
    impl Plugin for Named {
        fn name(&self) -> &str {
            &self.0
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        async fn on_load(&self, _ctx: PluginContext) -> PluginResult<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_manifest_parse() {
        let manifest = PluginManifest::parse(
            r#"
name = "stream-sim"
kind = "simulator"

[config]
platform = "tiktok"
interval_ms = 500
"#,
            Path::new("plugin.toml"),
        )
        .unwrap();

        assert_eq!(manifest.kind(), "simulator");
        assert!(manifest.enabled);
        assert_eq!(manifest.config_json()["platform"], "tiktok");
        assert_eq!(manifest.config_json()["interval_ms"], 500);

        let bare = PluginManifest::parse("name = \"actions\"", Path::new("p")).unwrap();
        assert_eq!(bare.kind(), "actions");

        assert!(matches!(
            PluginManifest::parse("kind = 3", Path::new("p")),
            Err(PluginError::Manifest { .. })
        ));
    }

    #[test]
    fn test_catalog_create() {
        let catalog = PluginCatalog::new().with("named", |m: &PluginManifest| {
            Ok(Arc::new(Named(m.name.clone())) as Arc<dyn Plugin>)
        });

        let manifest = PluginManifest::parse("name = \"x\"\nkind = \"named\"", Path::new("p")).unwrap();
        assert_eq!(catalog.create(&manifest).unwrap().name(), "x");

        let unknown = PluginManifest::parse("name = \"y\"", Path::new("p")).unwrap();
        assert!(matches!(
            catalog.create(&unknown),
            Err(PluginError::UnknownKind { .. })
        ));
    }

    #[tokio::test]
    async fn test_discover_in_directory_order() {
        let dir = tempfile::tempdir().unwrap();
        for (sub, body) in [
            ("b-second", "name = \"second\""),
            ("a-first", "name = \"first\""),
            ("c-broken", "name = "),
            (".hidden", "name = \"hidden\""),
        ] {
            std::fs::create_dir(dir.path().join(sub)).unwrap();
            std::fs::write(dir.path().join(sub).join(MANIFEST_FILE), body).unwrap();
        }
        std::fs::create_dir(dir.path().join("d-empty")).unwrap();

        let found = discover_manifests(dir.path()).await.unwrap();
        let names: Vec<_> = found.iter().map(|(_, m)| m.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);

        let missing = discover_manifests(&dir.path().join("nope")).await.unwrap();
        assert!(missing.is_empty());
    }
}
