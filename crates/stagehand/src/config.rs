//! Host Configuration
//!
//! Layers, lowest priority first: built-in defaults, `stagehand.toml`,
//! `STAGEHAND_*` environment variables (`__` separates sections, e.g.
//! `STAGEHAND_RULES__DIR`), then command-line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use stagehand_runtime::RegistrationPolicy;
use stagehand_runtime::playlist::PlaylistConfig;
use stagehand_runtime::plugin::DEFAULT_EVENT_CAPACITY;

/// Configuration file read when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "stagehand.toml";

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "STAGEHAND_";

/// Errors raised while assembling the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Invalid(e.to_string())
    }
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// Complete host configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rules: RulesConfig,
    pub plugins: PluginsConfig,
    pub engine: EngineConfig,
    pub playlist: PlaylistSettings,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// `[rules]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Directory of rule definition files
    pub dir: PathBuf,
    /// Reload when the directory changes
    pub watch: bool,
    /// Quiet period before a burst of file events triggers a reload
    pub debounce_ms: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./rules"),
            watch: true,
            debounce_ms: 200,
        }
    }
}

impl RulesConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// `[plugins]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory of `<name>/plugin.toml` manifests
    pub dir: PathBuf,
    pub load_timeout_ms: u64,
    pub unload_timeout_ms: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./plugins"),
            load_timeout_ms: 30_000,
            unload_timeout_ms: 10_000,
        }
    }
}

impl PluginsConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn unload_timeout(&self) -> Duration {
        Duration::from_millis(self.unload_timeout_ms)
    }
}

/// `[engine]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-action timeout; unset means actions may run indefinitely
    pub action_timeout_ms: Option<u64>,
    /// Behavior when an action name is registered twice
    pub registration: RegistrationPolicy,
    /// Events the dispatcher may fall behind by before the oldest are dropped
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: None,
            registration: RegistrationPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn action_timeout(&self) -> Option<Duration> {
        self.action_timeout_ms.map(Duration::from_millis)
    }
}

/// `[playlist]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistSettings {
    pub poll_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub idle_timeout_ms: u64,
    pub device_timeout_ms: u64,
    pub extensions: Vec<String>,
    /// External player command; the track path is appended as the last
    /// argument. Empty selects the silent device.
    pub player: Vec<String>,
    /// How long the silent device "plays" each track
    pub silent_track_ms: u64,
}

impl Default for PlaylistSettings {
    fn default() -> Self {
        let defaults = PlaylistConfig::default();
        Self {
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            settle_delay_ms: defaults.settle_delay.as_millis() as u64,
            idle_timeout_ms: defaults.idle_timeout.as_millis() as u64,
            device_timeout_ms: defaults.device_timeout.as_millis() as u64,
            extensions: defaults.extensions,
            player: Vec::new(),
            silent_track_ms: 3_000,
        }
    }
}

impl PlaylistSettings {
    /// Runtime view of these settings
    pub fn to_playlist_config(&self) -> PlaylistConfig {
        PlaylistConfig::default()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_settle_delay(Duration::from_millis(self.settle_delay_ms))
            .with_idle_timeout(Duration::from_millis(self.idle_timeout_ms))
            .with_device_timeout(Duration::from_millis(self.device_timeout_ms))
            .with_extensions(self.extensions.iter().cloned())
    }
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// redb database file
    pub path: PathBuf,
    /// Keep plugin data in memory only
    pub memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/stagehand.redb"),
            memory: false,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "stagehand=info,stagehand_runtime=info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Values given on the command line; `None` leaves the layered value alone
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub rules_dir: Option<PathBuf>,
    pub plugins_dir: Option<PathBuf>,
    pub no_watch: bool,
    pub log_filter: Option<String>,
    pub json_logs: bool,
}

impl Config {
    /// Layer defaults, the file and the environment
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let file = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };
        Self::from_figment(Self::figment(&file).merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Defaults merged with a TOML file; a missing file contributes nothing
    pub fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(file))
    }

    pub fn from_figment(figment: Figment) -> ConfigResult<Self> {
        Ok(figment.extract()?)
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(dir) = &overrides.rules_dir {
            self.rules.dir = dir.clone();
        }
        if let Some(dir) = &overrides.plugins_dir {
            self.plugins.dir = dir.clone();
        }
        if overrides.no_watch {
            self.rules.watch = false;
        }
        if let Some(filter) = &overrides.log_filter {
            self.logging.filter = filter.clone();
        }
        if overrides.json_logs {
            self.logging.json = true;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_figment(Config::figment(&dir.path().join("missing.toml"))).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.plugins.load_timeout(), Duration::from_secs(30));
        assert_eq!(config.engine.action_timeout(), None);
        assert_eq!(config.engine.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stagehand.toml");
        std::fs::write(
            &path,
            r#"
[rules]
dir = "/srv/rules"
debounce_ms = 50

[engine]
action_timeout_ms = 1500
registration = "reject"
event_capacity = 64

[playlist]
extensions = ["mp3"]
player = ["mpv", "--no-video"]
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.rules.dir, PathBuf::from("/srv/rules"));
        assert!(config.rules.watch);
        assert_eq!(config.rules.debounce(), Duration::from_millis(50));
        assert_eq!(config.engine.action_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.engine.registration, RegistrationPolicy::Reject);
        assert_eq!(config.engine.event_capacity, 64);

        let playlist = config.playlist.to_playlist_config();
        assert!(playlist.supports("mp3"));
        assert!(!playlist.supports("wav"));
        assert_eq!(config.playlist.player, vec!["mpv", "--no-video"]);
    }

    #[test]
    fn test_zero_poll_interval_is_raised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stagehand.toml");
        std::fs::write(&path, "[playlist]\npoll_interval_ms = 0\n").unwrap();

        let config = Config::from_figment(Config::figment(&path)).unwrap();
        assert_eq!(config.playlist.poll_interval_ms, 0);
        assert_eq!(
            config.playlist.to_playlist_config().poll_interval,
            stagehand_runtime::playlist::MIN_POLL_INTERVAL
        );
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_invalid_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[engine]\nregistration = \"sometimes\"\n").unwrap();
        assert!(matches!(
            Config::from_figment(Config::figment(&path)),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::default().with_overrides(&Overrides {
            rules_dir: Some(PathBuf::from("r")),
            no_watch: true,
            json_logs: true,
            ..Default::default()
        });
        assert_eq!(config.rules.dir, PathBuf::from("r"));
        assert!(!config.rules.watch);
        assert!(config.logging.json);
        assert_eq!(config.plugins.dir, PathBuf::from("./plugins"));
    }
}
