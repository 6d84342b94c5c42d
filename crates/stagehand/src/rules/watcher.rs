//! Rule Directory Watcher
//!
//! Watches the rules directory and swaps the active rule set whenever a rule
//! file is created, modified or removed. Bursts of file events are debounced
//! into a single reload. I/O failures, including removal of the directory
//! itself, are published on an error channel; the host decides what to do
//! with them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use stagehand_runtime::RuleStore;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use super::{RuleLoadError, RuleLoadResult, is_rule_file, reload};

/// Signal forwarded from the notify thread
#[derive(Debug)]
enum WatchSignal {
    Changed(PathBuf),
    /// The watched directory was removed or renamed away
    DirectoryGone,
    Failed(String),
}

/// Hot reloader for a rules directory
pub struct RuleWatcher {
    dir: PathBuf,
    store: Arc<RuleStore>,
    debounce: Duration,
    rx: mpsc::Receiver<WatchSignal>,
    errors: broadcast::Sender<RuleLoadError>,
    /// Kept alive for as long as the watcher runs
    _watcher: RecommendedWatcher,
}

impl RuleWatcher {
    /// Start watching `dir`
    pub fn new(dir: impl AsRef<Path>, store: Arc<RuleStore>, debounce: Duration) -> RuleLoadResult<Self> {
        let dir = dir
            .as_ref()
            .canonicalize()
            .map_err(|e| RuleLoadError::io(dir.as_ref(), e))?;
        let (tx, rx) = mpsc::channel(100);

        let watched = dir.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let signal = match res {
                Ok(event) => match Self::classify(&event, &watched) {
                    Some(signal) => signal,
                    None => return,
                },
                Err(e) => WatchSignal::Failed(e.to_string()),
            };
            let _ = tx.blocking_send(signal);
        })
        .map_err(|e| RuleLoadError::Watch(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| RuleLoadError::Watch(e.to_string()))?;
        info!("Watching rules directory: {}", dir.display());

        let (errors, _) = broadcast::channel(16);
        Ok(Self {
            dir,
            store,
            debounce,
            rx,
            errors,
            _watcher: watcher,
        })
    }

    /// Map a notify event to what the run loop needs to know
    fn classify(event: &Event, dir: &Path) -> Option<WatchSignal> {
        let removes = matches!(
            event.kind,
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
        );
        if removes && (event.paths.iter().any(|p| p == dir) || !dir.exists()) {
            return Some(WatchSignal::DirectoryGone);
        }
        Self::relevant_path(event).map(WatchSignal::Changed)
    }

    /// First rule-file path touched by a create, modify or remove event
    fn relevant_path(event: &Event) -> Option<PathBuf> {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
            _ => return None,
        }
        event.paths.iter().find(|p| is_rule_file(p)).cloned()
    }

    /// Watched directory (canonical)
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Receive I/O failures seen by the watcher
    pub fn errors(&self) -> broadcast::Receiver<RuleLoadError> {
        self.errors.subscribe()
    }

    /// Run until the underlying watcher shuts down
    pub async fn run(mut self) {
        debug!("Rule watcher loop started");

        while let Some(signal) = self.rx.recv().await {
            let dir_gone = match signal {
                WatchSignal::Changed(path) => {
                    debug!("Rule file changed: {}", path.display());
                    false
                }
                WatchSignal::DirectoryGone => {
                    debug!("Rules directory removed or renamed: {}", self.dir.display());
                    true
                }
                WatchSignal::Failed(reason) => {
                    self.report(RuleLoadError::Watch(reason));
                    continue;
                }
            };
            let Some(dir_gone) = self.settle(dir_gone).await else {
                break;
            };
            self.after_burst(dir_gone).await;
        }

        info!("Rule watcher loop ended");
    }

    /// Swallow further changes until the directory is quiet for `debounce`
    ///
    /// Returns whether the directory went away during the burst, or `None`
    /// when the channel closed.
    async fn settle(&mut self, mut dir_gone: bool) -> Option<bool> {
        loop {
            match tokio::time::timeout(self.debounce, self.rx.recv()).await {
                Ok(Some(WatchSignal::Changed(_))) => continue,
                Ok(Some(WatchSignal::DirectoryGone)) => dir_gone = true,
                Ok(Some(WatchSignal::Failed(reason))) => self.report(RuleLoadError::Watch(reason)),
                Ok(None) => return None,
                Err(_) => return Some(dir_gone),
            }
        }
    }

    /// Reload once a burst is over; the active set survives a missing directory
    async fn after_burst(&self, dir_gone: bool) {
        if !self.dir.exists() {
            self.report(RuleLoadError::io(
                &self.dir,
                "rules directory was removed; keeping the current rule set",
            ));
            return;
        }
        if let Err(e) = reload(&self.dir, &self.store).await {
            self.report(e);
        }
        if dir_gone {
            // The notify watch went with the old directory
            self.report(RuleLoadError::Watch(format!(
                "{} was replaced; further changes are not watched",
                self.dir.display()
            )));
        }
    }

    /// Publish a failure; logged here only when nobody listens
    fn report(&self, e: RuleLoadError) {
        if self.errors.receiver_count() == 0 {
            error!("{}", e);
        }
        let _ = self.errors.send(e);
    }
}

impl std::fmt::Debug for RuleWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleWatcher")
            .field("dir", &self.dir)
            .field("debounce", &self.debounce)
            .finish()
    }
}
