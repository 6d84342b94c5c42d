//! Event Bus
//!
//! Moves platform events from adapters to their consumers. Every event goes to
//! the broadcast channel (the rule dispatcher subscribes there) and to the
//! callbacks registered with [`EventBus::on`] whose platform pattern matches.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use stagehand_types::Event;
use tokio::sync::broadcast;
use wildmatch::WildMatch;

/// Handle used to remove a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

struct Listener {
    owner: Option<String>,
    pattern: WildMatch,
    callback: Callback,
}

/// Events buffered per subscriber before the slowest one starts losing them
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Cloneable fan-out point for platform events
///
/// Subscribers share one bounded broadcast buffer. A subscriber that falls
/// more than `capacity` events behind skips the oldest ones and resumes with
/// the newest; publishers never block.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    listeners: Arc<DashMap<u64, Listener>>,
    /// platform -> plugin that emits it
    sources: Arc<DashMap<String, String>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus whose broadcast channel buffers `capacity` events (at least one)
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            listeners: Arc::new(DashMap::new()),
            sources: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Receive every published event
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish `(platform, event_name, data)`
    ///
    /// Returns the number of broadcast receivers that got the event.
    pub fn emit(&self, platform: &str, event_name: &str, data: Value) -> usize {
        self.publish(Event::from_platform(platform, event_name, data))
    }

    /// Publish on behalf of a plugin, recording it as the platform's source
    pub(crate) fn emit_as(&self, owner: &str, platform: &str, event_name: &str, data: Value) -> usize {
        if !self.sources.get(platform).is_some_and(|s| s.value() == owner) {
            if let Some(previous) = self.sources.insert(platform.to_string(), owner.to_string()) {
                tracing::warn!(
                    platform,
                    previous = %previous,
                    plugin = owner,
                    "Platform source changed"
                );
            }
        }
        self.emit(platform, event_name, data)
    }

    /// Plugin that last emitted events for `platform`
    pub fn source_of(&self, platform: &str) -> Option<String> {
        self.sources.get(platform).map(|s| s.value().clone())
    }

    /// Every known `(platform, plugin)` pair, sorted by platform
    pub fn sources(&self) -> Vec<(String, String)> {
        let mut sources: Vec<_> = self
            .sources
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        sources.sort();
        sources
    }

    /// Publish a prepared event
    pub fn publish(&self, event: Event) -> usize {
        tracing::trace!(
            platform = event.platform.as_deref().unwrap_or("-"),
            event = %event.name,
            "Event published"
        );

        // Callbacks run outside the map guard so they may (un)subscribe
        let platform = event.platform.as_deref().unwrap_or_default();
        let mut callbacks: Vec<(u64, Callback)> = self
            .listeners
            .iter()
            .filter(|l| l.pattern.matches(platform))
            .map(|l| (*l.key(), Arc::clone(&l.callback)))
            .collect();
        // Registration order
        callbacks.sort_by_key(|(id, _)| *id);
        for (_, callback) in callbacks {
            callback(&event);
        }

        self.tx.send(event).unwrap_or(0)
    }

    /// Register a callback for platforms matching `pattern` ("*" for all)
    pub fn on<F>(&self, pattern: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(None, pattern, Arc::new(callback))
    }

    /// Register a callback owned by a plugin
    pub(crate) fn on_owned<F>(&self, owner: &str, pattern: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(Some(owner.to_string()), pattern, Arc::new(callback))
    }

    fn insert(&self, owner: Option<String>, pattern: &str, callback: Callback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(
            id,
            Listener {
                owner,
                pattern: WildMatch::new(pattern),
                callback,
            },
        );
        SubscriptionId(id)
    }

    /// Remove a callback
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.listeners.remove(&id.0).is_some()
    }

    /// Remove every callback and platform a plugin registered
    ///
    /// Returns the number of callbacks removed.
    pub fn remove_owner(&self, owner: &str) -> usize {
        self.sources.retain(|_, source| source.as_str() != owner);
        let mut removed = 0;
        self.listeners.retain(|_, l| {
            let keep = l.owner.as_deref() != Some(owner);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of registered callbacks
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .field("sources", &self.sources.len())
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}
