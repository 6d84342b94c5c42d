//! Playlist Sequencing
//!
//! Serializes access to a single playback device. Concurrent dispatches that
//! want audio enqueue tracks and ask the manager to play; the manager keeps a
//! cursor, advances on completion and guards every device transition with one
//! async mutex.
//!
//! # States
//!
//! ```text
//! Idle -> Loading -> Playing -> (Completed | Stopped) -> Idle
//! ```
//!
//! The busy guard is orthogonal: it is held for the whole Loading window and
//! for every advance or stop.

mod device;
mod manager;

pub use device::*;
pub use manager::*;

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Playlist Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by playlist operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlaylistError {
    #[error("Playlist is empty")]
    Empty,

    #[error("Track index {index} out of range (playlist has {len} tracks)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid track {track}: {reason}")]
    InvalidTrack { track: String, reason: String },

    #[error("Playback device error: {0}")]
    Device(#[from] DeviceError),
}

/// Result type for playlist operations
pub type PlaylistResult<T> = Result<T, PlaylistError>;

// ─────────────────────────────────────────────────────────────────────────────
// Playlist Config
// ─────────────────────────────────────────────────────────────────────────────

/// Shortest completion poll; a zero interval is raised to this
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Timing and validation settings
#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    /// How often the device is polled for completion
    pub poll_interval: Duration,

    /// Pause between stopping a playing track and loading the next
    pub settle_delay: Duration,

    /// Bound on waiting for the busy guard in next/previous/goTo/stop
    pub idle_timeout: Duration,

    /// Bound on every single device call
    pub device_timeout: Duration,

    /// Accepted file extensions, lowercase without the dot
    pub extensions: Vec<String>,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            settle_delay: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(3),
            device_timeout: Duration::from_secs(10),
            extensions: ["mp3", "wav", "ogg", "flac", "m4a", "aac"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl PlaylistConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_device_timeout(mut self, timeout: Duration) -> Self {
        self.device_timeout = timeout;
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Whether a lowercase extension is accepted
    pub fn supports(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e == extension)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Playlist Events & State
// ─────────────────────────────────────────────────────────────────────────────

/// Notifications published by the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaylistEvent {
    TrackStarted { index: usize, track: String },
    TrackFinished { index: usize },
    /// Last track finished with looping disabled
    Ended,
    Stopped,
}

/// Coarse playback phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    Idle,
    Loading,
    Playing,
}

impl std::fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackPhase::Idle => write!(f, "idle"),
            PlaybackPhase::Loading => write!(f, "loading"),
            PlaybackPhase::Playing => write!(f, "playing"),
        }
    }
}

/// Point-in-time view of the playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistState {
    pub tracks: Vec<String>,
    pub current_index: usize,
    pub is_playing: bool,
    pub loop_enabled: bool,
    pub is_busy: bool,
    pub is_stopping: bool,
    pub phase: PlaybackPhase,
}
