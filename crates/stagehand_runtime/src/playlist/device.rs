// Playback Device - The single shared resource the playlist serializes
//
// Devices report completion either by being polled through `is_playing` or by
// pushing on the channel returned from `completion_events`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use stagehand_types::Track;
use tokio::sync::broadcast;

/// Errors raised by playback devices
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    #[error("No track loaded")]
    NothingLoaded,

    #[error("Unsupported track: {0}")]
    Unsupported(String),

    #[error("Device {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Device I/O error: {0}")]
    Io(String),

    #[error("Device failed: {0}")]
    Failed(String),
}

impl From<std::io::Error> for DeviceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// An audio-like output that plays one track at a time
#[async_trait]
pub trait PlaybackDevice: Send + Sync {
    /// Human-readable device name
    fn name(&self) -> &str;

    /// Prepare a track; replaces whatever was loaded
    async fn load(&self, track: &Track) -> DeviceResult<()>;

    /// Start the loaded track
    async fn play(&self) -> DeviceResult<()>;

    /// Halt playback; stopping an idle device is not an error
    async fn stop(&self) -> DeviceResult<()>;

    /// Whether a track is currently audible
    async fn is_playing(&self) -> DeviceResult<bool>;

    /// Push-style completion notifications
    ///
    /// Devices that return `None` are polled.
    fn completion_events(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Silent Device
// ─────────────────────────────────────────────────────────────────────────────

/// A device that "plays" every track for a fixed duration without output
///
/// Used when no external player is configured, so rules that drive the
/// playlist can still be exercised end to end.
pub struct SilentDevice {
    duration: Duration,
    loaded: Mutex<Option<Track>>,
    started: Mutex<Option<Instant>>,
}

impl SilentDevice {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            loaded: Mutex::new(None),
            started: Mutex::new(None),
        }
    }

    /// Label of the loaded track
    pub fn loaded(&self) -> Option<String> {
        self.loaded.lock().as_ref().map(|t| t.label())
    }
}

#[async_trait]
impl PlaybackDevice for SilentDevice {
    fn name(&self) -> &str {
        "silent"
    }

    async fn load(&self, track: &Track) -> DeviceResult<()> {
        *self.loaded.lock() = Some(track.clone());
        *self.started.lock() = None;
        Ok(())
    }

    async fn play(&self) -> DeviceResult<()> {
        if self.loaded.lock().is_none() {
            return Err(DeviceError::NothingLoaded);
        }
        *self.started.lock() = Some(Instant::now());
        Ok(())
    }

    async fn stop(&self) -> DeviceResult<()> {
        *self.started.lock() = None;
        Ok(())
    }

    async fn is_playing(&self) -> DeviceResult<bool> {
        Ok(self
            .started
            .lock()
            .is_some_and(|at| at.elapsed() < self.duration))
    }
}
