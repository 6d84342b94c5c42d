//! Playlist Manager
//!
//! Owns the track list, the cursor and the device guard. Every device
//! transition (play, advance, stop) runs under the busy guard:
//!
//! - `play_current_track` only tries the guard; a call that finds it held is a
//!   logged skip, never queued.
//! - `next_track`, `previous_track` and `go_to_track` wait for the guard up to
//!   `idle_timeout`, then move the cursor anyway with a warning.
//! - The completion watcher skips a tick whenever the guard is held or a stop
//!   is in progress.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use stagehand_types::Track;
use tokio::sync::{MutexGuard, broadcast};
use tokio::task::JoinHandle;

use super::{
    DeviceError, DeviceResult, MIN_POLL_INTERVAL, PlaybackDevice, PlaybackPhase, PlaylistConfig,
    PlaylistError, PlaylistEvent, PlaylistResult, PlaylistState,
};

/// What a play or move request ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The track at `index` is now playing
    Started { index: usize },
    /// Another transition held the device; nothing was played
    Busy,
    /// There is no next track and looping is off
    Ended,
}

struct Inner {
    tracks: Vec<Track>,
    current_index: usize,
    is_playing: bool,
    loop_enabled: bool,
    phase: PlaybackPhase,
}

impl Inner {
    fn next_index(&self) -> Option<usize> {
        if self.tracks.is_empty() {
            None
        } else if self.current_index + 1 < self.tracks.len() {
            Some(self.current_index + 1)
        } else if self.loop_enabled {
            Some(0)
        } else {
            None
        }
    }

    fn previous_index(&self) -> usize {
        match self.current_index {
            0 if self.loop_enabled => self.tracks.len().saturating_sub(1),
            0 => 0,
            i => i - 1,
        }
    }
}

/// Serializes playback on one device
pub struct PlaylistManager {
    device: Arc<dyn PlaybackDevice>,
    config: PlaylistConfig,
    inner: Mutex<Inner>,
    busy: tokio::sync::Mutex<()>,
    stopping: AtomicBool,
    events: broadcast::Sender<PlaylistEvent>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl PlaylistManager {
    /// Create a manager over a device
    pub fn new(device: Arc<dyn PlaybackDevice>, config: PlaylistConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            device,
            config,
            inner: Mutex::new(Inner {
                tracks: Vec::new(),
                current_index: 0,
                is_playing: false,
                loop_enabled: false,
                phase: PlaybackPhase::Idle,
            }),
            busy: tokio::sync::Mutex::new(()),
            stopping: AtomicBool::new(false),
            events,
            watcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PlaylistConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<dyn PlaybackDevice> {
        &self.device
    }

    /// Receive playlist notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PlaylistEvent> {
        self.events.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Track list
    // ─────────────────────────────────────────────────────────────────────────

    /// Check a track against the accepted extensions and its source
    pub async fn validate_track(&self, track: &Track) -> PlaylistResult<()> {
        let invalid = |reason: String| PlaylistError::InvalidTrack {
            track: track.to_string(),
            reason,
        };

        match track {
            Track::File(path) => {
                let ext = track
                    .extension()
                    .ok_or_else(|| invalid("no file extension".to_string()))?;
                if !self.config.supports(&ext) {
                    return Err(invalid(format!("unsupported extension '{}'", ext)));
                }
                match tokio::fs::metadata(path).await {
                    Ok(meta) if meta.is_file() => Ok(()),
                    Ok(_) => Err(invalid("not a regular file".to_string())),
                    Err(e) => Err(invalid(e.to_string())),
                }
            }
            Track::Buffer { bytes, .. } => {
                if bytes.is_empty() {
                    return Err(invalid("empty buffer".to_string()));
                }
                match track.extension() {
                    Some(ext) if !self.config.supports(&ext) => {
                        Err(invalid(format!("unsupported format '{}'", ext)))
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    /// Replace the track list, dropping invalid entries
    ///
    /// Returns the number of tracks kept. The cursor moves back to 0.
    pub async fn load_tracks(&self, tracks: impl IntoIterator<Item = Track>) -> usize {
        let mut valid = Vec::new();
        for track in tracks {
            match self.validate_track(&track).await {
                Ok(()) => valid.push(track),
                Err(e) => tracing::warn!(error = %e, "Dropping invalid track"),
            }
        }

        let count = valid.len();
        {
            let mut inner = self.inner.lock();
            inner.tracks = valid;
            inner.current_index = 0;
        }
        tracing::info!(tracks = count, "Playlist loaded");
        count
    }

    /// Append a track, returning its index
    pub async fn add_track(&self, track: Track) -> PlaylistResult<usize> {
        self.validate_track(&track).await?;
        let mut inner = self.inner.lock();
        inner.tracks.push(track);
        Ok(inner.tracks.len() - 1)
    }

    /// Remove the track at `index`, keeping the cursor on the same track when
    /// possible
    pub fn remove_track(&self, index: usize) -> PlaylistResult<Track> {
        let mut inner = self.inner.lock();
        let len = inner.tracks.len();
        if index >= len {
            return Err(PlaylistError::IndexOutOfRange { index, len });
        }

        let track = inner.tracks.remove(index);
        if index < inner.current_index {
            inner.current_index -= 1;
        } else if inner.current_index >= inner.tracks.len() {
            inner.current_index = 0;
        }
        Ok(track)
    }

    /// Drop every track
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.tracks.clear();
        inner.current_index = 0;
    }

    pub fn track_count(&self) -> usize {
        self.inner.lock().tracks.len()
    }

    pub fn current_index(&self) -> usize {
        self.inner.lock().current_index
    }

    pub fn current_track(&self) -> Option<Track> {
        let inner = self.inner.lock();
        inner.tracks.get(inner.current_index).cloned()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().is_playing
    }

    pub fn set_loop(&self, enabled: bool) {
        self.inner.lock().loop_enabled = enabled;
    }

    pub fn is_loop(&self) -> bool {
        self.inner.lock().loop_enabled
    }

    /// Point-in-time view
    pub fn state(&self) -> PlaylistState {
        let inner = self.inner.lock();
        PlaylistState {
            tracks: inner.tracks.iter().map(Track::label).collect(),
            current_index: inner.current_index,
            is_playing: inner.is_playing,
            loop_enabled: inner.loop_enabled,
            is_busy: self.busy.try_lock().is_err(),
            is_stopping: self.stopping.load(Ordering::SeqCst),
            phase: inner.phase,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    /// Play the track under the cursor
    ///
    /// A call that finds another transition in flight returns
    /// [`PlayOutcome::Busy`] without touching the device.
    pub async fn play_current_track(&self) -> PlaylistResult<PlayOutcome> {
        let Ok(_guard) = self.busy.try_lock() else {
            tracing::info!("Playlist busy, play request skipped");
            return Ok(PlayOutcome::Busy);
        };
        self.play_locked().await
    }

    /// Advance the cursor and play
    pub async fn next_track(&self) -> PlaylistResult<PlayOutcome> {
        self.move_to("next", |inner| Ok(inner.next_index())).await
    }

    /// Step the cursor back and play
    pub async fn previous_track(&self) -> PlaylistResult<PlayOutcome> {
        self.move_to("previous", |inner| Ok(Some(inner.previous_index())))
            .await
    }

    /// Jump to `index` and play
    pub async fn go_to_track(&self, index: usize) -> PlaylistResult<PlayOutcome> {
        self.move_to("go_to", |inner| {
            let len = inner.tracks.len();
            if index < len {
                Ok(Some(index))
            } else {
                Err(PlaylistError::IndexOutOfRange { index, len })
            }
        })
        .await
    }

    /// Halt playback and rewind the cursor to 0
    pub async fn stop(&self) -> PlaylistResult<()> {
        // Raised before waiting so the watcher ignores the in-between state
        self.stopping.store(true, Ordering::SeqCst);
        let _guard = self.wait_idle("stop").await;

        let result = self.device_call("stop", self.device.stop()).await;
        {
            let mut inner = self.inner.lock();
            inner.is_playing = false;
            inner.current_index = 0;
            inner.phase = PlaybackPhase::Idle;
        }
        self.publish(PlaylistEvent::Stopped);
        tracing::info!("Playlist stopped");
        result.map_err(PlaylistError::from)
    }

    async fn move_to<F>(&self, operation: &'static str, pick: F) -> PlaylistResult<PlayOutcome>
    where
        F: FnOnce(&Inner) -> PlaylistResult<Option<usize>>,
    {
        let guard = self.wait_idle(operation).await;

        let target = {
            let mut inner = self.inner.lock();
            if inner.tracks.is_empty() {
                return Err(PlaylistError::Empty);
            }
            let target = pick(&inner)?;
            if let Some(index) = target {
                inner.current_index = index;
            }
            target
        };

        let Some(index) = target else {
            tracing::info!(operation, "No further track");
            self.publish(PlaylistEvent::Ended);
            return Ok(PlayOutcome::Ended);
        };
        tracing::debug!(operation, index, "Cursor moved");

        match guard {
            Some(_guard) => self.play_locked().await,
            None => self.play_current_track().await,
        }
    }

    /// Load and start the track under the cursor; caller holds the busy guard
    async fn play_locked(&self) -> PlaylistResult<PlayOutcome> {
        self.stopping.store(false, Ordering::SeqCst);

        let (index, track) = {
            let inner = self.inner.lock();
            let len = inner.tracks.len();
            if len == 0 {
                return Err(PlaylistError::Empty);
            }
            let index = inner.current_index;
            let track = inner
                .tracks
                .get(index)
                .cloned()
                .ok_or(PlaylistError::IndexOutOfRange { index, len })?;
            (index, track)
        };

        if self.device_call("query", self.device.is_playing()).await? {
            self.device_call("stop", self.device.stop()).await?;
            tokio::time::sleep(self.config.settle_delay).await;
        }

        self.set_phase(PlaybackPhase::Loading);
        if let Err(e) = self.start_track(&track).await {
            {
                let mut inner = self.inner.lock();
                inner.is_playing = false;
                inner.phase = PlaybackPhase::Idle;
            }
            tracing::warn!(index, track = %track, error = %e, "Track failed to start");
            return Err(e.into());
        }

        {
            let mut inner = self.inner.lock();
            inner.is_playing = true;
            inner.phase = PlaybackPhase::Playing;
        }
        tracing::info!(index, track = %track, device = self.device.name(), "Track started");
        self.publish(PlaylistEvent::TrackStarted {
            index,
            track: track.label(),
        });
        Ok(PlayOutcome::Started { index })
    }

    async fn start_track(&self, track: &Track) -> DeviceResult<()> {
        self.device_call("load", self.device.load(track)).await?;
        self.device_call("play", self.device.play()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Completion
    // ─────────────────────────────────────────────────────────────────────────

    /// Start watching the device for track completion
    ///
    /// Push-capable devices are followed through their completion channel;
    /// every other device is polled at `poll_interval`.
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = match self.device.completion_events() {
            Some(rx) => {
                tracing::debug!(device = self.device.name(), "Following device completion events");
                tokio::spawn(completion_loop(weak, rx))
            }
            None => {
                tracing::debug!(
                    device = self.device.name(),
                    interval_ms = self.config.poll_interval.as_millis() as u64,
                    "Polling device for completion"
                );
                tokio::spawn(poll_loop(weak, self.config.poll_interval))
            }
        };

        if let Some(previous) = self.watcher.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop watching and halt playback
    pub async fn shutdown(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
        if let Err(e) = self.stop().await {
            tracing::warn!(error = %e, "Playlist stop failed during shutdown");
        }
    }

    /// One polling step: advance if the device went from playing to idle
    pub async fn poll_once(&self) {
        if !self.watching() {
            return;
        }
        let Ok(_guard) = self.busy.try_lock() else {
            return;
        };
        if !self.watching() {
            return;
        }

        match self.device_call("query", self.device.is_playing()).await {
            Ok(true) => {}
            Ok(false) => self.advance_after_completion().await,
            Err(e) => tracing::warn!(error = %e, "Device poll failed"),
        }
    }

    /// Handle a pushed completion notification
    async fn on_completion_event(&self) {
        if !self.watching() {
            return;
        }
        let Some(_guard) = self.wait_idle("completion").await else {
            return;
        };
        if self.watching() {
            self.advance_after_completion().await;
        }
    }

    fn watching(&self) -> bool {
        !self.stopping.load(Ordering::SeqCst) && self.inner.lock().is_playing
    }

    /// Caller holds the busy guard
    async fn advance_after_completion(&self) {
        let (finished, next) = {
            let inner = self.inner.lock();
            (inner.current_index, inner.next_index())
        };
        tracing::debug!(index = finished, "Track finished");
        self.publish(PlaylistEvent::TrackFinished { index: finished });

        match next {
            Some(index) => {
                self.inner.lock().current_index = index;
                if let Err(e) = self.play_locked().await {
                    tracing::warn!(index, error = %e, "Could not advance playlist");
                }
            }
            None => {
                {
                    let mut inner = self.inner.lock();
                    inner.is_playing = false;
                    inner.current_index = 0;
                    inner.phase = PlaybackPhase::Idle;
                }
                tracing::info!("Playlist ended");
                self.publish(PlaylistEvent::Ended);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    async fn wait_idle(&self, operation: &'static str) -> Option<MutexGuard<'_, ()>> {
        match tokio::time::timeout(self.config.idle_timeout, self.busy.lock()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = self.config.idle_timeout.as_millis() as u64,
                    "Playlist still busy, proceeding anyway"
                );
                None
            }
        }
    }

    async fn device_call<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = DeviceResult<T>>,
    ) -> DeviceResult<T> {
        let after = self.config.device_timeout;
        tokio::time::timeout(after, call)
            .await
            .map_err(|_| DeviceError::Timeout { operation, after })?
    }

    fn set_phase(&self, phase: PlaybackPhase) {
        self.inner.lock().phase = phase;
    }

    fn publish(&self, event: PlaylistEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Drop for PlaylistManager {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for PlaylistManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaylistManager")
            .field("device", &self.device.name())
            .field("state", &self.state())
            .finish()
    }
}

async fn poll_loop(manager: Weak<PlaylistManager>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.poll_once().await;
    }
}

async fn completion_loop(manager: Weak<PlaylistManager>, mut rx: broadcast::Receiver<()>) {
    loop {
        match rx.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.on_completion_event().await;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::SilentDevice;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Device whose playing flag is driven by the test
    #[derive(Default)]
    struct MockDevice {
        plays: AtomicUsize,
        stops: AtomicUsize,
        playing: AtomicBool,
        play_delay: Duration,
        loaded: Mutex<Vec<String>>,
        pushed: Option<broadcast::Sender<()>>,
    }

    impl MockDevice {
        fn slow(play_delay: Duration) -> Self {
            Self {
                play_delay,
                ..Default::default()
            }
        }

        fn finish(&self) {
            self.playing.store(false, Ordering::SeqCst);
            if let Some(tx) = &self.pushed {
                let _ = tx.send(());
            }
        }
    }

    #[async_trait]
    impl PlaybackDevice for MockDevice {
        fn name(&self) -> &str {
            "mock"
        }

        async fn load(&self, track: &Track) -> DeviceResult<()> {
            self.loaded.lock().push(track.label());
            Ok(())
        }

        async fn play(&self) -> DeviceResult<()> {
            if !self.play_delay.is_zero() {
                tokio::time::sleep(self.play_delay).await;
            }
            self.plays.fetch_add(1, Ordering::SeqCst);
            self.playing.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> DeviceResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.playing.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn is_playing(&self) -> DeviceResult<bool> {
            Ok(self.playing.load(Ordering::SeqCst))
        }

        fn completion_events(&self) -> Option<broadcast::Receiver<()>> {
            self.pushed.as_ref().map(|tx| tx.subscribe())
        }
    }

    fn config() -> PlaylistConfig {
        PlaylistConfig::default()
            .with_settle_delay(Duration::from_millis(1))
            .with_idle_timeout(Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(5))
    }

    fn buffers(names: &[&str]) -> Vec<Track> {
        names
            .iter()
            .map(|name| Track::buffer(*name, "wav", vec![0u8; 4]))
            .collect()
    }

    async fn manager_with(device: Arc<MockDevice>, names: &[&str]) -> Arc<PlaylistManager> {
        let manager = Arc::new(PlaylistManager::new(device, config()));
        assert_eq!(manager.load_tracks(buffers(names)).await, names.len());
        manager
    }

    #[tokio::test]
    async fn test_rapid_double_play_hits_device_once() {
        let device = Arc::new(MockDevice::slow(Duration::from_millis(30)));
        let manager = manager_with(device.clone(), &["a"]).await;

        let (first, second) = tokio::join!(manager.play_current_track(), manager.play_current_track());

        assert_eq!(first.unwrap(), PlayOutcome::Started { index: 0 });
        assert_eq!(second.unwrap(), PlayOutcome::Busy);
        assert_eq!(device.plays.load(Ordering::SeqCst), 1);
        assert!(manager.is_playing());
    }

    #[tokio::test]
    async fn test_load_drops_invalid_entries() {
        let dir = tempfile::tempdir().unwrap();
        let intro = dir.path().join("intro.mp3");
        let outro = dir.path().join("outro.WAV");
        let notes = dir.path().join("notes.txt");
        for path in [&intro, &outro, &notes] {
            std::fs::write(path, b"data").unwrap();
        }

        let manager = PlaylistManager::new(Arc::new(MockDevice::default()), config());
        let count = manager
            .load_tracks(vec![Track::file(&intro), Track::file(&notes), Track::file(&outro)])
            .await;
        assert_eq!(count, 2);
        assert_eq!(manager.track_count(), 2);

        let count = manager
            .load_tracks(vec![
                Track::file(dir.path().join("missing.mp3")),
                Track::buffer("empty", "wav", Vec::<u8>::new()),
                Track::buffer("tts", "wav", vec![1u8]),
            ])
            .await;
        assert_eq!(count, 1);

        assert!(matches!(
            manager.add_track(Track::file(&notes)).await,
            Err(PlaylistError::InvalidTrack { .. })
        ));
    }

    #[tokio::test]
    async fn test_completion_advances_then_ends() {
        let device = Arc::new(MockDevice::default());
        let manager = manager_with(device.clone(), &["a", "b"]).await;
        let mut events = manager.subscribe();

        manager.play_current_track().await.unwrap();
        manager.poll_once().await;
        assert_eq!(manager.current_index(), 0, "still playing, no advance");

        device.finish();
        manager.poll_once().await;
        assert_eq!(manager.current_index(), 1);
        assert!(manager.is_playing());

        device.finish();
        manager.poll_once().await;
        assert!(!manager.is_playing());
        assert_eq!(manager.current_index(), 0);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                PlaylistEvent::TrackStarted { index: 0, track: "a".into() },
                PlaylistEvent::TrackFinished { index: 0 },
                PlaylistEvent::TrackStarted { index: 1, track: "b".into() },
                PlaylistEvent::TrackFinished { index: 1 },
                PlaylistEvent::Ended,
            ]
        );
        assert_eq!(*device.loaded.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_loop_wraps_to_first_track() {
        let device = Arc::new(MockDevice::default());
        let manager = manager_with(device.clone(), &["a", "b"]).await;
        manager.set_loop(true);

        manager.go_to_track(1).await.unwrap();
        device.finish();
        manager.poll_once().await;

        assert_eq!(manager.current_index(), 0);
        assert!(manager.is_playing());
        assert_eq!(device.plays.load(Ordering::SeqCst), 2);

        assert_eq!(manager.previous_track().await.unwrap(), PlayOutcome::Started { index: 1 });
    }

    #[tokio::test]
    async fn test_stop_resets_cursor_and_silences_watcher() {
        let device = Arc::new(MockDevice::default());
        let manager = manager_with(device.clone(), &["a", "b", "c"]).await;

        manager.go_to_track(2).await.unwrap();
        manager.stop().await.unwrap();

        let state = manager.state();
        assert_eq!(state.current_index, 0);
        assert!(!state.is_playing);
        assert!(state.is_stopping);
        assert_eq!(state.phase, PlaybackPhase::Idle);

        manager.poll_once().await;
        assert_eq!(device.plays.load(Ordering::SeqCst), 1);

        // Playing again clears the stopping flag
        manager.play_current_track().await.unwrap();
        assert!(!manager.state().is_stopping);
    }

    #[tokio::test]
    async fn test_replaying_stops_and_settles_first() {
        let device = Arc::new(MockDevice::default());
        let manager = manager_with(device.clone(), &["a", "b"]).await;

        manager.play_current_track().await.unwrap();
        manager.next_track().await.unwrap();

        assert_eq!(device.stops.load(Ordering::SeqCst), 1);
        assert_eq!(device.plays.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_move_proceeds_after_idle_timeout() {
        let device = Arc::new(MockDevice::default());
        let manager = manager_with(device.clone(), &["a", "b"]).await;

        let held = manager.busy.lock().await;
        let outcome = manager.next_track().await.unwrap();
        drop(held);

        // Cursor moved anyway, but the device was left alone
        assert_eq!(outcome, PlayOutcome::Busy);
        assert_eq!(manager.current_index(), 1);
        assert_eq!(device.plays.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_navigation_errors() {
        let manager = PlaylistManager::new(Arc::new(MockDevice::default()), config());
        assert!(matches!(manager.next_track().await, Err(PlaylistError::Empty)));
        assert!(matches!(manager.play_current_track().await, Err(PlaylistError::Empty)));

        manager.load_tracks(buffers(&["a", "b"])).await;
        assert!(matches!(
            manager.go_to_track(5).await,
            Err(PlaylistError::IndexOutOfRange { index: 5, len: 2 })
        ));

        manager.go_to_track(1).await.unwrap();
        assert_eq!(manager.next_track().await.unwrap(), PlayOutcome::Ended);
        assert_eq!(manager.current_index(), 1);

        manager.remove_track(0).unwrap();
        assert_eq!(manager.current_index(), 0);
        assert_eq!(manager.current_track().unwrap().label(), "b");
    }

    #[tokio::test]
    async fn test_watcher_drives_playlist_to_the_end() {
        let manager = Arc::new(PlaylistManager::new(
            Arc::new(SilentDevice::new(Duration::from_millis(15))),
            config(),
        ));
        manager.load_tracks(buffers(&["a", "b"])).await;
        let mut events = manager.subscribe();

        manager.start();
        manager.play_current_track().await.unwrap();

        let ended = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(PlaylistEvent::Ended) = events.recv().await {
                    break;
                }
            }
        })
        .await;
        assert!(ended.is_ok());
        assert!(!manager.is_playing());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_poll_interval_still_advances() {
        assert_eq!(
            config().with_poll_interval(Duration::ZERO).poll_interval,
            MIN_POLL_INTERVAL
        );

        // The field is public, so the watcher clamps as well
        let zero = PlaylistConfig {
            poll_interval: Duration::ZERO,
            ..config()
        };
        let manager = Arc::new(PlaylistManager::new(
            Arc::new(SilentDevice::new(Duration::from_millis(10))),
            zero,
        ));
        manager.load_tracks(buffers(&["a", "b"])).await;
        let mut events = manager.subscribe();

        manager.start();
        manager.play_current_track().await.unwrap();

        let ended = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(PlaylistEvent::Ended) = events.recv().await {
                    break;
                }
            }
        })
        .await;
        assert!(ended.is_ok());
        assert!(!manager.is_playing());
        assert!(manager.watcher.lock().as_ref().is_some_and(|h| !h.is_finished()));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_push_completion_events() {
        let (tx, _) = broadcast::channel(4);
        let device = Arc::new(MockDevice {
            pushed: Some(tx),
            ..Default::default()
        });
        let manager = manager_with(device.clone(), &["a", "b"]).await;
        let mut events = manager.subscribe();

        manager.start();
        manager.play_current_track().await.unwrap();
        device.finish();

        let started_second = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(PlaylistEvent::TrackStarted { index: 1, .. }) = events.recv().await {
                    break;
                }
            }
        })
        .await;
        assert!(started_second.is_ok());
        assert_eq!(manager.current_index(), 1);
    }
}
