//! Playback session controller.
//!
//! The controller is the single owner of the play queue and the session
//! state. Every user command goes through `&mut self` (see [`Command`] and
//! [`PlaybackController::dispatch`]); the audio engine only talks back through
//! [`EngineSignal`]s, which are matched against the session generation before
//! being acted on.
//!
//! # Decode failures
//!
//! * An explicit [`PlaybackController::play`] that fails leaves the session as
//!   it was.
//! * Skips and completion advances step over tracks that fail to load, in the
//!   same direction, trying each queued track at most once. A skip that finds
//!   nothing playable puts the queue cursor back; a completion advance that
//!   finds nothing playable stops the session.

use crate::audio::{AudioEngine, EngineSignal, MAX_VOLUME};
use crate::config::{self, Store};
use crate::error::{PlayerError, Result};
use crate::library::{self, MetadataReader};
use crate::model::{Direction, PersistedState, RepeatMode, SessionState, TrackInfo};
use crate::queue::{Advance, Queue};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Seeks land at least this far before the end of the track.
const SEEK_END_MARGIN: Duration = Duration::from_millis(1);

/// Commands accepted from the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ScanDirectory(PathBuf),
    Play(PathBuf),
    Toggle,
    Pause,
    Resume,
    Stop,
    Next,
    Previous,
    Seek(f64),
    SeekBy(f64),
    SetVolume(i32),
    AdjustVolume(i32),
    SetShuffled(bool),
    ToggleShuffle,
    SetRepeatMode(RepeatMode),
    CycleRepeatMode,
    CreatePlaylist(String),
    AddToPlaylist { name: String, track: PathBuf },
    OpenPlaylist(String),
    ToggleFavorite(PathBuf),
}

/// Notifications for subscribers, see [`PlaybackController::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    StateChanged(SessionState),
    TrackChanged(Option<TrackInfo>),
    QueueChanged { len: usize },
    ModesChanged { repeat: RepeatMode, shuffled: bool },
    VolumeChanged(u8),
    LibraryChanged,
    Error(String),
}

/// Point-in-time view of the session for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub track: Option<TrackInfo>,
    pub position: Option<Duration>,
    pub duration: Option<Duration>,
    pub volume: u8,
    pub repeat: RepeatMode,
    pub shuffled: bool,
    pub queue_index: Option<usize>,
    pub queue_len: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hop {
    Manual(Direction),
    Completion,
    Recovery,
}

pub struct PlaybackController<E: AudioEngine> {
    engine: E,
    signals: Receiver<EngineSignal>,
    metadata: Box<dyn MetadataReader>,
    store: Box<dyn Store>,
    queue: Queue,
    catalog: HashMap<PathBuf, TrackInfo>,
    library: PersistedState,
    state: SessionState,
    current: Option<PathBuf>,
    volume: u8,
    generation: u64,
    subscribers: Vec<Sender<ControllerEvent>>,
    last_error: Option<String>,
}

impl<E: AudioEngine> PlaybackController<E> {
    /// Builds a controller around `engine`, whose signals arrive on `signals`.
    /// Saved playlists, favorites and preferences are loaded from `store`.
    pub fn new(
        engine: E,
        signals: Receiver<EngineSignal>,
        metadata: Box<dyn MetadataReader>,
        store: Box<dyn Store>,
    ) -> Self {
        let library = store.load();
        let mut controller = Self {
            engine,
            signals,
            metadata,
            store,
            queue: Queue::new(),
            catalog: HashMap::new(),
            volume: library.volume.min(MAX_VOLUME),
            library,
            state: SessionState::Stopped,
            current: None,
            generation: 0,
            subscribers: Vec::new(),
            last_error: None,
        };
        controller.apply_preferences();
        controller
    }

    /// Swaps in a queue with reproducible shuffles, keeping current modes.
    pub fn with_queue_seed(mut self, seed: u64) -> Self {
        self.queue = Queue::with_seed(seed);
        self.apply_preferences();
        self
    }

    fn apply_preferences(&mut self) {
        self.queue.set_repeat_mode(self.library.repeat_mode);
        self.queue.set_shuffled(self.library.shuffled);
        self.engine.set_volume(self.volume);
    }

    pub fn subscribe(&mut self) -> Receiver<ControllerEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn dispatch(&mut self, command: Command) -> Result<()> {
        debug!(?command, "dispatch");
        match command {
            Command::ScanDirectory(dir) => self.scan_directory(&dir).map(|_| ()),
            Command::Play(track) => self.play(&track),
            Command::Toggle => self.toggle(),
            Command::Pause => {
                self.pause();
                Ok(())
            }
            Command::Resume => {
                self.resume();
                Ok(())
            }
            Command::Stop => {
                self.stop();
                Ok(())
            }
            Command::Next => self.next(),
            Command::Previous => self.previous(),
            Command::Seek(seconds) => self.seek(seconds).map(|_| ()),
            Command::SeekBy(delta) => self.seek_by(delta).map(|_| ()),
            Command::SetVolume(level) => {
                self.set_volume(level);
                Ok(())
            }
            Command::AdjustVolume(delta) => {
                self.set_volume(i32::from(self.volume).saturating_add(delta));
                Ok(())
            }
            Command::SetShuffled(enabled) => {
                self.set_shuffled(enabled);
                Ok(())
            }
            Command::ToggleShuffle => {
                self.set_shuffled(!self.queue.is_shuffled());
                Ok(())
            }
            Command::SetRepeatMode(mode) => {
                self.set_repeat_mode(mode);
                Ok(())
            }
            Command::CycleRepeatMode => {
                self.cycle_repeat_mode();
                Ok(())
            }
            Command::CreatePlaylist(name) => self.create_playlist(&name),
            Command::AddToPlaylist { name, track } => self.add_to_playlist(&name, &track),
            Command::OpenPlaylist(name) => self.open_playlist(&name),
            Command::ToggleFavorite(track) => self.toggle_favorite(&track).map(|_| ()),
        }
    }

    /// Replaces the queue with the audio files under `dir`.
    pub fn scan_directory(&mut self, dir: &Path) -> Result<usize> {
        let root = config::normalize_path(dir);
        let tracks = library::scan_directory(&root).map_err(|source| {
            let err = PlayerError::Scan {
                path: root.clone(),
                source,
            };
            self.report(&err);
            err
        })?;

        let count = tracks.len();
        self.load_queue(tracks);
        self.library.last_directory = Some(root);
        self.persist()?;
        Ok(count)
    }

    /// Replaces the queue with `tracks`. The playing track is left alone.
    pub fn load_queue(&mut self, tracks: Vec<PathBuf>) {
        for path in &tracks {
            self.remember(path);
        }
        self.queue.load(tracks);
        self.emit(ControllerEvent::QueueChanged {
            len: self.queue.len(),
        });
    }

    fn remember(&mut self, path: &Path) {
        if !self.catalog.contains_key(path) {
            let info = self.metadata.read(path);
            self.catalog.insert(path.to_path_buf(), info);
        }
    }

    /// Starts `track`. If it is queued the queue cursor moves to it.
    pub fn play(&mut self, track: &Path) -> Result<()> {
        self.start(track.to_path_buf())?;
        self.queue.select(track);
        Ok(())
    }

    /// Play/pause control: resumes, pauses, or starts the queue's current
    /// track. Does nothing when stopped with an empty queue.
    pub fn toggle(&mut self) -> Result<()> {
        match self.state {
            SessionState::Paused => self.resume(),
            SessionState::Playing => self.pause(),
            SessionState::Stopped => {
                let Some(track) = self.queue.current().map(Path::to_path_buf) else {
                    debug!("toggle ignored, queue is empty");
                    return Ok(());
                };
                return self.play(&track);
            }
        }
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state != SessionState::Playing {
            return;
        }
        self.engine.pause();
        self.set_state(SessionState::Paused);
    }

    pub fn resume(&mut self) {
        if self.state != SessionState::Paused {
            return;
        }
        self.engine.resume();
        self.set_state(SessionState::Playing);
    }

    pub fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        info!("playback stopped");
        self.halt();
    }

    fn halt(&mut self) {
        self.engine.stop();
        self.current = None;
        self.set_state(SessionState::Stopped);
        self.emit(ControllerEvent::TrackChanged(None));
    }

    pub fn next(&mut self) -> Result<()> {
        self.hop(Hop::Manual(Direction::Next)).map(|_| ())
    }

    pub fn previous(&mut self) -> Result<()> {
        self.hop(Hop::Manual(Direction::Previous)).map(|_| ())
    }

    /// Moves the play position, clamped into `[0, duration)`. Returns the
    /// position actually applied, or `None` when nothing is loaded.
    pub fn seek(&mut self, seconds: f64) -> Result<Option<Duration>> {
        if self.state == SessionState::Stopped {
            debug!(seconds, "seek ignored while stopped");
            return Ok(None);
        }

        let requested = if seconds.is_finite() {
            seconds.max(0.0)
        } else {
            0.0
        };
        let mut target = Duration::try_from_secs_f64(requested).unwrap_or(Duration::MAX);
        if let Some(duration) = self.track_duration() {
            target = target.min(duration.saturating_sub(SEEK_END_MARGIN));
        }

        if let Err(err) = self.engine.set_position(target) {
            let err = PlayerError::from(err);
            self.report(&err);
            return Err(err);
        }
        Ok(Some(target))
    }

    pub fn seek_by(&mut self, delta_seconds: f64) -> Result<Option<Duration>> {
        let position = self.engine.position().unwrap_or_default();
        self.seek(position.as_secs_f64() + delta_seconds)
    }

    /// Sets the volume, clamping out-of-range levels. Returns the level applied.
    pub fn set_volume(&mut self, level: i32) -> u8 {
        let clamped = level.clamp(0, i32::from(MAX_VOLUME)) as u8;
        self.engine.set_volume(clamped);
        if clamped != self.volume {
            self.volume = clamped;
            self.emit(ControllerEvent::VolumeChanged(clamped));
        }
        clamped
    }

    pub fn set_shuffled(&mut self, enabled: bool) {
        if enabled == self.queue.is_shuffled() {
            return;
        }
        self.queue.set_shuffled(enabled);
        // The cursor follows the playing track to its new position.
        if let Some(current) = self.current.clone() {
            self.queue.select(&current);
        }
        info!(shuffled = enabled, "shuffle changed");
        self.emit_modes();
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.queue.set_repeat_mode(mode);
        self.emit_modes();
    }

    pub fn cycle_repeat_mode(&mut self) -> RepeatMode {
        let mode = self.queue.cycle_repeat_mode();
        info!(repeat = mode.label(), "repeat mode changed");
        self.emit_modes();
        mode
    }

    pub fn create_playlist(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PlayerError::InvalidCommand(String::from(
                "playlist name cannot be empty",
            )));
        }
        if self.library.playlists.contains_key(name) {
            return Err(PlayerError::PlaylistExists(name.to_string()));
        }

        self.library.playlists.insert(name.to_string(), Vec::new());
        info!(playlist = name, "playlist created");
        self.emit(ControllerEvent::LibraryChanged);
        self.persist()
    }

    pub fn add_to_playlist(&mut self, name: &str, track: &Path) -> Result<()> {
        let Some(playlist) = self.library.playlists.get_mut(name.trim()) else {
            return Err(PlayerError::InvalidCommand(format!(
                "no playlist named {name}"
            )));
        };

        playlist.push(track.to_path_buf());
        self.emit(ControllerEvent::LibraryChanged);
        self.persist()
    }

    /// Replaces the queue with the playlist's tracks.
    pub fn open_playlist(&mut self, name: &str) -> Result<()> {
        let Some(tracks) = self.library.playlists.get(name.trim()).cloned() else {
            return Err(PlayerError::InvalidCommand(format!(
                "no playlist named {name}"
            )));
        };

        info!(playlist = name, tracks = tracks.len(), "playlist opened");
        self.load_queue(tracks);
        Ok(())
    }

    /// Flips the favorite flag on `track`; returns whether it is now a
    /// favorite. A failed save is reported but the flag stays flipped.
    pub fn toggle_favorite(&mut self, track: &Path) -> Result<bool> {
        let favorite = if self.library.favorites.remove(track) {
            false
        } else {
            self.library.favorites.insert(track.to_path_buf());
            true
        };
        self.emit(ControllerEvent::LibraryChanged);
        self.persist()?;
        Ok(favorite)
    }

    pub fn is_favorite(&self, track: &Path) -> bool {
        self.library.favorites.contains(track)
    }

    pub fn favorites(&self) -> &BTreeSet<PathBuf> {
        &self.library.favorites
    }

    pub fn playlists(&self) -> &BTreeMap<String, Vec<PathBuf>> {
        &self.library.playlists
    }

    pub fn last_directory(&self) -> Option<&Path> {
        self.library.last_directory.as_deref()
    }

    /// Queued tracks whose title, artist or file name contains `term`.
    pub fn search<'a>(&'a self, term: &'a str) -> impl Iterator<Item = &'a Path> + 'a {
        let catalog = &self.catalog;
        self.queue.filter(move |path| match catalog.get(path) {
            Some(info) => info.matches(term),
            None => TrackInfo::fallback(path).matches(term),
        })
    }

    pub fn track_info(&self, path: &Path) -> TrackInfo {
        self.catalog
            .get(path)
            .cloned()
            .unwrap_or_else(|| TrackInfo::fallback(path))
    }

    pub fn now_playing(&self) -> Option<TrackInfo> {
        self.current.as_deref().map(|path| self.track_info(path))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let loaded = self.state != SessionState::Stopped;
        SessionSnapshot {
            state: self.state,
            track: self.now_playing(),
            position: self.engine.position().filter(|_| loaded),
            duration: self.track_duration(),
            volume: self.volume,
            repeat: self.queue.repeat_mode(),
            shuffled: self.queue.is_shuffled(),
            queue_index: self.queue.index(),
            queue_len: self.queue.len(),
            generation: self.generation,
        }
    }

    fn track_duration(&self) -> Option<Duration> {
        self.current.as_ref()?;
        self.engine
            .duration()
            .or_else(|| self.now_playing().and_then(|info| info.duration))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_track(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Lets the engine run its housekeeping, then applies pending signals.
    pub fn tick(&mut self) {
        self.engine.tick();
        self.pump_signals();
    }

    /// Applies every signal the engine has sent so far without blocking.
    pub fn pump_signals(&mut self) {
        while let Ok(signal) = self.signals.try_recv() {
            self.handle_signal(signal);
        }
    }

    pub fn handle_signal(&mut self, signal: EngineSignal) {
        if signal.generation() != self.generation {
            debug!(
                signal = signal.generation(),
                current = self.generation,
                "discarding stale engine signal"
            );
            return;
        }

        match signal {
            EngineSignal::Finished { .. } => {
                if self.state != SessionState::Playing {
                    debug!(state = ?self.state, "discarding finish signal");
                    return;
                }
                debug!(generation = self.generation, "track finished");
                if let Ok(false) = self.hop(Hop::Completion) {
                    info!("reached end of queue");
                }
            }
            EngineSignal::Error { reason, .. } => {
                let Some(path) = self.current.clone() else {
                    debug!(%reason, "discarding error signal while stopped");
                    return;
                };
                let err = PlayerError::Decode { path, reason };
                warn!(error = %err, "playback failed");
                self.report(&err);
                // Each failed load is already reported by `start`.
                match self.hop(Hop::Recovery) {
                    Ok(true) => {}
                    Ok(false) => info!("reached end of queue after playback failure"),
                    Err(err) => warn!(error = %err, "no playable track left, session halted"),
                }
            }
        }
    }

    /// Writes playlists, favorites and preferences to the store and stops
    /// the engine.
    pub fn shutdown(&mut self) -> Result<()> {
        self.halt();
        self.persist()
    }

    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            volume: self.volume,
            repeat_mode: self.queue.repeat_mode(),
            shuffled: self.queue.is_shuffled(),
            ..self.library.clone()
        }
    }

    fn persist(&mut self) -> Result<()> {
        let state = self.persisted_state();
        if let Err(err) = self.store.save(&state) {
            let err = PlayerError::from(err);
            warn!(error = %err, "failed to save state");
            self.report(&err);
            return Err(err);
        }
        Ok(())
    }

    // Loads and starts `path`; the generation only moves once the engine has
    // accepted the track.
    fn start(&mut self, path: PathBuf) -> Result<()> {
        let generation = self.generation + 1;
        if let Err(err) = self.engine.load(&path, generation) {
            let err = PlayerError::from(err);
            warn!(error = %err, "failed to load track");
            self.report(&err);
            return Err(err);
        }

        self.generation = generation;
        self.engine.play();
        self.remember(&path);
        info!(track = %path.display(), generation, "now playing");
        self.current = Some(path);
        self.set_state(SessionState::Playing);
        self.emit(ControllerEvent::TrackChanged(self.now_playing()));
        Ok(())
    }

    /// Walks the queue from the cursor and starts the first track that loads.
    /// Returns `Ok(false)` when the queue ran out without an error.
    fn hop(&mut self, hop: Hop) -> Result<bool> {
        let origin = self.queue.index();
        let repeat_one = self.queue.repeat_mode() == RepeatMode::One;
        let (direction, mut caused_by_completion) = match hop {
            Hop::Manual(direction) => (direction, false),
            Hop::Completion => (Direction::Next, true),
            Hop::Recovery => (Direction::Next, !repeat_one),
        };

        let mut failure = None;
        for _ in 0..self.queue.len() {
            let track = match self.queue.advance(direction, caused_by_completion) {
                Advance::Track(track) => track,
                Advance::EndOfQueue => break,
            };
            match self.start(track) {
                Ok(()) => return Ok(true),
                Err(err) => {
                    failure = Some(err);
                    if repeat_one {
                        caused_by_completion = false;
                    }
                }
            }
        }

        match hop {
            Hop::Manual(_) => {
                if let Some(origin) = origin {
                    self.queue.select_index(origin);
                }
            }
            Hop::Completion | Hop::Recovery => self.halt(),
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(false),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(from = ?self.state, to = ?state, "session state");
        self.state = state;
        self.emit(ControllerEvent::StateChanged(state));
    }

    fn emit_modes(&mut self) {
        self.emit(ControllerEvent::ModesChanged {
            repeat: self.queue.repeat_mode(),
            shuffled: self.queue.is_shuffled(),
        });
    }

    fn report(&mut self, err: &PlayerError) {
        let message = err.to_string();
        self.last_error = Some(message.clone());
        self.emit(ControllerEvent::Error(message));
    }

    fn emit(&mut self, event: ControllerEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
