use crate::audio::{AudioEngine, NullAudioEngine, RodioAudioEngine};
use crate::config::JsonStore;
use crate::controller::{Command, ControllerEvent, PlaybackController};
use crate::library::TagReader;
use crate::model::{RepeatMode, SessionState};
use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::Rect;
use std::io::stdout;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const VOLUME_STEP: i32 = 5;
const SEEK_STEP_SECS: f64 = 5.0;

pub fn run(start_dir: Option<PathBuf>) -> Result<()> {
    let (signal_tx, signal_rx) = mpsc::channel();
    let engine: Box<dyn AudioEngine> = match RodioAudioEngine::new(signal_tx.clone()) {
        Ok(engine) => Box::new(engine),
        Err(err) => {
            warn!(error = %err, "audio output unavailable, using silent engine");
            Box::new(NullAudioEngine::new(signal_tx))
        }
    };
    info!(output = %engine.output_name(), "audio engine ready");

    let store = JsonStore::open_default().context("failed to locate state file")?;
    let controller =
        PlaybackController::new(engine, signal_rx, Box::new(TagReader), Box::new(store));
    let mut app = App::new(controller);

    let initial = start_dir.or_else(|| app.controller.last_directory().map(Path::to_path_buf));
    if let Some(dir) = initial {
        app.scan(&dir);
    }

    enable_raw_mode()?;
    let mut out = stdout();
    execute!(out, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(out);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut last_draw = Instant::now();
    let mut list_rect = Rect::default();

    let result: Result<()> = loop {
        app.controller.tick();
        app.drain_events();

        if app.dirty || last_draw.elapsed() > Duration::from_millis(250) {
            terminal.draw(|frame| {
                list_rect = crate::ui::track_list_rect(frame.area());
                crate::ui::draw(frame, &app);
            })?;
            app.dirty = false;
            last_draw = Instant::now();
        }

        if !event::poll(Duration::from_millis(33))? {
            continue;
        }

        match event::read()? {
            Event::Mouse(mouse) => app.handle_mouse(mouse, list_rect),
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if app.handle_key(key) {
                    break Ok(());
                }
            }
            Event::Resize(..) => app.dirty = true,
            _ => {}
        }
    };

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    let save_result = app.controller.shutdown();
    result?;
    save_result.context("failed to save state")?;
    Ok(())
}

/// Terminal front end state around a playback controller.
pub struct App<E: AudioEngine> {
    controller: PlaybackController<E>,
    events: Receiver<ControllerEvent>,
    selected: usize,
    filter: Option<String>,
    command_mode: bool,
    command_buffer: String,
    status: String,
    dirty: bool,
}

impl<E: AudioEngine> App<E> {
    pub fn new(mut controller: PlaybackController<E>) -> Self {
        let events = controller.subscribe();
        Self {
            controller,
            events,
            selected: 0,
            filter: None,
            command_mode: false,
            command_buffer: String::new(),
            status: String::from("Press : for commands, Ctrl+C to quit"),
            dirty: true,
        }
    }

    pub fn controller(&self) -> &PlaybackController<E> {
        &self.controller
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// The command prompt contents while it is open.
    pub fn prompt(&self) -> Option<&str> {
        self.command_mode.then_some(self.command_buffer.as_str())
    }

    /// Tracks shown in the list: the whole queue, or the search hits.
    pub fn visible_tracks(&self) -> Vec<PathBuf> {
        match &self.filter {
            Some(term) => self
                .controller
                .search(term)
                .map(Path::to_path_buf)
                .collect(),
            None => self.controller.queue().tracks().to_vec(),
        }
    }

    fn selected_track(&self) -> Option<PathBuf> {
        self.visible_tracks().into_iter().nth(self.selected)
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        self.dirty = true;
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply_event(event);
        }
    }

    fn apply_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::TrackChanged(Some(info)) => {
                self.set_status(format!("Playing {} - {}", info.title, info.artist));
            }
            ControllerEvent::TrackChanged(None) => self.dirty = true,
            ControllerEvent::StateChanged(SessionState::Paused) => self.set_status("Paused"),
            ControllerEvent::StateChanged(SessionState::Stopped) => self.set_status("Stopped"),
            ControllerEvent::StateChanged(SessionState::Playing) => self.dirty = true,
            ControllerEvent::VolumeChanged(level) => self.set_status(format!("Volume {level}%")),
            ControllerEvent::ModesChanged { repeat, shuffled } => {
                let shuffle = if shuffled { "on" } else { "off" };
                self.set_status(format!("Repeat {}, shuffle {shuffle}", repeat.label()));
            }
            ControllerEvent::QueueChanged { len } => {
                self.selected = 0;
                self.filter = None;
                self.set_status(format!("{len} tracks queued"));
            }
            ControllerEvent::LibraryChanged => self.dirty = true,
            ControllerEvent::Error(message) => self.set_status(message),
        }
    }

    fn execute(&mut self, command: Command) {
        self.try_execute(command);
    }

    /// Runs `command`, reporting a failure in the status line.
    fn try_execute(&mut self, command: Command) -> bool {
        let result = self.controller.dispatch(command);
        self.drain_events();
        match result {
            Ok(()) => true,
            Err(err) => {
                self.set_status(err.to_string());
                false
            }
        }
    }

    fn scan(&mut self, dir: &Path) {
        self.execute(Command::ScanDirectory(dir.to_path_buf()));
    }

    /// Handles one key press. Returns true when the user asked to quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return true;
        }

        if self.command_mode {
            match key.code {
                KeyCode::Esc => {
                    self.command_mode = false;
                    self.command_buffer.clear();
                }
                KeyCode::Enter => {
                    let input = std::mem::take(&mut self.command_buffer);
                    self.command_mode = false;
                    self.run_command(&input);
                }
                KeyCode::Backspace => {
                    self.command_buffer.pop();
                }
                KeyCode::Char(ch) => self.command_buffer.push(ch),
                _ => {}
            }
            self.dirty = true;
            return false;
        }

        match key.code {
            KeyCode::Down => self.select_next(),
            KeyCode::Up => self.select_prev(),
            KeyCode::Enter => {
                if let Some(track) = self.selected_track() {
                    self.execute(Command::Play(track));
                }
            }
            KeyCode::Char(' ') => self.execute(Command::Toggle),
            KeyCode::Char('n') => self.execute(Command::Next),
            KeyCode::Char('b') => self.execute(Command::Previous),
            KeyCode::Char('s') => self.execute(Command::Stop),
            KeyCode::Char('r') => self.execute(Command::CycleRepeatMode),
            KeyCode::Char('z') => self.execute(Command::ToggleShuffle),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                self.execute(Command::AdjustVolume(VOLUME_STEP));
            }
            KeyCode::Char('-') => self.execute(Command::AdjustVolume(-VOLUME_STEP)),
            KeyCode::Right => self.execute(Command::SeekBy(SEEK_STEP_SECS)),
            KeyCode::Left => self.execute(Command::SeekBy(-SEEK_STEP_SECS)),
            KeyCode::Char('f') => self.favorite_selected(),
            KeyCode::Esc if self.filter.is_some() => {
                self.filter = None;
                self.selected = 0;
                self.set_status("Search cleared");
            }
            KeyCode::Char(':') => {
                self.command_mode = true;
                self.dirty = true;
            }
            _ => {}
        }
        false
    }

    fn handle_mouse(&mut self, mouse: MouseEvent, list_rect: Rect) {
        let inside_list = point_in_rect(mouse.column, mouse.row, list_rect);
        match mouse.kind {
            MouseEventKind::ScrollDown if inside_list => self.select_next(),
            MouseEventKind::ScrollUp if inside_list => self.select_prev(),
            _ => {}
        }
    }

    fn select_next(&mut self) {
        let len = self.visible_tracks().len();
        if len > 0 {
            self.selected = (self.selected + 1).min(len - 1);
            self.dirty = true;
        }
    }

    fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
        self.dirty = true;
    }

    fn favorite_selected(&mut self) {
        let Some(track) = self.selected_track() else {
            self.set_status("No track selected");
            return;
        };
        match self.controller.toggle_favorite(&track) {
            Ok(true) => self.set_status("Added to favorites"),
            Ok(false) => self.set_status("Removed from favorites"),
            Err(err) => self.set_status(err.to_string()),
        }
    }

    fn run_command(&mut self, raw: &str) {
        let input = raw.trim();
        if input.is_empty() {
            self.set_status("No command");
            return;
        }

        let mut split = input.splitn(2, char::is_whitespace);
        let command = split.next().unwrap_or_default();
        let rest = split.next().unwrap_or("").trim();

        match command {
            "help" => self.set_status(
                "Commands: scan <dir> | playlist <new|add|open> <name> | fav | search <term> | repeat [off|one|all] | shuffle | vol <0-100> | seek <seconds>",
            ),
            "scan" => {
                if rest.is_empty() {
                    self.set_status("Usage: scan <dir>");
                } else {
                    self.scan(Path::new(rest));
                }
            }
            "playlist" => self.run_playlist_command(rest),
            "fav" => self.favorite_selected(),
            "search" => {
                if rest.is_empty() {
                    self.filter = None;
                    self.set_status("Search cleared");
                } else {
                    let hits = self.controller.search(rest).count();
                    self.filter = Some(rest.to_string());
                    self.selected = 0;
                    self.set_status(format!("{hits} matches for \"{rest}\""));
                }
            }
            "repeat" => match rest {
                "" => self.execute(Command::CycleRepeatMode),
                "off" => self.execute(Command::SetRepeatMode(RepeatMode::Off)),
                "one" => self.execute(Command::SetRepeatMode(RepeatMode::One)),
                "all" => self.execute(Command::SetRepeatMode(RepeatMode::All)),
                _ => self.set_status("Usage: repeat [off|one|all]"),
            },
            "shuffle" => match rest {
                "" => self.execute(Command::ToggleShuffle),
                "on" => self.execute(Command::SetShuffled(true)),
                "off" => self.execute(Command::SetShuffled(false)),
                _ => self.set_status("Usage: shuffle [on|off]"),
            },
            "vol" => match rest.parse::<i32>() {
                Ok(level) => self.execute(Command::SetVolume(level)),
                Err(_) => self.set_status("Usage: vol <0-100>"),
            },
            "seek" => match rest.parse::<f64>() {
                Ok(seconds) => self.execute(Command::Seek(seconds)),
                Err(_) => self.set_status("Usage: seek <seconds>"),
            },
            _ => self.set_status("Unknown command. Use :help"),
        }
    }

    fn run_playlist_command(&mut self, rest: &str) {
        let mut split = rest.splitn(2, char::is_whitespace);
        let action = split.next().unwrap_or_default();
        let name = split.next().unwrap_or("").trim();

        if name.is_empty() {
            self.set_status("Usage: playlist <new|add|open> <name>");
            return;
        }

        match action {
            "new" => {
                if self.try_execute(Command::CreatePlaylist(name.to_string())) {
                    self.set_status(format!("Created playlist {name}"));
                }
            }
            "add" => {
                let Some(track) = self.selected_track() else {
                    self.set_status("No track selected");
                    return;
                };
                let added = self.try_execute(Command::AddToPlaylist {
                    name: name.to_string(),
                    track,
                });
                if added {
                    self.set_status(format!("Added to {name}"));
                }
            }
            "open" => self.execute(Command::OpenPlaylist(name.to_string())),
            _ => self.set_status("Usage: playlist <new|add|open> <name>"),
        }
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    if rect.width == 0 || rect.height == 0 {
        return false;
    }
    x >= rect.x
        && x < rect.x.saturating_add(rect.width)
        && y >= rect.y
        && y < rect.y.saturating_add(rect.height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Store;
    use crate::error::PersistenceError;
    use crate::model::{PersistedState, TrackInfo};
    use tempfile::tempdir;

    struct NoStore;

    impl Store for NoStore {
        fn load(&self) -> PersistedState {
            PersistedState::default()
        }

        fn save(&self, _state: &PersistedState) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    fn app_with(tracks: &[&str]) -> App<NullAudioEngine> {
        let (tx, rx) = mpsc::channel();
        let controller = PlaybackController::new(
            NullAudioEngine::new(tx),
            rx,
            Box::new(TagReader),
            Box::new(NoStore),
        );
        let mut app = App::new(controller);
        app.controller
            .load_queue(tracks.iter().map(PathBuf::from).collect());
        app.drain_events();
        app
    }

    fn press(app: &mut App<NullAudioEngine>, code: KeyCode) -> bool {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_command(app: &mut App<NullAudioEngine>, command: &str) {
        press(app, KeyCode::Char(':'));
        for ch in command.chars() {
            press(app, KeyCode::Char(ch));
        }
        press(app, KeyCode::Enter);
    }

    #[test]
    fn unknown_command_is_reported() {
        let mut app = app_with(&[]);
        app.run_command("wat");
        assert!(app.status().contains("Unknown command"));
    }

    #[test]
    fn ctrl_c_quits_even_in_command_mode() {
        let mut app = app_with(&[]);
        press(&mut app, KeyCode::Char(':'));
        assert!(app.prompt().is_some());
        assert!(app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)));
    }

    #[test]
    fn enter_plays_selected_and_space_toggles() {
        let mut app = app_with(&["a.mp3", "b.mp3"]);
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.controller().current_track(), Some(Path::new("b.mp3")));
        assert!(app.status().starts_with("Playing b.mp3"));

        press(&mut app, KeyCode::Char(' '));
        assert_eq!(app.controller().state(), SessionState::Paused);
        assert_eq!(app.status(), "Paused");

        press(&mut app, KeyCode::Char('s'));
        assert_eq!(app.controller().state(), SessionState::Stopped);
    }

    #[test]
    fn volume_keys_step_and_clamp() {
        let mut app = app_with(&[]);
        type_command(&mut app, "vol 98");
        press(&mut app, KeyCode::Char('+'));
        assert_eq!(app.controller().volume(), 100);
        assert_eq!(app.status(), "Volume 100%");
        press(&mut app, KeyCode::Char('-'));
        assert_eq!(app.controller().volume(), 95);
    }

    #[test]
    fn repeat_and_shuffle_commands_update_modes() {
        let mut app = app_with(&["a.mp3"]);
        type_command(&mut app, "repeat all");
        assert_eq!(app.controller().queue().repeat_mode(), RepeatMode::All);
        press(&mut app, KeyCode::Char('r'));
        assert_eq!(app.controller().queue().repeat_mode(), RepeatMode::Off);

        type_command(&mut app, "shuffle on");
        assert!(app.controller().queue().is_shuffled());
        assert_eq!(app.status(), "Repeat Off, shuffle on");
    }

    #[test]
    fn search_filters_list_and_escape_clears_it() {
        let mut app = app_with(&["rock/one.mp3", "jazz/two.mp3", "rock/three.mp3"]);
        type_command(&mut app, "search e.mp3");
        assert_eq!(
            app.visible_tracks(),
            vec![PathBuf::from("rock/one.mp3"), PathBuf::from("rock/three.mp3")]
        );
        assert_eq!(app.filter(), Some("e.mp3"));
        assert_eq!(app.status(), "2 matches for \"e.mp3\"");

        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.controller().current_track(), Some(Path::new("rock/three.mp3")));

        press(&mut app, KeyCode::Esc);
        assert_eq!(app.visible_tracks().len(), 3);
    }

    #[test]
    fn playlist_commands_create_add_and_open() {
        let mut app = app_with(&["a.mp3", "b.mp3"]);
        type_command(&mut app, "playlist new evening mix");
        assert_eq!(app.status(), "Created playlist evening mix");

        press(&mut app, KeyCode::Down);
        type_command(&mut app, "playlist add evening mix");
        assert_eq!(app.status(), "Added to evening mix");

        type_command(&mut app, "playlist new evening mix");
        assert!(app.status().contains("already exists"));

        type_command(&mut app, "playlist open evening mix");
        assert_eq!(app.visible_tracks(), vec![PathBuf::from("b.mp3")]);
        assert_eq!(app.status(), "1 tracks queued");

        type_command(&mut app, "playlist open nope");
        assert!(app.status().contains("no playlist named nope"));
    }

    #[test]
    fn favorite_key_toggles_selected_track() {
        let mut app = app_with(&["a.mp3"]);
        press(&mut app, KeyCode::Char('f'));
        assert!(app.controller().is_favorite(Path::new("a.mp3")));
        type_command(&mut app, "fav");
        assert!(!app.controller().is_favorite(Path::new("a.mp3")));
        assert_eq!(app.status(), "Removed from favorites");
    }

    #[test]
    fn scan_command_loads_directory() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("x.flac"), b"x").expect("write");
        std::fs::write(dir.path().join("cover.jpg"), b"x").expect("write");

        let mut app = app_with(&[]);
        app.run_command(&format!("scan {}", dir.path().display()));
        assert_eq!(app.controller().queue().len(), 1);
        assert_eq!(app.status(), "1 tracks queued");

        app.run_command("scan");
        assert_eq!(app.status(), "Usage: scan <dir>");
    }

    #[test]
    fn unscanned_tracks_fall_back_and_bad_seek_is_rejected() {
        let mut app = app_with(&["missing.mp3"]);
        assert_eq!(
            app.controller().track_info(Path::new("missing.mp3")),
            TrackInfo::fallback(Path::new("missing.mp3"))
        );
        type_command(&mut app, "seek abc");
        assert_eq!(app.status(), "Usage: seek <seconds>");
    }
}
