use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    pub fn next(self) -> Self {
        match self {
            Self::Off => Self::One,
            Self::One => Self::All,
            Self::All => Self::Off,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::One => "One",
            Self::All => "All",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Display metadata for a single track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    pub duration: Option<Duration>,
}

impl TrackInfo {
    /// Metadata used when a file's tags can't be read.
    pub fn fallback(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            title: file_label(path),
            artist: String::from(UNKNOWN_ARTIST),
            duration: None,
        }
    }

    pub fn matches(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&needle)
            || self.artist.to_lowercase().contains(&needle)
            || file_label(&self.path).to_lowercase().contains(&needle)
    }
}

pub fn file_label(path: &Path) -> String {
    path.file_name()
        .and_then(OsStr::to_str)
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    #[serde(default)]
    pub playlists: BTreeMap<String, Vec<PathBuf>>,
    #[serde(default)]
    pub favorites: BTreeSet<PathBuf>,
    #[serde(default)]
    pub last_directory: Option<PathBuf>,
    #[serde(default = "default_volume")]
    pub volume: u8,
    #[serde(default)]
    pub repeat_mode: RepeatMode,
    #[serde(default)]
    pub shuffled: bool,
}

fn default_volume() -> u8 {
    70
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            playlists: BTreeMap::new(),
            favorites: BTreeSet::new(),
            last_directory: None,
            volume: default_volume(),
            repeat_mode: RepeatMode::default(),
            shuffled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_mode_cycles_through_all_modes() {
        assert_eq!(RepeatMode::Off.next(), RepeatMode::One);
        assert_eq!(RepeatMode::One.next(), RepeatMode::All);
        assert_eq!(RepeatMode::All.next(), RepeatMode::Off);
    }

    #[test]
    fn fallback_uses_file_name_and_unknown_artist() {
        let info = TrackInfo::fallback(Path::new("/music/intro.mp3"));
        assert_eq!(info.title, "intro.mp3");
        assert_eq!(info.artist, UNKNOWN_ARTIST);
        assert_eq!(info.duration, None);
    }

    #[test]
    fn search_matches_title_artist_and_file_name() {
        let info = TrackInfo {
            path: PathBuf::from("/music/01-track.flac"),
            title: String::from("Blue Monday"),
            artist: String::from("New Order"),
            duration: None,
        };
        assert!(info.matches("monday"));
        assert!(info.matches("ORDER"));
        assert!(info.matches("01-track"));
        assert!(info.matches("   "));
        assert!(!info.matches("ceremony"));
    }

    #[test]
    fn old_state_files_fill_missing_fields_with_defaults() {
        let state: PersistedState =
            serde_json::from_str(r#"{"playlists":{"mix":["a.mp3"]}}"#).expect("parse");
        assert_eq!(state.playlists["mix"], vec![PathBuf::from("a.mp3")]);
        assert!(state.favorites.is_empty());
        assert_eq!(state.last_directory, None);
        assert_eq!(state.volume, 70);
        assert_eq!(state.repeat_mode, RepeatMode::Off);
    }
}
