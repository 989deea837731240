//! Play queue: ordered track references, a cursor, shuffle and repeat.
//!
//! The queue decides *what* plays next; it never talks to the audio engine.
//! Manual skips and completion-triggered advances are distinguished so that
//! [`RepeatMode::One`] replays a finished track without trapping a user who
//! presses "next".

use crate::model::{Direction, RepeatMode};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};

/// Outcome of [`Queue::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Track(PathBuf),
    EndOfQueue,
}

#[derive(Debug)]
pub struct Queue {
    tracks: Vec<PathBuf>,
    index: Option<usize>,
    shuffled: bool,
    repeat: RepeatMode,
    rng: SmallRng,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Queue whose shuffles are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            tracks: Vec::new(),
            index: None,
            shuffled: false,
            repeat: RepeatMode::Off,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Replaces the queue contents. Shuffle and repeat settings carry over; a
    /// shuffled queue shuffles the incoming tracks as well.
    pub fn load(&mut self, tracks: Vec<PathBuf>) {
        self.tracks = tracks;
        if self.shuffled {
            self.tracks.shuffle(&mut self.rng);
        }
        self.index = (!self.tracks.is_empty()).then_some(0);
    }

    pub fn set_shuffled(&mut self, enabled: bool) {
        if enabled == self.shuffled {
            return;
        }

        self.shuffled = enabled;
        if enabled {
            self.tracks.shuffle(&mut self.rng);
        } else {
            self.tracks.sort();
        }
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat = mode;
    }

    pub fn cycle_repeat_mode(&mut self) -> RepeatMode {
        self.repeat = self.repeat.next();
        self.repeat
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat
    }

    pub fn advance(&mut self, direction: Direction, caused_by_completion: bool) -> Advance {
        let Some(current) = self.index else {
            return Advance::EndOfQueue;
        };
        let len = self.tracks.len();

        let next = match direction {
            Direction::Previous => Some((current + len - 1) % len),
            Direction::Next if !caused_by_completion => Some((current + 1) % len),
            Direction::Next => match self.repeat {
                RepeatMode::One => Some(current),
                RepeatMode::All => Some((current + 1) % len),
                RepeatMode::Off => (current + 1 < len).then_some(current + 1),
            },
        };

        match next {
            Some(idx) => {
                self.index = Some(idx);
                Advance::Track(self.tracks[idx].clone())
            }
            None => Advance::EndOfQueue,
        }
    }

    pub fn current(&self) -> Option<&Path> {
        self.index
            .and_then(|idx| self.tracks.get(idx))
            .map(PathBuf::as_path)
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Points the cursor at `path`. Returns false if the track isn't queued.
    pub fn select(&mut self, path: &Path) -> bool {
        match self.position_of(path) {
            Some(idx) => {
                self.index = Some(idx);
                true
            }
            None => false,
        }
    }

    pub fn select_index(&mut self, index: usize) -> bool {
        if index < self.tracks.len() {
            self.index = Some(index);
            true
        } else {
            false
        }
    }

    pub fn position_of(&self, path: &Path) -> Option<usize> {
        self.tracks.iter().position(|track| track == path)
    }

    pub fn tracks(&self) -> &[PathBuf] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Read-only view of the queued tracks accepted by `predicate`. Calling it
    /// again starts a fresh pass; the order and cursor are never touched.
    pub fn filter<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a Path> + 'a
    where
        P: Fn(&Path) -> bool + 'a,
    {
        self.tracks
            .iter()
            .map(PathBuf::as_path)
            .filter(move |path| predicate(*path))
    }
}
