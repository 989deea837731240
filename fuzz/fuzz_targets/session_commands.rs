#![no_main]

use libfuzzer_sys::fuzz_target;
use sonicwave::audio::{EngineSignal, NullAudioEngine};
use sonicwave::config::Store;
use sonicwave::controller::{Command, PlaybackController};
use sonicwave::error::PersistenceError;
use sonicwave::library::MetadataReader;
use sonicwave::model::{PersistedState, RepeatMode, SessionState, TrackInfo};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

struct Discard;

impl Store for Discard {
    fn load(&self) -> PersistedState {
        PersistedState::default()
    }

    fn save(&self, _state: &PersistedState) -> Result<(), PersistenceError> {
        Ok(())
    }
}

struct Fallback;

impl MetadataReader for Fallback {
    fn read(&self, path: &Path) -> TrackInfo {
        TrackInfo::fallback(path)
    }
}

fuzz_target!(|data: &[u8]| {
    let (tx, rx) = mpsc::channel();
    let mut controller = PlaybackController::new(
        NullAudioEngine::new(tx.clone()),
        rx,
        Box::new(Fallback),
        Box::new(Discard),
    )
    .with_queue_seed(data.len() as u64);

    let len = data.first().map_or(0, |byte| usize::from(*byte % 16));
    let tracks: Vec<PathBuf> = (0..len)
        .map(|idx| PathBuf::from(format!("track_{idx}.mp3")))
        .collect();
    controller.load_queue(tracks.clone());

    for pair in data.chunks(2) {
        let op = pair[0];
        let arg = pair.get(1).copied().unwrap_or_default();
        let track = tracks
            .get(usize::from(arg) % tracks.len().max(1))
            .cloned()
            .unwrap_or_else(|| PathBuf::from("missing.mp3"));

        let command = match op % 14 {
            0 => Command::Play(track),
            1 => Command::Toggle,
            2 => Command::Next,
            3 => Command::Previous,
            4 => Command::Stop,
            5 => Command::Seek(f64::from(arg) - 20.0),
            6 => Command::SetVolume(i32::from(arg) - 60),
            7 => Command::SetShuffled(arg % 2 == 0),
            8 => Command::SetRepeatMode(match arg % 3 {
                0 => RepeatMode::Off,
                1 => RepeatMode::One,
                _ => RepeatMode::All,
            }),
            9 => Command::CreatePlaylist(format!("list {}", arg % 4)),
            10 => Command::AddToPlaylist {
                name: format!("list {}", arg % 4),
                track,
            },
            11 => Command::OpenPlaylist(format!("list {}", arg % 4)),
            12 => {
                let generation = controller.generation().saturating_sub(u64::from(arg % 2));
                let _ = tx.send(EngineSignal::Finished { generation });
                controller.pump_signals();
                continue;
            }
            _ => Command::ToggleFavorite(track),
        };
        let _ = controller.dispatch(command);

        let snapshot = controller.snapshot();
        assert!(snapshot.volume <= 100);
        match snapshot.queue_index {
            Some(idx) => assert!(idx < snapshot.queue_len),
            None => assert_eq!(snapshot.queue_len, 0),
        }
        if snapshot.state == SessionState::Stopped {
            assert!(snapshot.track.is_none());
        } else {
            assert!(snapshot.track.is_some());
        }
    }
});
