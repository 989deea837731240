//! Audio output backends.
//!
//! Engines report back to the controller only through [`EngineSignal`]s sent
//! on the channel they were built with. Every signal carries the session
//! generation the track was loaded under so stale notifications can be told
//! apart from the current track's.

use crate::error::EngineError;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const MAX_VOLUME: u8 = 100;

/// Asynchronous notifications from an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSignal {
    Finished { generation: u64 },
    Error { generation: u64, reason: String },
}

impl EngineSignal {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Finished { generation } | Self::Error { generation, .. } => *generation,
        }
    }
}

pub trait AudioEngine {
    /// Opens and decodes `path` without starting it. A failed load leaves
    /// whatever was playing before untouched.
    fn load(&mut self, path: &Path, generation: u64) -> Result<(), EngineError>;
    fn play(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    fn set_position(&mut self, position: Duration) -> Result<(), EngineError>;
    fn set_volume(&mut self, level: u8);
    fn volume(&self) -> u8;
    fn is_busy(&self) -> bool;
    fn position(&self) -> Option<Duration>;
    fn duration(&self) -> Option<Duration>;
    fn output_name(&self) -> String;

    /// Gives engines without their own threads a chance to emit signals.
    fn tick(&mut self) {}
}

impl<E: AudioEngine + ?Sized> AudioEngine for Box<E> {
    fn load(&mut self, path: &Path, generation: u64) -> Result<(), EngineError> {
        (**self).load(path, generation)
    }

    fn play(&mut self) {
        (**self).play();
    }

    fn pause(&mut self) {
        (**self).pause();
    }

    fn resume(&mut self) {
        (**self).resume();
    }

    fn stop(&mut self) {
        (**self).stop();
    }

    fn set_position(&mut self, position: Duration) -> Result<(), EngineError> {
        (**self).set_position(position)
    }

    fn set_volume(&mut self, level: u8) {
        (**self).set_volume(level);
    }

    fn volume(&self) -> u8 {
        (**self).volume()
    }

    fn is_busy(&self) -> bool {
        (**self).is_busy()
    }

    fn position(&self) -> Option<Duration> {
        (**self).position()
    }

    fn duration(&self) -> Option<Duration> {
        (**self).duration()
    }

    fn output_name(&self) -> String {
        (**self).output_name()
    }

    fn tick(&mut self) {
        (**self).tick();
    }
}

fn volume_scale(level: u8) -> f32 {
    f32::from(level.min(MAX_VOLUME)) / f32::from(MAX_VOLUME)
}

fn decode(path: &Path) -> Result<impl Source + Send + 'static, EngineError> {
    let file = File::open(path).map_err(|err| EngineError::Decode {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    Decoder::try_from(file).map_err(|err| EngineError::Decode {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Forwards an output stream failure as an error for the live generation.
/// Generation 0 means nothing is loaded and the failure is only logged.
fn report_stream_error(signals: &Sender<EngineSignal>, live: &AtomicU64, reason: String) {
    let generation = live.load(Ordering::SeqCst);
    warn!(generation, %reason, "audio stream error");
    if generation != 0 {
        let _ = signals.send(EngineSignal::Error { generation, reason });
    }
}

pub struct RodioAudioEngine {
    stream: OutputStream,
    live_generation: Arc<AtomicU64>,
    sink: Option<Arc<Sink>>,
    current: Option<PathBuf>,
    track_duration: Option<Duration>,
    volume: u8,
    signals: Sender<EngineSignal>,
}

impl RodioAudioEngine {
    pub fn new(signals: Sender<EngineSignal>) -> Result<Self, EngineError> {
        let live_generation = Arc::new(AtomicU64::new(0));
        let on_error = {
            let signals = signals.clone();
            let live = Arc::clone(&live_generation);
            move |err: rodio::cpal::StreamError| {
                report_stream_error(&signals, &live, err.to_string());
            }
        };
        let mut stream = OutputStreamBuilder::from_default_device()
            .map_err(|err| EngineError::Output(format!("no default output device: {err}")))?
            .with_error_callback(on_error)
            .open_stream_or_fallback()
            .map_err(|err| EngineError::Output(format!("failed to start output stream: {err}")))?;
        stream.log_on_drop(false);

        Ok(Self {
            stream,
            live_generation,
            sink: None,
            current: None,
            track_duration: None,
            volume: MAX_VOLUME,
            signals,
        })
    }

    // The watcher only ever reports the generation it was spawned for; the
    // controller decides whether that is still relevant.
    fn watch_for_end(&self, sink: Arc<Sink>, generation: u64) {
        let signals = self.signals.clone();
        thread::spawn(move || {
            sink.sleep_until_end();
            debug!(generation, "sink drained");
            let _ = signals.send(EngineSignal::Finished { generation });
        });
    }
}

impl AudioEngine for RodioAudioEngine {
    fn load(&mut self, path: &Path, generation: u64) -> Result<(), EngineError> {
        let source = decode(path)?;
        let duration = source.total_duration();

        if let Some(old) = self.sink.take() {
            old.stop();
        }

        let sink = Arc::new(Sink::connect_new(self.stream.mixer()));
        sink.pause();
        sink.set_volume(volume_scale(self.volume));
        sink.append(source);
        self.watch_for_end(Arc::clone(&sink), generation);
        self.live_generation.store(generation, Ordering::SeqCst);

        self.sink = Some(sink);
        self.current = Some(path.to_path_buf());
        self.track_duration = duration;
        Ok(())
    }

    fn play(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn resume(&mut self) {
        self.play();
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.live_generation.store(0, Ordering::SeqCst);
        self.current = None;
        self.track_duration = None;
    }

    fn set_position(&mut self, position: Duration) -> Result<(), EngineError> {
        let sink = self.sink.as_ref().ok_or(EngineError::NoTrack)?;
        sink.try_seek(position)
            .map_err(|err| EngineError::Output(format!("failed to seek: {err:?}")))
    }

    fn set_volume(&mut self, level: u8) {
        self.volume = level.min(MAX_VOLUME);
        if let Some(sink) = &self.sink {
            sink.set_volume(volume_scale(self.volume));
        }
    }

    fn volume(&self) -> u8 {
        self.volume
    }

    fn is_busy(&self) -> bool {
        self.sink
            .as_ref()
            .is_some_and(|sink| !sink.empty() && !sink.is_paused())
    }

    fn position(&self) -> Option<Duration> {
        self.current.as_ref()?;
        self.sink.as_ref().map(|sink| sink.get_pos())
    }

    fn duration(&self) -> Option<Duration> {
        self.track_duration
    }

    fn output_name(&self) -> String {
        String::from("System default output")
    }
}

/// Silent engine driven by a wall clock, used when no output device opens.
pub struct NullAudioEngine {
    paused: bool,
    current: Option<PathBuf>,
    generation: u64,
    volume: u8,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
    signals: Sender<EngineSignal>,
}

impl NullAudioEngine {
    pub fn new(signals: Sender<EngineSignal>) -> Self {
        Self {
            paused: false,
            current: None,
            generation: 0,
            volume: MAX_VOLUME,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
            signals,
        }
    }

    /// Missing files are accepted with an unknown duration so the engine can
    /// stand in for tracks that were never on disk. A file that exists must
    /// decode.
    fn decoded_duration(path: &Path) -> Result<Option<Duration>, EngineError> {
        if !path.exists() {
            return Ok(None);
        }
        Ok(decode(path)?
            .total_duration()
            .filter(|duration| !duration.is_zero()))
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if !self.paused
            && self.current.is_some()
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        if let Some(duration) = self.track_duration {
            return position.min(duration);
        }
        position
    }

    fn is_finished(&self) -> bool {
        let Some(duration) = self.track_duration else {
            return false;
        };
        self.started_at.is_some() && !self.paused && self.current_position() >= duration
    }
}

impl AudioEngine for NullAudioEngine {
    fn load(&mut self, path: &Path, generation: u64) -> Result<(), EngineError> {
        let duration = Self::decoded_duration(path)?;
        self.paused = false;
        self.current = Some(path.to_path_buf());
        self.generation = generation;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = duration;
        Ok(())
    }

    fn play(&mut self) {
        if self.current.is_some() {
            self.started_at = Some(Instant::now());
        }
        self.paused = false;
    }

    fn pause(&mut self) {
        self.position_offset = self.current_position();
        self.started_at = None;
        self.paused = true;
    }

    fn resume(&mut self) {
        self.play();
    }

    fn stop(&mut self) {
        self.current = None;
        self.paused = false;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = None;
    }

    fn set_position(&mut self, position: Duration) -> Result<(), EngineError> {
        if self.current.is_none() {
            return Err(EngineError::NoTrack);
        }

        self.position_offset = self
            .track_duration
            .map_or(position, |duration| position.min(duration));
        self.started_at = if self.paused {
            None
        } else {
            Some(Instant::now())
        };
        Ok(())
    }

    fn set_volume(&mut self, level: u8) {
        self.volume = level.min(MAX_VOLUME);
    }

    fn volume(&self) -> u8 {
        self.volume
    }

    fn is_busy(&self) -> bool {
        self.started_at.is_some() && !self.is_finished()
    }

    fn position(&self) -> Option<Duration> {
        self.current.as_ref()?;
        Some(self.current_position())
    }

    fn duration(&self) -> Option<Duration> {
        self.track_duration
    }

    fn output_name(&self) -> String {
        String::from("Null audio engine")
    }

    fn tick(&mut self) {
        if !self.is_finished() {
            return;
        }

        self.position_offset = self.current_position();
        self.started_at = None;
        let _ = self.signals.send(EngineSignal::Finished {
            generation: self.generation,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{AudioEngine, EngineSignal, NullAudioEngine, report_stream_error};
    use crate::error::EngineError;
    use std::sync::atomic::AtomicU64;
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn write_test_wav(path: &Path, duration_ms: u32) {
        let sample_rate: u32 = 44_100;
        let channels: u16 = 1;
        let bits_per_sample: u16 = 16;
        let bytes_per_sample = u32::from(bits_per_sample / 8);
        let total_samples = (u64::from(sample_rate) * u64::from(duration_ms) / 1_000) as u32;
        let data_size = total_samples * u32::from(channels) * bytes_per_sample;
        let byte_rate = sample_rate * u32::from(channels) * bytes_per_sample;
        let block_align = channels * (bits_per_sample / 8);
        let riff_chunk_size = 36_u32.saturating_add(data_size);

        let mut bytes = Vec::with_capacity((44_u32 + data_size) as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&riff_chunk_size.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16_u32.to_le_bytes());
        bytes.extend_from_slice(&1_u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&byte_rate.to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&bits_per_sample.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_size.to_le_bytes());
        bytes.resize((44_u32 + data_size) as usize, 0_u8);

        fs::write(path, bytes).expect("wav fixture should be written");
    }

    fn playing_null_engine(path: &Path, generation: u64) -> (NullAudioEngine, mpsc::Receiver<EngineSignal>) {
        let (tx, rx) = mpsc::channel();
        let mut engine = NullAudioEngine::new(tx);
        engine
            .load(path, generation)
            .expect("load should still work in null mode");
        engine.play();
        (engine, rx)
    }

    #[test]
    fn null_engine_position_advances_when_playing() {
        let (engine, _rx) = playing_null_engine(Path::new("nonexistent-track.flac"), 1);
        let before = engine.position().expect("position should be present");
        thread::sleep(Duration::from_millis(20));
        let after = engine.position().expect("position should be present");
        assert!(after > before, "position should advance while playing");
        assert!(engine.is_busy());
    }

    #[test]
    fn null_engine_pause_and_resume_control_position_progression() {
        let (mut engine, _rx) = playing_null_engine(Path::new("nonexistent-track.flac"), 1);
        thread::sleep(Duration::from_millis(20));

        engine.pause();
        let paused = engine.position().expect("position should be present");
        thread::sleep(Duration::from_millis(20));
        let paused_later = engine.position().expect("position should be present");
        assert_eq!(paused_later, paused, "position should freeze while paused");
        assert!(!engine.is_busy());

        engine.resume();
        thread::sleep(Duration::from_millis(20));
        let resumed = engine.position().expect("position should be present");
        assert!(resumed > paused, "position should continue after resume");
    }

    #[test]
    fn null_engine_seek_updates_position() {
        let (mut engine, _rx) = playing_null_engine(Path::new("nonexistent-track.flac"), 1);

        let target = Duration::from_secs(12);
        engine.set_position(target).expect("seek should succeed");
        let position = engine.position().expect("position should be present");
        assert!(position >= target, "seek should move logical position");
    }

    #[test]
    fn null_engine_seek_without_track_fails() {
        let (tx, _rx) = mpsc::channel();
        let mut engine = NullAudioEngine::new(tx);
        assert!(engine.set_position(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn null_engine_signals_finish_with_load_generation() {
        let dir = tempdir().expect("tempdir");
        let track = dir.path().join("fixture.wav");
        write_test_wav(&track, 80);

        let (mut engine, rx) = playing_null_engine(&track, 42);
        let duration = engine.duration().expect("duration should be detected");
        assert!(duration >= Duration::from_millis(70));

        thread::sleep(Duration::from_millis(120));
        engine.tick();
        assert_eq!(rx.try_recv(), Ok(EngineSignal::Finished { generation: 42 }));

        engine.tick();
        assert!(rx.try_recv().is_err(), "finish should be reported once");
        assert!(!engine.is_busy());
    }

    #[test]
    fn null_engine_unknown_duration_does_not_auto_finish() {
        let (mut engine, rx) = playing_null_engine(Path::new("nonexistent-track.flac"), 1);
        assert_eq!(engine.duration(), None);

        thread::sleep(Duration::from_millis(80));
        engine.tick();
        assert!(rx.try_recv().is_err(), "unknown-duration playback should remain active");
    }

    #[test]
    fn null_engine_rejects_existing_file_that_does_not_decode() {
        let dir = tempdir().expect("tempdir");
        let good = dir.path().join("good.wav");
        let bad = dir.path().join("bad.wav");
        write_test_wav(&good, 200);
        fs::write(&bad, b"RIFF????WAVEjunk").expect("write garbage");

        let (mut engine, _rx) = playing_null_engine(&good, 3);
        let err = engine.load(&bad, 4).expect_err("garbage should not decode");
        assert!(matches!(err, EngineError::Decode { ref path, .. } if path == &bad));

        assert!(engine.is_busy(), "failed load keeps the previous track");
        assert!(engine.duration().is_some());
    }

    #[test]
    fn stream_errors_carry_the_live_generation() {
        let (tx, rx) = mpsc::channel();
        let live = AtomicU64::new(0);

        report_stream_error(&tx, &live, String::from("device unplugged"));
        assert!(rx.try_recv().is_err(), "nothing loaded, nothing to report");

        live.store(7, std::sync::atomic::Ordering::SeqCst);
        report_stream_error(&tx, &live, String::from("device unplugged"));
        assert_eq!(
            rx.try_recv(),
            Ok(EngineSignal::Error {
                generation: 7,
                reason: String::from("device unplugged"),
            })
        );
    }

    #[test]
    fn null_engine_clamps_volume_and_survives_stop() {
        let (mut engine, _rx) = playing_null_engine(Path::new("nonexistent-track.flac"), 1);
        engine.set_volume(180);
        assert_eq!(engine.volume(), 100);

        engine.stop();
        assert_eq!(engine.position(), None);
        assert!(!engine.is_busy());
        assert_eq!(engine.volume(), 100, "volume outlives the track");
    }

    #[test]
    fn volume_scale_clamps_to_unit_range() {
        assert_eq!(super::volume_scale(0), 0.0);
        assert_eq!(super::volume_scale(50), 0.5);
        assert_eq!(super::volume_scale(250), 1.0);
    }
}
