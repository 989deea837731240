//! Directory scanning and tag reading.

use crate::model::{TrackInfo, UNKNOWN_ARTIST, file_label};
use lofty::prelude::*;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;
use tracing::{debug, info};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "aac", "opus"];

/// Source of display metadata for tracks. Implementations never fail; files
/// whose tags can't be read get [`TrackInfo::fallback`] values.
pub trait MetadataReader {
    fn read(&self, path: &Path) -> TrackInfo;
}

/// Reads tags with lofty, falling back to a symphonia probe.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagReader;

impl MetadataReader for TagReader {
    fn read(&self, path: &Path) -> TrackInfo {
        let stripped = crate::config::strip_windows_verbatim_prefix(path);
        let metadata = match lofty_metadata(&stripped) {
            Ok(metadata) if metadata.is_complete() => metadata,
            Ok(partial) => partial.or(symphonia_metadata(&stripped)),
            Err(err) => {
                debug!(path = %stripped.display(), error = %err, "tag parse failed, probing stream");
                symphonia_metadata(&stripped)
            }
        };

        TrackInfo {
            path: path.to_path_buf(),
            title: metadata.title.unwrap_or_else(|| file_label(path)),
            artist: metadata
                .artist
                .unwrap_or_else(|| String::from(UNKNOWN_ARTIST)),
            duration: metadata.duration,
        }
    }
}

#[derive(Debug, Default)]
struct TrackMetadata {
    title: Option<String>,
    artist: Option<String>,
    duration: Option<Duration>,
}

impl TrackMetadata {
    fn is_complete(&self) -> bool {
        self.title.is_some() && self.artist.is_some() && self.duration.is_some()
    }

    fn or(self, other: TrackMetadata) -> TrackMetadata {
        TrackMetadata {
            title: self.title.or(other.title),
            artist: self.artist.or(other.artist),
            duration: self.duration.or(other.duration),
        }
    }
}

/// Recursively collects audio files under `root`, sorted by path.
pub fn scan_directory(root: &Path) -> io::Result<Vec<PathBuf>> {
    let meta = fs::metadata(root)?;
    if !meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("{} is not a directory", root.display()),
        ));
    }

    let mut tracks: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_audio(entry.path()))
        .map(|entry| crate::config::strip_windows_verbatim_prefix(entry.path()))
        .collect();

    tracks.sort();
    tracks.dedup();
    info!(root = %root.display(), count = tracks.len(), "scanned directory");
    Ok(tracks)
}

pub fn is_audio(path: &Path) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    AUDIO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}

fn lofty_metadata(path: &Path) -> Result<TrackMetadata, lofty::error::LoftyError> {
    let tagged = lofty::read_from_path(path)?;
    let duration = Some(tagged.properties().duration()).filter(|duration| !duration.is_zero());
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag());

    Ok(TrackMetadata {
        title: tag
            .and_then(|tag| tag.title())
            .and_then(|value| clean_metadata_value(&value)),
        artist: tag
            .and_then(|tag| tag.artist())
            .and_then(|value| clean_metadata_value(&value)),
        duration,
    })
}

fn symphonia_metadata(path: &Path) -> TrackMetadata {
    let Ok(file) = File::open(path) else {
        return TrackMetadata::default();
    };
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let Ok(mut probed) = get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) else {
        return TrackMetadata::default();
    };

    let duration = probed
        .format
        .default_track()
        .and_then(|track| codec_duration(&track.codec_params));

    let metadata = probed.format.metadata();
    let Some(revision) = metadata.current() else {
        return TrackMetadata {
            duration,
            ..TrackMetadata::default()
        };
    };

    let tags = revision.tags();
    TrackMetadata {
        title: tag_value(tags, StandardTagKey::TrackTitle, &["title"]),
        artist: tag_value(
            tags,
            StandardTagKey::Artist,
            &["artist", "albumartist", "album_artist"],
        ),
        duration,
    }
}

fn codec_duration(codec_params: &symphonia::core::codecs::CodecParameters) -> Option<Duration> {
    if let (Some(time_base), Some(frame_count)) = (codec_params.time_base, codec_params.n_frames) {
        let time = time_base.calc_time(frame_count);
        return Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac));
    }

    codec_params
        .n_frames
        .zip(codec_params.sample_rate)
        .filter(|(_, sample_rate)| *sample_rate > 0)
        .map(|(frame_count, sample_rate)| {
            Duration::from_secs_f64(frame_count as f64 / f64::from(sample_rate))
        })
}

fn tag_value(
    tags: &[symphonia::core::meta::Tag],
    standard_key: StandardTagKey,
    fallback_keys: &[&str],
) -> Option<String> {
    let from_standard = tags
        .iter()
        .find(|tag| tag.std_key == Some(standard_key))
        .map(|tag| tag.value.to_string());

    let from_fallback = || {
        tags.iter()
            .find(|tag| {
                fallback_keys
                    .iter()
                    .any(|key| tag.key.eq_ignore_ascii_case(key))
            })
            .map(|tag| tag.value.to_string())
    };

    from_standard
        .or_else(from_fallback)
        .and_then(|value| clean_metadata_value(&value))
}

fn clean_metadata_value(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scan_filters_non_audio_files_and_recurses() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("disc2")).expect("mkdir");
        fs::write(dir.path().join("b.mp3"), b"x").expect("write mp3");
        fs::write(dir.path().join("disc2").join("a.WAV"), b"x").expect("write wav");
        fs::write(dir.path().join("notes.txt"), b"x").expect("write txt");

        let tracks = scan_directory(dir.path()).expect("scan");
        assert_eq!(tracks.len(), 2);
        assert!(tracks[0].ends_with("b.mp3"));
        assert!(tracks[1].ends_with("disc2/a.WAV"));
    }

    #[test]
    fn scan_rejects_missing_directory() {
        let dir = tempdir().expect("tempdir");
        assert!(scan_directory(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn scan_rejects_plain_files() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("song.mp3");
        fs::write(&file, b"x").expect("write");
        assert!(scan_directory(&file).is_err());
    }

    #[test]
    fn unreadable_tags_fall_back_to_file_name() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("garbage.mp3");
        fs::write(&file, b"definitely not audio").expect("write");

        let info = TagReader.read(&file);
        assert_eq!(info.title, "garbage.mp3");
        assert_eq!(info.artist, UNKNOWN_ARTIST);
        assert_eq!(info.duration, None);
        assert_eq!(info.path, file);
    }

    #[test]
    fn missing_file_falls_back_without_error() {
        let info = TagReader.read(Path::new("does/not/exist.flac"));
        assert_eq!(info, TrackInfo::fallback(Path::new("does/not/exist.flac")));
    }

    #[test]
    fn metadata_value_cleaning_trims_and_drops_empty() {
        assert_eq!(
            clean_metadata_value("  hello  "),
            Some(String::from("hello"))
        );
        assert_eq!(clean_metadata_value("   \t  "), None);
    }

    #[test]
    fn partial_metadata_is_completed_from_fallback() {
        let merged = TrackMetadata {
            title: Some(String::from("Title")),
            ..TrackMetadata::default()
        }
        .or(TrackMetadata {
            title: Some(String::from("Other")),
            artist: Some(String::from("Artist")),
            duration: Some(Duration::from_secs(3)),
        });
        assert_eq!(merged.title.as_deref(), Some("Title"));
        assert_eq!(merged.artist.as_deref(), Some("Artist"));
        assert_eq!(merged.duration, Some(Duration::from_secs(3)));
    }
}
