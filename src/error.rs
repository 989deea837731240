//! Error types for the player.

use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by an audio engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The file could not be opened or decoded.
    #[error("cannot decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// A command needed a loaded track and there was none.
    #[error("no track loaded")]
    NoTrack,

    /// The output backend rejected a command.
    #[error("audio output error: {0}")]
    Output(String),
}

/// Failures reading or writing the state file.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid state data: {0}")]
    Format(#[from] serde_json::Error),
}

/// Errors surfaced by controller commands. None of them are fatal.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("cannot play {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("save failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("playlist already exists: {0}")]
    PlaylistExists(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error(transparent)]
    Engine(EngineError),
}

impl From<EngineError> for PlayerError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Decode { path, reason } => Self::Decode { path, reason },
            other => Self::Engine(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_decode_errors_become_player_decode_errors() {
        let err: PlayerError = EngineError::Decode {
            path: PathBuf::from("bad.mp3"),
            reason: String::from("unsupported codec"),
        }
        .into();
        assert!(matches!(err, PlayerError::Decode { .. }));
        assert_eq!(err.to_string(), "cannot play bad.mp3: unsupported codec");
    }

    #[test]
    fn other_engine_errors_are_wrapped() {
        let err: PlayerError = EngineError::NoTrack.into();
        assert!(matches!(err, PlayerError::Engine(EngineError::NoTrack)));
    }
}
