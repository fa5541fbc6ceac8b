//! Error types for resume persistence, playback, and session control.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed persisted timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("malformed timestamp {0:?}, expected HH:MM:SS")]
    Malformed(String),
}

/// Resume-store persistence failures. Always fatal for a running session.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access resume state {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("resume state {path} is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode resume state: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("resume record for {playlist:?} is malformed: {reason}")]
    MalformedRecord { playlist: String, reason: String },

    #[error("resume store lock poisoned")]
    Poisoned,
}

/// Playback engine failures while opening a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("could not resolve stream for {title:?}: {reason}")]
    Unresolvable { title: String, reason: String },

    #[error("failed to start player {command:?}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("player rejected {locator:?}: {reason}")]
    Rejected { locator: String, reason: String },

    #[error("player crashed while starting {title:?}: {reason}")]
    Crashed { title: String, reason: String },
}

/// Errors surfaced by session-controller operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Playlist \"{0}\" could not be loaded")]
    PlaylistNotFound(String),

    #[error("Could not find item \"{0}\"")]
    ItemNotFound(String),

    #[error("No playlist loaded")]
    NoPlaylistLoaded,

    #[error("No item selected, cannot play {0}")]
    NoActiveItem(&'static str),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Playback failed: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Only persistence failures end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Store(_))
    }
}
