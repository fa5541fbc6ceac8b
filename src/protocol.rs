//! Event-bus protocol shared by all runtime components.
//!
//! This module defines all message payloads exchanged between the session
//! controller, background workers, the playback engine, and the display.

use crate::{
    engine::{EndReason, PlaybackTicket},
    error::EngineError,
    playlist::Playlist,
};

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Session(SessionMessage),
    Engine(EngineMessage),
    Display(DisplayMessage),
}

/// Playlist traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Next => "next",
            Direction::Previous => "previous",
        }
    }
}

/// Result of a background playlist load.
#[derive(Debug, Clone)]
pub struct LoadedPlaylist {
    /// Name of the provider that recognized the source id.
    pub provider: &'static str,
    pub playlist: Playlist,
}

/// Session-domain commands and background results.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    /// Load the playlist stored under this key.
    LoadPlaylist(String),
    SelectItem(String),
    /// Select by position in the current row list.
    SelectIndex(usize),
    ContinuePlayback,
    Advance(Direction),
    Reload,
    ToggleWatched(usize),
    Reverse,
    Shuffle,
    Shutdown,
    /// Background load finished. `loaded` is `None` when no provider recognized the id.
    PlaylistLoaded {
        generation: u64,
        source_id: String,
        loaded: Option<LoadedPlaylist>,
    },
    /// Background playback kickoff failed.
    PlaybackFailed {
        ticket: PlaybackTicket,
        error: EngineError,
    },
}

/// Notifications produced by the playback engine adapter.
#[derive(Debug, Clone)]
pub enum EngineMessage {
    Position {
        ticket: PlaybackTicket,
        seconds: Option<f64>,
    },
    Ended {
        ticket: PlaybackTicket,
        reason: EndReason,
    },
}

/// One playlist row as computed from the resume store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRow {
    pub title: String,
    /// Whole seconds, -1 when unknown.
    pub duration_secs: i64,
    pub watched_percent: u64,
}

/// Header values for the active playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub title: String,
    pub total_duration_secs: u64,
    pub watched_percent: u64,
}

/// Display-surface updates requested by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayMessage {
    SetTitle(PlaylistSummary),
    SetItems(Vec<ItemRow>),
    ShowMessage(String),
    ShowResumeBanner(String),
    FocusItem(usize),
    /// Final diagnostic before the session loop terminates.
    Fatal(String),
    SessionClosed,
}
