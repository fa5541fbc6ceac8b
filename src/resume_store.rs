//! Durable per-playlist resume state backed by a JSON file.
//!
//! Layout of the state file:
//!
//! ```json
//! {
//!   "<playlist>": {
//!     "id": "<source id>",
//!     "current": { "title": "<item>", "timestamp": "HH:MM:SS" },
//!     "episodes": { "<item>": { "current_timestamp": "HH:MM:SS" } }
//!   }
//! }
//! ```
//!
//! `update` is the only mutation path for records and performs its
//! read-modify-write under one exclusive lock.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::{debug, trace};
use serde_json::{Map, Value};

use crate::{error::StoreError, timestamp::seconds_to_timestamp};

/// Raw persisted mapping: playlist key -> record object.
pub type ResumeState = Map<String, Value>;

/// Typed view of one persisted playlist record.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ResumeRecord {
    /// Source id used to load the playlist. Absent for records keyed by their source id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// What to resume the next time the playlist is opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentEntry>,
    /// Last-seen position per item title.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub episodes: BTreeMap<String, EpisodeEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct CurrentEntry {
    pub title: String,
    #[serde(with = "hms")]
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct EpisodeEntry {
    #[serde(with = "hms")]
    pub current_timestamp: u64,
}

impl ResumeRecord {
    /// Last-seen position of `title` in whole seconds, if any.
    pub fn episode_position(&self, title: &str) -> Option<u64> {
        self.episodes
            .get(title)
            .map(|episode| episode.current_timestamp)
    }
}

mod hms {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::timestamp::{seconds_to_timestamp, timestamp_to_seconds};

    pub fn serialize<S: Serializer>(seconds: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&seconds_to_timestamp(*seconds))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        timestamp_to_seconds(&raw).map_err(D::Error::custom)
    }
}

/// Partial record merged into the stored one by [`ResumeStore::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeUpdate {
    patch: Map<String, Value>,
}

impl ResumeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, source_id: &str) -> Self {
        self.patch
            .insert("id".to_string(), Value::String(source_id.to_string()));
        self
    }

    pub fn current(mut self, title: &str, seconds: u64) -> Self {
        let mut current = Map::new();
        current.insert("title".to_string(), Value::String(title.to_string()));
        current.insert(
            "timestamp".to_string(),
            Value::String(seconds_to_timestamp(seconds)),
        );
        merge_nested(&mut self.patch, single("current", Value::Object(current)));
        self
    }

    pub fn episode(mut self, title: &str, seconds: u64) -> Self {
        let episode = single(
            "current_timestamp",
            Value::String(seconds_to_timestamp(seconds)),
        );
        let episodes = single(title, Value::Object(episode));
        merge_nested(&mut self.patch, single("episodes", Value::Object(episodes)));
        self
    }

    /// Records `title` at `seconds` both as the playlist's resume point and as the item's position.
    pub fn position(title: &str, seconds: u64) -> Self {
        Self::new().current(title, seconds).episode(title, seconds)
    }

    pub fn into_patch(self) -> Map<String, Value> {
        self.patch
    }
}

impl From<Map<String, Value>> for ResumeUpdate {
    fn from(patch: Map<String, Value>) -> Self {
        Self { patch }
    }
}

fn single(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

/// Merges `patch` into `target` key by key.
///
/// Object values are merged recursively into existing objects; any other
/// value (or an object replacing a non-object) overwrites. Keys absent from
/// `patch` are never touched.
pub fn merge_nested(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                merge_nested(existing, nested);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// File-backed resume store shared by the whole process.
pub struct ResumeStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ResumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the full mapping. A missing state file yields an empty mapping.
    pub fn load(&self) -> Result<ResumeState, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.read_unlocked()
    }

    /// Replaces the full mapping.
    pub fn save(&self, state: &ResumeState) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.write_unlocked(state)
    }

    /// Deep-merges `partial` into the record stored under `playlist`.
    pub fn update(&self, playlist: &str, partial: ResumeUpdate) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut state = self.read_unlocked()?;
        let patch = partial.into_patch();

        match state.get_mut(playlist) {
            Some(Value::Object(record)) => merge_nested(record, patch),
            Some(_) => {
                return Err(StoreError::MalformedRecord {
                    playlist: playlist.to_string(),
                    reason: "record is not an object".to_string(),
                })
            }
            None => {
                state.insert(playlist.to_string(), Value::Object(patch));
            }
        }

        trace!("Resume state updated for {}", playlist);
        self.write_unlocked(&state)
    }

    /// Removes a playlist record. Returns whether a record existed.
    pub fn remove(&self, playlist: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut state = self.read_unlocked()?;
        if state.remove(playlist).is_none() {
            return Ok(false);
        }
        self.write_unlocked(&state)?;
        debug!("Removed resume record for {}", playlist);
        Ok(true)
    }

    /// Sorted playlist keys.
    pub fn playlist_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.load()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Typed record for `playlist`, if one exists.
    pub fn record(&self, playlist: &str) -> Result<Option<ResumeRecord>, StoreError> {
        let state = self.load()?;
        let Some(raw) = state.get(playlist) else {
            return Ok(None);
        };
        serde_json::from_value::<ResumeRecord>(raw.clone())
            .map(Some)
            .map_err(|err| StoreError::MalformedRecord {
                playlist: playlist.to_string(),
                reason: err.to_string(),
            })
    }

    /// Persisted resume point for `playlist`.
    pub fn current(&self, playlist: &str) -> Result<Option<CurrentEntry>, StoreError> {
        Ok(self.record(playlist)?.and_then(|record| record.current))
    }

    fn read_unlocked(&self) -> Result<ResumeState, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ResumeState::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(ResumeState::new());
        }
        serde_json::from_str::<ResumeState>(&content).map_err(|source| StoreError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    fn write_unlocked(&self, state: &ResumeState) -> Result<(), StoreError> {
        let io_error = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(io_error)?;
            }
        }

        let encoded = serde_json::to_string_pretty(state).map_err(StoreError::Encode)?;
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        std::fs::write(&staging, encoded).map_err(io_error)?;
        std::fs::rename(&staging, &self.path).map_err(io_error)
    }
}
