//! Playlist source providers and the first-match registry used to load them.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use lofty::file::AudioFile;
use log::{debug, info};

use crate::{
    error::SessionError,
    playlist::{MediaItem, Playlist, StreamLocator},
};

pub const SUPPORTED_MEDIA_EXTENSIONS: [&str; 14] = [
    "mkv", "mp4", "m4v", "webm", "avi", "mov", "mp3", "flac", "ogg", "opus", "wav", "m4a", "aac",
    "wma",
];

/// Interface implemented by every playlist source.
pub trait SourceProvider: Send + Sync {
    fn name(&self) -> &'static str;
    /// Builds the playlist for `id`, or `None` when this provider does not recognize it.
    fn extract_playlist(&self, id: &str) -> Option<Playlist>;
}

/// Statically registered providers, tried in registration order.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    providers: Vec<Arc<dyn SourceProvider>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_providers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(M3uProvider));
        registry.register(Arc::new(DirectoryProvider));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn SourceProvider>) {
        self.providers.push(provider);
    }

    /// Returns the first provider's playlist together with that provider's name.
    pub fn extract(&self, id: &str) -> Result<(&'static str, Playlist), SessionError> {
        for provider in &self.providers {
            if let Some(playlist) = provider.extract_playlist(id) {
                info!(
                    "Loaded playlist {:?} with {} ({} items)",
                    id,
                    provider.name(),
                    playlist.len()
                );
                return Ok((provider.name(), playlist));
            }
            debug!("{} does not recognize {:?}", provider.name(), id);
        }
        Err(SessionError::PlaylistNotFound(id.to_string()))
    }
}

pub fn is_supported_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_MEDIA_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

fn probe_duration_secs(path: &Path) -> i64 {
    match lofty::read_from_path(path) {
        Ok(tagged_file) => tagged_file.properties().duration().as_secs() as i64,
        Err(err) => {
            debug!("Could not read duration of {}: {}", path.display(), err);
            -1
        }
    }
}

fn file_locator(path: PathBuf) -> StreamLocator {
    StreamLocator::deferred(move || {
        if path.exists() {
            Ok(path.to_string_lossy().to_string())
        } else {
            Err(format!("{} no longer exists", path.display()))
        }
    })
}

fn file_title(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Local directory of media files. Sub-directories are skipped.
pub struct DirectoryProvider;

impl SourceProvider for DirectoryProvider {
    fn name(&self) -> &'static str {
        "DirectoryProvider"
    }

    fn extract_playlist(&self, id: &str) -> Option<Playlist> {
        let directory = Path::new(id);
        if !directory.is_dir() {
            return None;
        }

        let mut playlist = Playlist::new(id, id);
        for path in collect_media_files(directory) {
            let duration = probe_duration_secs(&path);
            playlist.append(MediaItem::new(
                file_title(&path),
                duration,
                file_locator(path),
            ));
        }
        Some(playlist)
    }
}

pub fn collect_media_files(directory: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("Failed to read directory {}: {}", directory.display(), err);
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(
                    "Failed to read a directory entry in {}: {}",
                    directory.display(),
                    err
                );
                continue;
            }
        };

        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(err) => {
                debug!("Failed to inspect {}: {}", path.display(), err);
                continue;
            }
        };

        if file_type.is_dir() {
            debug!("Skipping {}", path.display());
            continue;
        }

        if file_type.is_file() && is_supported_media_file(&path) {
            files.push(path);
        }
    }

    files.sort_unstable();
    files
}

/// One parsed `.m3u` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct M3uEntry {
    pub title: String,
    pub duration_secs: i64,
    pub location: String,
}

/// Extended-M3U playlist file.
pub struct M3uProvider;

impl SourceProvider for M3uProvider {
    fn name(&self) -> &'static str {
        "M3uProvider"
    }

    fn extract_playlist(&self, id: &str) -> Option<Playlist> {
        let path = Path::new(id);
        let is_m3u = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("m3u") || ext.eq_ignore_ascii_case("m3u8"));
        if !is_m3u || !path.is_file() {
            return None;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                debug!("Failed to read {}: {}", path.display(), err);
                return None;
            }
        };

        let title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| id.to_string());
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));

        let mut playlist = Playlist::new(id, title);
        for entry in parse_m3u(&content) {
            let locator = if is_remote_location(&entry.location) {
                StreamLocator::Direct(entry.location)
            } else {
                let entry_path = Path::new(&entry.location);
                let resolved = if entry_path.is_absolute() {
                    entry_path.to_path_buf()
                } else {
                    base_dir.join(entry_path)
                };
                file_locator(resolved)
            };
            playlist.append(MediaItem::new(entry.title, entry.duration_secs, locator));
        }
        Some(playlist)
    }
}

fn is_remote_location(location: &str) -> bool {
    location
        .split_once("://")
        .is_some_and(|(scheme, _)| !scheme.is_empty() && scheme.chars().all(|ch| ch.is_ascii_alphanumeric()))
}

/// Parses `#EXTINF:<secs>,<title>` annotated entries. Unannotated entries get
/// their file name as title and an unknown duration.
pub fn parse_m3u(content: &str) -> Vec<M3uEntry> {
    let mut entries = Vec::new();
    let mut pending: Option<(i64, String)> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            let (duration, title) = info.split_once(',').unwrap_or((info, ""));
            let duration = duration
                .split_whitespace()
                .next()
                .and_then(|value| value.parse::<f64>().ok())
                .map(|value| if value < 0.0 { -1 } else { value as i64 })
                .unwrap_or(-1);
            pending = Some((duration, title.trim().to_string()));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let (duration_secs, title) = pending.take().unwrap_or((-1, String::new()));
        let title = if title.is_empty() {
            line.rsplit(['/', '\\'])
                .next()
                .unwrap_or(line)
                .to_string()
        } else {
            title
        };
        entries.push(M3uEntry {
            title,
            duration_secs,
            location: line.to_string(),
        });
    }

    entries
}
