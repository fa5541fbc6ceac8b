use std::{
    fmt,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use log::warn;
use rand::{rngs::StdRng, seq::SliceRandom, RngCore, SeedableRng};

/// Deferred locator lookup, run off the interaction thread right before playback.
pub type LocatorResolver = dyn Fn() -> Result<String, String> + Send + Sync;

/// Where the playback engine finds an item's stream.
#[derive(Clone)]
pub enum StreamLocator {
    Direct(String),
    Deferred(Arc<LocatorResolver>),
}

impl StreamLocator {
    pub fn deferred<F>(resolver: F) -> Self
    where
        F: Fn() -> Result<String, String> + Send + Sync + 'static,
    {
        StreamLocator::Deferred(Arc::new(resolver))
    }

    pub fn resolve(&self) -> Result<String, String> {
        match self {
            StreamLocator::Direct(locator) => Ok(locator.clone()),
            StreamLocator::Deferred(resolver) => resolver(),
        }
    }
}

impl fmt::Debug for StreamLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamLocator::Direct(locator) => f.debug_tuple("Direct").field(locator).finish(),
            StreamLocator::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// One playable entry. Immutable once built.
#[derive(Debug, Clone)]
pub struct MediaItem {
    title: String,
    // Whole seconds, -1 when unknown
    duration_secs: i64,
    locator: StreamLocator,
}

impl MediaItem {
    pub fn new(title: impl Into<String>, duration_secs: i64, locator: StreamLocator) -> Self {
        Self {
            title: title.into(),
            duration_secs: duration_secs.max(-1),
            locator,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn duration_secs(&self) -> i64 {
        self.duration_secs
    }

    /// Duration when known and non-zero.
    pub fn known_duration(&self) -> Option<u64> {
        (self.duration_secs > 0).then_some(self.duration_secs as u64)
    }

    pub fn locator(&self) -> &StreamLocator {
        &self.locator
    }

    /// Rounded share of the item seen at `position_secs`, 0 when the duration is unknown.
    pub fn watched_percent(&self, position_secs: u64) -> u64 {
        match self.known_duration() {
            Some(duration) => ((position_secs as f64 / duration as f64) * 100.0).round() as u64,
            None => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Playlist {
    source_id: String,
    title: String,
    items: Vec<MediaItem>,
    // Use StdRng instead of ThreadRng for thread safety
    rng_seed: [u8; 32],
}

fn fresh_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    if let Err(err) = getrandom::fill(&mut seed) {
        warn!("Falling back to clock-derived shuffle seed: {}", err);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        seed[..16].copy_from_slice(&nanos.to_le_bytes());
    }
    seed
}

impl Playlist {
    pub fn new(source_id: impl Into<String>, title: impl Into<String>) -> Playlist {
        Playlist {
            source_id: source_id.into(),
            title: title.into(),
            items: Vec::new(),
            rng_seed: fresh_seed(),
        }
    }

    #[cfg(test)]
    pub fn with_seed(source_id: &str, title: &str, seed: [u8; 32]) -> Playlist {
        Playlist {
            source_id: source_id.to_string(),
            title: title.to_string(),
            items: Vec::new(),
            rng_seed: seed,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn append(&mut self, item: MediaItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn at(&self, index: usize) -> Option<&MediaItem> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MediaItem> {
        self.items.iter()
    }

    /// Linear lookup. With duplicate titles the first match wins.
    pub fn find_by_title(&self, title: &str) -> Option<(usize, &MediaItem)> {
        self.items
            .iter()
            .enumerate()
            .find(|(_, item)| item.title() == title)
    }

    pub fn reverse(&mut self) {
        self.items.reverse();
    }

    /// Uniform in-place permutation.
    pub fn shuffle(&mut self) {
        let mut rng = StdRng::from_seed(self.rng_seed);
        self.items.shuffle(&mut rng);
        // Update the seed for next time
        rng.fill_bytes(&mut self.rng_seed);
    }

    /// Sum of known item durations in seconds.
    pub fn total_duration(&self) -> u64 {
        self.items
            .iter()
            .filter_map(MediaItem::known_duration)
            .sum()
    }
}

impl<'a> IntoIterator for &'a Playlist {
    type Item = &'a MediaItem;
    type IntoIter = std::slice::Iter<'a, MediaItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{MediaItem, Playlist, StreamLocator};

    fn item(title: &str, duration: i64) -> MediaItem {
        MediaItem::new(
            title,
            duration,
            StreamLocator::Direct(format!("/media/{title}.mkv")),
        )
    }

    fn sample_playlist(titles: &[(&str, i64)]) -> Playlist {
        let mut playlist = Playlist::with_seed("src", "Sample", [7u8; 32]);
        for (title, duration) in titles {
            playlist.append(item(title, *duration));
        }
        playlist
    }

    fn titles(playlist: &Playlist) -> Vec<String> {
        playlist.iter().map(|item| item.title().to_string()).collect()
    }

    #[test]
    fn test_find_by_title_returns_index_and_item() {
        let playlist = sample_playlist(&[("intro", 600), ("main", 1800)]);
        let (index, found) = playlist.find_by_title("main").expect("main exists");
        assert_eq!(index, 1);
        assert_eq!(found.duration_secs(), 1800);
        assert!(playlist.find_by_title("outro").is_none());
    }

    #[test]
    fn test_find_by_title_prefers_first_duplicate() {
        let playlist = sample_playlist(&[("dup", 10), ("other", 20), ("dup", 30)]);
        let (index, found) = playlist.find_by_title("dup").expect("dup exists");
        assert_eq!(index, 0);
        assert_eq!(found.duration_secs(), 10);
    }

    #[test]
    fn test_reverse_keeps_items_and_total_duration() {
        let mut playlist = sample_playlist(&[("a", 1), ("b", 2), ("c", 3)]);
        playlist.reverse();
        assert_eq!(titles(&playlist), vec!["c", "b", "a"]);
        assert_eq!(playlist.total_duration(), 6);
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let names: Vec<String> = (0..20).map(|i| format!("ep{i:02}")).collect();
        let entries: Vec<(&str, i64)> = names.iter().map(|name| (name.as_str(), 60)).collect();
        let mut playlist = sample_playlist(&entries);

        playlist.shuffle();
        let mut shuffled = titles(&playlist);
        assert_eq!(playlist.len(), 20);
        assert_eq!(playlist.total_duration(), 20 * 60);
        shuffled.sort();
        assert_eq!(shuffled, names);
    }

    #[test]
    fn test_consecutive_shuffles_use_fresh_seeds() {
        let names: Vec<String> = (0..12).map(|i| format!("ep{i:02}")).collect();
        let entries: Vec<(&str, i64)> = names.iter().map(|name| (name.as_str(), 1)).collect();
        let mut first = sample_playlist(&entries);
        let mut second = sample_playlist(&entries);

        first.shuffle();
        second.shuffle();
        assert_eq!(titles(&first), titles(&second));

        second.shuffle();
        let mut reshuffled = first.clone();
        reshuffled.shuffle();
        assert_eq!(titles(&second), titles(&reshuffled));
    }

    #[test]
    fn test_total_duration_ignores_unknown_lengths() {
        let playlist = sample_playlist(&[("a", 100), ("b", -1), ("c", 0)]);
        assert_eq!(playlist.total_duration(), 100);
    }

    #[test]
    fn test_watched_percent_handles_unknown_and_overshoot() {
        assert_eq!(item("a", 600).watched_percent(42), 7);
        assert_eq!(item("a", 600).watched_percent(600), 100);
        assert_eq!(item("a", 600).watched_percent(660), 110);
        assert_eq!(item("a", 0).watched_percent(42), 0);
        assert_eq!(item("a", -1).watched_percent(42), 0);
    }

    #[test]
    fn test_deferred_locator_resolves_on_demand() {
        let locator = StreamLocator::deferred(|| Ok("https://cdn/stream".to_string()));
        assert_eq!(locator.resolve(), Ok("https://cdn/stream".to_string()));
        let failing = StreamLocator::deferred(|| Err("gone".to_string()));
        assert_eq!(failing.resolve(), Err("gone".to_string()));
    }
}
