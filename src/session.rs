//! Playback session controller.
//!
//! Owns the active playlist, the active item and its last-known position, and
//! is the only writer of resume state while a session runs. Every mutation is
//! applied on the controller's own thread while it drains the bus, so user
//! commands, background results and engine notifications are serialized.
//!
//! Staleness is detected after the fact: playlist loads carry a generation
//! number and engine notifications carry a playback ticket; results that do
//! not match the current values are dropped.

use std::{
    num::NonZeroU32,
    ops::ControlFlow,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use log::{debug, error, info, trace, warn};
use tokio::sync::broadcast::{error::RecvError, Receiver, Sender};

use crate::{
    config::SessionConfig,
    engine::{EndReason, PlaybackEngine, PlaybackTicket},
    error::{EngineError, SessionError},
    playlist::{MediaItem, Playlist},
    protocol::{
        Direction, DisplayMessage, EngineMessage, ItemRow, LoadedPlaylist, Message,
        PlaylistSummary, SessionMessage,
    },
    resume_store::{ResumeRecord, ResumeStore, ResumeUpdate},
    source::SourceRegistry,
    timestamp::seconds_to_timestamp,
    worker_pool::{panic_payload_to_string, WorkerPool},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Loading,
    Ready,
    Playing,
}

impl SessionState {
    fn label(self) -> &'static str {
        match self {
            SessionState::Empty => "no playlist is loaded",
            SessionState::Loading => "a playlist is loading",
            SessionState::Ready => "ready",
            SessionState::Playing => "playing",
        }
    }
}

/// Item playback is anchored on. Kept after playback ends so next/previous
/// still navigate relative to it.
#[derive(Debug, Clone)]
struct ActiveItem {
    title: String,
    start_secs: u64,
}

#[derive(Debug, Default)]
struct Session {
    playlist_key: Option<String>,
    /// Key of the in-flight load; promoted to `playlist_key` on success.
    pending_key: Option<String>,
    playlist: Option<Playlist>,
    active: Option<ActiveItem>,
    /// Ticket of the playback currently owned by the engine.
    live_ticket: Option<PlaybackTicket>,
    last_ticket: PlaybackTicket,
    position: Option<u64>,
    load_generation: u64,
    loading: bool,
    resume_after_load: bool,
}

impl Session {
    fn state(&self) -> SessionState {
        if self.loading {
            SessionState::Loading
        } else if self.live_ticket.is_some() {
            SessionState::Playing
        } else if self.playlist.is_some() {
            SessionState::Ready
        } else {
            SessionState::Empty
        }
    }
}

/// Shared collaborators of the controller.
#[derive(Clone)]
pub struct SessionDependencies {
    pub store: Arc<ResumeStore>,
    pub sources: Arc<SourceRegistry>,
    pub engine: Arc<dyn PlaybackEngine>,
}

pub struct SessionController {
    session: Session,
    store: Arc<ResumeStore>,
    sources: Arc<SourceRegistry>,
    engine: Arc<dyn PlaybackEngine>,
    settings: SessionConfig,
    loaders: WorkerPool,
    // Single thread so engine kickoffs reach the engine in request order
    playback_worker: WorkerPool,
    position_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
}

impl SessionController {
    pub fn new(
        dependencies: SessionDependencies,
        settings: SessionConfig,
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
    ) -> Self {
        let per_second =
            NonZeroU32::new(settings.position_updates_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            session: Session::default(),
            store: dependencies.store,
            sources: dependencies.sources,
            engine: dependencies.engine,
            loaders: WorkerPool::new("playlist-loader", settings.worker_threads),
            playback_worker: WorkerPool::new("playback-kickoff", 1),
            position_limiter: RateLimiter::direct(Quota::per_second(per_second)),
            settings,
            bus_consumer,
            bus_producer,
        }
    }

    /// Drains the bus until shutdown, bus closure, or a fatal store error.
    ///
    /// Returns the fatal error, if any.
    pub fn run(&mut self) -> Option<SessionError> {
        loop {
            let message = match self.bus_consumer.blocking_recv() {
                Ok(message) => message,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SessionController: bus lagged, {} messages skipped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => {
                    debug!("SessionController: bus closed");
                    return None;
                }
            };

            match self.handle_message(message) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => {
                    self.display(DisplayMessage::SessionClosed);
                    return None;
                }
                Err(err) if err.is_fatal() => {
                    error!("SessionController: fatal error: {}", err);
                    self.display(DisplayMessage::Fatal(err.to_string()));
                    return Some(err);
                }
                Err(err) => {
                    info!("SessionController: {}", err);
                    self.show_message(err.to_string());
                }
            }
        }
    }

    fn handle_message(&mut self, message: Message) -> Result<ControlFlow<()>, SessionError> {
        match message {
            Message::Session(message) => self.handle_session_message(message),
            Message::Engine(EngineMessage::Position { ticket, seconds }) => {
                self.on_position(ticket, seconds);
                Ok(ControlFlow::Continue(()))
            }
            Message::Engine(EngineMessage::Ended { ticket, reason }) => {
                self.on_lifecycle_event(ticket, reason)?;
                Ok(ControlFlow::Continue(()))
            }
            Message::Display(_) => Ok(ControlFlow::Continue(())),
        }
    }

    fn handle_session_message(
        &mut self,
        message: SessionMessage,
    ) -> Result<ControlFlow<()>, SessionError> {
        match message {
            SessionMessage::LoadPlaylist(key) => self.load_playlist(&key)?,
            SessionMessage::SelectItem(title) => self.select_item(&title)?,
            SessionMessage::SelectIndex(index) => self.select_index(index)?,
            SessionMessage::ContinuePlayback => self.continue_playback()?,
            SessionMessage::Advance(direction) => {
                self.advance(direction)?;
            }
            SessionMessage::Reload => self.reload()?,
            SessionMessage::ToggleWatched(index) => self.toggle_watched(index)?,
            SessionMessage::Reverse => self.reorder(Playlist::reverse, "Reversed playlist")?,
            SessionMessage::Shuffle => self.reorder(Playlist::shuffle, "Shuffled playlist")?,
            SessionMessage::Shutdown => {
                self.shutdown()?;
                return Ok(ControlFlow::Break(()));
            }
            SessionMessage::PlaylistLoaded {
                generation,
                source_id,
                loaded,
            } => self.on_playlist_loaded(generation, &source_id, loaded)?,
            SessionMessage::PlaybackFailed { ticket, error } => {
                self.on_playback_failed(ticket, error)?
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Starts loading the playlist stored under `key` on a background worker.
    pub fn load_playlist(&mut self, key: &str) -> Result<(), SessionError> {
        let source_id = self
            .store
            .record(key)?
            .and_then(|record| record.id)
            .unwrap_or_else(|| key.to_string());

        if self.session.live_ticket.is_some() {
            // The playing item keeps its progress; late notifications for it are ignored.
            self.persist_live_position()?;
            self.session.live_ticket = None;
        }
        self.session.load_generation += 1;
        self.session.loading = true;
        self.session.pending_key = Some(key.to_string());
        let generation = self.session.load_generation;
        info!(
            "Loading playlist {} (source {}, generation {})",
            key, source_id, generation
        );
        self.show_message("Loading...".to_string());

        let sources = Arc::clone(&self.sources);
        let bus_producer = self.bus_producer.clone();
        self.loaders.execute(move || {
            let extracted = catch_unwind(AssertUnwindSafe(|| sources.extract(&source_id)));
            let loaded = match extracted {
                Ok(Ok((provider, playlist))) => Some(LoadedPlaylist { provider, playlist }),
                Ok(Err(err)) => {
                    debug!("Background load failed: {}", err);
                    None
                }
                Err(payload) => {
                    error!(
                        "Provider panicked while loading {}: {}",
                        source_id,
                        panic_payload_to_string(payload.as_ref())
                    );
                    None
                }
            };
            let _ = bus_producer.send(Message::Session(SessionMessage::PlaylistLoaded {
                generation,
                source_id,
                loaded,
            }));
        });
        Ok(())
    }

    fn on_playlist_loaded(
        &mut self,
        generation: u64,
        source_id: &str,
        loaded: Option<LoadedPlaylist>,
    ) -> Result<(), SessionError> {
        if generation != self.session.load_generation {
            debug!(
                "Discarding stale playlist load for {} (generation {}, current {})",
                source_id, generation, self.session.load_generation
            );
            return Ok(());
        }
        self.session.loading = false;
        let pending_key = self.session.pending_key.take();

        let (Some(LoadedPlaylist { provider, playlist }), Some(key)) = (loaded, pending_key) else {
            self.session.resume_after_load = false;
            return Err(SessionError::PlaylistNotFound(source_id.to_string()));
        };

        self.session.active = None;
        self.session.position = None;
        info!(
            "Playlist {} ready: {} items from {}",
            key,
            playlist.len(),
            playlist.source_id()
        );
        self.session.playlist_key = Some(key);
        self.session.playlist = Some(playlist);
        self.show_message(format!("Loaded playlist with {}", provider));
        self.refresh_view(true)?;

        if std::mem::take(&mut self.session.resume_after_load) {
            self.continue_playback()?;
        }
        Ok(())
    }

    pub fn select_item(&mut self, title: &str) -> Result<(), SessionError> {
        self.require_ready("select an item")?;
        let index = self
            .playlist()?
            .find_by_title(title)
            .map(|(index, _)| index)
            .ok_or_else(|| SessionError::ItemNotFound(title.to_string()))?;
        info!("Selected item {}", title);
        self.show_message(format!("Loading video ({})", title));
        self.start_playback(index, 0)
    }

    pub fn select_index(&mut self, index: usize) -> Result<(), SessionError> {
        self.require_ready("select an item")?;
        let title = self
            .playlist()?
            .at(index)
            .map(|item| item.title().to_string())
            .ok_or_else(|| SessionError::ItemNotFound(format!("#{}", index + 1)))?;
        self.select_item(&title)
    }

    /// Resumes the persisted `current` item at its persisted offset.
    pub fn continue_playback(&mut self) -> Result<(), SessionError> {
        if self.session.loading {
            self.session.resume_after_load = true;
            self.show_message("Will resume once the playlist is loaded".to_string());
            return Ok(());
        }
        self.require_ready("continue playback")?;
        let key = self.playlist_key()?;
        info!("Continue playback");

        let Some(current) = self.store.current(&key)? else {
            self.show_message("Nothing to resume...".to_string());
            return Ok(());
        };

        let index = self
            .playlist()?
            .find_by_title(&current.title)
            .map(|(index, _)| index)
            .ok_or_else(|| SessionError::ItemNotFound(current.title.clone()))?;
        self.show_message(format!(
            "Resuming \"{}\" at {}",
            current.title,
            seconds_to_timestamp(current.timestamp)
        ));
        self.start_playback(index, current.timestamp)
    }

    /// Plays the neighbour of the active item. Returns whether playback changed.
    pub fn advance(&mut self, direction: Direction) -> Result<bool, SessionError> {
        self.require_ready("change items")?;
        let anchor = self
            .session
            .active
            .as_ref()
            .map(|active| active.title.clone())
            .ok_or(SessionError::NoActiveItem(direction.label()))?;
        self.advance_from(&anchor, direction)
    }

    fn advance_from(&mut self, anchor: &str, direction: Direction) -> Result<bool, SessionError> {
        let playlist = self.playlist()?;
        let (index, _) = playlist
            .find_by_title(anchor)
            .ok_or_else(|| SessionError::ItemNotFound(anchor.to_string()))?;

        let target = match direction {
            Direction::Next => index.checked_add(1).filter(|next| *next < playlist.len()),
            Direction::Previous => index.checked_sub(1),
        };
        let Some(target) = target else {
            let edge = match direction {
                Direction::Next => "Reached end of playlist",
                Direction::Previous => "Reached start of playlist",
            };
            self.show_message(edge.to_string());
            return Ok(false);
        };

        self.start_playback(target, 0)?;
        Ok(true)
    }

    fn start_playback(&mut self, index: usize, start_secs: u64) -> Result<(), SessionError> {
        let item: MediaItem = self
            .playlist()?
            .at(index)
            .cloned()
            .ok_or_else(|| SessionError::ItemNotFound(format!("#{}", index + 1)))?;

        // Switching items must not lose the progress of the one being replaced.
        self.persist_live_position()?;

        self.session.last_ticket += 1;
        let ticket = self.session.last_ticket;
        self.session.live_ticket = Some(ticket);
        self.session.active = Some(ActiveItem {
            title: item.title().to_string(),
            start_secs,
        });
        self.session.position = Some(start_secs);
        debug!(
            "Starting {} at {}s with ticket {}",
            item.title(),
            start_secs,
            ticket
        );

        let engine = Arc::clone(&self.engine);
        let bus_producer = self.bus_producer.clone();
        self.playback_worker.execute(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                item.locator()
                    .resolve()
                    .map_err(|reason| EngineError::Unresolvable {
                        title: item.title().to_string(),
                        reason,
                    })
                    .and_then(|locator| {
                        engine.load_and_play(ticket, &locator, item.title(), start_secs)
                    })
            }))
            .unwrap_or_else(|payload| {
                Err(EngineError::Crashed {
                    title: item.title().to_string(),
                    reason: panic_payload_to_string(payload.as_ref()),
                })
            });
            if let Err(error) = outcome {
                let _ = bus_producer.send(Message::Session(SessionMessage::PlaybackFailed {
                    ticket,
                    error,
                }));
            }
        });
        Ok(())
    }

    fn on_playback_failed(
        &mut self,
        ticket: PlaybackTicket,
        error: EngineError,
    ) -> Result<(), SessionError> {
        if self.session.live_ticket != Some(ticket) {
            debug!("Ignoring failure of superseded playback {}", ticket);
            return Ok(());
        }
        warn!("Playback {} failed: {}", ticket, error);
        self.session.live_ticket = None;
        self.session.active = None;
        self.session.position = None;
        Err(SessionError::Engine(error))
    }

    /// Records the latest engine position. Fractions are truncated.
    pub fn on_position(&mut self, ticket: PlaybackTicket, seconds: Option<f64>) {
        if self.session.live_ticket != Some(ticket) {
            trace!("Discarding position for inactive playback {}", ticket);
            return;
        }
        let Some(seconds) = seconds.filter(|value| value.is_finite() && *value >= 0.0) else {
            return;
        };
        let position = seconds.trunc() as u64;
        self.session.position = Some(position);

        if self.position_limiter.check().is_ok() {
            if let Some(active) = &self.session.active {
                let text = format!(
                    "Playing \"{}\" ({})",
                    active.title,
                    seconds_to_timestamp(position)
                );
                self.show_message(text);
            }
        }
    }

    pub fn on_lifecycle_event(
        &mut self,
        ticket: PlaybackTicket,
        reason: EndReason,
    ) -> Result<(), SessionError> {
        if self.session.live_ticket != Some(ticket) {
            debug!(
                "Discarding {:?} for inactive playback {}",
                reason, ticket
            );
            return Ok(());
        }
        info!("Playback {} ended: {:?}", ticket, reason);

        let finished = self.persist_live_position()?;
        self.session.live_ticket = None;
        self.session.position = None;
        self.refresh_view(false)?;

        let Some(finished) = finished else {
            return Ok(());
        };
        match reason {
            EndReason::EndedNaturally if self.settings.autoplay => {
                self.advance_from(&finished, Direction::Next)?;
            }
            EndReason::EndedNaturally | EndReason::EndedExternally => {
                self.show_message("Waiting for input".to_string());
            }
        }
        Ok(())
    }

    /// Re-derives rows and banner from resume state without reloading the source.
    pub fn reload(&mut self) -> Result<(), SessionError> {
        self.require_loaded()?;
        self.refresh_view(false)
    }

    /// Marks an item fully watched, or unwatched when it already is.
    pub fn toggle_watched(&mut self, index: usize) -> Result<(), SessionError> {
        self.require_loaded()?;
        let key = self.playlist_key()?;
        let item = self
            .playlist()?
            .at(index)
            .cloned()
            .ok_or_else(|| SessionError::ItemNotFound(format!("#{}", index + 1)))?;

        let watched = item.known_duration().unwrap_or(0);
        let seen = self
            .store
            .record(&key)?
            .and_then(|record| record.episode_position(item.title()));
        let position = if seen == Some(watched) { 0 } else { watched };

        self.store
            .update(&key, ResumeUpdate::new().episode(item.title(), position))?;
        self.refresh_view(false)
    }

    fn reorder(&mut self, apply: fn(&mut Playlist), note: &str) -> Result<(), SessionError> {
        self.require_loaded()?;
        if let Some(playlist) = self.session.playlist.as_mut() {
            apply(playlist);
        }
        self.show_message(note.to_string());
        self.refresh_view(false)
    }

    /// Persists the live item's position and stops the engine.
    pub fn shutdown(&mut self) -> Result<(), SessionError> {
        info!("Shutting down session");
        let persisted = self.persist_live_position();
        self.session.live_ticket = None;
        // A queued kickoff would otherwise start the player after it is stopped.
        self.playback_worker.drain();
        self.engine.shutdown();
        persisted.map(|_| ())
    }

    /// Writes the live item's position as both `current` and its episode entry.
    ///
    /// Returns the title written, or `None` when nothing is playing.
    fn persist_live_position(&mut self) -> Result<Option<String>, SessionError> {
        if self.session.live_ticket.is_none() {
            return Ok(None);
        }
        let (Some(active), Some(key)) = (&self.session.active, &self.session.playlist_key) else {
            return Ok(None);
        };
        let position = self.session.position.unwrap_or(active.start_secs);
        debug!(
            "Persisting {} at {} for {}",
            active.title,
            seconds_to_timestamp(position),
            key
        );
        self.store
            .update(key, ResumeUpdate::position(&active.title, position))?;
        Ok(Some(active.title.clone()))
    }

    fn refresh_view(&mut self, focus_current: bool) -> Result<(), SessionError> {
        let key = self.playlist_key()?;
        let record = self.store.record(&key)?.unwrap_or_default();
        let (summary, rows) = build_view(self.playlist()?, &record);

        self.display(DisplayMessage::SetTitle(summary));
        self.display(DisplayMessage::SetItems(rows));
        self.display(DisplayMessage::ShowResumeBanner(resume_banner(&record)));

        if focus_current {
            let focus = record.current.as_ref().and_then(|current| {
                self.playlist()
                    .ok()
                    .and_then(|playlist| playlist.find_by_title(&current.title))
                    .map(|(index, _)| index)
            });
            if let Some(index) = focus {
                self.display(DisplayMessage::FocusItem(index));
            }
        }
        Ok(())
    }

    fn require_loaded(&self) -> Result<(), SessionError> {
        if self.session.playlist.is_none() {
            return Err(SessionError::NoPlaylistLoaded);
        }
        Ok(())
    }

    fn require_ready(&self, operation: &'static str) -> Result<(), SessionError> {
        match self.session.state() {
            SessionState::Ready | SessionState::Playing => Ok(()),
            state => Err(SessionError::InvalidState {
                operation,
                state: state.label(),
            }),
        }
    }

    fn playlist(&self) -> Result<&Playlist, SessionError> {
        self.session
            .playlist
            .as_ref()
            .ok_or(SessionError::NoPlaylistLoaded)
    }

    fn playlist_key(&self) -> Result<String, SessionError> {
        self.session
            .playlist_key
            .clone()
            .ok_or(SessionError::NoPlaylistLoaded)
    }

    fn show_message(&self, text: String) {
        self.display(DisplayMessage::ShowMessage(text));
    }

    fn display(&self, message: DisplayMessage) {
        let _ = self.bus_producer.send(Message::Display(message));
    }
}

/// Header and rows for `playlist` given its persisted record.
pub fn build_view(playlist: &Playlist, record: &ResumeRecord) -> (PlaylistSummary, Vec<ItemRow>) {
    let mut seen_total = 0u64;
    let rows: Vec<ItemRow> = playlist
        .iter()
        .map(|item| {
            let seen = record.episode_position(item.title()).unwrap_or(0);
            seen_total += seen;
            ItemRow {
                title: item.title().to_string(),
                duration_secs: item.duration_secs(),
                watched_percent: item.watched_percent(seen),
            }
        })
        .collect();

    let total_duration_secs = playlist.total_duration();
    let watched_percent = if total_duration_secs > 0 {
        ((seen_total as f64 / total_duration_secs as f64) * 100.0).round() as u64
    } else {
        0
    };

    (
        PlaylistSummary {
            title: playlist.title().to_string(),
            total_duration_secs,
            watched_percent,
        },
        rows,
    )
}

pub fn resume_banner(record: &ResumeRecord) -> String {
    match &record.current {
        Some(current) => format!(
            "Resume: \"{}\" ({})",
            current.title,
            seconds_to_timestamp(current.timestamp)
        ),
        None => "Nothing to resume".to_string(),
    }
}
