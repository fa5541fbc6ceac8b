//! Playback engine adapter contract.
//!
//! Engines start playback through [`PlaybackEngine::load_and_play`] and report
//! back asynchronously through an [`EngineNotifier`], which turns native
//! callbacks into typed bus messages consumed by the session loop.

use log::trace;
use tokio::sync::broadcast::Sender;

use crate::{
    error::EngineError,
    protocol::{EngineMessage, Message},
};

/// Identifies one `load_and_play` call. Notifications carry the ticket of the
/// playback they belong to so superseded playbacks can be told apart.
pub type PlaybackTicket = u64;

/// Terminal lifecycle event of one playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Media reached its end.
    EndedNaturally,
    /// Stopped by the user, the backend, or an error.
    EndedExternally,
}

/// Interface implemented by concrete playback engines.
///
/// After `load_and_play` returns `Ok`, the engine delivers any number of
/// position notifications followed by exactly one terminal event for that
/// ticket, and nothing afterwards.
pub trait PlaybackEngine: Send + Sync {
    fn load_and_play(
        &self,
        ticket: PlaybackTicket,
        locator: &str,
        title: &str,
        start_secs: u64,
    ) -> Result<(), EngineError>;

    fn shutdown(&self);
}

/// Bus-backed sink for engine notifications.
#[derive(Clone)]
pub struct EngineNotifier {
    bus_producer: Sender<Message>,
}

impl EngineNotifier {
    pub fn new(bus_producer: Sender<Message>) -> Self {
        Self { bus_producer }
    }

    /// Current position in seconds, or `None` while nothing is playing.
    pub fn position(&self, ticket: PlaybackTicket, seconds: Option<f64>) {
        trace!("Engine position ticket={} seconds={:?}", ticket, seconds);
        let _ = self
            .bus_producer
            .send(Message::Engine(EngineMessage::Position { ticket, seconds }));
    }

    pub fn ended(&self, ticket: PlaybackTicket, reason: EndReason) {
        trace!("Engine ended ticket={} reason={:?}", ticket, reason);
        let _ = self
            .bus_producer
            .send(Message::Engine(EngineMessage::Ended { ticket, reason }));
    }
}
