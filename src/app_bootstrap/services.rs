use std::thread::{self, JoinHandle};

use tokio::sync::broadcast;

use crate::{
    config::Config,
    display::DisplaySurface,
    facade::{DisplayBridge, DisplayExit},
    protocol::{DisplayMessage, Message},
    session::{SessionController, SessionDependencies},
    worker_pool::panic_payload_to_string,
};

pub struct SessionServicesConfig<S> {
    pub bus_sender: broadcast::Sender<Message>,
    pub dependencies: SessionDependencies,
    pub config: Config,
    pub surface: S,
}

/// Starts the session loop and the display bridge.
///
/// The returned handle yields how the display side ended; join it to wait for
/// the session to finish.
pub fn spawn_session_services<S>(services: SessionServicesConfig<S>) -> JoinHandle<DisplayExit>
where
    S: DisplaySurface + Send + 'static,
{
    let SessionServicesConfig {
        bus_sender,
        dependencies,
        config,
        surface,
    } = services;

    // Subscribe before any thread runs so no early message is missed.
    let display_bus_receiver = bus_sender.subscribe();
    let session_bus_receiver = bus_sender.subscribe();
    let session_bus_sender = bus_sender.clone();

    let display_width = config.display.width;
    let display_handle = thread::spawn(move || {
        let mut bridge = DisplayBridge::new(surface, display_width, display_bus_receiver);
        bridge.run()
    });

    let session_settings = config.session;
    thread::spawn(move || {
        let panic_bus_sender = session_bus_sender.clone();
        let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut session = SessionController::new(
                dependencies,
                session_settings,
                session_bus_receiver,
                session_bus_sender,
            );
            session.run()
        }));
        match run_result {
            Ok(Some(err)) => log::error!("Session loop ended: {}", err),
            Ok(None) => log::debug!("Session loop finished"),
            Err(payload) => {
                let reason = panic_payload_to_string(payload.as_ref());
                log::error!("Session thread terminated due to panic: {}", reason);
                let _ = panic_bus_sender.send(Message::Display(DisplayMessage::Fatal(format!(
                    "Session crashed: {}",
                    reason
                ))));
            }
        }
    });

    display_handle
}

#[cfg(test)]
mod tests {
    use super::{spawn_session_services, SessionServicesConfig};
    use crate::{
        config::Config,
        display::DisplaySurface,
        engine::{PlaybackEngine, PlaybackTicket},
        error::EngineError,
        facade::{DisplayExit, SessionFacade},
        resume_store::ResumeStore,
        session::SessionDependencies,
        source::SourceRegistry,
    };
    use std::sync::{Arc, Mutex};
    use tokio::sync::broadcast;

    struct IdleEngine;

    impl PlaybackEngine for IdleEngine {
        fn load_and_play(
            &self,
            _ticket: PlaybackTicket,
            _locator: &str,
            _title: &str,
            _start_secs: u64,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        fn shutdown(&self) {}
    }

    #[derive(Clone, Default)]
    struct SharedMessages(Arc<Mutex<Vec<String>>>);

    impl DisplaySurface for SharedMessages {
        fn set_title(&mut self, _text: &str) {}
        fn set_items(&mut self, _rows: &[String]) {}
        fn show_message(&mut self, text: &str) {
            self.0.lock().expect("messages lock").push(text.to_string());
        }
        fn show_resume_banner(&mut self, _text: &str) {}
        fn focus_item(&mut self, _index: usize) {}
    }

    #[test]
    fn test_unknown_playlist_is_reported_and_quit_closes_display() {
        let state_dir = tempfile::tempdir().expect("temp dir");
        let (bus_sender, _) = broadcast::channel(64);
        let messages = SharedMessages::default();

        let display = spawn_session_services(SessionServicesConfig {
            bus_sender: bus_sender.clone(),
            dependencies: SessionDependencies {
                store: Arc::new(ResumeStore::new(state_dir.path().join("state.json"))),
                sources: Arc::new(SourceRegistry::new()),
                engine: Arc::new(IdleEngine),
            },
            config: Config::default(),
            surface: messages.clone(),
        });

        let facade = SessionFacade::new(bus_sender);
        facade.open("nowhere", false);
        std::thread::sleep(std::time::Duration::from_millis(200));
        assert!(!facade.dispatch_line("q"));

        assert_eq!(display.join().expect("display thread"), DisplayExit::Closed);
        let messages = messages.0.lock().expect("messages lock").clone();
        assert!(messages.contains(&"Loading...".to_string()));
        assert!(messages.contains(&"Playlist \"nowhere\" could not be loaded".to_string()));
    }
}
