//! Maps user input to session commands and session output to a display surface.
//!
//! The facade keeps no session state. [`SessionFacade`] turns parsed
//! [`Command`]s into bus messages; [`DisplayBridge`] formats
//! [`DisplayMessage`]s into rows and lines for a [`DisplaySurface`].

use log::{debug, warn};
use tokio::sync::broadcast::{error::RecvError, Receiver, Sender};

use crate::{
    display::{shorten, DisplaySurface, SHORTEN_PLACEHOLDER},
    protocol::{Direction, DisplayMessage, ItemRow, Message, PlaylistSummary, SessionMessage},
    timestamp::{duration_to_timestamp, seconds_to_timestamp},
};

pub const HELP_TEXT: &str = "Commands: <n> play row n | play <title> | c(ontinue) | n(ext) | \
p(rev) | r(eload) | w <n> toggle watched | reverse | shuffle | h(elp) | q(uit)";

/// Columns used by everything but the title on a row.
const ROW_FIXED_COLUMNS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Row number as shown, starting at 1.
    PlayRow(usize),
    Play(String),
    Continue,
    Next,
    Previous,
    Reload,
    ToggleWatched(usize),
    Reverse,
    Shuffle,
    Help,
    Quit,
}

fn parse_row(value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("Rows are numbered from 1".to_string()),
        Ok(row) => Ok(row),
        Err(_) => Err(format!("\"{}\" is not a row number", value.trim())),
    }
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    match head.to_ascii_lowercase().as_str() {
        "" => Err("Type h for help".to_string()),
        "play" if !rest.is_empty() => Ok(Command::Play(rest.to_string())),
        "c" | "continue" => Ok(Command::Continue),
        "n" | "next" => Ok(Command::Next),
        "p" | "prev" | "previous" => Ok(Command::Previous),
        "r" | "reload" => Ok(Command::Reload),
        "w" | "watched" if !rest.is_empty() => parse_row(rest).map(Command::ToggleWatched),
        "reverse" => Ok(Command::Reverse),
        "shuffle" => Ok(Command::Shuffle),
        "h" | "help" | "?" => Ok(Command::Help),
        "q" | "quit" | "exit" => Ok(Command::Quit),
        _ if rest.is_empty() && head.chars().all(|c| c.is_ascii_digit()) => {
            parse_row(head).map(Command::PlayRow)
        }
        _ => Err(format!("Unknown command \"{}\", type h for help", line)),
    }
}

/// Sends commands to the session loop.
#[derive(Clone)]
pub struct SessionFacade {
    bus_sender: Sender<Message>,
}

impl SessionFacade {
    pub fn new(bus_sender: Sender<Message>) -> Self {
        Self { bus_sender }
    }

    pub fn open(&self, playlist_key: &str, resume: bool) {
        self.send(SessionMessage::LoadPlaylist(playlist_key.to_string()));
        if resume {
            self.send(SessionMessage::ContinuePlayback);
        }
    }

    /// Routes `command`. Returns `false` once the session was asked to stop.
    pub fn dispatch(&self, command: Command) -> bool {
        debug!("SessionFacade: dispatching {:?}", command);
        let message = match command {
            Command::PlayRow(row) => SessionMessage::SelectIndex(row - 1),
            Command::Play(title) => SessionMessage::SelectItem(title),
            Command::Continue => SessionMessage::ContinuePlayback,
            Command::Next => SessionMessage::Advance(Direction::Next),
            Command::Previous => SessionMessage::Advance(Direction::Previous),
            Command::Reload => SessionMessage::Reload,
            Command::ToggleWatched(row) => SessionMessage::ToggleWatched(row - 1),
            Command::Reverse => SessionMessage::Reverse,
            Command::Shuffle => SessionMessage::Shuffle,
            Command::Help => {
                self.notify(HELP_TEXT.to_string());
                return true;
            }
            Command::Quit => {
                self.send(SessionMessage::Shutdown);
                return false;
            }
        };
        self.send(message);
        true
    }

    /// Parses and routes one input line; parse errors are shown to the user.
    pub fn dispatch_line(&self, line: &str) -> bool {
        match parse_command(line) {
            Ok(command) => self.dispatch(command),
            Err(message) => {
                self.notify(message);
                true
            }
        }
    }

    pub fn shutdown(&self) {
        self.send(SessionMessage::Shutdown);
    }

    fn notify(&self, text: String) {
        let _ = self
            .bus_sender
            .send(Message::Display(DisplayMessage::ShowMessage(text)));
    }

    fn send(&self, message: SessionMessage) {
        if self.bus_sender.send(Message::Session(message)).is_err() {
            warn!("SessionFacade: no session is listening");
        }
    }
}

fn title_width(width: usize) -> usize {
    width.saturating_sub(ROW_FIXED_COLUMNS).max(8)
}

pub fn format_row(index: usize, row: &ItemRow, width: usize) -> String {
    let title_width = title_width(width);
    format!(
        "{:>3}. {:<title_width$}  {}  {:>3}%",
        index + 1,
        shorten(&row.title, title_width, SHORTEN_PLACEHOLDER),
        duration_to_timestamp(row.duration_secs),
        row.watched_percent,
    )
}

pub fn format_title(summary: &PlaylistSummary, width: usize) -> String {
    let title_width = title_width(width) + 5;
    format!(
        "{:<title_width$}  {}  {:>3}%",
        shorten(&summary.title, title_width, SHORTEN_PLACEHOLDER),
        seconds_to_timestamp(summary.total_duration_secs),
        summary.watched_percent,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayExit {
    Closed,
    Fatal(String),
}

/// Applies display messages from the bus to a surface.
pub struct DisplayBridge<S: DisplaySurface> {
    surface: S,
    width: usize,
    bus_consumer: Receiver<Message>,
}

impl<S: DisplaySurface> DisplayBridge<S> {
    pub fn new(surface: S, width: usize, bus_consumer: Receiver<Message>) -> Self {
        Self {
            surface,
            width,
            bus_consumer,
        }
    }

    pub fn run(&mut self) -> DisplayExit {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Display(message)) => {
                    if let Some(exit) = self.apply(message) {
                        return exit;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("DisplayBridge: bus lagged, {} messages skipped", skipped);
                }
                Err(RecvError::Closed) => return DisplayExit::Closed,
            }
        }
    }

    fn apply(&mut self, message: DisplayMessage) -> Option<DisplayExit> {
        match message {
            DisplayMessage::SetTitle(summary) => {
                self.surface.set_title(&format_title(&summary, self.width))
            }
            DisplayMessage::SetItems(rows) => {
                let rows: Vec<String> = rows
                    .iter()
                    .enumerate()
                    .map(|(index, row)| format_row(index, row, self.width))
                    .collect();
                self.surface.set_items(&rows);
            }
            DisplayMessage::ShowMessage(text) => self.surface.show_message(&text),
            DisplayMessage::ShowResumeBanner(text) => self.surface.show_resume_banner(&text),
            DisplayMessage::FocusItem(index) => self.surface.focus_item(index),
            DisplayMessage::Fatal(text) => {
                self.surface.show_message(&text);
                return Some(DisplayExit::Fatal(text));
            }
            DisplayMessage::SessionClosed => return Some(DisplayExit::Closed),
        }
        None
    }

    #[cfg(test)]
    pub fn into_surface(self) -> S {
        self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct RecordingSurface {
        calls: Vec<String>,
    }

    impl DisplaySurface for RecordingSurface {
        fn set_title(&mut self, text: &str) {
            self.calls.push(format!("title:{text}"));
        }

        fn set_items(&mut self, rows: &[String]) {
            self.calls.push(format!("items:{}", rows.join("|")));
        }

        fn show_message(&mut self, text: &str) {
            self.calls.push(format!("message:{text}"));
        }

        fn show_resume_banner(&mut self, text: &str) {
            self.calls.push(format!("banner:{text}"));
        }

        fn focus_item(&mut self, index: usize) {
            self.calls.push(format!("focus:{index}"));
        }
    }

    #[test]
    fn test_parse_command_accepts_short_and_long_forms() {
        assert_eq!(parse_command("3"), Ok(Command::PlayRow(3)));
        assert_eq!(
            parse_command("play  Episode 2 "),
            Ok(Command::Play("Episode 2".to_string()))
        );
        assert_eq!(parse_command("c"), Ok(Command::Continue));
        assert_eq!(parse_command("NEXT"), Ok(Command::Next));
        assert_eq!(parse_command("p"), Ok(Command::Previous));
        assert_eq!(parse_command("r"), Ok(Command::Reload));
        assert_eq!(parse_command("w 2"), Ok(Command::ToggleWatched(2)));
        assert_eq!(parse_command("shuffle"), Ok(Command::Shuffle));
        assert_eq!(parse_command("reverse"), Ok(Command::Reverse));
        assert_eq!(parse_command("q"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_command_rejects_bad_input() {
        assert!(parse_command("").is_err());
        assert!(parse_command("0").is_err());
        assert!(parse_command("w x").is_err());
        assert!(parse_command("play").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn test_dispatch_converts_rows_to_indexes() {
        let (bus_sender, mut receiver) = broadcast::channel(16);
        let facade = SessionFacade::new(bus_sender);

        assert!(facade.dispatch(Command::PlayRow(2)));
        assert!(facade.dispatch(Command::ToggleWatched(1)));
        assert!(!facade.dispatch(Command::Quit));

        assert!(matches!(
            receiver.try_recv(),
            Ok(Message::Session(SessionMessage::SelectIndex(1)))
        ));
        assert!(matches!(
            receiver.try_recv(),
            Ok(Message::Session(SessionMessage::ToggleWatched(0)))
        ));
        assert!(matches!(
            receiver.try_recv(),
            Ok(Message::Session(SessionMessage::Shutdown))
        ));
    }

    #[test]
    fn test_open_with_resume_queues_continue_after_load() {
        let (bus_sender, mut receiver) = broadcast::channel(16);
        SessionFacade::new(bus_sender).open("course", true);

        assert!(matches!(
            receiver.try_recv(),
            Ok(Message::Session(SessionMessage::LoadPlaylist(key))) if key == "course"
        ));
        assert!(matches!(
            receiver.try_recv(),
            Ok(Message::Session(SessionMessage::ContinuePlayback))
        ));
    }

    #[test]
    fn test_format_row_pads_and_shortens_title() {
        let row = ItemRow {
            title: "A rather long lecture title about ownership".to_string(),
            duration_secs: 754,
            watched_percent: 7,
        };
        let formatted = format_row(0, &row, 40);
        assert_eq!(formatted, "  1. A rather long l[...]  00:12:34    7%");

        let unknown = ItemRow {
            title: "live".to_string(),
            duration_secs: -1,
            watched_percent: 0,
        };
        assert_eq!(
            format_row(9, &unknown, 40),
            " 10. live                  --:--:--    0%"
        );
    }

    #[test]
    fn test_bridge_formats_messages_until_session_closes() {
        let (bus_sender, _) = broadcast::channel(16);
        let mut bridge = DisplayBridge::new(RecordingSurface::default(), 40, bus_sender.subscribe());

        bus_sender
            .send(Message::Display(DisplayMessage::SetItems(vec![ItemRow {
                title: "intro".to_string(),
                duration_secs: 60,
                watched_percent: 50,
            }])))
            .expect("send");
        bus_sender
            .send(Message::Session(SessionMessage::Reload))
            .expect("send");
        bus_sender
            .send(Message::Display(DisplayMessage::FocusItem(0)))
            .expect("send");
        bus_sender
            .send(Message::Display(DisplayMessage::SessionClosed))
            .expect("send");

        assert_eq!(bridge.run(), DisplayExit::Closed);
        let surface = bridge.into_surface();
        assert_eq!(
            surface.calls,
            vec![
                "items:  1. intro                 00:01:00   50%".to_string(),
                "focus:0".to_string(),
            ]
        );
    }

    #[test]
    fn test_bridge_stops_on_fatal() {
        let (bus_sender, _) = broadcast::channel(16);
        let receiver = bus_sender.subscribe();
        let handle = std::thread::spawn(move || {
            let mut bridge = DisplayBridge::new(RecordingSurface::default(), 80, receiver);
            bridge.run()
        });
        std::thread::sleep(Duration::from_millis(20));
        bus_sender
            .send(Message::Display(DisplayMessage::Fatal("disk full".to_string())))
            .expect("send");

        assert_eq!(
            handle.join().expect("bridge thread"),
            DisplayExit::Fatal("disk full".to_string())
        );
    }
}
