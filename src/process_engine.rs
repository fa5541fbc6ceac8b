//! Playback engine backed by an external player process.
//!
//! The player is launched once per `load_and_play` call. Its terminal status
//! lines (`A: HH:MM:SS ...` or `AV: HH:MM:SS ...`) are parsed into position
//! notifications, and its exit is turned into exactly one end event.

use std::{
    io::Read,
    process::{Child, Command, Stdio},
    sync::{mpsc, Arc, Mutex},
    thread,
};

use log::{debug, info, trace, warn};

use crate::{
    config::PlayerConfig,
    engine::{EndReason, EngineNotifier, PlaybackEngine, PlaybackTicket},
    error::EngineError,
    timestamp::timestamp_to_seconds,
};

/// Printed by the player when the media ran to completion.
const NATURAL_END_MARKER: &str = "Exiting... (End of file)";
/// Status markers only count near the start of a line.
const STATUS_PREFIX_WINDOW: usize = 15;

/// Extracts the playback position from one player status line.
pub fn parse_status_position(line: &str) -> Option<f64> {
    let marker = ["AV:", "A:"]
        .iter()
        .filter_map(|marker| line.find(marker).map(|at| (at, marker.len())))
        .min_by_key(|(at, _)| *at)?;
    let (at, marker_len) = marker;
    if at > STATUS_PREFIX_WINDOW {
        return None;
    }
    let rest = line[at + marker_len..].trim_start();
    let token = rest.split_whitespace().next()?;
    timestamp_to_seconds(token).ok().map(|seconds| seconds as f64)
}

pub fn is_natural_end(line: &str) -> bool {
    line.contains(NATURAL_END_MARKER)
}

/// Splits a byte stream into lines on either `\r` or `\n`.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for byte in bytes {
            if *byte == b'\r' || *byte == b'\n' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            } else {
                self.pending.push(*byte);
            }
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

struct RunningPlayer {
    ticket: PlaybackTicket,
    child: Arc<Mutex<Child>>,
}

pub struct ProcessEngine {
    settings: PlayerConfig,
    notifier: EngineNotifier,
    running: Mutex<Option<RunningPlayer>>,
}

impl ProcessEngine {
    pub fn new(settings: PlayerConfig, notifier: EngineNotifier) -> Self {
        Self {
            settings,
            notifier,
            running: Mutex::new(None),
        }
    }

    fn build_command(&self, locator: &str, title: &str, start_secs: u64) -> Command {
        let mut command = Command::new(&self.settings.command);
        command
            .args(&self.settings.args)
            .arg(format!("--start={}", start_secs))
            .arg(format!("--force-media-title={}", title));
        if !self.settings.show_video {
            command.arg("--no-video");
        }
        command
            .arg(locator)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    fn stop_running(&self) {
        let previous = match self.running.lock() {
            Ok(mut running) => running.take(),
            Err(_) => {
                warn!("ProcessEngine: running player lock poisoned");
                return;
            }
        };
        if let Some(previous) = previous {
            debug!("ProcessEngine: stopping player for ticket {}", previous.ticket);
            if let Ok(mut child) = previous.child.lock() {
                if let Err(err) = child.kill() {
                    trace!("ProcessEngine: kill failed, player already exited: {}", err);
                }
            }
        }
    }
}

impl PlaybackEngine for ProcessEngine {
    fn load_and_play(
        &self,
        ticket: PlaybackTicket,
        locator: &str,
        title: &str,
        start_secs: u64,
    ) -> Result<(), EngineError> {
        if locator.trim().is_empty() {
            return Err(EngineError::Rejected {
                locator: locator.to_string(),
                reason: "empty locator".to_string(),
            });
        }
        self.stop_running();

        let mut child = self
            .build_command(locator, title, start_secs)
            .spawn()
            .map_err(|err| EngineError::Spawn {
                command: self.settings.command.clone(),
                reason: err.to_string(),
            })?;
        info!(
            "Started {} for {} (ticket {}, pid {})",
            self.settings.command,
            title,
            ticket,
            child.id()
        );

        let (line_tx, line_rx) = mpsc::channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            spawn_output_reader("player-stdout", stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_reader("player-stderr", stderr, line_tx);
        } else {
            drop(line_tx);
        }

        let child = Arc::new(Mutex::new(child));
        match self.running.lock() {
            Ok(mut running) => {
                *running = Some(RunningPlayer {
                    ticket,
                    child: Arc::clone(&child),
                });
            }
            Err(_) => warn!("ProcessEngine: running player lock poisoned"),
        }

        let notifier = self.notifier.clone();
        let monitor = thread::Builder::new()
            .name(format!("player-monitor-{ticket}"))
            .spawn(move || monitor_player(ticket, child, line_rx, notifier));
        if let Err(err) = monitor {
            self.stop_running();
            return Err(EngineError::Spawn {
                command: self.settings.command.clone(),
                reason: format!("failed to start monitor thread: {}", err),
            });
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.stop_running();
    }
}

fn spawn_output_reader<R>(name: &str, mut stream: R, lines: mpsc::Sender<String>)
where
    R: Read + Send + 'static,
{
    let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
        let mut splitter = LineSplitter::default();
        let mut buffer = [0u8; 4096];
        loop {
            match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => {
                    for line in splitter.push(&buffer[..read]) {
                        if lines.send(line).is_err() {
                            return;
                        }
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("Player output read failed: {}", err);
                    break;
                }
            }
        }
        if let Some(line) = splitter.finish() {
            let _ = lines.send(line);
        }
    });
    if let Err(err) = spawned {
        warn!("Failed to spawn {} reader: {}", name, err);
    }
}

/// Forwards positions until the player closes its output, then reports the end.
fn monitor_player(
    ticket: PlaybackTicket,
    child: Arc<Mutex<Child>>,
    lines: mpsc::Receiver<String>,
    notifier: EngineNotifier,
) {
    let mut reached_end = false;
    for line in lines {
        if let Some(seconds) = parse_status_position(&line) {
            notifier.position(ticket, Some(seconds));
        } else if is_natural_end(&line) {
            reached_end = true;
        } else {
            trace!("player: {}", line);
        }
    }

    match child.lock() {
        Ok(mut child) => match child.wait() {
            Ok(status) => debug!("Player for ticket {} exited with {}", ticket, status),
            Err(err) => warn!("Failed to reap player for ticket {}: {}", ticket, err),
        },
        Err(_) => warn!("Player handle for ticket {} poisoned", ticket),
    }

    let reason = if reached_end {
        EndReason::EndedNaturally
    } else {
        EndReason::EndedExternally
    };
    notifier.ended(ticket, reason);
}
