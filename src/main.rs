mod app_bootstrap;
mod config;
mod display;
mod engine;
mod error;
mod facade;
mod playlist;
mod process_engine;
mod protocol;
mod resume_store;
mod session;
mod source;
mod timestamp;
mod worker_pool;

use std::{
    io::BufRead,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use clap::{Parser, Subcommand};
use log::{debug, info};
use tokio::sync::broadcast;

use app_bootstrap::services::{spawn_session_services, SessionServicesConfig};
use config::{
    default_config_file, load_config, open_log_file, resolve_log_file, resolve_state_file, Config,
};
use display::TerminalSurface;
use engine::EngineNotifier;
use facade::{DisplayExit, SessionFacade};
use process_engine::ProcessEngine;
use protocol::Message;
use resume_store::{ResumeStore, ResumeUpdate};
use session::SessionDependencies;
use source::SourceRegistry;
use timestamp::seconds_to_timestamp;

#[derive(Parser)]
#[command(name = "resumer")]
#[command(about = "Play playlists and pick up where you left off", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Resume state file path
    #[arg(long, global = true)]
    state: Option<PathBuf>,
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a playlist source (directory or .m3u file)
    Add {
        source_id: String,
        /// Name to store the playlist under, defaults to its title
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List registered playlists with their resume point
    List,
    /// Forget a playlist and its progress
    Remove { name: String },
    /// Start an interactive session
    Open {
        name: String,
        /// Continue the last item right after loading
        #[arg(short, long)]
        resume: bool,
    },
}

/// Interactive sessions log to a file so records do not interleave with the
/// line-oriented display on stdout.
fn init_logging(config: &Config, verbose: bool, log_file: Option<PathBuf>) {
    let level = if verbose {
        log::LevelFilter::Debug.max(config.logging.level_filter())
    } else {
        config.logging.level_filter()
    };
    let mut clog = colog::default_builder();
    clog.filter(None, level);

    let mut open_failure = None;
    if let Some(path) = log_file {
        match open_log_file(&path) {
            Ok(file) => {
                clog.write_style(env_logger::WriteStyle::Never);
                clog.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(err) => open_failure = Some((path, err)),
        }
    }
    clog.init();
    if let Some((path, err)) = open_failure {
        log::warn!("Failed to open log file {}: {}", path.display(), err);
    }

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_file = cli
        .config
        .clone()
        .or_else(default_config_file)
        .ok_or("could not determine a configuration directory, pass --config")?;
    let config = load_config(&config_file);
    let log_file = match cli.command {
        Commands::Open { .. } => resolve_log_file(&config),
        _ => None,
    };
    init_logging(&config, cli.verbose, log_file);
    debug!("Using config {}", config_file.display());

    let state_file = resolve_state_file(cli.state.as_deref(), &config)
        .ok_or("could not determine a data directory, pass --state")?;
    info!("Using resume state {}", state_file.display());
    let store = ResumeStore::new(state_file);

    match cli.command {
        Commands::Add { source_id, name } => add_playlist(&store, &source_id, name),
        Commands::List => list_playlists(&store),
        Commands::Remove { name } => remove_playlist(&store, &name),
        Commands::Open { name, resume } => open_session(config, store, &name, resume),
    }
}

fn add_playlist(
    store: &ResumeStore,
    source_id: &str,
    name: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let source_id = absolute_source_id(source_id);
    let (provider, playlist) = SourceRegistry::with_default_providers().extract(&source_id)?;
    let name = name.unwrap_or_else(|| playlist.title().to_string());
    if playlist.is_empty() {
        log::warn!("{} contains no playable items", source_id);
    }

    store.update(&name, ResumeUpdate::new().id(&source_id))?;
    println!(
        "Added \"{}\" with {} items (via {})",
        name,
        playlist.len(),
        provider
    );
    Ok(())
}

/// Stored source ids must survive a change of working directory.
fn absolute_source_id(source_id: &str) -> String {
    let path = Path::new(source_id);
    if !path.exists() {
        return source_id.to_string();
    }
    std::fs::canonicalize(path)
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|_| source_id.to_string())
}

fn list_playlists(store: &ResumeStore) -> Result<(), Box<dyn std::error::Error>> {
    let names = store.playlist_ids()?;
    if names.is_empty() {
        println!("No playlists yet, add one with `resumer add <DIRECTORY|FILE.m3u>`");
        return Ok(());
    }
    for name in names {
        match store.current(&name)? {
            Some(current) => println!(
                "{}  (resume \"{}\" at {})",
                name,
                current.title,
                seconds_to_timestamp(current.timestamp)
            ),
            None => println!("{}  (not started)", name),
        }
    }
    Ok(())
}

fn remove_playlist(store: &ResumeStore, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !store.remove(name)? {
        return Err(format!("no playlist named \"{}\"", name).into());
    }
    println!("Removed \"{}\"", name);
    Ok(())
}

fn open_session(
    config: Config,
    store: ResumeStore,
    name: &str,
    resume: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (bus_sender, _) = broadcast::channel::<Message>(1024);

    let engine = Arc::new(ProcessEngine::new(
        config.player.clone(),
        EngineNotifier::new(bus_sender.clone()),
    ));
    let display = spawn_session_services(SessionServicesConfig {
        bus_sender: bus_sender.clone(),
        dependencies: SessionDependencies {
            store: Arc::new(store),
            sources: Arc::new(SourceRegistry::with_default_providers()),
            engine,
        },
        config,
        surface: TerminalSurface::stdout(),
    });

    let facade = SessionFacade::new(bus_sender);
    facade.open(name, resume);

    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if !facade.dispatch_line(&line) {
                return;
            }
        }
        debug!("Input closed, shutting down session");
        facade.shutdown();
    });

    match display.join() {
        Ok(DisplayExit::Closed) => Ok(()),
        Ok(DisplayExit::Fatal(message)) => Err(message.into()),
        Err(_) => Err("display thread panicked".into()),
    }
}
