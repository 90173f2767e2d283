//! Application entry point

use clap::Parser;
use std::env;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

mod feed;
mod history;
mod parser;
mod plan;
mod sessions;
mod sound;
mod store;
mod theme;
mod ui;
mod watcher;

use parser::LogEvent;
use sound::{Silent, SoundPlayer, SystemPlayer};
use store::Store;
use watcher::LogWatcher;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Live terminal dashboard for opencode agent activity
#[derive(Parser, Debug)]
#[command(name = "ocwatch", version, about)]
struct Args {
    /// Directory holding opencode's rotating `.log` files
    #[arg(long, env = "OCWATCH_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// opencode storage root (contains `session/<project>/<id>.json`)
    #[arg(long, env = "OCWATCH_STORAGE")]
    storage: Option<PathBuf>,

    /// Only list sessions started in this directory; plan progress is read from here too
    #[arg(long)]
    project: Option<PathBuf>,

    /// List every stored session, not only those active today
    #[arg(long)]
    all_sessions: bool,

    /// Do not play a sound when a new agent appears
    #[arg(long)]
    no_sound: bool,
}

fn home() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home().join(fallback))
}

fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join("opencode")
}

/// Route `log` output to a file; the terminal belongs to the dashboard.
fn init_logging() {
    let dir = xdg_dir("XDG_CACHE_HOME", ".cache").join("ocwatch");
    let file = fs::create_dir_all(&dir).and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("ocwatch.log"))
    });

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    match file {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        // Nowhere safe to write; stay quiet rather than corrupt the screen
        Err(_) => {
            builder.filter_level(log::LevelFilter::Off);
        }
    }
    let _ = builder.try_init();
}

fn load_sessions(store: &Store, storage: &Path, project: Option<&Path>, all: bool) {
    let mut sessions = sessions::discover_sessions(storage);
    if let Some(project) = project {
        sessions = sessions::filter_by_directory(sessions, project);
    }
    if !all {
        sessions = sessions::filter_updated_since(sessions, sessions::start_of_today());
    }
    log::info!("Loaded {} sessions from {}", sessions.len(), storage.display());
    for session in &sessions {
        store.record_session(session.clone());
    }
    store.set_session_list(sessions);
}

fn sound_player(disabled: bool) -> Arc<dyn SoundPlayer> {
    if disabled {
        return Arc::new(Silent);
    }
    match SystemPlayer::detect() {
        Some(player) => Arc::new(player),
        None => {
            log::info!("No sound player available, notifications are silent");
            Arc::new(Silent)
        }
    }
}

/// opencode may not have logged yet; the directory must exist to be watched
fn start_watcher(log_dir: &Path) -> io::Result<(Arc<LogWatcher>, Receiver<LogEvent>)> {
    fs::create_dir_all(log_dir)?;
    let watcher = Arc::new(LogWatcher::new(log_dir));
    let events = watcher.start();
    Ok((watcher, events))
}

/// Restore terminal to normal mode.
fn cleanup_terminal() {
    use std::io::Write;
    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        crossterm::terminal::LeaveAlternateScreen,
        crossterm::cursor::Show
    );
    let _ = crossterm::terminal::disable_raw_mode();
    let _ = stdout.flush();
}

/// Install panic hook to restore terminal before printing error.
fn setup_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        cleanup_terminal();
        log::error!("Panic: {}", panic_info);
        original_hook(panic_info);
    }));
}

/// Drain pending key events so they don't leak into the shell.
fn drain_input_events(silence: Duration) {
    use crossterm::event::{poll, read};
    while poll(silence).unwrap_or(false) {
        let _ = read();
    }
}

/// Flush OS-level terminal input buffer.
#[cfg(unix)]
fn flush_stdin_buffer() {
    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::tcflush(std::io::stdin().as_raw_fd(), libc::TCIFLUSH);
    }
}

#[cfg(not(unix))]
fn flush_stdin_buffer() {}

fn main() -> io::Result<()> {
    let args = Args::parse();
    init_logging();
    setup_panic_hook();

    let log_dir = args.log_dir.unwrap_or_else(|| data_dir().join("log"));
    let storage = args.storage.unwrap_or_else(|| data_dir().join("storage"));
    let project_dir = match &args.project {
        Some(dir) => dir.clone(),
        None => env::current_dir()?,
    };

    let store = Arc::new(Store::new());
    load_sessions(&store, &storage, args.project.as_deref(), args.all_sessions);

    let (watcher, events) = start_watcher(&log_dir)?;
    let consumer = feed::spawn_consumer(events, store.clone(), sound_player(args.no_sound))?;
    log::info!("Watching {}", log_dir.display());

    // SIGINT, SIGTERM and SIGHUP end the dashboard loop so the normal teardown runs
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        log::warn!("Cannot install signal handler: {}", e);
    }

    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    crossterm::terminal::enable_raw_mode()?;
    let backend = ratatui::backend::CrosstermBackend::new(std::io::stdout());
    let mut terminal = ratatui::Terminal::new(backend)?;

    let result = ui::App::new(store, watcher.clone(), project_dir, shutdown).run(&mut terminal);

    drain_input_events(Duration::from_millis(50));
    flush_stdin_buffer();
    cleanup_terminal();

    // A stream that never closed would leave the consumer blocked forever
    if watcher::stop_within(&watcher, SHUTDOWN_TIMEOUT) && consumer.join().is_err() {
        log::error!("Consumer thread panicked");
    }

    result
}
