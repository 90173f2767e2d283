//! Live tail of the newest `.log` file in a directory.
//!
//! Two triggers decide which file is current: directory notifications for
//! newly created log files (debounced) and a fixed-interval poll as fallback.
//! Both call [`reconcile`], which is a no-op when the newest file is already
//! being followed. Parsed events go out on a bounded queue that is closed
//! exactly once, after every producer has exited.

use crate::parser::{parse_line, LogEvent};
use log::{debug, error, info, warn};
use notify::{event::EventKind, Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Condvar, Mutex};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const LOG_SUFFIX: &str = ".log";
pub const QUEUE_CAPACITY: usize = 1000;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Let a freshly created file settle before switching to it
const SETTLE_DELAY: Duration = Duration::from_millis(50);
const FOLLOW_INTERVAL: Duration = Duration::from_millis(25);
const PUSH_RETRY: Duration = Duration::from_millis(10);

/// One-shot broadcast: once fired, every waiter wakes and stays woken
#[derive(Default)]
pub struct Signal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    /// Returns true only for the call that actually fired it
    pub fn fire(&self) -> bool {
        let mut fired = self.fired.lock();
        if *fired {
            return false;
        }
        *fired = true;
        self.cond.notify_all();
        true
    }

    pub fn is_fired(&self) -> bool {
        *self.fired.lock()
    }

    /// Sleep up to `timeout`, returning early (true) once fired
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut fired = self.fired.lock();
        if !*fired {
            self.cond.wait_for(&mut fired, timeout);
        }
        *fired
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherStatus {
    Created,
    Running,
    Stopping,
    Stopped,
    /// Directory notifications could not be set up; no events will arrive
    Failed(String),
}

/// Lexicographically greatest `*.log` file in `dir`, if any
pub fn newest_log_file(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.ends_with(LOG_SUFFIX))
        .max()
        .map(|name| dir.join(name))
}

/// Push with backpressure; gives up when `stop` fires or the queue is gone
fn push(tx: &SyncSender<LogEvent>, mut event: LogEvent, stop: &Signal) -> bool {
    loop {
        match tx.try_send(event) {
            Ok(()) => return true,
            Err(TrySendError::Disconnected(_)) => return false,
            Err(TrySendError::Full(back)) => {
                if stop.wait(PUSH_RETRY) {
                    return false;
                }
                event = back;
            }
        }
    }
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &fs::Metadata, _b: &fs::Metadata) -> bool {
    true
}

/// Line reader over a growing file
struct Tail {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    /// Bytes of a line whose newline has not arrived yet
    partial: Vec<u8>,
}

impl Tail {
    /// With `at_end`, only content written from now on is read
    fn open(path: &Path, at_end: bool) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let offset = if at_end { file.seek(SeekFrom::End(0))? } else { 0 };
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            offset,
            partial: Vec::new(),
        })
    }

    /// Start over when the file shrank or the path now names another file
    fn check_replaced(&mut self) -> io::Result<()> {
        let on_disk = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let open = self.reader.get_ref().metadata()?;

        if on_disk.len() < self.offset || !same_file(&on_disk, &open) {
            debug!("{} truncated or recreated, reading from start", self.path.display());
            self.reader = BufReader::new(File::open(&self.path)?);
            self.offset = 0;
            self.partial.clear();
        }
        Ok(())
    }

    /// Complete lines appended since the last call
    fn read_lines(&mut self) -> io::Result<Vec<String>> {
        self.check_replaced()?;

        let mut lines = Vec::new();
        loop {
            let n = self.reader.read_until(b'\n', &mut self.partial)?;
            if n == 0 {
                break;
            }
            self.offset += n as u64;
            if self.partial.last() != Some(&b'\n') {
                // Writer is mid-line; keep the bytes until the rest shows up
                break;
            }
            let line = String::from_utf8_lossy(&self.partial);
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                lines.push(line.to_string());
            }
            self.partial.clear();
        }
        Ok(lines)
    }
}

/// Background follow of a single file
struct Follower {
    path: PathBuf,
    stop: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl Follower {
    fn spawn(path: PathBuf, at_end: bool, tx: SyncSender<LogEvent>) -> io::Result<Self> {
        let tail = Tail::open(&path, at_end)?;
        let stop = Arc::new(Signal::default());
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("ocwatch-follow".to_string())
            .spawn(move || follow(tail, tx, &thread_stop))?;
        Ok(Self {
            path,
            stop,
            handle: Some(handle),
        })
    }

    fn stop(mut self) {
        self.stop.fire();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Follow thread for {} panicked", self.path.display());
            }
        }
    }
}

fn follow(mut tail: Tail, tx: SyncSender<LogEvent>, stop: &Signal) {
    debug!("Following {}", tail.path.display());
    loop {
        match tail.read_lines() {
            Ok(lines) => {
                for line in lines {
                    match parse_line(&line) {
                        Ok(event) => {
                            if !push(&tx, event, stop) {
                                return;
                            }
                        }
                        Err(e) => debug!("Skipping log line ({}): {}", e, line),
                    }
                }
            }
            Err(e) => warn!("Read error on {}: {}", tail.path.display(), e),
        }
        if stop.wait(FOLLOW_INTERVAL) {
            return;
        }
    }
}

struct Shared {
    dir: PathBuf,
    shutdown: Signal,
    status: Mutex<WatcherStatus>,
    /// Newest log when `start` ran; the only file tailed from its end
    initial: Mutex<Option<PathBuf>>,
    current: Mutex<Option<Follower>>,
    /// Original queue sender; dropped last to close the stream
    sender: Mutex<Option<SyncSender<LogEvent>>>,
}

impl Shared {
    fn fail(&self, reason: String) {
        error!("Log watcher for {} failed: {}", self.dir.display(), reason);
        {
            let mut status = self.status.lock();
            if *status == WatcherStatus::Running {
                *status = WatcherStatus::Failed(reason);
            }
        }
        self.shutdown.fire();
    }
}

/// Switch to the newest log file unless it is already followed
fn reconcile(shared: &Shared, tx: &SyncSender<LogEvent>) {
    let Some(newest) = newest_log_file(&shared.dir) else {
        return;
    };

    let mut current = shared.current.lock();
    if shared.shutdown.is_fired() {
        return;
    }
    if current.as_ref().is_some_and(|f| f.path == newest) {
        return;
    }

    // Old follower must be gone before the new one starts
    if let Some(old) = current.take() {
        info!("Log rotated: {} -> {}", old.path.display(), newest.display());
        old.stop();
    }
    // Files that appear later are read whole, so lines written before the switch are kept
    let at_end = shared.initial.lock().as_deref() == Some(newest.as_path());
    match Follower::spawn(newest.clone(), at_end, tx.clone()) {
        Ok(follower) => {
            info!("Tailing {}", newest.display());
            *current = Some(follower);
        }
        Err(e) => warn!("Cannot follow {}: {}", newest.display(), e),
    }
}

fn is_log_creation(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_))
        && event.paths.iter().any(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(LOG_SUFFIX))
        })
}

fn watch_directory(shared: Arc<Shared>, tx: SyncSender<LogEvent>) {
    let (fs_tx, fs_rx) = mpsc::channel();
    let watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = fs_tx.send(res);
        },
        Config::default(),
    );
    let mut watcher = match watcher {
        Ok(w) => w,
        Err(e) => return shared.fail(format!("cannot create directory watcher: {e}")),
    };
    if let Err(e) = watcher.watch(&shared.dir, RecursiveMode::NonRecursive) {
        return shared.fail(format!("cannot watch {}: {e}", shared.dir.display()));
    }
    info!("Watching {} for log files", shared.dir.display());

    reconcile(&shared, &tx);

    while !shared.shutdown.is_fired() {
        match fs_rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) => {
                if is_log_creation(&event) {
                    if shared.shutdown.wait(SETTLE_DELAY) {
                        break;
                    }
                    reconcile(&shared, &tx);
                }
            }
            Ok(Err(e)) => warn!("Directory watch error: {}", e),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn poll_directory(shared: Arc<Shared>, tx: SyncSender<LogEvent>) {
    while !shared.shutdown.wait(POLL_INTERVAL) {
        reconcile(&shared, &tx);
    }
}

/// Follows the newest log file of a directory and streams parsed events
pub struct LogWatcher {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LogWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                dir: dir.into(),
                shutdown: Signal::default(),
                status: Mutex::new(WatcherStatus::Created),
                initial: Mutex::new(None),
                current: Mutex::new(None),
                sender: Mutex::new(None),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    pub fn status(&self) -> WatcherStatus {
        self.shared.status.lock().clone()
    }

    pub fn current_file(&self) -> Option<PathBuf> {
        self.shared.current.lock().as_ref().map(|f| f.path.clone())
    }

    /// Begin following. Call once; the stream ends after [`LogWatcher::stop`].
    pub fn start(&self) -> Receiver<LogEvent> {
        let (tx, rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        {
            let mut status = self.shared.status.lock();
            if *status != WatcherStatus::Created {
                warn!("Log watcher already started ({:?}); returning a closed stream", *status);
                return rx;
            }
            *status = WatcherStatus::Running;
        }
        *self.shared.initial.lock() = newest_log_file(&self.shared.dir);
        *self.shared.sender.lock() = Some(tx.clone());

        let mut tasks = self.tasks.lock();
        let spawns: [(&str, fn(Arc<Shared>, SyncSender<LogEvent>)); 2] = [
            ("ocwatch-notify", watch_directory),
            ("ocwatch-poll", poll_directory),
        ];
        for (name, task) in spawns {
            let shared = self.shared.clone();
            let tx = tx.clone();
            match thread::Builder::new().name(name.to_string()).spawn(move || task(shared, tx)) {
                Ok(handle) => tasks.push(handle),
                Err(e) => self.shared.fail(format!("cannot spawn {name}: {e}")),
            }
        }
        rx
    }

    /// Shut down and close the stream. Safe to call any number of times,
    /// from any thread; only the first call does the teardown.
    pub fn stop(&self) {
        {
            let mut status = self.shared.status.lock();
            match *status {
                WatcherStatus::Running | WatcherStatus::Failed(_) => {
                    *status = WatcherStatus::Stopping;
                }
                WatcherStatus::Created => {
                    *status = WatcherStatus::Stopped;
                    return;
                }
                WatcherStatus::Stopping | WatcherStatus::Stopped => return,
            }
        }

        self.shared.shutdown.fire();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for handle in tasks {
            if handle.join().is_err() {
                error!("Log watcher thread panicked");
            }
        }
        let follower = self.shared.current.lock().take();
        if let Some(follower) = follower {
            follower.stop();
        }
        // Every producer has exited; closing now cannot race a send
        drop(self.shared.sender.lock().take());

        *self.shared.status.lock() = WatcherStatus::Stopped;
        info!("Log watcher stopped");
    }
}

impl Drop for LogWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stop on a helper thread, waiting at most `timeout`.
/// Returns false (and leaves the teardown running) when it takes longer.
pub fn stop_within(watcher: &Arc<LogWatcher>, timeout: Duration) -> bool {
    let (done_tx, done_rx) = mpsc::channel();
    let watcher = watcher.clone();
    thread::spawn(move || {
        watcher.stop();
        let _ = done_tx.send(());
    });
    match done_rx.recv_timeout(timeout) {
        Ok(()) => true,
        Err(_) => {
            warn!("Log watcher did not stop within {:?}; continuing shutdown", timeout);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    fn line(session: &str, agent: &str) -> String {
        format!("INFO 2026-01-31T10:05:40 +1ms service=llm sessionID={session} agent={agent}\n")
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn signal_fires_once() {
        let signal = Signal::default();
        assert!(!signal.wait(Duration::from_millis(1)));
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
        assert!(signal.wait(Duration::from_secs(60)));
    }

    #[test]
    fn newest_file_is_lexicographic_max() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(newest_log_file(tmp.path()), None);
        for name in ["2026-01-31T100000.log", "2026-01-31T120000.log", "2026-02-01T000000.txt"] {
            fs::write(tmp.path().join(name), "").unwrap();
        }
        fs::create_dir(tmp.path().join("zzz.log")).unwrap();
        assert_eq!(
            newest_log_file(tmp.path()),
            Some(tmp.path().join("2026-01-31T120000.log"))
        );
        assert_eq!(newest_log_file(&tmp.path().join("missing")), None);
    }

    #[test]
    fn tail_reads_only_complete_new_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.log");
        append(&path, "old line\n");

        let mut tail = Tail::open(&path, true).unwrap();
        assert!(tail.read_lines().unwrap().is_empty());

        append(&path, "first\r\nsec");
        assert_eq!(tail.read_lines().unwrap(), vec!["first"]);
        append(&path, "ond\n\n");
        assert_eq!(tail.read_lines().unwrap(), vec!["second"]);
    }

    #[test]
    fn tail_restarts_after_truncation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.log");
        append(&path, "some earlier content that is long\n");
        let mut tail = Tail::open(&path, true).unwrap();

        fs::write(&path, "fresh\n").unwrap();
        assert_eq!(tail.read_lines().unwrap(), vec!["fresh"]);
    }

    #[test]
    fn push_gives_up_on_stop_when_full() {
        let (tx, _rx) = mpsc::sync_channel(1);
        let event = parse_line(&line("s", "a")).unwrap();
        let stop = Signal::default();
        assert!(push(&tx, event.clone(), &stop));

        stop.fire();
        let started = Instant::now();
        assert!(!push(&tx, event, &stop));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn follows_rotation_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("2026-01-31T100000.log");
        let second = tmp.path().join("2026-01-31T110000.log");

        let watcher = LogWatcher::new(tmp.path());
        let rx = watcher.start();
        assert_eq!(watcher.status(), WatcherStatus::Running);

        append(&first, "");
        assert!(wait_until(|| watcher.current_file().as_deref() == Some(first.as_path())));
        append(&first, "not a log line\n");
        append(&first, &line("ses_a", "build"));
        let event = rx.recv_timeout(WAIT).expect("event from first file");
        assert_eq!((event.session_id.as_str(), event.agent.as_str()), ("ses_a", "build"));

        append(&second, "");
        assert!(wait_until(|| watcher.current_file().as_deref() == Some(second.as_path())));
        append(&second, &line("ses_b", "oracle"));
        let event = rx.recv_timeout(WAIT).expect("event from second file");
        assert_eq!((event.session_id.as_str(), event.agent.as_str()), ("ses_b", "oracle"));

        // Old file is no longer followed
        append(&first, &line("ses_a", "late"));
        thread::sleep(Duration::from_millis(200));

        watcher.stop();
        assert_eq!(watcher.status(), WatcherStatus::Stopped);
        let rest: Vec<LogEvent> = rx.iter().collect();
        assert!(rest.is_empty(), "unexpected events: {rest:?}");
    }

    #[test]
    fn new_file_is_read_from_its_first_line() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("2026-01-31T100000.log");
        let second = tmp.path().join("2026-01-31T110000.log");
        append(&first, &line("ses_old", "replayed"));

        let watcher = LogWatcher::new(tmp.path());
        let rx = watcher.start();
        assert!(wait_until(|| watcher.current_file().as_deref() == Some(first.as_path())));
        append(&first, &line("ses_a", "build"));
        let event = rx.recv_timeout(WAIT).expect("event from first file");
        assert_eq!(event.session_id, "ses_a");

        // Created and written before the watcher notices it
        fs::write(&second, format!("{}{}", line("ses_b", "oracle"), line("ses_b", "explore"))).unwrap();
        let agents: Vec<String> = (0..2)
            .map(|_| rx.recv_timeout(WAIT).expect("event from second file").agent)
            .collect();
        assert_eq!(agents, vec!["oracle", "explore"]);

        watcher.stop();
        assert!(rx.iter().next().is_none());
    }

    #[test]
    fn lines_of_one_file_arrive_in_order() {
        const LINES: usize = 300;
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("2026-01-31T100000.log");

        let watcher = LogWatcher::new(tmp.path());
        let rx = watcher.start();
        for i in 0..LINES {
            append(&path, &format!("INFO 2026-01-31T10:05:40 +1ms service=llm seq={i}\n"));
        }

        let seqs: Vec<usize> = (0..LINES)
            .map(|_| {
                let event = rx.recv_timeout(WAIT).expect("numbered event");
                event.field("seq").unwrap().parse().unwrap()
            })
            .collect();
        assert_eq!(seqs, (0..LINES).collect::<Vec<_>>());
        watcher.stop();
    }

    #[test]
    fn stop_is_idempotent_and_closes_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let watcher = LogWatcher::new(tmp.path());
        let rx = watcher.start();
        watcher.stop();
        watcher.stop();
        watcher.stop();
        assert_eq!(rx.recv_timeout(WAIT), Err(RecvTimeoutError::Disconnected));
        assert_eq!(watcher.status(), WatcherStatus::Stopped);
    }

    #[test]
    fn concurrent_stops_do_not_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let watcher = Arc::new(LogWatcher::new(tmp.path()));
        let rx = watcher.start();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let watcher = watcher.clone();
                thread::spawn(move || watcher.stop())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(stop_within(&watcher, WAIT));
        assert_eq!(rx.recv_timeout(WAIT), Err(RecvTimeoutError::Disconnected));
        assert_eq!(watcher.status(), WatcherStatus::Stopped);
    }

    #[test]
    fn stop_unblocks_full_queue() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("busy.log");
        append(&path, "");

        let watcher = LogWatcher::new(tmp.path());
        let rx = watcher.start();
        assert!(wait_until(|| watcher.current_file().is_some()));

        let burst: String = (0..QUEUE_CAPACITY + 50).map(|_| line("s", "a")).collect();
        append(&path, &burst);
        // Nobody reads rx, so the follow thread ends up blocked on a full queue
        thread::sleep(Duration::from_millis(300));

        let watcher = Arc::new(watcher);
        assert!(stop_within(&watcher, WAIT));
        let drained = rx.iter().count();
        assert!(drained <= QUEUE_CAPACITY);
    }

    #[test]
    fn missing_directory_fails_without_events() {
        let tmp = tempfile::tempdir().unwrap();
        let watcher = LogWatcher::new(tmp.path().join("does-not-exist"));
        let rx = watcher.start();
        assert!(wait_until(|| matches!(watcher.status(), WatcherStatus::Failed(_))));
        watcher.stop();
        assert_eq!(watcher.status(), WatcherStatus::Stopped);
        assert_eq!(rx.recv_timeout(WAIT), Err(RecvTimeoutError::Disconnected));
    }

    #[test]
    fn stop_before_start_and_restart_are_harmless() {
        let tmp = tempfile::tempdir().unwrap();
        let watcher = LogWatcher::new(tmp.path());
        watcher.stop();
        assert_eq!(watcher.status(), WatcherStatus::Stopped);
        let rx = watcher.start();
        assert_eq!(rx.recv_timeout(WAIT), Err(RecvTimeoutError::Disconnected));
    }
}
