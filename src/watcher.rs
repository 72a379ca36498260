// ============================================================================
// watcher.rs — Source file watches and change → conversion dispatch
// ============================================================================
//
// One `notify` watcher observes the parent directory of every source file
// (non-recursive, one watch per directory). Raw events are forwarded over a
// channel to a single worker thread which:
//   1. keeps only create / data-modify / rename-to events on known sources,
//   2. coalesces bursts per source until it has been quiet for `debounce`,
//   3. skips sources whose content hash did not change,
//   4. converts and reports the new icon through the `on_update` callback.
//
// A failed conversion is reported and the worker keeps running.
// ============================================================================

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::Config;
use crate::convert::Converter;
use crate::digest::{file_digest, SourceDigests};
use crate::error::{Result, TrayIconsError};
use crate::report;

// ---------------------------------------------------------------------------
// Path normalisation
// ---------------------------------------------------------------------------

/// `\\?\C:\x` → `C:\x`. UNC verbatim paths are left alone.
fn strip_verbatim(p: PathBuf) -> PathBuf {
    let stripped = {
        let s = p.to_string_lossy();
        if s.starts_with(r"\\?\") && !s.starts_with(r"\\?\UNC\") {
            Some(PathBuf::from(&s[4..]))
        } else {
            None
        }
    };
    stripped.unwrap_or(p)
}

fn fold_case(p: PathBuf) -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(p.to_string_lossy().to_lowercase())
    } else {
        p
    }
}

fn absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    joined
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Canonical directory of `path`, falling back to a lexical absolute path
/// when the directory does not exist yet.
pub fn canonical_dir(dir: &Path) -> PathBuf {
    let abs = absolute(dir);
    strip_verbatim(fs::canonicalize(&abs).unwrap_or(abs))
}

/// Key under which a source is looked up: canonical parent + file name,
/// case-folded on Windows. The file itself need not exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let abs = absolute(path);
    let resolved = match (abs.parent(), abs.file_name()) {
        (Some(parent), Some(name)) => canonical_dir(parent).join(name),
        _ => abs,
    };
    fold_case(resolved)
}

// ---------------------------------------------------------------------------
// Dispatch table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub src: PathBuf,
    pub dst: PathBuf,
}

#[derive(Debug, Default, Clone)]
pub struct WatchTable {
    targets: HashMap<PathBuf, WatchTarget>,
    /// case-folded dir → dir as handed to the OS watcher
    dirs: BTreeMap<PathBuf, PathBuf>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `src → dst`. Returns the directory to watch if it is new.
    pub fn insert(&mut self, src: &Path, dst: &Path) -> Option<PathBuf> {
        self.targets.insert(
            normalize_path(src),
            WatchTarget {
                src: src.to_path_buf(),
                dst: dst.to_path_buf(),
            },
        );

        let dir = canonical_dir(src.parent().unwrap_or_else(|| Path::new(".")));
        let key = fold_case(dir.clone());
        if self.dirs.contains_key(&key) {
            return None;
        }
        self.dirs.insert(key, dir.clone());
        Some(dir)
    }

    pub fn lookup(&self, path: &Path) -> Option<&WatchTarget> {
        self.targets.get(&normalize_path(path))
    }

    pub fn dirs(&self) -> impl Iterator<Item = &PathBuf> {
        self.dirs.values()
    }

    pub fn targets(&self) -> impl Iterator<Item = &WatchTarget> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Paths in `event` that may carry new source content.
pub fn relevant_paths(event: &Event) -> Vec<&Path> {
    let paths: Vec<&Path> = match &event.kind {
        EventKind::Create(_)
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Other)
        | EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            event.paths.iter().map(|p| p.as_path()).collect()
        }
        // [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().map(|p| vec![p.as_path()]).unwrap_or_default()
        }
        _ => Vec::new(),
    };
    paths.into_iter().filter(|p| !p.is_dir()).collect()
}

// ---------------------------------------------------------------------------
// Debounce queue
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PendingQueue {
    window: Duration,
    due: HashMap<PathBuf, Instant>,
}

impl PendingQueue {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            due: HashMap::new(),
        }
    }

    /// (Re)schedules `key`; a repeated push moves the deadline back.
    pub fn push(&mut self, key: PathBuf, now: Instant) {
        self.due.insert(key, now + self.window);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.due.values().min().copied()
    }

    pub fn take_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready: Vec<PathBuf> = self
            .due
            .iter()
            .filter(|(_, due)| **due <= now)
            .map(|(k, _)| k.clone())
            .collect();
        ready.sort();
        for k in &ready {
            self.due.remove(k);
        }
        ready
    }

    pub fn is_empty(&self) -> bool {
        self.due.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconUpdate {
    pub src: PathBuf,
    pub dst: PathBuf,
}

#[derive(Debug)]
pub enum WatchMessage {
    Fs(Event),
    /// Reconvert every source regardless of content hash.
    RegenerateAll,
    Stop,
}

struct Worker<F> {
    table: WatchTable,
    converter: Converter,
    digests: SourceDigests,
    queue: PendingQueue,
    on_update: F,
}

impl<F: Fn(IconUpdate)> Worker<F> {
    fn run(mut self, rx: Receiver<WatchMessage>) {
        loop {
            let msg = match self.queue.next_deadline() {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline <= now {
                        Err(RecvTimeoutError::Timeout)
                    } else {
                        rx.recv_timeout(deadline - now)
                    }
                }
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match msg {
                Ok(WatchMessage::Fs(event)) => self.on_event(&event),
                Ok(WatchMessage::RegenerateAll) => self.regenerate_all(),
                Ok(WatchMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            for src in self.queue.take_ready(Instant::now()) {
                if let Some(target) = self.table.lookup(&src).cloned() {
                    self.process(&target, false);
                }
            }
        }
        report::detail("Watcher worker stopped");
    }

    fn on_event(&mut self, event: &Event) {
        for path in relevant_paths(event) {
            if let Some(target) = self.table.lookup(path) {
                report::watch(format!("Detected change in: {}", path.display()));
                self.queue.push(target.src.clone(), Instant::now());
            }
        }
    }

    fn regenerate_all(&mut self) {
        let mut targets: Vec<WatchTarget> = self.table.targets().cloned().collect();
        targets.sort_by(|a, b| a.src.cmp(&b.src));
        for target in &targets {
            self.process(target, true);
        }
    }

    fn process(&mut self, target: &WatchTarget, force: bool) {
        let digest = match file_digest(&target.src) {
            Ok(d) => d,
            Err(e) => {
                // typically a save in progress; the next event retries
                report::warn(format!("Cannot read {}: {}", target.src.display(), e));
                return;
            }
        };

        if !force && target.dst.exists() && !self.digests.is_changed(&target.src, &digest) {
            report::detail(format!("{} unchanged, skipping", target.src.display()));
            return;
        }

        match self.converter.convert(&target.src, &target.dst) {
            Ok(result) => {
                self.digests.record(&target.src, digest);
                report::converted(format!(
                    "{} → {} ({:?})",
                    target.src.display(),
                    target.dst.display(),
                    result.frames
                ));
                (self.on_update)(IconUpdate {
                    src: target.src.clone(),
                    dst: target.dst.clone(),
                });
            }
            Err(e) => report::error(format!("Conversion of {} failed: {}", target.src.display(), e)),
        }
    }
}

/// Spawns the dispatch thread. Existing destinations have their source
/// digests primed so a touch without content change does not reconvert.
pub fn spawn_worker<F>(
    table: WatchTable,
    converter: Converter,
    debounce: Duration,
    rx: Receiver<WatchMessage>,
    on_update: F,
) -> JoinHandle<()>
where
    F: Fn(IconUpdate) + Send + 'static,
{
    let mut digests = SourceDigests::new();
    for target in table.targets() {
        if target.dst.exists() {
            if let Ok(d) = file_digest(&target.src) {
                digests.record(&target.src, d);
            }
        }
    }

    let worker = Worker {
        table,
        converter,
        digests,
        queue: PendingQueue::new(debounce),
        on_update,
    };
    thread::spawn(move || worker.run(rx))
}

// ---------------------------------------------------------------------------
// Public watcher API
// ---------------------------------------------------------------------------

pub struct SourceWatcher {
    table: WatchTable,
    converter: Converter,
    debounce: Duration,
}

impl SourceWatcher {
    pub fn new(converter: Converter, debounce: Duration) -> Self {
        Self {
            table: WatchTable::new(),
            converter,
            debounce,
        }
    }

    /// Registers every icon of `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut watcher = Self::new(Converter::from_config(config), config.debounce);
        for icon in &config.icons {
            watcher.add_watch(&icon.src, &icon.dst)?;
        }
        Ok(watcher)
    }

    /// Adds a source to watch; the destination directory is created now.
    pub fn add_watch(&mut self, src: &Path, dst: &Path) -> Result<()> {
        if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TrayIconsError::io(parent, e))?;
        }
        if let Some(dir) = self.table.insert(src, dst) {
            report::watch(format!("Watching directory '{}' for Krita file changes...", dir.display()));
        }
        Ok(())
    }

    pub fn table(&self) -> &WatchTable {
        &self.table
    }

    /// Starts the OS watcher and the dispatch thread.
    pub fn start<F>(self, on_update: F) -> Result<WatchHandle>
    where
        F: Fn(IconUpdate) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let event_tx = tx.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = event_tx.send(WatchMessage::Fs(event));
                }
                Err(e) => report::error(format!("Watch error: {}", e)),
            },
            notify::Config::default(),
        )?;

        for dir in self.table.dirs() {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }

        let worker = spawn_worker(self.table, self.converter, self.debounce, rx, on_update);
        Ok(WatchHandle {
            tx,
            worker: Some(worker),
            watcher: Some(watcher),
        })
    }
}

pub struct WatchHandle {
    tx: Sender<WatchMessage>,
    worker: Option<JoinHandle<()>>,
    watcher: Option<RecommendedWatcher>,
}

impl WatchHandle {
    pub fn regenerate_all(&self) {
        let _ = self.tx.send(WatchMessage::RegenerateAll);
    }

    /// Stops the OS watcher, then the worker, and waits for it.
    pub fn stop(mut self) {
        self.watcher.take();
        let _ = self.tx.send(WatchMessage::Stop);
        self.join_worker();
    }

    /// Blocks until the worker exits (i.e. forever unless stopped).
    pub fn join(mut self) {
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                report::error("Watcher worker panicked");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.watcher.take();
        let _ = self.tx.send(WatchMessage::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConverterKind;
    use crate::convert::tests::{png_bytes, write_kra};
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    fn modify(path: &Path) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path(path.to_path_buf())
    }

    #[test]
    fn test_one_watch_per_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = WatchTable::new();
        assert!(table.insert(&dir.path().join("a.kra"), Path::new("a.ico")).is_some());
        assert!(table.insert(&dir.path().join("b.kra"), Path::new("b.ico")).is_none());
        assert_eq!(table.len(), 2);
        assert_eq!(table.dirs().count(), 1);
    }

    #[test]
    fn test_lookup_normalizes_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = WatchTable::new();
        table.insert(&dir.path().join("a.kra"), Path::new("out/a.ico"));

        let odd = dir.path().join(".").join("a.kra");
        let target = table.lookup(&odd).unwrap();
        assert_eq!(target.dst, PathBuf::from("out/a.ico"));
        assert!(table.lookup(&dir.path().join("other.kra")).is_none());
    }

    #[test]
    fn test_relevant_paths_filters_kinds() {
        let p = PathBuf::from("/no/such/dir/a.kra");
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(p.clone());
        assert_eq!(relevant_paths(&create), vec![p.as_path()]);
        assert_eq!(relevant_paths(&modify(&p)).len(), 1);

        let meta = Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime))).add_path(p.clone());
        assert!(relevant_paths(&meta).is_empty());

        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path(p.clone());
        assert!(relevant_paths(&remove).is_empty());

        let from = PathBuf::from("/no/such/dir/a.kra~");
        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(from)
            .add_path(p.clone());
        assert_eq!(relevant_paths(&rename), vec![p.as_path()]);

        let rename_from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From))).add_path(p.clone());
        assert!(relevant_paths(&rename_from).is_empty());
    }

    #[test]
    fn test_pending_queue_coalesces() {
        let mut q = PendingQueue::new(Duration::from_millis(100));
        let t0 = Instant::now();
        q.push(PathBuf::from("a"), t0);
        q.push(PathBuf::from("a"), t0 + Duration::from_millis(50));
        q.push(PathBuf::from("b"), t0 + Duration::from_millis(10));

        assert_eq!(q.next_deadline(), Some(t0 + Duration::from_millis(110)));
        assert!(q.take_ready(t0 + Duration::from_millis(100)).is_empty());
        assert_eq!(q.take_ready(t0 + Duration::from_millis(120)), vec![PathBuf::from("b")]);
        assert_eq!(q.take_ready(t0 + Duration::from_millis(150)), vec![PathBuf::from("a")]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_worker_converts_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("art.kra");
        let dst = dir.path().join("icons/art.ico");
        write_kra(&src, Some(&png_bytes(32, 32)));

        let mut table = WatchTable::new();
        table.insert(&src, &dst);
        let converter = Converter::new(ConverterKind::Archive, vec![16, 32]);

        let (tx, rx) = mpsc::channel();
        let (update_tx, update_rx) = mpsc::channel();
        let worker = spawn_worker(table, converter, Duration::from_millis(10), rx, move |u| {
            let _ = update_tx.send(u);
        });

        // unrelated file in the same directory is ignored
        tx.send(WatchMessage::Fs(modify(&dir.path().join("notes.txt")))).unwrap();
        tx.send(WatchMessage::Fs(modify(&src))).unwrap();
        tx.send(WatchMessage::Fs(modify(&src))).unwrap();

        let update = update_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(update, IconUpdate { src: src.clone(), dst: dst.clone() });
        assert!(dst.is_file());

        // same bytes again: skipped
        tx.send(WatchMessage::Fs(modify(&src))).unwrap();
        assert!(update_rx.recv_timeout(Duration::from_millis(300)).is_err());

        // forced regeneration ignores the hash
        tx.send(WatchMessage::RegenerateAll).unwrap();
        assert!(update_rx.recv_timeout(Duration::from_secs(10)).is_ok());

        tx.send(WatchMessage::Stop).unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_worker_survives_bad_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("broken.kra");
        std::fs::write(&src, b"not a zip").unwrap();

        let mut table = WatchTable::new();
        table.insert(&src, &dir.path().join("broken.ico"));

        let (tx, rx) = mpsc::channel();
        let (update_tx, update_rx) = mpsc::channel();
        let worker = spawn_worker(table, Converter::default(), Duration::from_millis(5), rx, move |u| {
            let _ = update_tx.send(u);
        });

        tx.send(WatchMessage::Fs(modify(&src))).unwrap();
        assert!(update_rx.recv_timeout(Duration::from_millis(300)).is_err());

        // still alive: fixing the file produces an update
        write_kra(&src, Some(&png_bytes(16, 16)));
        tx.send(WatchMessage::Fs(modify(&src))).unwrap();
        assert!(update_rx.recv_timeout(Duration::from_secs(10)).is_ok());

        drop(tx);
        worker.join().unwrap();
    }

    #[test]
    fn test_add_watch_creates_destination_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = SourceWatcher::new(Converter::default(), Duration::from_millis(10));
        let dst = dir.path().join("deep/nested/a.ico");
        watcher.add_watch(&dir.path().join("a.kra"), &dst).unwrap();
        assert!(dst.parent().unwrap().is_dir());
        assert_eq!(watcher.table().len(), 1);
    }

    #[test]
    fn test_start_converts_saved_source_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("art.kra");
        let dst = dir.path().join("icons/art.ico");

        let mut watcher = SourceWatcher::new(Converter::new(ConverterKind::Archive, vec![16, 32]), Duration::from_millis(50));
        watcher.add_watch(&src, &dst).unwrap();

        let (update_tx, update_rx) = mpsc::channel();
        let handle = watcher
            .start(move |u| {
                let _ = update_tx.send(u);
            })
            .unwrap();

        write_kra(&src, Some(&png_bytes(32, 32)));
        let update = update_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(update.dst, dst);
        assert!(dst.is_file());

        // stop joins the worker, which drops the callback
        handle.stop();
        loop {
            match update_rx.recv_timeout(Duration::from_secs(10)) {
                Ok(_) => continue,
                Err(e) => {
                    assert_eq!(e, RecvTimeoutError::Disconnected);
                    break;
                }
            }
        }
    }

    #[test]
    fn test_dropping_handle_stops_worker() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = SourceWatcher::new(Converter::default(), Duration::from_millis(10));
        watcher.add_watch(&dir.path().join("a.kra"), &dir.path().join("a.ico")).unwrap();

        let (update_tx, update_rx) = mpsc::channel::<IconUpdate>();
        let handle = watcher
            .start(move |u| {
                let _ = update_tx.send(u);
            })
            .unwrap();
        drop(handle);

        assert_eq!(
            update_rx.recv_timeout(Duration::from_secs(10)).unwrap_err(),
            RecvTimeoutError::Disconnected
        );
    }
}
