//! Package scanner
//!
//! Maintains the set of folders believed to be packages and reports changes
//! as [`ScanEvent`]s. Roots flagged `watch` are observed with `notify`;
//! bursts of updates for one package are coalesced into a single
//! [`ScanEvent::Updated`].

pub mod coalesce;
pub mod discovery;

pub use coalesce::UpdateCoalescer;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{HostConfig, RootFolder};
use crate::events::Publisher;
use crate::Result;

/// Package-level change reported by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Added(PathBuf),
    Updated(PathBuf),
    Removed(PathBuf),
}

impl ScanEvent {
    /// Package path the event refers to
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Added(path) | Self::Updated(path) | Self::Removed(path) => path,
        }
    }
}

/// Scanner settings
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub roots: Vec<RootFolder>,
    pub manifest_file: String,
    pub namespace: String,
    /// Quiet period, also used as the tick interval
    pub update_delay: Duration,
}

impl From<&HostConfig> for ScannerConfig {
    fn from(config: &HostConfig) -> Self {
        Self {
            roots: config.roots.clone(),
            manifest_file: config.manifest_file.clone(),
            namespace: config.namespace.clone(),
            update_delay: config.update_delay,
        }
    }
}

#[derive(Debug, Clone)]
struct WatchedRoot {
    path: PathBuf,
    is_package: bool,
}

struct ScannerInner {
    config: ScannerConfig,
    events: Arc<Publisher<ScanEvent>>,
    known: Mutex<HashSet<PathBuf>>,
    coalescer: Mutex<UpdateCoalescer>,
    watched: Mutex<Vec<WatchedRoot>>,
}

/// Filesystem discovery and watch component
pub struct Scanner {
    inner: Arc<ScannerInner>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scanner {
    /// Create a scanner; nothing happens until [`Scanner::start`]
    #[must_use]
    pub fn new(config: ScannerConfig) -> Self {
        let delay = config.update_delay;
        Self {
            inner: Arc::new(ScannerInner {
                config,
                events: Arc::new(Publisher::new()),
                known: Mutex::new(HashSet::new()),
                coalescer: Mutex::new(UpdateCoalescer::new(delay)),
                watched: Mutex::new(Vec::new()),
            }),
            watcher: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Scanner events; shared so packages can subscribe to their updates
    #[must_use]
    pub fn events(&self) -> &Arc<Publisher<ScanEvent>> {
        &self.inner.events
    }

    /// Snapshot of the known package paths
    #[must_use]
    pub fn known_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = lock(&self.inner.known).iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Run the initial scan, then start watching roots flagged `watch`
    ///
    /// # Errors
    ///
    /// Returns error if the file watcher cannot be created or attached
    pub async fn start(&self) -> Result<()> {
        self.inner.initial_scan().await;

        let watched = lock(&self.inner.watched).clone();
        if watched.is_empty() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => tracing::warn!(error = %e, "file watcher error"),
            },
            Config::default(),
        )?;

        for root in &watched {
            watcher.watch(&root.path, RecursiveMode::Recursive)?;
            tracing::info!(path = %root.path.display(), "watching plugin root");
        }
        *lock(&self.watcher) = Some(watcher);

        let mut tasks = lock(&self.tasks);
        tasks.push(tokio::spawn(Arc::clone(&self.inner).process_fs_events(rx)));
        tasks.push(Arc::clone(&self.inner).spawn_ticker());
        Ok(())
    }

    /// Stop watching and drop background tasks
    pub fn stop(&self) {
        lock(&self.watcher).take();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        tracing::info!("scanner stopped");
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("roots", &self.inner.config.roots)
            .field("known", &lock(&self.inner.known).len())
            .finish_non_exhaustive()
    }
}

impl ScannerInner {
    async fn classify(&self, dir: &Path) -> bool {
        discovery::is_package(dir, &self.config.manifest_file, &self.config.namespace).await
    }

    async fn initial_scan(&self) {
        for root in &self.config.roots {
            if !root.path.is_dir() {
                tracing::debug!(path = %root.path.display(), "plugin root does not exist, skipping");
                continue;
            }

            let root_is_package = self.classify(&root.path).await;
            let candidates = if root_is_package {
                vec![root.path.clone()]
            } else {
                discovery::candidate_dirs(&root.path).await
            };

            for candidate in candidates {
                if (root_is_package || self.classify(&candidate).await)
                    && lock(&self.known).insert(candidate.clone())
                {
                    tracing::debug!(path = %candidate.display(), "discovered package");
                    self.events.emit(&ScanEvent::Added(candidate));
                }
            }

            if root.watch {
                lock(&self.watched).push(WatchedRoot {
                    path: root.path.clone(),
                    is_package: root_is_package,
                });
            }
        }
    }

    async fn process_fs_events(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = rx.recv().await {
            if matches!(event.kind, EventKind::Access(_)) {
                continue;
            }
            for path in event.paths {
                self.handle_change(&path).await;
            }
        }
    }

    /// Re-classify the package a changed path belongs to
    async fn handle_change(&self, changed: &Path) {
        let watched = lock(&self.watched).clone();
        let Some(candidate) = watched
            .iter()
            .find_map(|root| discovery::candidate_for(&root.path, changed, root.is_package))
        else {
            return;
        };

        let is_package = self.classify(&candidate).await;
        let was_known = lock(&self.known).contains(&candidate);

        match (was_known, is_package) {
            (false, true) => {
                lock(&self.known).insert(candidate.clone());
                tracing::info!(path = %candidate.display(), "package added");
                self.events.emit(&ScanEvent::Added(candidate));
            }
            (true, true) => {
                tracing::trace!(path = %candidate.display(), changed = %changed.display(), "package changed");
                lock(&self.coalescer).touch(candidate, Instant::now());
            }
            (true, false) => {
                lock(&self.known).remove(&candidate);
                lock(&self.coalescer).cancel(&candidate);
                tracing::info!(path = %candidate.display(), "package removed");
                self.events.emit(&ScanEvent::Removed(candidate));
            }
            (false, false) => {}
        }
    }

    /// Emit `Updated` for every path whose quiet period has passed
    fn flush_due(&self, now: Instant) -> usize {
        let due = lock(&self.coalescer).take_due(now);
        let mut emitted = 0;
        for path in due {
            if lock(&self.known).contains(&path) {
                self.events.emit(&ScanEvent::Updated(path));
                emitted += 1;
            }
        }
        emitted
    }

    fn spawn_ticker(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.update_delay.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.flush_due(Instant::now());
            }
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_package(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("package.json"), r#"{"omni": {"plugins": []}}"#).unwrap();
    }

    fn scanner(roots: Vec<RootFolder>, delay: Duration) -> Scanner {
        Scanner::new(ScannerConfig {
            roots,
            manifest_file: "package.json".to_string(),
            namespace: "omni".to_string(),
            update_delay: delay,
        })
    }

    fn record(scanner: &Scanner) -> Arc<Mutex<Vec<ScanEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        scanner.events().subscribe(move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        seen
    }

    #[tokio::test]
    async fn initial_scan_of_parent_root() {
        let dir = tempfile::tempdir().unwrap();
        write_package(&dir.path().join("one"));
        write_package(&dir.path().join("two"));
        std::fs::create_dir(dir.path().join("plain")).unwrap();

        let scanner = scanner(vec![RootFolder::new(dir.path(), false)], Duration::from_secs(2));
        let seen = record(&scanner);
        scanner.start().await.unwrap();

        assert_eq!(
            scanner.known_paths(),
            vec![dir.path().join("one"), dir.path().join("two")]
        );
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn root_that_is_a_package() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path());
        write_package(&dir.path().join("nested"));

        let scanner = scanner(vec![RootFolder::new(dir.path(), false)], Duration::from_secs(2));
        let seen = record(&scanner);
        scanner.start().await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ScanEvent::Added(dir.path().to_path_buf())]
        );
    }

    #[tokio::test]
    async fn changes_add_update_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = scanner(vec![RootFolder::new(dir.path(), true)], Duration::from_secs(60));
        let seen = record(&scanner);
        scanner.inner.initial_scan().await;

        let pkg = dir.path().join("late");
        write_package(&pkg);
        scanner.inner.handle_change(&pkg.join("package.json")).await;
        assert_eq!(*seen.lock().unwrap(), vec![ScanEvent::Added(pkg.clone())]);

        scanner.inner.handle_change(&pkg.join("data.json")).await;
        assert_eq!(lock(&scanner.inner.coalescer).pending(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);

        std::fs::remove_file(pkg.join("package.json")).unwrap();
        scanner.inner.handle_change(&pkg.join("package.json")).await;
        assert_eq!(seen.lock().unwrap()[1], ScanEvent::Removed(pkg));
        assert_eq!(lock(&scanner.inner.coalescer).pending(), 0);
    }

    #[tokio::test]
    async fn ignored_paths_do_not_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("pkg");
        write_package(&pkg);

        let scanner = scanner(vec![RootFolder::new(dir.path(), true)], Duration::from_secs(60));
        scanner.inner.initial_scan().await;

        scanner.inner.handle_change(&pkg.join("node_modules/x.js")).await;
        scanner.inner.handle_change(&pkg.join(".git/index")).await;
        assert_eq!(lock(&scanner.inner.coalescer).pending(), 0);
    }

    #[tokio::test]
    async fn burst_of_updates_emits_once() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("pkg");
        write_package(&pkg);

        let delay = Duration::from_millis(50);
        let scanner = scanner(vec![RootFolder::new(dir.path(), true)], delay);
        scanner.inner.initial_scan().await;
        let seen = record(&scanner);

        for _ in 0..5 {
            scanner.inner.handle_change(&pkg.join("package.json")).await;
        }
        assert_eq!(scanner.inner.flush_due(Instant::now()), 0);

        let ticker = Arc::clone(&scanner.inner).spawn_ticker();
        tokio::time::sleep(delay * 6).await;
        ticker.abort();

        assert_eq!(*seen.lock().unwrap(), vec![ScanEvent::Updated(pkg)]);
    }
}
