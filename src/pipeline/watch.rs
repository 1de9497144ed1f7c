//! Change watching and debounced regeneration.
//!
//! Native notifications and fixed-interval polling are only wake-up sources:
//! on every wake-up all targets are re-stated and the same [`ChangeDetector`]
//! decides over the same [`WatchState`]. Regeneration is awaited inline, so
//! at most one runs at a time and changes seen meanwhile are not queued.

use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::models::{Mtime, WatchConfig, WatchState, WatchStrategy};
use crate::pipeline::invalidate::CacheInvalidator;
use crate::pipeline::regenerate::Regenerate;
use crate::storage::LocalStorage;
use crate::utils::file_mtime;

/// Current mtime of a target, `None` when it does not exist.
pub type Observation = (PathBuf, Option<Mtime>);

/// What one observation tick concluded.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Nothing newer than what was recorded
    Clean,
    /// Targets changed inside the debounce window; recorded and swallowed
    Debounced(Vec<PathBuf>),
    /// Targets changed and a regeneration is due
    Regenerate(Vec<PathBuf>),
}

/// Leading-edge debounce over a [`WatchState`].
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    debounce: Duration,
    last_regenerated: Option<Instant>,
}

impl ChangeDetector {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_regenerated: None,
        }
    }

    /// Record the observations and decide whether to regenerate.
    ///
    /// Every newer mtime is recorded, even when the change is swallowed.
    pub fn observe(
        &self,
        state: &mut WatchState,
        observations: &[Observation],
        now: Instant,
    ) -> Decision {
        let changed: Vec<PathBuf> = observations
            .iter()
            .filter_map(|(path, mtime)| {
                let mtime = (*mtime)?;
                state.record(path, mtime).then(|| path.clone())
            })
            .collect();

        if changed.is_empty() {
            return Decision::Clean;
        }
        match self.last_regenerated {
            Some(last) if now.saturating_duration_since(last) < self.debounce => {
                Decision::Debounced(changed)
            }
            _ => Decision::Regenerate(changed),
        }
    }

    /// Mark a regeneration as finished, successful or not.
    pub fn completed(&mut self, now: Instant) {
        self.last_regenerated = Some(now);
    }
}

/// Counters over a watch session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchReport {
    pub ticks: usize,
    pub regenerations: usize,
    pub failures: usize,
    pub debounced: usize,
}

/// Stat every target.
pub async fn observe_targets(storage: &LocalStorage, targets: &[PathBuf]) -> Vec<Observation> {
    let mut observations = Vec::with_capacity(targets.len());
    for target in targets {
        let mtime = file_mtime(&storage.path(target)).await;
        observations.push((target.clone(), mtime));
    }
    observations
}

/// Watches the configured targets and triggers regenerations.
pub struct ChangeWatcher<'a> {
    storage: &'a LocalStorage,
    targets: Vec<PathBuf>,
    strategy: WatchStrategy,
    poll_interval: Duration,
    detector: ChangeDetector,
    regenerator: &'a dyn Regenerate,
    invalidator: Option<&'a CacheInvalidator>,
    report: WatchReport,
}

impl<'a> ChangeWatcher<'a> {
    pub fn new(
        storage: &'a LocalStorage,
        config: &WatchConfig,
        regenerator: &'a dyn Regenerate,
    ) -> Self {
        Self {
            storage,
            targets: config.targets.clone(),
            strategy: config.strategy,
            poll_interval: config.poll_interval(),
            detector: ChangeDetector::new(config.debounce()),
            regenerator,
            invalidator: None,
            report: WatchReport::default(),
        }
    }

    /// Invalidate the backend cache after each successful regeneration.
    pub fn with_invalidator(mut self, invalidator: &'a CacheInvalidator) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    pub fn with_strategy(mut self, strategy: WatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn report(&self) -> &WatchReport {
        &self.report
    }

    /// Starting state: a cache left by an unclean shutdown, or else the
    /// current mtimes so that startup does not regenerate.
    pub async fn initial_state(&self) -> Result<WatchState> {
        if let Some(state) = self.storage.load_watch_state().await? {
            log::warn!(
                "Found a watch cache from a previous run ({} entries), resuming from it",
                state.len()
            );
            return Ok(state);
        }

        let mut state = WatchState::new();
        for (path, mtime) in observe_targets(self.storage, &self.targets).await {
            match mtime {
                Some(mtime) => {
                    state.record(&path, mtime);
                }
                None => log::warn!("Watch target {} does not exist yet", path.display()),
            }
        }
        Ok(state)
    }

    /// Observe all targets once, regenerating if the detector says so.
    pub async fn tick(&mut self, state: &mut WatchState) -> Decision {
        self.report.ticks += 1;
        let observations = observe_targets(self.storage, &self.targets).await;
        let decision = self.detector.observe(state, &observations, Instant::now());
        if decision == Decision::Clean {
            return decision;
        }

        match &decision {
            Decision::Clean => {}
            Decision::Debounced(paths) => {
                self.report.debounced += 1;
                log::debug!("Change in {} within the debounce window", join(paths));
            }
            Decision::Regenerate(paths) => {
                log::info!("Change detected in {}", join(paths));
                let outcome = self.regenerator.run().await;
                self.detector.completed(Instant::now());
                outcome.log();

                self.report.regenerations += 1;
                if outcome.success {
                    if let Some(invalidator) = self.invalidator {
                        invalidator.invalidate().await.log(invalidator.url());
                    }
                } else {
                    self.report.failures += 1;
                }
            }
        }

        if let Err(e) = self.storage.save_watch_state(state).await {
            log::warn!("Failed to persist watch cache: {}", e);
        }
        decision
    }

    /// Watch until Ctrl-C.
    pub async fn run(self) -> Result<WatchReport> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Watch until `shutdown` resolves. An in-flight regeneration is
    /// abandoned and the watch cache is removed on the way out.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<WatchReport>
    where
        F: Future<Output = ()>,
    {
        let mut state = self.initial_state().await?;
        self.storage.save_watch_state(&state).await?;
        let mut wakeups = Wakeups::new(self.strategy, self.storage, &self.targets, self.poll_interval);

        log::info!(
            "Watching {} targets ({})",
            self.targets.len(),
            wakeups.describe()
        );
        for target in &self.targets {
            log::debug!("  {}", target.display());
        }

        tokio::pin!(shutdown);
        loop {
            let stopped = tokio::select! {
                _ = &mut shutdown => true,
                _ = async {
                    wakeups.next().await;
                    self.tick(&mut state).await
                } => false,
            };
            if stopped {
                break;
            }
        }

        log::info!(
            "Watcher stopped after {} regenerations ({} failed)",
            self.report.regenerations,
            self.report.failures
        );
        self.storage.remove_watch_state().await?;
        Ok(self.report)
    }
}

fn join(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Source of wake-ups for the watch loop.
enum Wakeups {
    Poll(tokio::time::Interval),
    #[cfg(feature = "native-watch")]
    Native(native::NativeEvents, Duration),
}

impl Wakeups {
    fn new(
        strategy: WatchStrategy,
        storage: &LocalStorage,
        targets: &[PathBuf],
        poll_interval: Duration,
    ) -> Self {
        match strategy {
            WatchStrategy::Poll => Self::poll(poll_interval),
            #[cfg(feature = "native-watch")]
            WatchStrategy::Native => match native::NativeEvents::new(storage, targets) {
                Ok(events) => Self::Native(events, poll_interval),
                Err(e) => {
                    log::warn!("Native file watching unavailable ({}), polling instead", e);
                    Self::poll(poll_interval)
                }
            },
            #[cfg(not(feature = "native-watch"))]
            WatchStrategy::Native => {
                let _ = (storage, targets);
                log::info!("Built without native file watching, polling instead");
                Self::poll(poll_interval)
            }
        }
    }

    fn poll(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Self::Poll(interval)
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Poll(_) => "polling",
            #[cfg(feature = "native-watch")]
            Self::Native(..) => "native notifications",
        }
    }

    async fn next(&mut self) {
        match self {
            Self::Poll(interval) => {
                interval.tick().await;
            }
            #[cfg(feature = "native-watch")]
            Self::Native(events, period) => {
                let period = *period;
                if events.next().await {
                    return;
                }
                log::warn!("Native watcher stopped, polling instead");
                *self = Self::poll(period);
            }
        }
    }
}

#[cfg(feature = "native-watch")]
mod native {
    use std::collections::BTreeSet;
    use std::path::{Path, PathBuf};

    use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
    use tokio::sync::mpsc;

    use crate::error::Result;
    use crate::storage::LocalStorage;

    /// Notifications for the directories holding the targets.
    ///
    /// A target directory that does not exist is covered by its nearest
    /// existing ancestor until it appears; the watch set is refreshed on
    /// every event.
    pub(super) struct NativeEvents {
        watcher: RecommendedWatcher,
        rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
        /// Directories holding the targets
        dirs: BTreeSet<PathBuf>,
        /// Directories currently watched
        attached: BTreeSet<PathBuf>,
    }

    impl NativeEvents {
        pub(super) fn new(storage: &LocalStorage, targets: &[PathBuf]) -> Result<Self> {
            let (tx, rx) = mpsc::unbounded_channel();
            let watcher = RecommendedWatcher::new(
                move |res: notify::Result<Event>| {
                    let _ = tx.send(res);
                },
                notify::Config::default(),
            )?;

            // Files are replaced by rename, so their directories are watched.
            let dirs = targets
                .iter()
                .filter_map(|t| storage.path(t).parent().map(PathBuf::from))
                .collect();

            let mut events = Self {
                watcher,
                rx,
                dirs,
                attached: BTreeSet::new(),
            };
            events.refresh()?;
            Ok(events)
        }

        /// Attach watches to the directories that should be watched now and
        /// drop the ones that no longer should.
        pub(super) fn refresh(&mut self) -> Result<()> {
            let wanted: BTreeSet<PathBuf> = self
                .dirs
                .iter()
                .filter_map(|dir| nearest_existing(dir))
                .collect();

            for stale in self.attached.difference(&wanted) {
                // Fails when the directory is already gone.
                let _ = self.watcher.unwatch(stale);
            }
            for dir in wanted.difference(&self.attached) {
                if !self.dirs.contains(dir) {
                    log::debug!("Watching {} until a target directory appears", dir.display());
                }
                self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
            }
            self.attached = wanted;
            Ok(())
        }

        /// Wait for the next relevant event. False once the channel closed.
        pub(super) async fn next(&mut self) -> bool {
            while let Some(res) = self.rx.recv().await {
                match res {
                    Ok(event) if matches!(event.kind, EventKind::Access(_)) => continue,
                    Ok(_) => {
                        if let Err(e) = self.refresh() {
                            log::warn!("Failed to update watched directories: {}", e);
                        }
                        return true;
                    }
                    Err(e) => log::warn!("File watcher error: {}", e),
                }
            }
            false
        }
    }

    fn nearest_existing(dir: &Path) -> Option<PathBuf> {
        dir.ancestors()
            .find(|candidate| !candidate.as_os_str().is_empty() && candidate.is_dir())
            .map(PathBuf::from)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use tempfile::TempDir;

        #[test]
        fn test_nearest_existing_walks_up() {
            let tmp = TempDir::new().unwrap();
            let missing = tmp.path().join("data/scores");
            assert_eq!(nearest_existing(&missing), Some(tmp.path().to_path_buf()));

            std::fs::create_dir_all(&missing).unwrap();
            assert_eq!(nearest_existing(&missing), Some(missing));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PathsConfig;
    use crate::pipeline::regenerate::RegenerationOutcome;
    use async_trait::async_trait;
    use std::fs::File;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::UNIX_EPOCH;
    use tempfile::TempDir;

    const TARGET: &str = "data/scores/all_apartments_scores.json";

    #[derive(Default)]
    struct CountingRegenerator {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingRegenerator {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Regenerate for CountingRegenerator {
        async fn run(&self) -> RegenerationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            RegenerationOutcome {
                success: !self.fail,
                exit_code: Some(if self.fail { 1 } else { 0 }),
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::from_millis(1),
                timed_out: false,
            }
        }
    }

    fn setup() -> (TempDir, LocalStorage) {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path(), &PathsConfig::default());
        std::fs::create_dir_all(storage.path("data/scores")).unwrap();
        std::fs::write(storage.path(TARGET), "[]").unwrap();
        (tmp, storage)
    }

    fn config(debounce_ms: u64, strategy: WatchStrategy) -> WatchConfig {
        WatchConfig {
            targets: vec![PathBuf::from(TARGET)],
            debounce_ms,
            poll_interval_ms: 50,
            strategy,
        }
    }

    /// Base for test mtimes, later than any file written by `setup`.
    const MTIME_BASE: u64 = 2_000_000_000;

    /// Set the target's mtime to a fixed offset from [`MTIME_BASE`].
    fn set_mtime(storage: &LocalStorage, secs: u64) {
        let file = File::options()
            .write(true)
            .open(storage.path(TARGET))
            .unwrap();
        file.set_modified(UNIX_EPOCH + Duration::from_secs(MTIME_BASE + secs))
            .unwrap();
    }

    fn obs(path: &str, mtime: Option<Mtime>) -> Observation {
        (PathBuf::from(path), mtime)
    }

    #[test]
    fn test_detector_leading_edge_debounce() {
        let mut detector = ChangeDetector::new(Duration::from_secs(2));
        let mut state = WatchState::new();
        let t0 = Instant::now();

        assert_eq!(
            detector.observe(&mut state, &[obs("a", Some(1.0))], t0),
            Decision::Regenerate(vec![PathBuf::from("a")])
        );
        detector.completed(t0);

        assert_eq!(
            detector.observe(&mut state, &[obs("a", Some(2.0))], t0 + Duration::from_millis(500)),
            Decision::Debounced(vec![PathBuf::from("a")])
        );
        // The swallowed change was recorded and does not fire later.
        assert_eq!(
            detector.observe(&mut state, &[obs("a", Some(2.0))], t0 + Duration::from_secs(3)),
            Decision::Clean
        );
        assert_eq!(
            detector.observe(&mut state, &[obs("a", Some(3.0))], t0 + Duration::from_secs(3)),
            Decision::Regenerate(vec![PathBuf::from("a")])
        );
    }

    #[test]
    fn test_detector_ignores_missing_and_older() {
        let detector = ChangeDetector::new(Duration::ZERO);
        let mut state = WatchState::new();
        state.record(Path::new("a"), 5.0);
        let now = Instant::now();

        assert_eq!(
            detector.observe(&mut state, &[obs("a", Some(4.0)), obs("b", None)], now),
            Decision::Clean
        );
        assert_eq!(
            detector.observe(&mut state, &[obs("b", Some(1.0))], now),
            Decision::Regenerate(vec![PathBuf::from("b")])
        );
    }

    #[tokio::test]
    async fn test_touches_within_window_fire_once() {
        let (_tmp, storage) = setup();
        let regen = CountingRegenerator::default();
        let mut watcher = ChangeWatcher::new(&storage, &config(300, WatchStrategy::Poll), &regen);
        let mut state = watcher.initial_state().await.unwrap();

        assert_eq!(watcher.tick(&mut state).await, Decision::Clean);

        set_mtime(&storage, 1);
        assert!(matches!(watcher.tick(&mut state).await, Decision::Regenerate(_)));
        set_mtime(&storage, 2);
        assert!(matches!(watcher.tick(&mut state).await, Decision::Debounced(_)));
        assert_eq!(regen.calls(), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(watcher.tick(&mut state).await, Decision::Clean);
        set_mtime(&storage, 3);
        assert!(matches!(watcher.tick(&mut state).await, Decision::Regenerate(_)));
        assert_eq!(regen.calls(), 2);

        let report = watcher.report();
        assert_eq!(report.regenerations, 2);
        assert_eq!(report.debounced, 1);
        assert_eq!(report.failures, 0);
    }

    #[tokio::test]
    async fn test_failed_regeneration_keeps_watching() {
        let (_tmp, storage) = setup();
        let regen = CountingRegenerator {
            fail: true,
            ..Default::default()
        };
        let mut watcher = ChangeWatcher::new(&storage, &config(0, WatchStrategy::Poll), &regen);
        let mut state = watcher.initial_state().await.unwrap();

        set_mtime(&storage, 1);
        watcher.tick(&mut state).await;
        set_mtime(&storage, 2);
        watcher.tick(&mut state).await;

        assert_eq!(regen.calls(), 2);
        assert_eq!(watcher.report().failures, 2);
    }

    #[tokio::test]
    async fn test_leftover_cache_is_resumed() {
        let (_tmp, storage) = setup();
        set_mtime(&storage, 10);
        let mut stale = WatchState::new();
        stale.record(Path::new(TARGET), (MTIME_BASE + 5) as Mtime);
        storage.save_watch_state(&stale).await.unwrap();

        let regen = CountingRegenerator::default();
        let mut watcher = ChangeWatcher::new(&storage, &config(0, WatchStrategy::Poll), &regen);
        let mut state = watcher.initial_state().await.unwrap();
        assert!(matches!(watcher.tick(&mut state).await, Decision::Regenerate(_)));

        let persisted = storage.load_watch_state().await.unwrap().unwrap();
        assert_eq!(
            persisted.target(Path::new(TARGET)),
            crate::models::TargetState::Seen((MTIME_BASE + 10) as Mtime)
        );
    }

    #[tokio::test]
    async fn test_fresh_start_does_not_regenerate() {
        let (_tmp, storage) = setup();
        let regen = CountingRegenerator::default();
        let mut watcher = ChangeWatcher::new(&storage, &config(0, WatchStrategy::Poll), &regen);
        let mut state = watcher.initial_state().await.unwrap();

        assert_eq!(watcher.tick(&mut state).await, Decision::Clean);
        assert_eq!(regen.calls(), 0);
    }

    /// Keep bumping the target until the watcher regenerates, then stop it.
    ///
    /// With `fresh_root` the target directory only appears once the watcher
    /// is running.
    async fn drive(strategy: WatchStrategy, fresh_root: bool) -> (WatchReport, bool) {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path(), &PathsConfig::default());
        if !fresh_root {
            std::fs::create_dir_all(storage.path("data/scores")).unwrap();
            std::fs::write(storage.path(TARGET), "[]").unwrap();
        }
        let regen = CountingRegenerator::default();
        let watcher = ChangeWatcher::new(&storage, &config(0, strategy), &regen);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let driver = async {
            if fresh_root {
                tokio::time::sleep(Duration::from_millis(200)).await;
                std::fs::create_dir_all(storage.path("data/scores")).unwrap();
                tokio::time::sleep(Duration::from_millis(200)).await;
                std::fs::write(storage.path(TARGET), "[]").unwrap();
            }
            let deadline = Instant::now() + Duration::from_secs(10);
            let mut secs = 100;
            while regen.calls() == 0 && Instant::now() < deadline {
                secs += 1;
                set_mtime(&storage, secs);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            let _ = stop_tx.send(());
        };
        let shutdown = async {
            let _ = stop_rx.await;
        };

        let (report, ()) = tokio::join!(watcher.run_until(shutdown), driver);
        let cache_left = storage.watch_cache_path().exists();
        (report.unwrap(), cache_left)
    }

    #[tokio::test]
    async fn test_poll_loop_regenerates_and_cleans_up() {
        let (report, cache_left) = drive(WatchStrategy::Poll, false).await;
        assert!(report.regenerations >= 1);
        assert!(!cache_left);
    }

    #[tokio::test]
    async fn test_native_loop_regenerates_and_cleans_up() {
        let (report, cache_left) = drive(WatchStrategy::Native, false).await;
        assert!(report.regenerations >= 1);
        assert!(!cache_left);
    }

    #[tokio::test]
    async fn test_target_directory_created_after_start() {
        for strategy in [WatchStrategy::Poll, WatchStrategy::Native] {
            let (report, cache_left) = drive(strategy, true).await;
            assert_eq!(report.regenerations, 1, "{strategy:?}");
            assert!(!cache_left);
        }
    }
}
