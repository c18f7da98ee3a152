//! Single-flight scan coordinator.
//!
//! At most one logical scan is current. Starting a scan while another runs
//! cancels the older one's token, closes its progress stream, and makes sure
//! its caller gets [`ScanOutcome::Cancelled`] even if its walk happens to
//! finish afterwards. Walks run inside a coordinator-owned rayon pool, so the
//! fan-out of all scans together is bounded by `scanner.parallelism`.
//!
//! While a scan runs, a `dsc-progress` ticker thread samples the shared
//! [`ProgressCounter`] every `progress_interval` and pushes a [`ScanProgress`]
//! to each subscriber.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::core::config::ScannerConfig;
use crate::core::errors::{DscError, Result};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::scanner::cancel::CancelToken;
use crate::scanner::model::{ScanProgress, ScanResult};
use crate::scanner::progress::ProgressCounter;
use crate::scanner::walker::{Heartbeat, RecursiveWalker, WalkOutput, WalkerConfig};

/// Per-subscriber buffer. A subscriber that falls this far behind misses
/// snapshots rather than slowing the ticker.
const SUBSCRIBER_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Scanning,
    Completed,
    Cancelled,
    Failed,
}

/// What a scan request produced. Cancellation is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed(ScanResult),
    /// Served from the result cache; `scan_duration` is zero.
    Cached(ScanResult),
    Cancelled,
}

impl ScanOutcome {
    #[must_use]
    pub const fn result(&self) -> Option<&ScanResult> {
        match self {
            Self::Completed(result) | Self::Cached(result) => Some(result),
            Self::Cancelled => None,
        }
    }

    #[must_use]
    pub fn into_result(self) -> Option<ScanResult> {
        match self {
            Self::Completed(result) | Self::Cached(result) => Some(result),
            Self::Cancelled => None,
        }
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    #[must_use]
    pub const fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

/// Stream of progress snapshots for one scan.
///
/// Attaches to the scan running when it was created, or to the next one if
/// the coordinator is idle. Iteration ends when that scan finishes, is
/// cancelled, or is superseded.
#[derive(Debug)]
pub struct ProgressSubscription {
    rx: Receiver<ScanProgress>,
}

impl ProgressSubscription {
    /// Wait up to `timeout` for the next snapshot.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ScanProgress> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_next(&self) -> Option<ScanProgress> {
        self.rx.try_recv().ok()
    }

    /// Iterate snapshots, stopping at the end of the scan or after `timeout`
    /// passes with nothing new.
    pub fn iter_timeout(&self, timeout: Duration) -> impl Iterator<Item = ScanProgress> + '_ {
        std::iter::from_fn(move || self.recv_timeout(timeout))
    }
}

/// Blocks until the attached scan publishes or ends. A subscription taken
/// while idle waits for the next scan, so callers that may never start one
/// should use [`ProgressSubscription::iter_timeout`].
impl Iterator for ProgressSubscription {
    type Item = ScanProgress;

    fn next(&mut self) -> Option<ScanProgress> {
        self.rx.recv().ok()
    }
}

struct ActiveScan {
    generation: u64,
    root: PathBuf,
    token: CancelToken,
}

struct Shared {
    generation: u64,
    phase: ScanPhase,
    last_finished: Option<ScanPhase>,
    active: Option<ActiveScan>,
    subscribers: Vec<Sender<ScanProgress>>,
    latest: Option<ScanProgress>,
}

impl Shared {
    /// Drop every subscriber (ending their iterators) and the last snapshot.
    fn close_stream(&mut self) {
        self.subscribers.clear();
        self.latest = None;
    }

    fn publish(&mut self, generation: u64, progress: ScanProgress) {
        let live = self
            .active
            .as_ref()
            .is_some_and(|a| a.generation == generation && !a.token.is_cancelled());
        if !live {
            return;
        }
        self.subscribers.retain(|tx| {
            !matches!(
                tx.try_send(progress.clone()),
                Err(TrySendError::Disconnected(_))
            )
        });
        self.latest = Some(progress);
    }
}

pub struct ScanCoordinator {
    config: ScannerConfig,
    pool: rayon::ThreadPool,
    logger: ActivityLoggerHandle,
    shared: Arc<Mutex<Shared>>,
    heartbeat: Option<Heartbeat>,
}

impl ScanCoordinator {
    pub fn new(config: ScannerConfig, logger: ActivityLoggerHandle) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallelism.max(1))
            .thread_name(|i| format!("dsc-walk-{i}"))
            .build()
            .map_err(|e| DscError::Runtime {
                details: format!("failed to build scan thread pool: {e}"),
            })?;
        Ok(Self {
            config,
            pool,
            logger,
            shared: Arc::new(Mutex::new(Shared {
                generation: 0,
                phase: ScanPhase::Idle,
                last_finished: None,
                active: None,
                subscribers: Vec::new(),
                latest: None,
            })),
            heartbeat: None,
        })
    }

    /// Set a callback the walker runs once per directory entered.
    #[must_use]
    pub fn with_heartbeat<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.heartbeat = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Walk `root` and return its aggregate.
    ///
    /// Blocks the calling thread until the walk is done. Returns
    /// `ScanOutcome::Cancelled` if the scan was cancelled or superseded, and
    /// `DscError::ScanFailed` if `root` cannot be read at all.
    pub fn scan(&self, root: &Path) -> Result<ScanOutcome> {
        self.run(root, CancelToken::new())
    }

    /// Like [`Self::scan`], but the scan cancels itself once `deadline` passes.
    pub fn scan_with_deadline(&self, root: &Path, deadline: Instant) -> Result<ScanOutcome> {
        self.run(root, CancelToken::with_deadline(deadline))
    }

    /// Sum leaf sizes under `root` on the scan pool.
    ///
    /// Independent of the current scan: it neither supersedes it nor
    /// publishes progress. Node-level errors are skipped as in a scan.
    pub fn calculate_size(&self, root: &Path) -> Result<u64> {
        check_root(root)?;
        let walker = RecursiveWalker::new(WalkerConfig::from(&self.config), self.logger.clone());
        let token = CancelToken::new();
        self.pool
            .install(|| walker.measure(root, 0, &token))
            .ok_or_else(|| DscError::ScanFailed {
                path: root.to_path_buf(),
                details: "root could not be measured".to_string(),
            })
    }

    /// Cancel whatever scan is current. No-op when idle.
    pub fn cancel_current_scan(&self) {
        let mut shared = self.shared.lock();
        if let Some(active) = &shared.active {
            active.token.cancel();
            shared.close_stream();
        }
    }

    /// Subscribe to progress of the current (or next) scan.
    #[must_use]
    pub fn subscribe(&self) -> ProgressSubscription {
        let (tx, rx) = bounded(SUBSCRIBER_BUFFER);
        self.shared.lock().subscribers.push(tx);
        ProgressSubscription { rx }
    }

    /// Most recent snapshot of the current scan; `None` while idle.
    #[must_use]
    pub fn current_progress(&self) -> Option<ScanProgress> {
        self.shared.lock().latest.clone()
    }

    #[must_use]
    pub fn phase(&self) -> ScanPhase {
        self.shared.lock().phase
    }

    /// Terminal phase of the most recently finished current scan.
    #[must_use]
    pub fn last_finished(&self) -> Option<ScanPhase> {
        self.shared.lock().last_finished
    }

    /// Number of scans started so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    fn run(&self, root: &Path, token: CancelToken) -> Result<ScanOutcome> {
        let generation = self.begin(root, &token);

        if let Err(err) = check_root(root) {
            self.finish(generation, ScanPhase::Failed);
            self.logger.send(ActivityEvent::ScanFailed {
                path: root.to_path_buf(),
                code: err.code().to_string(),
                message: err.to_string(),
            });
            return Err(err);
        }

        let counter = Arc::new(ProgressCounter::new());
        let started = Instant::now();
        let started_at = Utc::now();
        let ticker = match self.spawn_ticker(generation, root, &counter, started, started_at) {
            Ok(ticker) => ticker,
            Err(err) => {
                self.finish(generation, ScanPhase::Failed);
                return Err(err);
            }
        };

        let walker = RecursiveWalker::new(WalkerConfig::from(&self.config), self.logger.clone())
            .with_heartbeat(self.heartbeat.clone());
        let output = self.pool.install(|| walker.walk(root, 0, &counter, &token));

        ticker.stop();

        if walk_cancelled(output.is_some(), &token) {
            self.finish(generation, ScanPhase::Cancelled);
            self.logger.send(ActivityEvent::ScanCancelled {
                path: root.to_path_buf(),
            });
            return Ok(ScanOutcome::Cancelled);
        }

        let Some(output) = output else {
            self.finish(generation, ScanPhase::Failed);
            let err = DscError::ScanFailed {
                path: root.to_path_buf(),
                details: "root could not be walked".to_string(),
            };
            self.logger.send(ActivityEvent::ScanFailed {
                path: root.to_path_buf(),
                code: err.code().to_string(),
                message: err.to_string(),
            });
            return Err(err);
        };

        let result = build_result(output, &counter, started.elapsed(), Utc::now());
        if !self.finish(generation, ScanPhase::Completed) {
            // Superseded after the walk finished: the newer caller owns the stream.
            return Ok(ScanOutcome::Cancelled);
        }

        self.logger.send(ActivityEvent::ScanCompleted {
            path: root.to_path_buf(),
            files: result.total_files,
            bytes: result.total_size,
            large_files: result.large_files.len(),
            skipped: walker.skipped_nodes(),
            duration: result.scan_duration,
        });
        Ok(ScanOutcome::Completed(result))
    }

    /// Make a new scan current, superseding any running one.
    fn begin(&self, root: &Path, token: &CancelToken) -> u64 {
        let mut shared = self.shared.lock();
        if let Some(previous) = shared.active.take() {
            previous.token.cancel();
            self.logger.send(ActivityEvent::ScanSuperseded {
                path: previous.root,
                generation: previous.generation,
            });
            shared.last_finished = Some(ScanPhase::Cancelled);
            shared.close_stream();
        }
        shared.generation += 1;
        let generation = shared.generation;
        shared.active = Some(ActiveScan {
            generation,
            root: root.to_path_buf(),
            token: token.clone(),
        });
        shared.phase = ScanPhase::Scanning;
        drop(shared);

        self.logger.send(ActivityEvent::ScanStarted {
            path: root.to_path_buf(),
            generation,
        });
        generation
    }

    /// Return to idle if `generation` is still current. Returns whether it was.
    fn finish(&self, generation: u64, terminal: ScanPhase) -> bool {
        let mut shared = self.shared.lock();
        let current = shared
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation);
        if current {
            shared.active = None;
            shared.phase = ScanPhase::Idle;
            shared.last_finished = Some(terminal);
            shared.close_stream();
        }
        current
    }

    fn spawn_ticker(
        &self,
        generation: u64,
        root: &Path,
        counter: &Arc<ProgressCounter>,
        started: Instant,
        started_at: DateTime<Utc>,
    ) -> Result<Ticker> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let counter = Arc::clone(counter);
        let root = root.to_path_buf();
        let interval = self.config.progress_interval();

        let join = thread::Builder::new()
            .name("dsc-progress".to_string())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                    let snap = counter.snapshot();
                    let progress = ScanProgress {
                        current_path: counter.current_path().unwrap_or_else(|| root.clone()),
                        path: root.clone(),
                        scanned_files: snap.files,
                        scanned_directories: snap.directories,
                        scanned_bytes: snap.bytes,
                        start_time: started_at,
                        elapsed: started.elapsed(),
                    };
                    shared.lock().publish(generation, progress);
                }
            })
            .map_err(|e| DscError::Runtime {
                details: format!("failed to spawn progress ticker: {e}"),
            })?;
        Ok(Ticker { stop_tx, join })
    }
}

struct Ticker {
    stop_tx: Sender<()>,
    join: thread::JoinHandle<()>,
}

impl Ticker {
    fn stop(self) {
        drop(self.stop_tx);
        if self.join.join().is_err() {
            eprintln!("[DSC-SCAN] progress ticker panicked");
        }
    }
}

/// A walk that returned a tree checked the token after its last child
/// joined, so only an explicit cancel (or supersede) can still void it. A
/// deadline that lapses after that point does not.
fn walk_cancelled(walked: bool, token: &CancelToken) -> bool {
    if walked {
        token.cancel_requested()
    } else {
        token.is_cancelled()
    }
}

/// Root-level failures are fatal to the scan; everything below is per-node.
fn check_root(root: &Path) -> Result<()> {
    let meta = fs::metadata(root).map_err(|source| DscError::ScanFailed {
        path: root.to_path_buf(),
        details: DscError::from_io(root, source).to_string(),
    })?;
    if meta.is_dir() {
        fs::read_dir(root).map_err(|source| DscError::ScanFailed {
            path: root.to_path_buf(),
            details: DscError::from_io(root, source).to_string(),
        })?;
    }
    Ok(())
}

fn build_result(
    output: WalkOutput,
    counter: &ProgressCounter,
    scan_duration: Duration,
    scanned_at: DateTime<Utc>,
) -> ScanResult {
    let snap = counter.snapshot();
    let WalkOutput { entry, large_files } = output;
    let entries = if entry.is_directory {
        entry.children.unwrap_or_default()
    } else {
        vec![entry]
    };
    ScanResult {
        entries,
        large_files: large_files.into_sorted_vec(),
        total_size: snap.bytes,
        total_files: snap.files,
        scan_duration,
        scanned_at,
    }
}
