//! Depth-bounded parallel directory walker.
//!
//! Each call handles one node and returns it by value, so the tree is built
//! bottom-up with no shared mutable structure. Directories shallower than
//! `max_parallel_depth` walk their children as rayon tasks and join them all
//! before aggregating; deeper directories walk children inline on the same
//! worker, which caps the number of in-flight sub-walks on wide, deep trees.
//!
//! Safety invariants:
//! - The cancel token is checked at the top of every node, and again after
//!   the children join, so a cancelled walk never returns a partial tree
//! - Node-level errors (permission, missing entry, IO) skip only that node
//! - Packages are leaves; their contents are never descended into
//! - Symlinks are skipped unless `follow_symlinks` is set; when they are
//!   followed, each directory (by device and inode) is entered at most once
//!   per walker, which breaks cycles

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::core::config::ScannerConfig;
use crate::core::errors::{DscError, Result};
use crate::core::paths;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::scanner::cancel::CancelToken;
use crate::scanner::model::{DirectoryEntry, LargeFileEntry};
use crate::scanner::probe::{PathProbe, ProbeInfo};
use crate::scanner::progress::ProgressCounter;
use crate::scanner::top_k::TopKTracker;

/// Walker configuration derived from [`ScannerConfig`].
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub max_parallel_depth: usize,
    /// Leaves strictly larger than this become large-file candidates.
    pub large_file_threshold: u64,
    pub top_k: usize,
    pub skip_hidden: bool,
    pub follow_symlinks: bool,
    pub package_extensions: Vec<String>,
}

impl From<&ScannerConfig> for WalkerConfig {
    fn from(cfg: &ScannerConfig) -> Self {
        Self {
            max_parallel_depth: cfg.max_parallel_depth,
            large_file_threshold: cfg.large_file_threshold_bytes,
            top_k: cfg.top_k,
            skip_hidden: cfg.skip_hidden,
            follow_symlinks: cfg.follow_symlinks,
            package_extensions: cfg.package_extensions.clone(),
        }
    }
}

/// Callback invoked by walker workers once per directory entered.
pub type Heartbeat = Arc<dyn Fn() + Send + Sync>;

/// One walked subtree: its entry plus the largest files found inside it.
#[derive(Debug, Clone)]
pub struct WalkOutput {
    pub entry: DirectoryEntry,
    pub large_files: TopKTracker,
}

pub struct RecursiveWalker {
    config: WalkerConfig,
    probe: PathProbe,
    logger: ActivityLoggerHandle,
    skipped: AtomicU64,
    heartbeat: Option<Heartbeat>,
    /// Directories already entered; only consulted when following symlinks.
    visited: Mutex<HashSet<(u64, u64)>>,
}

impl RecursiveWalker {
    pub fn new(config: WalkerConfig, logger: ActivityLoggerHandle) -> Self {
        let probe = PathProbe::new(config.follow_symlinks, &config.package_extensions);
        Self {
            config,
            probe,
            logger,
            skipped: AtomicU64::new(0),
            heartbeat: None,
            visited: Mutex::new(HashSet::new()),
        }
    }

    /// Set a callback run on the worker thread each time a directory is entered.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Option<Heartbeat>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &WalkerConfig {
        &self.config
    }

    /// Nodes skipped because of probe or listing errors so far.
    #[must_use]
    pub fn skipped_nodes(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Walk `path`, which sits `depth` levels below the scan root.
    ///
    /// Returns `None` when the walk was cancelled or the node was skipped.
    /// Parallel children run on whatever rayon pool the caller is installed
    /// in.
    pub fn walk(
        &self,
        path: &Path,
        depth: usize,
        counter: &ProgressCounter,
        cancel: &CancelToken,
    ) -> Option<WalkOutput> {
        if cancel.is_cancelled() {
            return None;
        }

        let info = match self.probe.probe(path) {
            Ok(info) => info,
            Err(err) => {
                self.skip(path, &err);
                return None;
            }
        };
        if info.is_symlink {
            return None;
        }

        if info.is_leaf() {
            counter.increment(info.size);
            let mut large_files = TopKTracker::new(self.config.top_k);
            if info.size > self.config.large_file_threshold {
                large_files.insert(LargeFileEntry::new(path, info.size, info.modified));
            }
            return Some(WalkOutput {
                entry: DirectoryEntry::leaf(path, info.size, info.accessed, info.modified),
                large_files,
            });
        }

        if !self.first_visit(&info) {
            return None;
        }
        counter.enter_directory(path);
        if let Some(beat) = &self.heartbeat {
            beat();
        }
        let children = match self.list_children(path) {
            Ok(children) => children,
            Err(err) => {
                self.skip(path, &err);
                return None;
            }
        };

        let walk_child = |child: &PathBuf| self.walk(child, depth + 1, counter, cancel);
        let outputs: Vec<WalkOutput> = if depth < self.config.max_parallel_depth {
            children.par_iter().filter_map(walk_child).collect()
        } else {
            children.iter().filter_map(walk_child).collect()
        };

        // Children that saw the flag returned None; the aggregate would be short.
        if cancel.is_cancelled() {
            return None;
        }

        let mut large_files = TopKTracker::new(self.config.top_k);
        let mut entries = Vec::with_capacity(outputs.len());
        for output in outputs {
            large_files.merge(output.large_files);
            entries.push(output.entry);
        }

        Some(WalkOutput {
            entry: DirectoryEntry::directory(path, entries, info.accessed, info.modified),
            large_files,
        })
    }

    /// Total bytes under `path` using the same skip rules as [`Self::walk`],
    /// without building a tree. `None` if cancelled or `path` is unreadable.
    pub fn measure(&self, path: &Path, depth: usize, cancel: &CancelToken) -> Option<u64> {
        if cancel.is_cancelled() {
            return None;
        }
        let info = match self.probe.probe(path) {
            Ok(info) => info,
            Err(err) => {
                self.skip(path, &err);
                return None;
            }
        };
        if info.is_symlink {
            return Some(0);
        }
        if info.is_leaf() {
            return Some(info.size);
        }
        if !self.first_visit(&info) {
            return Some(0);
        }

        let children = match self.list_children(path) {
            Ok(children) => children,
            Err(err) => {
                self.skip(path, &err);
                return None;
            }
        };
        let measure_child =
            |child: &PathBuf| self.measure(child, depth + 1, cancel).unwrap_or_default();
        let total: u64 = if depth < self.config.max_parallel_depth {
            children.par_iter().map(measure_child).sum()
        } else {
            children.iter().map(measure_child).sum()
        };
        (!cancel.is_cancelled()).then_some(total)
    }

    fn list_children(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(dir).map_err(|source| DscError::from_io(dir, source))?;
        let mut children = Vec::new();
        for entry in entries {
            let Ok(entry) = entry else {
                continue;
            };
            if self.config.skip_hidden && paths::is_hidden(&entry.file_name()) {
                continue;
            }
            children.push(entry.path());
        }
        Ok(children)
    }

    /// False when a followed link leads back into a directory already seen.
    fn first_visit(&self, info: &ProbeInfo) -> bool {
        if !self.config.follow_symlinks {
            return true;
        }
        info.identity.is_none_or(|identity| self.visited.lock().insert(identity))
    }

    fn skip(&self, path: &Path, err: &DscError) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.logger.send(ActivityEvent::NodeSkipped {
            path: path.to_path_buf(),
            code: err.code().to_string(),
        });
    }
}
