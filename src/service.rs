//! In-process entry point for presentation layers.
//!
//! [`DiskScanService`] owns one [`ScanCoordinator`] and (when enabled) one
//! [`ResultCache`]. Callers construct it explicitly and pass it to whatever
//! needs it; there is no process-wide instance.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;

use crate::cache::store::ResultCache;
use crate::core::config::Config;
use crate::core::errors::{DscError, Result};
use crate::core::paths;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::platform::volume::{self, VolumeUsage};
use crate::scanner::coordinator::{ProgressSubscription, ScanCoordinator, ScanOutcome};
use crate::scanner::model::ScanProgress;

pub struct DiskScanService {
    config: Config,
    coordinator: ScanCoordinator,
    cache: Option<ResultCache>,
    logger: ActivityLoggerHandle,
    pending_saves: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl DiskScanService {
    pub fn new(config: Config, logger: ActivityLoggerHandle) -> Result<Self> {
        let coordinator = ScanCoordinator::new(config.scanner.clone(), logger.clone())?;
        Ok(Self::with_coordinator(config, coordinator, logger))
    }

    /// Build around a preconfigured coordinator (e.g. one with a heartbeat).
    #[must_use]
    pub fn with_coordinator(
        config: Config,
        coordinator: ScanCoordinator,
        logger: ActivityLoggerHandle,
    ) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| ResultCache::from_config(&config.cache, logger.clone()));
        logger.send(ActivityEvent::ServiceStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: config
                .stable_hash()
                .unwrap_or_else(|_| "unavailable".to_string()),
        });
        Self {
            config,
            coordinator,
            cache,
            logger,
            pending_saves: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn coordinator(&self) -> &ScanCoordinator {
        &self.coordinator
    }

    /// `None` when caching is disabled.
    #[must_use]
    pub const fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    /// Scan `root`, serving a fresh cached result unless `force_refresh`.
    ///
    /// A completed walk is written back to the cache in the background; the
    /// result is returned without waiting for that write.
    pub fn scan(&self, root: &Path, force_refresh: bool) -> Result<ScanOutcome> {
        self.scan_inner(root, force_refresh, None)
    }

    /// [`Self::scan`] that cancels itself once `deadline` passes.
    pub fn scan_with_deadline(
        &self,
        root: &Path,
        force_refresh: bool,
        deadline: Instant,
    ) -> Result<ScanOutcome> {
        self.scan_inner(root, force_refresh, Some(deadline))
    }

    /// Progress of the current scan, or of the next one if idle.
    ///
    /// Plain iteration blocks until that scan ends; an idle caller with no
    /// scan coming should read it with `iter_timeout`.
    #[must_use]
    pub fn progress_stream(&self) -> ProgressSubscription {
        self.coordinator.subscribe()
    }

    #[must_use]
    pub fn current_progress(&self) -> Option<ScanProgress> {
        self.coordinator.current_progress()
    }

    pub fn cancel_current_scan(&self) {
        self.coordinator.cancel_current_scan();
    }

    /// Total bytes under `path` without building a tree or touching the cache.
    pub fn calculate_size(&self, path: &Path) -> Result<u64> {
        let root = paths::resolve_scan_root(path);
        self.coordinator.calculate_size(&root)
    }

    /// Remove a file or a whole directory tree. OS errors are returned as-is.
    pub fn delete_path(&self, path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path).map_err(|source| DscError::from_io(path, source))?;
        let removed = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        removed.map_err(|source| DscError::from_io(path, source))
    }

    pub fn volume_usage(&self, path: &Path) -> Result<VolumeUsage> {
        volume::volume_usage(path)
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.wait_for_pending_saves();
        self.cache.as_ref().map_or(Ok(()), ResultCache::clear)
    }

    /// Block until every background cache write has finished.
    pub fn wait_for_pending_saves(&self) {
        let pending = std::mem::take(&mut *self.pending_saves.lock());
        for handle in pending {
            if handle.join().is_err() {
                eprintln!("[DSC-CACHE] cache writer panicked");
            }
        }
    }

    fn scan_inner(
        &self,
        root: &Path,
        force_refresh: bool,
        deadline: Option<Instant>,
    ) -> Result<ScanOutcome> {
        let root: PathBuf = paths::resolve_scan_root(root);

        if !force_refresh
            && let Some(cache) = &self.cache
            && let Some(cached) = cache.load(&root)
        {
            return Ok(ScanOutcome::Cached(cached));
        }

        let outcome = match deadline {
            Some(deadline) => self.coordinator.scan_with_deadline(&root, deadline)?,
            None => self.coordinator.scan(&root)?,
        };

        if let (ScanOutcome::Completed(result), Some(cache)) = (&outcome, &self.cache) {
            match cache.save(result, &root) {
                Ok(handle) => {
                    let mut pending = self.pending_saves.lock();
                    pending.retain(|h| !h.is_finished());
                    pending.push(handle);
                }
                Err(err) => self.logger.send(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                }),
            }
        }
        Ok(outcome)
    }
}

impl Drop for DiskScanService {
    fn drop(&mut self) {
        self.wait_for_pending_saves();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn service(cache_dir: &Path) -> DiskScanService {
        let mut config = Config::default();
        config.scanner.parallelism = 2;
        config.cache.dir = cache_dir.to_path_buf();
        DiskScanService::new(config, ActivityLoggerHandle::noop()).unwrap()
    }

    fn sparse(path: &Path, len: u64) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        File::create(path).unwrap().set_len(len).unwrap();
    }

    #[test]
    fn second_scan_is_served_from_cache() {
        let tree = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        sparse(&tree.path().join("a"), 100);
        let svc = service(cache_dir.path());

        let first = svc.scan(tree.path(), false).unwrap();
        assert!(matches!(first, ScanOutcome::Completed(_)));
        svc.wait_for_pending_saves();

        let second = svc.scan(tree.path(), false).unwrap();
        assert!(second.is_cached());
        let cached = second.result().unwrap();
        assert_eq!(cached.total_size, 100);
        assert_eq!(cached.scan_duration, std::time::Duration::ZERO);

        let forced = svc.scan(tree.path(), true).unwrap();
        assert!(matches!(forced, ScanOutcome::Completed(_)));
    }

    #[test]
    fn disabled_cache_always_walks() {
        let tree = TempDir::new().unwrap();
        sparse(&tree.path().join("a"), 1);
        let mut config = Config::default();
        config.cache.enabled = false;
        let svc = DiskScanService::new(config, ActivityLoggerHandle::noop()).unwrap();
        assert!(svc.cache().is_none());
        for _ in 0..2 {
            assert!(matches!(
                svc.scan(tree.path(), false).unwrap(),
                ScanOutcome::Completed(_)
            ));
        }
        svc.clear_cache().unwrap();
    }

    #[test]
    fn relative_and_absolute_roots_share_a_record() {
        let tree = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        sparse(&tree.path().join("sub/f"), 10);
        let svc = service(cache_dir.path());

        svc.scan(&tree.path().join("sub"), true).unwrap();
        svc.wait_for_pending_saves();
        let dotted = tree.path().join("sub").join(".").join("..").join("sub");
        assert!(svc.scan(&dotted, false).unwrap().is_cached());
    }

    #[test]
    fn calculate_size_skips_hidden_and_counts_packages() {
        let tree = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        sparse(&tree.path().join("x/y"), 40);
        sparse(&tree.path().join(".dot"), 1000);
        sparse(&tree.path().join("Tool.app/Contents/bin"), 2);
        let svc = service(cache_dir.path());
        assert_eq!(svc.calculate_size(tree.path()).unwrap(), 42);
        assert!(matches!(
            svc.calculate_size(&tree.path().join("missing")),
            Err(DscError::ScanFailed { .. })
        ));
    }

    #[test]
    fn delete_path_handles_files_dirs_and_missing() {
        let tree = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let svc = service(cache_dir.path());
        sparse(&tree.path().join("f"), 1);
        sparse(&tree.path().join("d/e/g"), 1);

        svc.delete_path(&tree.path().join("f")).unwrap();
        svc.delete_path(&tree.path().join("d")).unwrap();
        assert!(!tree.path().join("f").exists());
        assert!(!tree.path().join("d").exists());

        let err = svc.delete_path(&tree.path().join("f")).unwrap_err();
        assert!(matches!(err, DscError::NotFound { .. }));
    }

    #[test]
    fn clear_cache_drops_records() {
        let tree = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        sparse(&tree.path().join("a"), 5);
        let svc = service(&cache_dir.path().join("store"));
        svc.scan(tree.path(), true).unwrap();
        svc.clear_cache().unwrap();
        assert!(!svc.scan(tree.path(), false).unwrap().is_cached());
    }
}
