//! Thread-safe running totals shared by every walker branch of one scan.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Files and bytes move together under one lock so a snapshot never pairs a
/// file count with bytes from a different moment.
#[derive(Debug, Default)]
struct Totals {
    files: u64,
    bytes: u64,
}

/// Point-in-time view of a [`ProgressCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub files: u64,
    pub bytes: u64,
    pub directories: u64,
}

/// Accumulates scanned files/bytes from many concurrent walker branches.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    totals: Mutex<Totals>,
    directories: AtomicU64,
    current_dir: Mutex<Option<PathBuf>>,
}

impl ProgressCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one file (or package) of `bytes` size.
    pub fn increment(&self, bytes: u64) {
        let mut totals = self.totals.lock();
        totals.files += 1;
        totals.bytes = totals.bytes.saturating_add(bytes);
    }

    /// Record that the walk entered `dir`. Directories carry no bytes.
    pub fn enter_directory(&self, dir: &Path) {
        self.directories.fetch_add(1, Ordering::Relaxed);
        *self.current_dir.lock() = Some(dir.to_path_buf());
    }

    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        let (files, bytes) = {
            let totals = self.totals.lock();
            (totals.files, totals.bytes)
        };
        CounterSnapshot {
            files,
            bytes,
            directories: self.directories.load(Ordering::Relaxed),
        }
    }

    /// Most recently entered directory, if any.
    #[must_use]
    pub fn current_path(&self) -> Option<PathBuf> {
        self.current_dir.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_increments_are_exact() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 5_000;

        let counter = Arc::new(ProgressCounter::new());
        thread::scope(|scope| {
            for _ in 0..THREADS {
                let counter = Arc::clone(&counter);
                scope.spawn(move || {
                    for _ in 0..PER_THREAD {
                        counter.increment(1);
                    }
                });
            }
        });

        let snap = counter.snapshot();
        assert_eq!(snap.files, THREADS * PER_THREAD);
        assert_eq!(snap.bytes, THREADS * PER_THREAD);
    }

    #[test]
    fn snapshots_are_monotonic_while_writers_run() {
        let counter = Arc::new(ProgressCounter::new());
        let writer = {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for i in 0..20_000 {
                    counter.increment(i % 7);
                }
            })
        };

        let mut last = CounterSnapshot::default();
        while !writer.is_finished() {
            let snap = counter.snapshot();
            assert!(snap.files >= last.files);
            assert!(snap.bytes >= last.bytes);
            last = snap;
        }
        writer.join().unwrap();
        assert_eq!(counter.snapshot().files, 20_000);
    }

    #[test]
    fn directories_tracked_separately_from_files() {
        let counter = ProgressCounter::new();
        assert_eq!(counter.current_path(), None);
        counter.enter_directory(Path::new("/a"));
        counter.enter_directory(Path::new("/a/b"));
        counter.increment(10);

        let snap = counter.snapshot();
        assert_eq!(snap.directories, 2);
        assert_eq!(snap.files, 1);
        assert_eq!(snap.bytes, 10);
        assert_eq!(counter.current_path(), Some(PathBuf::from("/a/b")));
    }
}
