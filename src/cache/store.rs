//! Path-keyed, TTL-bounded store of finished scan results.
//!
//! One JSON file per scanned root. The file name is the URL-safe base64 of
//! the root's path string plus `.json`, so it is reversible and never
//! contains a path separator. Roots whose encoded name would not fit in one
//! path component are stored under `~<fnv64>.json` instead; those records
//! are identified by the `path` field they carry. Writes go to a uniquely named temp file in the
//! same directory and are renamed into place, so concurrent saves of
//! different roots (or the same root) never leave a torn record.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::config::{CacheConfig, fnv1a};
use crate::core::errors::{DscError, Result};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::scanner::model::{DirectoryEntry, LargeFileEntry, ScanResult};

const RECORD_EXTENSION: &str = "json";

/// NAME_MAX on the filesystems we target.
const MAX_FILE_NAME: usize = 255;

/// Leads hashed record names. Not in the URL-safe base64 alphabet.
const HASHED_PREFIX: char = '~';

/// Persisted form of one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub path: PathBuf,
    pub entries: Vec<DirectoryEntry>,
    pub large_files: Vec<LargeFileEntry>,
    pub total_size: u64,
    pub total_files: u64,
    pub timestamp: DateTime<Utc>,
}

impl CacheRecord {
    #[must_use]
    pub fn from_result(path: &Path, result: &ScanResult, timestamp: DateTime<Utc>) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: result.entries.clone(),
            large_files: result.large_files.clone(),
            total_size: result.total_size,
            total_files: result.total_files,
            timestamp,
        }
    }

    /// Strictly older than `ttl` at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age = now.signed_duration_since(self.timestamp);
        age.to_std().is_ok_and(|age| age > ttl)
    }

    /// Rebuild a result. Cached results carry no scan duration.
    #[must_use]
    pub fn into_result(self) -> ScanResult {
        ScanResult {
            entries: self.entries,
            large_files: self.large_files,
            total_size: self.total_size,
            total_files: self.total_files,
            scan_duration: Duration::ZERO,
            scanned_at: self.timestamp,
        }
    }
}

/// File-name key for a scanned root.
#[must_use]
pub fn encode_key(path: &Path) -> String {
    URL_SAFE_NO_PAD.encode(path.to_string_lossy().as_bytes())
}

/// Inverse of [`encode_key`]; `None` for names this cache did not write.
#[must_use]
pub fn decode_key(key: &str) -> Option<PathBuf> {
    let bytes = URL_SAFE_NO_PAD.decode(key).ok()?;
    String::from_utf8(bytes).ok().map(PathBuf::from)
}

fn record_file_name(path: &Path) -> String {
    let name = format!("{}.{RECORD_EXTENSION}", encode_key(path));
    if name.len() <= MAX_FILE_NAME {
        return name;
    }
    let hash = fnv1a(path.to_string_lossy().as_bytes());
    format!("{HASHED_PREFIX}{hash:016x}.{RECORD_EXTENSION}")
}

/// Root named inside a hashed record; `None` if it cannot be read.
fn stored_root(record_path: &Path) -> Option<PathBuf> {
    #[derive(Deserialize)]
    struct RootOnly {
        path: PathBuf,
    }
    let raw = fs::read(record_path).ok()?;
    serde_json::from_slice::<RootOnly>(&raw).ok().map(|r| r.path)
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
    ttl: Duration,
    logger: ActivityLoggerHandle,
}

impl ResultCache {
    #[must_use]
    pub fn new(dir: PathBuf, ttl: Duration, logger: ActivityLoggerHandle) -> Self {
        Self { dir, ttl, logger }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig, logger: ActivityLoggerHandle) -> Self {
        Self::new(config.dir.clone(), config.ttl(), logger)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Where the record for `path` lives.
    #[must_use]
    pub fn record_path(&self, path: &Path) -> PathBuf {
        self.dir.join(record_file_name(path))
    }

    /// Persist `result` for `path` on a background thread.
    ///
    /// The snapshot is taken before this returns; the write itself never
    /// delays the caller. Failures are reported to the activity log.
    pub fn save(&self, result: &ScanResult, path: &Path) -> Result<thread::JoinHandle<()>> {
        let record = CacheRecord::from_result(path, result, result.scanned_at);
        let cache = self.clone();
        thread::Builder::new()
            .name("dsc-cache-save".to_string())
            .spawn(move || {
                if let Err(err) = cache.save_blocking(&record) {
                    cache.logger.send(ActivityEvent::Error {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                }
            })
            .map_err(|e| DscError::Runtime {
                details: format!("failed to spawn cache writer: {e}"),
            })
    }

    /// Write `record` atomically. Returns the number of bytes stored.
    pub fn save_blocking(&self, record: &CacheRecord) -> Result<u64> {
        fs::create_dir_all(&self.dir).map_err(|source| DscError::io(&self.dir, source))?;
        let data = serde_json::to_vec(record)?;

        let final_path = self.record_path(&record.path);
        let tmp_path = self.dir.join(format!(".{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp_path, &data).map_err(|source| DscError::io(&tmp_path, source))?;
        if let Err(source) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(DscError::io(&final_path, source));
        }

        let bytes = data.len() as u64;
        self.logger.send(ActivityEvent::CacheSaved {
            path: record.path.clone(),
            bytes,
        });
        Ok(bytes)
    }

    /// Fresh cached result for `path`, if any.
    #[must_use]
    pub fn load(&self, path: &Path) -> Option<ScanResult> {
        self.load_at(path, Utc::now())
    }

    /// [`Self::load`] with an explicit clock. Expired and undecodable records
    /// are deleted and reported as misses.
    #[must_use]
    pub fn load_at(&self, path: &Path, now: DateTime<Utc>) -> Option<ScanResult> {
        let record_path = self.record_path(path);
        let record = match self.read_record(&record_path, path) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.logger.send(ActivityEvent::CacheMiss {
                    path: path.to_path_buf(),
                });
                return None;
            }
            Err(err @ DscError::CacheCorrupt { .. }) => {
                self.evict(&record_path, path, &err.to_string());
                return None;
            }
            Err(err) => {
                eprintln!("[DSC-CACHE] {err}");
                self.logger.send(ActivityEvent::CacheMiss {
                    path: path.to_path_buf(),
                });
                return None;
            }
        };

        if record.is_expired(now, self.ttl) {
            self.evict(&record_path, path, "expired");
            return None;
        }

        self.logger.send(ActivityEvent::CacheHit {
            path: path.to_path_buf(),
        });
        Some(record.into_result())
    }

    /// Roots that currently have a record, fresh or not.
    pub fn cached_roots(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(DscError::io(&self.dir, source)),
        };
        let mut roots: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let key = name.to_str()?.strip_suffix(RECORD_EXTENSION)?.strip_suffix('.')?;
                if key.starts_with(HASHED_PREFIX) {
                    stored_root(&entry.path())
                } else {
                    decode_key(key)
                }
            })
            .collect();
        roots.sort();
        Ok(roots)
    }

    /// Delete the whole store.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(DscError::io(&self.dir, source)),
        }
        self.logger.send(ActivityEvent::CacheCleared {
            path: self.dir.clone(),
        });
        Ok(())
    }

    fn read_record(&self, record_path: &Path, expected: &Path) -> Result<Option<CacheRecord>> {
        let raw = match fs::read(record_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(DscError::io(record_path, source)),
        };
        let record: CacheRecord =
            serde_json::from_slice(&raw).map_err(|err| DscError::CacheCorrupt {
                path: record_path.to_path_buf(),
                details: err.to_string(),
            })?;
        if record.path != expected {
            return Err(DscError::CacheCorrupt {
                path: record_path.to_path_buf(),
                details: format!("record is for {}", record.path.display()),
            });
        }
        Ok(Some(record))
    }

    fn evict(&self, record_path: &Path, path: &Path, reason: &str) {
        if let Err(err) = fs::remove_file(record_path)
            && err.kind() != io::ErrorKind::NotFound
        {
            eprintln!(
                "[DSC-CACHE] failed to remove {}: {err}",
                record_path.display()
            );
        }
        self.logger.send(ActivityEvent::CacheEvicted {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn sample_result(total: u64) -> ScanResult {
        let big = LargeFileEntry::new(Path::new("/x/big.iso"), total, at(10));
        let leaf = DirectoryEntry::leaf(Path::new("/x/big.iso"), total, at(10), at(10));
        ScanResult {
            entries: vec![leaf],
            large_files: vec![big],
            total_size: total,
            total_files: 1,
            scan_duration: Duration::from_secs(3),
            scanned_at: at(1_000),
        }
    }

    fn cache(dir: &Path) -> ResultCache {
        ResultCache::new(
            dir.join("scan-cache"),
            Duration::from_secs(3600),
            ActivityLoggerHandle::noop(),
        )
    }

    #[test]
    fn key_is_reversible_and_separator_free() {
        for path in ["/", "/Users/me/Movies", "/tmp/with space/ünïcode", "/a+b/c=d"] {
            let key = encode_key(Path::new(path));
            assert!(!key.contains('/'));
            assert!(!key.contains('='));
            assert_eq!(decode_key(&key), Some(PathBuf::from(path)));
        }
        assert_eq!(decode_key("not base64!"), None);
    }

    #[test]
    fn round_trip_zeroes_duration() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let result = sample_result(70);
        let record = CacheRecord::from_result(Path::new("/x"), &result, at(1_000));
        cache.save_blocking(&record).unwrap();

        let loaded = cache.load_at(Path::new("/x"), at(1_060)).unwrap();
        assert_eq!(loaded.total_size, result.total_size);
        assert_eq!(loaded.total_files, result.total_files);
        assert_eq!(loaded.large_files, result.large_files);
        assert_eq!(loaded.entries, result.entries);
        assert_eq!(loaded.scan_duration, Duration::ZERO);
        assert_eq!(loaded.scanned_at, at(1_000));
    }

    #[test]
    fn expired_record_is_deleted_on_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let record = CacheRecord::from_result(Path::new("/x"), &sample_result(5), at(1_000));
        cache.save_blocking(&record).unwrap();

        // Exactly at the TTL is still fresh.
        assert!(cache.load_at(Path::new("/x"), at(1_000 + 3600)).is_some());

        let later = at(1_000) + TimeDelta::seconds(3601);
        assert!(cache.load_at(Path::new("/x"), later).is_none());
        assert!(!cache.record_path(Path::new("/x")).exists());
        assert!(cache.load_at(Path::new("/x"), at(1_000)).is_none());
    }

    #[test]
    fn corrupt_record_is_a_miss_and_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let path = cache.record_path(Path::new("/x"));
        fs::create_dir_all(cache.dir()).unwrap();
        fs::write(&path, b"{ not json").unwrap();

        assert!(cache.load(Path::new("/x")).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn record_for_other_path_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let record = CacheRecord::from_result(Path::new("/y"), &sample_result(5), Utc::now());
        fs::create_dir_all(cache.dir()).unwrap();
        fs::write(
            cache.record_path(Path::new("/x")),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();
        assert!(cache.load(Path::new("/x")).is_none());
    }

    #[test]
    fn background_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let mut result = sample_result(9);
        result.scanned_at = Utc::now();
        cache.save(&result, Path::new("/bg")).unwrap().join().unwrap();
        assert_eq!(cache.load(Path::new("/bg")).unwrap().total_size, 9);
    }

    #[test]
    fn concurrent_saves_of_distinct_paths_do_not_interfere() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(cache(tmp.path()));
        let handles: Vec<_> = (0..16_u64)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let path = PathBuf::from(format!("/root/{i}"));
                    let record =
                        CacheRecord::from_result(&path, &sample_result(i + 1), Utc::now());
                    cache.save_blocking(&record).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..16_u64 {
            let loaded = cache.load(&PathBuf::from(format!("/root/{i}"))).unwrap();
            assert_eq!(loaded.total_size, i + 1);
        }
        assert_eq!(cache.cached_roots().unwrap().len(), 16);
        let leftovers = fs::read_dir(cache.dir())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn long_root_gets_a_hashed_name_and_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let deep: PathBuf = std::iter::once("/".to_string())
            .chain((0..18).map(|i| format!("nested-directory-{i:02}")))
            .collect();
        assert!(deep.as_os_str().len() > 250);

        let name = cache.record_path(&deep);
        let file_name = name.file_name().unwrap().to_str().unwrap();
        assert!(file_name.len() <= MAX_FILE_NAME);
        assert!(file_name.starts_with(HASHED_PREFIX));
        assert_eq!(decode_key(file_name.trim_end_matches(".json")), None);

        let mut result = sample_result(11);
        result.scanned_at = Utc::now();
        cache.save(&result, &deep).unwrap().join().unwrap();
        assert_eq!(cache.load(&deep).unwrap().total_size, 11);

        let short = CacheRecord::from_result(Path::new("/x"), &sample_result(5), Utc::now());
        cache.save_blocking(&short).unwrap();
        assert_eq!(
            cache.cached_roots().unwrap(),
            vec![deep.clone(), PathBuf::from("/x")]
        );
    }

    #[test]
    fn clear_removes_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let record = CacheRecord::from_result(Path::new("/x"), &sample_result(5), Utc::now());
        cache.save_blocking(&record).unwrap();
        cache.clear().unwrap();
        assert!(!cache.dir().exists());
        assert!(cache.load(Path::new("/x")).is_none());
        assert!(cache.cached_roots().unwrap().is_empty());
        // Clearing an absent store is fine.
        cache.clear().unwrap();
    }
}
