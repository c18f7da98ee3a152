//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DscError, Result};

/// Files above this size are reported as large files.
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 50 * 1024 * 1024;

/// Full disk_scope configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub cache: CacheConfig,
    pub paths: PathsConfig,
}

/// Walker and coordinator tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Directories shallower than this fan their children out in parallel.
    pub max_parallel_depth: usize,
    pub large_file_threshold_bytes: u64,
    /// Capacity of the largest-files tracker.
    pub top_k: usize,
    pub progress_interval_ms: u64,
    /// Worker threads in the scan pool.
    pub parallelism: usize,
    pub skip_hidden: bool,
    pub follow_symlinks: bool,
    /// Directory extensions treated as opaque bundles (no leading dot).
    pub package_extensions: Vec<String>,
}

/// Result cache location and freshness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub ttl_seconds: u64,
}

/// Filesystem paths used by disk_scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_parallel_depth: 2,
            large_file_threshold_bytes: DEFAULT_LARGE_FILE_THRESHOLD,
            top_k: 100,
            progress_interval_ms: 500,
            parallelism: std::thread::available_parallelism()
                .map_or(4, std::num::NonZeroUsize::get),
            skip_hidden: true,
            follow_symlinks: false,
            package_extensions: [
                "app",
                "appex",
                "bundle",
                "framework",
                "kext",
                "mdimporter",
                "photoslibrary",
                "pkg",
                "plugin",
                "prefpane",
                "qlgenerator",
                "saver",
                "xcarchive",
                "xpc",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

impl ScannerConfig {
    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(|| {
            eprintln!("[DSC-CONFIG] WARNING: no user cache dir, falling back to /tmp");
            PathBuf::from("/tmp")
        });
        Self {
            enabled: true,
            dir: base.join("disk_scope").join("scan-cache"),
            ttl_seconds: 60 * 60,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| {
            eprintln!("[DSC-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        });
        Self {
            config_file: home_dir
                .join(".config")
                .join("disk_scope")
                .join("config.toml"),
            activity_log: home_dir
                .join(".local")
                .join("share")
                .join("disk_scope")
                .join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// A missing file at the default path yields defaults; a missing explicit
    /// path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw =
                fs::read_to_string(&path_buf).map_err(|source| DscError::io(&path_buf, source))?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(DscError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic FNV-1a hash of the effective config, for the activity log.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        Ok(format!("{:016x}", fnv1a(canonical.as_bytes())))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let scanner = &mut self.scanner;
        override_parsed(
            &mut lookup,
            "DSC_SCANNER_MAX_PARALLEL_DEPTH",
            &mut scanner.max_parallel_depth,
        )?;
        override_parsed(
            &mut lookup,
            "DSC_SCANNER_LARGE_FILE_THRESHOLD_BYTES",
            &mut scanner.large_file_threshold_bytes,
        )?;
        override_parsed(&mut lookup, "DSC_SCANNER_TOP_K", &mut scanner.top_k)?;
        override_parsed(
            &mut lookup,
            "DSC_SCANNER_PROGRESS_INTERVAL_MS",
            &mut scanner.progress_interval_ms,
        )?;
        override_parsed(&mut lookup, "DSC_SCANNER_PARALLELISM", &mut scanner.parallelism)?;
        override_parsed(&mut lookup, "DSC_SCANNER_SKIP_HIDDEN", &mut scanner.skip_hidden)?;
        override_parsed(
            &mut lookup,
            "DSC_SCANNER_FOLLOW_SYMLINKS",
            &mut scanner.follow_symlinks,
        )?;

        override_parsed(&mut lookup, "DSC_CACHE_ENABLED", &mut self.cache.enabled)?;
        override_parsed(&mut lookup, "DSC_CACHE_TTL_SECONDS", &mut self.cache.ttl_seconds)?;
        if let Some(raw) = lookup("DSC_CACHE_DIR") {
            self.cache.dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DSC_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }
        Ok(())
    }

    fn normalize(&mut self) {
        for ext in &mut self.scanner.package_extensions {
            *ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        }
        self.scanner.package_extensions.sort();
        self.scanner.package_extensions.dedup();
    }

    fn validate(&self) -> Result<()> {
        let scanner = &self.scanner;
        if scanner.top_k == 0 {
            return Err(DscError::InvalidConfig {
                details: "scanner.top_k must be >= 1".to_string(),
            });
        }
        if scanner.parallelism == 0 {
            return Err(DscError::InvalidConfig {
                details: "scanner.parallelism must be >= 1".to_string(),
            });
        }
        if scanner.progress_interval_ms < 10 {
            return Err(DscError::InvalidConfig {
                details: format!(
                    "scanner.progress_interval_ms must be >= 10, got {}",
                    scanner.progress_interval_ms
                ),
            });
        }
        if let Some(bad) = scanner
            .package_extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.contains('.') || ext.contains('/'))
        {
            return Err(DscError::InvalidConfig {
                details: format!(
                    "scanner.package_extensions entry {bad:?} is not a bare extension"
                ),
            });
        }
        if self.cache.ttl_seconds == 0 {
            return Err(DscError::InvalidConfig {
                details: "cache.ttl_seconds must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn override_parsed<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<T>().map_err(|error| DscError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

/// 64-bit FNV-1a.
pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}
