//! Single-entry filesystem probe.
//!
//! Stats one path and classifies it as file, directory, or package. A package
//! is a directory with a bundle extension (`Foo.app`, `Bar.framework`); it is
//! reported as one opaque leaf whose size is the total of everything inside.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::core::errors::{DscError, Result};
use crate::core::paths;

/// What a probe learned about one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    pub is_directory: bool,
    pub is_package: bool,
    /// Only reported when symlinks are not followed.
    pub is_symlink: bool,
    /// File length, or the summed content size for packages. Zero for plain
    /// directories: they contribute no self-size.
    pub size: u64,
    pub accessed: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// `(device, inode)` on Unix, used to detect directory cycles.
    pub identity: Option<(u64, u64)>,
}

impl ProbeInfo {
    /// Files and packages are leaves; only real directories are descended into.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        !self.is_directory || self.is_package
    }
}

/// Stats filesystem entries according to the scanner configuration.
#[derive(Debug, Clone)]
pub struct PathProbe {
    follow_symlinks: bool,
    package_extensions: HashSet<String>,
}

impl PathProbe {
    pub fn new<I, S>(follow_symlinks: bool, package_extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            follow_symlinks,
            package_extensions: package_extensions
                .into_iter()
                .map(|ext| ext.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    #[must_use]
    pub const fn follows_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    /// Stat `path`. Errors are classified as permission denied, not found, or
    /// generic IO; callers skip the node on any of them.
    pub fn probe(&self, path: &Path) -> Result<ProbeInfo> {
        let meta = self.metadata(path)?;
        let is_symlink = meta.file_type().is_symlink();
        let is_directory = meta.is_dir();
        let is_package = is_directory && self.has_package_extension(path);

        let size = if is_package {
            self.package_size(path)
        } else if is_directory || is_symlink {
            0
        } else {
            meta.len()
        };

        let modified = meta.modified().map_or_else(|_| Utc::now(), DateTime::<Utc>::from);
        let accessed = meta.accessed().map_or(modified, DateTime::<Utc>::from);

        Ok(ProbeInfo {
            is_directory,
            is_package,
            is_symlink,
            size,
            accessed,
            modified,
            identity: file_identity(&meta),
        })
    }

    /// Whether `path` names a bundle directory by extension alone.
    #[must_use]
    pub fn has_package_extension(&self, path: &Path) -> bool {
        let ext = paths::extension_lower(path);
        !ext.is_empty() && self.package_extensions.contains(&ext)
    }

    fn metadata(&self, path: &Path) -> Result<fs::Metadata> {
        let meta = if self.follow_symlinks {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        };
        meta.map_err(|source| DscError::from_io(path, source))
    }

    /// Total size of every regular file inside a package, hidden ones
    /// included. Unreadable parts count as zero.
    fn package_size(&self, root: &Path) -> u64 {
        let mut total: u64 = 0;
        let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let Ok(ft) = entry.file_type() else {
                    continue;
                };
                if ft.is_dir() {
                    stack.push(entry.path());
                } else if ft.is_file()
                    && let Ok(meta) = entry.metadata()
                {
                    total = total.saturating_add(meta.len());
                } else if ft.is_symlink()
                    && self.follow_symlinks
                    && let Ok(meta) = fs::metadata(entry.path())
                    && meta.is_file()
                {
                    total = total.saturating_add(meta.len());
                }
            }
        }
        total
    }
}

#[cfg(unix)]
fn file_identity(meta: &fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &fs::Metadata) -> Option<(u64, u64)> {
    None
}
