//! Scan data model: the aggregated directory tree, large-file records,
//! progress snapshots, and the final scan result.

#![allow(missing_docs)]

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::paths;

/// A node of the scanned tree.
///
/// `children == None` means "not expanded" (a file, a package, or an
/// unscanned directory). `Some(vec![])` is a scanned, empty directory.
/// Nodes never point at their parent; each one is built by the walker call
/// that processed it and handed upward by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub is_directory: bool,
    pub last_accessed: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<DirectoryEntry>>,
}

impl DirectoryEntry {
    /// Leaf entry for a file or an opaque package.
    #[must_use]
    pub fn leaf(
        path: &Path,
        size: u64,
        last_accessed: DateTime<Utc>,
        modified_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: paths::entry_name(path),
            path: path.to_path_buf(),
            size,
            is_directory: false,
            last_accessed,
            modified_at,
            children: None,
        }
    }

    /// Expanded directory; size is the sum of `children`, which are sorted
    /// largest first.
    #[must_use]
    pub fn directory(
        path: &Path,
        mut children: Vec<Self>,
        last_accessed: DateTime<Utc>,
        modified_at: DateTime<Utc>,
    ) -> Self {
        sort_by_size_desc(&mut children);
        let size = children.iter().map(|c| c.size).sum();
        Self {
            id: Uuid::new_v4(),
            name: paths::entry_name(path),
            path: path.to_path_buf(),
            size,
            is_directory: true,
            last_accessed,
            modified_at,
            children: Some(children),
        }
    }

    /// Whether this node was expanded by a scan.
    #[must_use]
    pub fn is_scanned(&self) -> bool {
        self.children.is_some()
    }

    /// Number of path components, used for indentation by tree views.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.components().count()
    }

    #[must_use]
    pub fn children(&self) -> &[Self] {
        self.children.as_deref().unwrap_or_default()
    }

    /// Pre-order iterator over this node and all of its descendants.
    pub fn descendants(&self) -> impl Iterator<Item = &Self> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children().iter().rev());
            Some(node)
        })
    }

    /// Count of non-directory nodes below (and including) this one.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.descendants().filter(|n| !n.is_directory).count()
    }
}

/// Sort entries largest first; ties broken by name for stable output.
pub fn sort_by_size_desc(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.name.cmp(&b.name)));
}

/// Coarse content category derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Document,
    Image,
    Video,
    Audio,
    Archive,
    Code,
    Other,
}

impl FileType {
    /// Classify a (case-insensitive) extension without the leading dot.
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "heic" | "svg" | "webp" => Self::Image,
            "mp4" | "mov" | "avi" | "mkv" | "webm" => Self::Video,
            "mp3" | "wav" | "aac" | "flac" | "m4a" => Self::Audio,
            "zip" | "rar" | "7z" | "tar" | "gz" => Self::Archive,
            "swift" | "c" | "cpp" | "h" | "py" | "js" | "ts" | "html" | "css" | "json" | "xml"
            | "md" | "rs" => Self::Code,
            "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "txt" | "rtf" => {
                Self::Document
            }
            _ => Self::Other,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Archive => "archive",
            Self::Code => "code",
            Self::Other => "other",
        }
    }
}

/// Flat record for a file (or package) above the large-file threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeFileEntry {
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub file_type: FileType,
}

impl LargeFileEntry {
    #[must_use]
    pub fn new(path: &Path, size: u64, modified_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: paths::entry_name(path),
            path: path.to_path_buf(),
            size,
            modified_at,
            file_type: FileType::from_extension(&paths::extension_lower(path)),
        }
    }

    /// Ordering used everywhere large files are ranked: by size only.
    #[must_use]
    pub fn cmp_size(&self, other: &Self) -> Ordering {
        self.size.cmp(&other.size)
    }
}

/// Immutable progress snapshot, sampled while a scan is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanProgress {
    /// Root being scanned.
    pub path: PathBuf,
    /// Most recently entered directory.
    pub current_path: PathBuf,
    pub scanned_files: u64,
    pub scanned_directories: u64,
    pub scanned_bytes: u64,
    pub start_time: DateTime<Utc>,
    /// Time since the scan started, measured when the snapshot was taken.
    pub elapsed: Duration,
}

impl ScanProgress {
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.scanned_files as f64 / secs
        } else {
            0.0
        }
    }
}

/// Final aggregate of one scan. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Children of the scan root, largest first.
    pub entries: Vec<DirectoryEntry>,
    /// Largest files, size-descending, at most K.
    pub large_files: Vec<LargeFileEntry>,
    pub total_size: u64,
    pub total_files: u64,
    /// Wall-clock duration; zero for results served from the cache.
    pub scan_duration: Duration,
    pub scanned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn file(path: &str, size: u64) -> DirectoryEntry {
        DirectoryEntry::leaf(Path::new(path), size, at(0), at(0))
    }

    #[test]
    fn directory_sums_and_sorts_children() {
        let dir = DirectoryEntry::directory(
            Path::new("/d"),
            vec![file("/d/a", 10), file("/d/b", 60), file("/d/c", 5)],
            at(1),
            at(2),
        );
        assert!(dir.is_directory);
        assert!(dir.is_scanned());
        assert_eq!(dir.size, 75);
        let sizes: Vec<u64> = dir.children().iter().map(|c| c.size).collect();
        assert_eq!(sizes, vec![60, 10, 5]);
    }

    #[test]
    fn empty_directory_is_scanned_with_zero_size() {
        let dir = DirectoryEntry::directory(Path::new("/empty"), Vec::new(), at(0), at(0));
        assert_eq!(dir.size, 0);
        assert_eq!(dir.children, Some(Vec::new()));
        assert!(dir.is_scanned());
        assert!(!file("/x", 1).is_scanned());
    }

    #[test]
    fn descendants_visit_pre_order() {
        let inner =
            DirectoryEntry::directory(Path::new("/r/sub"), vec![file("/r/sub/z", 1)], at(0), at(0));
        let root =
            DirectoryEntry::directory(Path::new("/r"), vec![inner, file("/r/a", 5)], at(0), at(0));
        let names: Vec<&str> = root.descendants().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["r", "a", "sub", "z"]);
        assert_eq!(root.leaf_count(), 2);
    }

    #[test]
    fn file_type_from_extension() {
        assert_eq!(FileType::from_extension("MKV"), FileType::Video);
        assert_eq!(FileType::from_extension("jpeg"), FileType::Image);
        assert_eq!(FileType::from_extension("flac"), FileType::Audio);
        assert_eq!(FileType::from_extension("7z"), FileType::Archive);
        assert_eq!(FileType::from_extension("rs"), FileType::Code);
        assert_eq!(FileType::from_extension("pdf"), FileType::Document);
        assert_eq!(FileType::from_extension("iso"), FileType::Other);
        assert_eq!(FileType::from_extension(""), FileType::Other);
    }

    #[test]
    fn large_file_entry_derives_type_and_name() {
        let entry = LargeFileEntry::new(Path::new("/media/Film.MP4"), 70, at(3));
        assert_eq!(entry.name, "Film.MP4");
        assert_eq!(entry.file_type, FileType::Video);
        let smaller = LargeFileEntry::new(Path::new("/media/a.zip"), 60, at(3));
        assert_eq!(entry.cmp_size(&smaller), Ordering::Greater);
    }

    #[test]
    fn files_per_second_handles_zero_elapsed() {
        let mut progress = ScanProgress {
            path: PathBuf::from("/"),
            current_path: PathBuf::from("/"),
            scanned_files: 100,
            scanned_directories: 3,
            scanned_bytes: 1,
            start_time: at(0),
            elapsed: Duration::ZERO,
        };
        assert!(progress.files_per_second().abs() < f64::EPSILON);
        progress.elapsed = Duration::from_secs(4);
        assert!((progress.files_per_second() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn entry_serialization_omits_absent_children() {
        let json = serde_json::to_string(&file("/f", 1)).unwrap();
        assert!(!json.contains("children"));
        let back: DirectoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.children, None);
    }
}
