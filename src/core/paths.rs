//! Path helpers shared by the walker, the cache, and the service layer.

use std::env;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Resolve a scan root to an absolute, normalized path.
///
/// Existing paths are canonicalized (symlinks resolved) so that `/tmp/x` and
/// `/private/tmp/x` share one cache record. Paths that do not exist are made
/// absolute against the CWD and `.`/`..` are folded syntactically; the scan
/// then fails at the root probe with a proper error.
pub fn resolve_scan_root(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    fold_components(&absolute)
}

fn fold_components(path: &Path) -> PathBuf {
    let mut kept: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(kept.last(), Some(Component::Normal(_))) {
                    kept.pop();
                }
            }
            other => kept.push(other),
        }
    }
    kept.into_iter().collect()
}

/// Display name for an entry: its final component, or the whole path for `/`.
pub fn entry_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.to_string_lossy().into_owned(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// Dot-prefixed names are hidden.
pub fn is_hidden(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Lowercased extension of `path`, empty when there is none.
pub fn extension_lower(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_existing_path_canonically() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a");
        std::fs::create_dir(&nested).unwrap();
        let dotted = tmp.path().join("a").join("..").join("a");
        assert_eq!(
            resolve_scan_root(&dotted),
            std::fs::canonicalize(&nested).unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn folds_missing_path_syntactically() {
        let input = Path::new("/nonexistent-dsc/foo/../bar/./baz");
        assert!(std::fs::canonicalize(input).is_err());
        assert_eq!(
            resolve_scan_root(input),
            PathBuf::from("/nonexistent-dsc/bar/baz")
        );
    }

    #[cfg(unix)]
    #[test]
    fn parent_of_root_stays_at_root() {
        assert_eq!(fold_components(Path::new("/../foo")), Path::new("/foo"));
    }

    #[test]
    fn entry_name_falls_back_to_full_path() {
        assert_eq!(entry_name(Path::new("/var/log/syslog")), "syslog");
        assert_eq!(entry_name(Path::new("/")), "/");
    }

    #[test]
    fn hidden_and_extension_helpers() {
        assert!(is_hidden(OsStr::new(".git")));
        assert!(!is_hidden(OsStr::new("src")));
        assert_eq!(extension_lower(Path::new("Movie.MKV")), "mkv");
        assert_eq!(extension_lower(Path::new("Makefile")), "");
    }
}
