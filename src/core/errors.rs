//! DSC-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DscError>;

/// Top-level error type for disk_scope.
#[derive(Debug, Error)]
pub enum DscError {
    #[error("[DSC-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DSC-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DSC-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DSC-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[DSC-2001] scan failed for {path}: {details}")]
    ScanFailed { path: PathBuf, details: String },

    #[error("[DSC-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DSC-2201] corrupt cache record {path}: {details}")]
    CacheCorrupt { path: PathBuf, details: String },

    #[error("[DSC-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[DSC-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("[DSC-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[DSC-3004] not found: {path}")]
    NotFound { path: PathBuf },

    #[error("[DSC-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl DscError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DSC-1001",
            Self::MissingConfig { .. } => "DSC-1002",
            Self::ConfigParse { .. } => "DSC-1003",
            Self::UnsupportedPlatform { .. } => "DSC-1101",
            Self::ScanFailed { .. } => "DSC-2001",
            Self::Serialization { .. } => "DSC-2101",
            Self::CacheCorrupt { .. } => "DSC-2201",
            Self::PermissionDenied { .. } => "DSC-3001",
            Self::Io { .. } => "DSC-3002",
            Self::ChannelClosed { .. } => "DSC-3003",
            Self::NotFound { .. } => "DSC-3004",
            Self::Runtime { .. } => "DSC-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Scans are never retried automatically; this only informs callers.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::ChannelClosed { .. } | Self::Runtime { .. }
        )
    }

    /// Whether this error belongs to the per-node taxonomy the walker absorbs
    /// (permission denied, missing entry, generic IO).
    #[must_use]
    pub const fn is_node_level(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. } | Self::NotFound { .. } | Self::Io { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Classify an IO error into the probe taxonomy.
    #[must_use]
    pub fn from_io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}

impl From<serde_json::Error> for DscError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DscError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<DscError> {
        vec![
            DscError::InvalidConfig {
                details: String::new(),
            },
            DscError::MissingConfig {
                path: PathBuf::new(),
            },
            DscError::ConfigParse {
                context: "",
                details: String::new(),
            },
            DscError::UnsupportedPlatform {
                details: String::new(),
            },
            DscError::ScanFailed {
                path: PathBuf::new(),
                details: String::new(),
            },
            DscError::Serialization {
                context: "",
                details: String::new(),
            },
            DscError::CacheCorrupt {
                path: PathBuf::new(),
                details: String::new(),
            },
            DscError::PermissionDenied {
                path: PathBuf::new(),
            },
            DscError::Io {
                path: PathBuf::new(),
                source: io::Error::other("test"),
            },
            DscError::ChannelClosed { component: "" },
            DscError::NotFound {
                path: PathBuf::new(),
            },
            DscError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let codes: Vec<&str> = all_variants().iter().map(DscError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_includes_code() {
        for err in all_variants() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain error code: {msg}"
            );
            assert!(err.code().starts_with("DSC-"));
        }
    }

    #[test]
    fn from_io_classifies_probe_errors() {
        let denied = DscError::from_io(
            "/root/secret",
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert_eq!(denied.code(), "DSC-3001");

        let missing = DscError::from_io("/gone", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(missing.code(), "DSC-3004");

        let other = DscError::from_io("/dev/weird", io::Error::other("boom"));
        assert_eq!(other.code(), "DSC-3002");
        assert!(other.to_string().contains("/dev/weird"));

        assert!(denied.is_node_level());
        assert!(missing.is_node_level());
        assert!(other.is_node_level());
    }

    #[test]
    fn scan_failures_are_not_node_level_or_retryable() {
        let err = DscError::ScanFailed {
            path: PathBuf::from("/nope"),
            details: "root missing".to_string(),
        };
        assert!(!err.is_node_level());
        assert!(!err.is_retryable());
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: DscError = json_err.into();
        assert_eq!(err.code(), "DSC-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: DscError = toml_err.into();
        assert_eq!(err.code(), "DSC-1003");
    }
}
