//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use disk_scope::prelude::*;
//! ```

// Core
pub use crate::core::config::{CacheConfig, Config, ScannerConfig};
pub use crate::core::errors::{DscError, Result};

// Platform
pub use crate::platform::volume::{VolumeUsage, volume_usage};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
pub use crate::logger::jsonl::JsonlConfig;

// Scanner
pub use crate::scanner::cancel::CancelToken;
pub use crate::scanner::coordinator::{
    ProgressSubscription, ScanCoordinator, ScanOutcome, ScanPhase,
};
pub use crate::scanner::model::{
    DirectoryEntry, FileType, LargeFileEntry, ScanProgress, ScanResult,
};
pub use crate::scanner::probe::{PathProbe, ProbeInfo};
pub use crate::scanner::progress::ProgressCounter;
pub use crate::scanner::top_k::TopKTracker;
pub use crate::scanner::walker::{RecursiveWalker, WalkerConfig};

// Cache
pub use crate::cache::store::ResultCache;

// Service
pub use crate::service::DiskScanService;
