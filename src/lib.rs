#![forbid(unsafe_code)]

//! disk_scope: recursive, concurrent disk-usage scanning.
//!
//! A scan walks a directory tree in parallel, aggregates sizes bottom-up into
//! a [`scanner::model::DirectoryEntry`] tree, tracks the largest files in a
//! bounded top-K set, and publishes live progress. One scan is current at a
//! time; starting another cancels it. Completed results are cached on disk
//! per root and reused until they expire.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use disk_scope::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let config = Config::load(None)?;
//! let service = DiskScanService::new(config, ActivityLoggerHandle::noop())?;
//! if let Some(result) = service.scan(std::path::Path::new("."), false)?.into_result() {
//!     println!("{} bytes in {} files", result.total_size, result.total_files);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use disk_scope::scanner::coordinator::ScanCoordinator;
//! use disk_scope::scanner::walker::{RecursiveWalker, WalkerConfig};
//! ```

pub mod prelude;

pub mod cache;
pub mod core;
pub mod logger;
pub mod platform;
pub mod scanner;
pub mod service;
