//! Activity logger: a dedicated thread owns the [`JsonlWriter`]; everyone else
//! sends [`ActivityEvent`]s through a bounded crossbeam channel.
//!
//! Sending is `try_send`, so a walker branch or the progress ticker is never
//! blocked by a slow disk. Events that do not fit are counted and reported
//! as a single warning line once the channel drains.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{DscError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ScanStarted {
        path: PathBuf,
        generation: u64,
    },
    ScanCompleted {
        path: PathBuf,
        files: u64,
        bytes: u64,
        large_files: usize,
        skipped: u64,
        duration: Duration,
    },
    ScanCancelled {
        path: PathBuf,
    },
    /// A newer scan request cancelled this one.
    ScanSuperseded {
        path: PathBuf,
        generation: u64,
    },
    ScanFailed {
        path: PathBuf,
        code: String,
        message: String,
    },
    /// A node-level error absorbed by the walker.
    NodeSkipped {
        path: PathBuf,
        code: String,
    },
    CacheHit {
        path: PathBuf,
    },
    CacheMiss {
        path: PathBuf,
    },
    CacheSaved {
        path: PathBuf,
        bytes: u64,
    },
    CacheEvicted {
        path: PathBuf,
        reason: String,
    },
    CacheCleared {
        path: PathBuf,
    },
    Error {
        code: String,
        message: String,
    },
    /// Flush and stop the logger thread.
    Shutdown,
}

/// Cloneable, non-blocking sender side of the activity log.
#[derive(Debug, Clone)]
pub struct ActivityLoggerHandle {
    tx: Option<Sender<ActivityEvent>>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle that discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            tx: None,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A handle whose events are delivered to the returned receiver instead of
    /// a log file, for embedders that route activity themselves.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx: Some(tx),
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn send(&self, event: ActivityEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(TrySendError::Full(_)) = tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only until the request
    /// is queued.
    pub fn shutdown(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ActivityEvent::Shutdown);
        }
    }
}

/// Start the `dsc-logger` thread writing to `config.path`.
pub fn spawn_logger(config: JsonlConfig) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (handle, rx) = ActivityLoggerHandle::channel(CHANNEL_CAPACITY);
    let dropped = Arc::clone(&handle.dropped_events);
    let join = thread::Builder::new()
        .name("dsc-logger".to_string())
        .spawn(move || run_logger(&rx, config, &dropped))
        .map_err(|e| DscError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;
    Ok((handle, join))
}

fn run_logger(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut writer = JsonlWriter::open(config);
    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            writer.write_entry(
                &LogEntry::new(EventType::Error, Severity::Warning)
                    .with_details(format!("{lost} activity events dropped under back-pressure")),
            );
        }
        if event == ActivityEvent::Shutdown {
            break;
        }
        writer.write_entry(&to_log_entry(&event));
    }
    writer.sync();
}

#[must_use]
pub fn to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::ServiceStarted {
            version,
            config_hash,
        } => LogEntry::new(EventType::ServiceStart, Severity::Info)
            .with_details(format!("version={version} config_hash={config_hash}")),
        ActivityEvent::ScanStarted { path, generation } => {
            LogEntry::new(EventType::ScanStart, Severity::Info)
                .with_path(path)
                .with_details(format!("generation={generation}"))
        }
        ActivityEvent::ScanCompleted {
            path,
            files,
            bytes,
            large_files,
            skipped,
            duration,
        } => {
            let mut e = LogEntry::new(EventType::ScanComplete, Severity::Info)
                .with_path(path)
                .with_details(format!("large_files={large_files} skipped={skipped}"));
            e.files = Some(*files);
            e.bytes = Some(*bytes);
            e.duration_ms = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ScanCancelled { path } => {
            LogEntry::new(EventType::ScanCancel, Severity::Info).with_path(path)
        }
        ActivityEvent::ScanSuperseded { path, generation } => {
            LogEntry::new(EventType::ScanSupersede, Severity::Info)
                .with_path(path)
                .with_details(format!("generation={generation}"))
        }
        ActivityEvent::ScanFailed {
            path,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::ScanFail, Severity::Warning).with_path(path);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::NodeSkipped { path, code } => {
            let mut e = LogEntry::new(EventType::NodeSkip, Severity::Info).with_path(path);
            e.error_code = Some(code.clone());
            e
        }
        ActivityEvent::CacheHit { path } => {
            LogEntry::new(EventType::CacheHit, Severity::Info).with_path(path)
        }
        ActivityEvent::CacheMiss { path } => {
            LogEntry::new(EventType::CacheMiss, Severity::Info).with_path(path)
        }
        ActivityEvent::CacheSaved { path, bytes } => {
            let mut e = LogEntry::new(EventType::CacheSave, Severity::Info).with_path(path);
            e.bytes = Some(*bytes);
            e.ok = Some(true);
            e
        }
        ActivityEvent::CacheEvicted { path, reason } => {
            LogEntry::new(EventType::CacheEvict, Severity::Info)
                .with_path(path)
                .with_details(reason.clone())
        }
        ActivityEvent::CacheCleared { path } => {
            LogEntry::new(EventType::CacheClear, Severity::Info).with_path(path)
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::Error, Severity::Info)
            .with_details("logger shutdown requested"),
    }
}
