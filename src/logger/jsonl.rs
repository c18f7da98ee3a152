//! Append-only JSONL activity log.
//!
//! Every line is one self-contained JSON object, built in memory and handed
//! to the file with a single `write_all` so a concurrent `tail -f` never sees
//! half a record.
//!
//! When the primary file cannot be written the writer steps down, in order:
//! fallback file, stderr with a `[DSC-JSONL]` prefix, then silent discard.
//! Logging never fails a scan.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::errors::{DscError, Result};

const WRITE_BUFFER: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ServiceStart,
    ScanStart,
    ScanComplete,
    ScanCancel,
    ScanSupersede,
    ScanFail,
    NodeSkip,
    CacheHit,
    CacheMiss,
    CacheSave,
    CacheEvict,
    CacheClear,
    Error,
}

/// One JSONL line. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    #[must_use]
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            path: None,
            files: None,
            bytes: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.display().to_string());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the active file would exceed this many bytes.
    pub max_size_bytes: u64,
    /// Rotated generations kept as `<path>.1` .. `<path>.N`.
    pub max_rotated_files: u32,
    pub sync_interval: Duration,
}

impl JsonlConfig {
    /// Config for `path` with a fallback in the system temp directory.
    #[must_use]
    pub fn for_path(path: PathBuf) -> Self {
        Self {
            path,
            fallback_path: Some(std::env::temp_dir().join("disk_scope-activity.jsonl")),
            max_size_bytes: 20 * 1024 * 1024,
            max_rotated_files: 3,
            sync_interval: Duration::from_secs(10),
        }
    }
}

/// Where lines are currently going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterMode {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

enum Sink {
    File {
        writer: BufWriter<File>,
        fallback: bool,
    },
    Stderr,
    Discard,
}

pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    bytes_written: u64,
    last_sync: Instant,
}

impl JsonlWriter {
    /// Open the primary file, stepping down the chain if that fails.
    #[must_use]
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            sink: Sink::Discard,
            bytes_written: 0,
            last_sync: Instant::now(),
        };
        writer.open_primary_or_degrade();
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(err) => {
                let _ = writeln!(io::stderr(), "[DSC-JSONL] cannot serialize entry: {err}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Sink::File { writer, .. } = &mut self.sink {
            let _ = writer.flush();
        }
    }

    /// Flush and `fdatasync` the active file.
    pub fn sync(&mut self) {
        if let Sink::File { writer, .. } = &mut self.sink {
            let _ = writer.flush();
            let _ = writer.get_ref().sync_data();
        }
        self.last_sync = Instant::now();
    }

    #[must_use]
    pub fn mode(&self) -> WriterMode {
        match &self.sink {
            Sink::File {
                fallback: false, ..
            } => WriterMode::Primary,
            Sink::File { fallback: true, .. } => WriterMode::Fallback,
            Sink::Stderr => WriterMode::Stderr,
            Sink::Discard => WriterMode::Discard,
        }
    }

    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn active_path(&self) -> Option<&Path> {
        match &self.sink {
            Sink::File {
                fallback: false, ..
            } => Some(&self.config.path),
            Sink::File { fallback: true, .. } => self.config.fallback_path.as_deref(),
            Sink::Stderr | Sink::Discard => None,
        }
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if matches!(self.sink, Sink::File { .. })
            && self.bytes_written > 0
            && self.bytes_written + len > self.config.max_size_bytes
        {
            self.rotate();
        }

        loop {
            match &mut self.sink {
                Sink::File { writer, .. } => {
                    if writer.write_all(line.as_bytes()).is_ok() {
                        self.bytes_written += len;
                        if self.last_sync.elapsed() >= self.config.sync_interval {
                            self.sync();
                        }
                        return;
                    }
                    self.degrade();
                }
                Sink::Stderr => {
                    let _ = write!(io::stderr(), "[DSC-JSONL] {line}");
                    return;
                }
                Sink::Discard => return,
            }
        }
    }

    fn open_primary_or_degrade(&mut self) {
        match open_append(&self.config.path) {
            Ok((file, size)) => self.use_file(file, size, false),
            Err(_) => self.open_fallback_or_stderr(),
        }
    }

    fn open_fallback_or_stderr(&mut self) {
        let opened = self
            .config
            .fallback_path
            .as_deref()
            .map(|fb| (fb, open_append(fb)));
        match opened {
            Some((fb, Ok((file, size)))) => {
                let _ = writeln!(
                    io::stderr(),
                    "[DSC-JSONL] primary log unavailable, writing to {}",
                    fb.display()
                );
                self.use_file(file, size, true);
            }
            _ => {
                let _ = writeln!(io::stderr(), "[DSC-JSONL] no writable log file, using stderr");
                self.sink = Sink::Stderr;
            }
        }
    }

    fn use_file(&mut self, file: File, size: u64, fallback: bool) {
        self.sink = Sink::File {
            writer: BufWriter::with_capacity(WRITE_BUFFER, file),
            fallback,
        };
        self.bytes_written = size;
    }

    fn degrade(&mut self) {
        match self.mode() {
            WriterMode::Primary => self.open_fallback_or_stderr(),
            WriterMode::Fallback => {
                let _ = writeln!(io::stderr(), "[DSC-JSONL] fallback log failed, using stderr");
                self.sink = Sink::Stderr;
            }
            WriterMode::Stderr | WriterMode::Discard => self.sink = Sink::Discard,
        }
    }

    fn rotate(&mut self) {
        let Some(base) = self.active_path().map(Path::to_path_buf) else {
            return;
        };
        let fallback = self.mode() == WriterMode::Fallback;
        self.flush();
        self.sink = Sink::Discard;

        let keep = self.config.max_rotated_files.max(1);
        let _ = fs::remove_file(rotated_name(&base, keep));
        for generation in (1..keep).rev() {
            let _ = fs::rename(
                rotated_name(&base, generation),
                rotated_name(&base, generation + 1),
            );
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, size)) => self.use_file(file, size, fallback),
            Err(_) if fallback => self.sink = Sink::Stderr,
            Err(_) => self.open_fallback_or_stderr(),
        }
    }
}

/// Open (creating parents) for append; returns the file and its current length.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| DscError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| DscError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

/// `activity.jsonl` -> `activity.jsonl.2`
fn rotated_name(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}
