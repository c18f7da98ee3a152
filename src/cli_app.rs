//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use colored::{Colorize, control};
use serde_json::{Value, json};
use signal_hook::consts::SIGINT;
use thiserror::Error;

use disk_scope::cache::store::ResultCache;
use disk_scope::core::config::Config;
use disk_scope::core::paths;
use disk_scope::logger::activity::{ActivityLoggerHandle, spawn_logger};
use disk_scope::logger::jsonl::JsonlConfig;
use disk_scope::scanner::coordinator::{ProgressSubscription, ScanOutcome};
use disk_scope::scanner::model::{DirectoryEntry, ScanResult};
use disk_scope::service::DiskScanService;

/// How often background helpers re-check their stop conditions.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// dscope: recursive disk-usage scanner.
#[derive(Debug, Parser)]
#[command(
    name = "dscope",
    author,
    version,
    about = "Disk usage scanner with large-file tracking and result caching",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Scan a directory tree and report where the space went.
    Scan(ScanArgs),
    /// Print the total size under a path without building a tree.
    Size(SizeArgs),
    /// Show capacity of the volume holding a path.
    Volume(VolumeArgs),
    /// Inspect or clear the scan result cache.
    Cache(CacheArgs),
    /// View configuration state.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    /// Directory (or file) to scan.
    path: PathBuf,
    /// Ignore any cached result and walk the tree again.
    #[arg(long)]
    refresh: bool,
    /// Number of largest files to print.
    #[arg(long, default_value_t = 10, value_name = "N")]
    top: usize,
    /// Tree levels to print below the root.
    #[arg(long, default_value_t = 1, value_name = "N")]
    depth: usize,
    /// Cancel the scan after this many seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct SizeArgs {
    path: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct VolumeArgs {
    #[arg(default_value = ".")]
    path: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum CacheCommand {
    /// Print the cache directory.
    Path,
    /// List roots with a cached result.
    List,
    /// Delete every cached result.
    Clear,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation stopped before finishing.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Size(args) => run_size(cli, args),
        Command::Volume(args) => run_volume(cli, args),
        Command::Cache(args) => run_cache(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Config::load(cli.config.as_deref()).map_err(|e| CliError::Runtime(e.to_string()))
}

/// Service wired to the activity log. The guard flushes the log on drop.
/// Bind as `(_log, service)` so the service drains its cache writes before
/// the log closes.
fn open_service(config: Config) -> Result<(LoggerGuard, DiskScanService), CliError> {
    let guard = match spawn_logger(JsonlConfig::for_path(config.paths.activity_log.clone())) {
        Ok((handle, join)) => LoggerGuard {
            handle,
            join: Some(join),
        },
        Err(e) => {
            eprintln!("[DSC-LOG] activity log disabled: {e}");
            LoggerGuard {
                handle: ActivityLoggerHandle::noop(),
                join: None,
            }
        }
    };
    let service = DiskScanService::new(config, guard.handle.clone())
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    Ok((guard, service))
}

struct LoggerGuard {
    handle: ActivityLoggerHandle,
    join: Option<thread::JoinHandle<()>>,
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            eprintln!("[DSC-LOG] logger thread panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    if !args.path.exists() {
        return Err(CliError::User(format!(
            "path does not exist: {}",
            args.path.display()
        )));
    }
    let mode = output_mode(cli);
    let config = load_config(cli)?;
    let (_log, service) = open_service(config)?;
    let root = paths::resolve_scan_root(&args.path);

    let interrupted = Arc::new(AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&interrupted)) {
        eprintln!("[DSC-SIGNAL] failed to register SIGINT: {e}");
    }

    let show_progress = mode == OutputMode::Human && io::stderr().is_terminal();
    let stream = service.progress_stream();
    let done = AtomicBool::new(false);

    let outcome = thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                if interrupted.load(Ordering::Relaxed) {
                    service.cancel_current_scan();
                    return;
                }
                thread::sleep(POLL_INTERVAL);
            }
        });
        if show_progress {
            s.spawn(|| render_progress(&stream, &done));
        }

        let outcome = match args.timeout {
            Some(secs) => service.scan_with_deadline(
                &root,
                args.refresh,
                Instant::now() + Duration::from_secs(secs),
            ),
            None => service.scan(&root, args.refresh),
        };
        done.store(true, Ordering::Release);
        outcome
    })
    .map_err(|e| CliError::Runtime(e.to_string()))?;

    if show_progress {
        eprint!("\r{:<80}\r", "");
    }

    match outcome {
        ScanOutcome::Completed(result) => emit_scan(mode, &root, "completed", &result, args),
        ScanOutcome::Cached(result) => emit_scan(mode, &root, "cached", &result, args),
        ScanOutcome::Cancelled => {
            if mode == OutputMode::Json {
                write_json_line(&json!({
                    "command": "scan",
                    "path": root.to_string_lossy(),
                    "status": "cancelled",
                }))?;
            }
            Err(CliError::Partial(format!("scan of {} cancelled", root.display())))
        }
    }
}

fn render_progress(stream: &ProgressSubscription, done: &AtomicBool) {
    while !done.load(Ordering::Acquire) {
        let Some(progress) = stream.recv_timeout(POLL_INTERVAL) else {
            continue;
        };
        eprint!(
            "\r{:<80}",
            format!(
                "  {} files, {} dirs, {} ({:.0} files/s)",
                progress.scanned_files,
                progress.scanned_directories,
                format_bytes(progress.scanned_bytes),
                progress.files_per_second(),
            )
        );
    }
}

fn emit_scan(
    mode: OutputMode,
    root: &Path,
    status: &str,
    result: &ScanResult,
    args: &ScanArgs,
) -> Result<(), CliError> {
    let largest = &result.large_files[..result.large_files.len().min(args.top)];
    match mode {
        OutputMode::Human => {
            let how = if status == "cached" {
                format!("cached {}", result.scanned_at.format("%Y-%m-%d %H:%M:%S UTC"))
            } else {
                format!("{:.1}s", result.scan_duration.as_secs_f64())
            };
            println!("{} {}", "Disk usage:".bold(), root.display());
            println!(
                "  {} in {} files ({how})\n",
                format_bytes(result.total_size).bold(),
                result.total_files,
            );

            if !largest.is_empty() {
                println!("{}", "Largest files".bold());
                println!("  {:>3}  {:>10}  {:<9}  {}", "#", "Size", "Type", "Path");
                for (i, file) in largest.iter().enumerate() {
                    println!(
                        "  {:>3}  {:>10}  {:<9}  {}",
                        i + 1,
                        format_bytes(file.size),
                        file.file_type.label(),
                        truncate_path(&file.path, 70),
                    );
                }
                println!();
            }

            println!("{}", "Tree".bold());
            for entry in &result.entries {
                print_tree(entry, 0, args.depth);
            }
        }
        OutputMode::Json => {
            let entries = result
                .entries
                .iter()
                .map(|entry| pruned(entry, args.depth))
                .collect::<Vec<_>>();
            let payload = json!({
                "command": "scan",
                "path": root.to_string_lossy(),
                "status": status,
                "total_size": result.total_size,
                "total_files": result.total_files,
                "scan_duration_ms": u64::try_from(result.scan_duration.as_millis()).unwrap_or(u64::MAX),
                "scanned_at": result.scanned_at.to_rfc3339(),
                "large_files": serde_json::to_value(largest)?,
                "entries": serde_json::to_value(entries)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_tree(entry: &DirectoryEntry, level: usize, max_level: usize) {
    let name = if entry.is_directory {
        format!("{}/", entry.name).blue().to_string()
    } else {
        entry.name.clone()
    };
    println!(
        "  {:>10}  {}{name}",
        format_bytes(entry.size),
        "  ".repeat(level)
    );
    if level + 1 < max_level {
        for child in entry.children() {
            print_tree(child, level + 1, max_level);
        }
    }
}

/// Copy of `entry` with children below `levels` cut off.
fn pruned(entry: &DirectoryEntry, levels: usize) -> DirectoryEntry {
    let mut copy = entry.clone();
    copy.children = if levels <= 1 {
        None
    } else {
        entry
            .children
            .as_ref()
            .map(|children| children.iter().map(|c| pruned(c, levels - 1)).collect())
    };
    copy
}

// ---------------------------------------------------------------------------
// size / volume
// ---------------------------------------------------------------------------

fn run_size(cli: &Cli, args: &SizeArgs) -> Result<(), CliError> {
    if !args.path.exists() {
        return Err(CliError::User(format!(
            "path does not exist: {}",
            args.path.display()
        )));
    }
    let config = load_config(cli)?;
    let (_log, service) = open_service(config)?;
    let bytes = service
        .calculate_size(&args.path)
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    match output_mode(cli) {
        OutputMode::Human => println!("{}  {}", format_bytes(bytes), args.path.display()),
        OutputMode::Json => write_json_line(&json!({
            "command": "size",
            "path": args.path.to_string_lossy(),
            "bytes": bytes,
        }))?,
    }
    Ok(())
}

fn run_volume(cli: &Cli, args: &VolumeArgs) -> Result<(), CliError> {
    let usage = disk_scope::platform::volume::volume_usage(&args.path)
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    match output_mode(cli) {
        OutputMode::Human => {
            let pct = usage.used_fraction() * 100.0;
            let pct_str = format!("{pct:.1}%");
            let pct_str = if pct >= 90.0 {
                pct_str.red().to_string()
            } else if pct >= 75.0 {
                pct_str.yellow().to_string()
            } else {
                pct_str.green().to_string()
            };
            println!("{}", args.path.display());
            println!("  Total:     {}", format_bytes(usage.total));
            println!("  Used:      {} ({pct_str})", format_bytes(usage.used));
            println!("  Available: {}", format_bytes(usage.available));
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "volume",
            "path": args.path.to_string_lossy(),
            "total": usage.total,
            "used": usage.used,
            "available": usage.available,
        }))?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// cache / config
// ---------------------------------------------------------------------------

fn run_cache(cli: &Cli, args: &CacheArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mode = output_mode(cli);
    let cache = ResultCache::from_config(&config.cache, ActivityLoggerHandle::noop());

    match args.command {
        CacheCommand::Path => match mode {
            OutputMode::Human => {
                println!("{}", cache.dir().display());
                if !config.cache.enabled {
                    println!("  (caching is disabled)");
                }
            }
            OutputMode::Json => write_json_line(&json!({
                "command": "cache path",
                "path": cache.dir().to_string_lossy(),
                "enabled": config.cache.enabled,
            }))?,
        },
        CacheCommand::List => {
            let roots = cache
                .cached_roots()
                .map_err(|e| CliError::Runtime(e.to_string()))?;
            match mode {
                OutputMode::Human => {
                    if roots.is_empty() {
                        println!("No cached scans.");
                    }
                    for root in &roots {
                        println!("{}", root.display());
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "cache list",
                    "roots": roots.iter().map(|r| r.to_string_lossy()).collect::<Vec<_>>(),
                }))?,
            }
        }
        CacheCommand::Clear => {
            let (_log, service) = open_service(config)?;
            service
                .clear_cache()
                .map_err(|e| CliError::Runtime(e.to_string()))?;
            match mode {
                OutputMode::Human => println!("Cache cleared: {}", cache.dir().display()),
                OutputMode::Json => write_json_line(&json!({
                    "command": "cache clear",
                    "path": cache.dir().to_string_lossy(),
                    "cleared": true,
                }))?,
            }
        }
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "config path",
                    "path": path.to_string_lossy(),
                    "exists": exists,
                }))?,
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;
            let hash = config
                .stable_hash()
                .map_err(|e| CliError::Internal(e.to_string()))?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("# hash: {hash}");
                    println!("{toml_str}");
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "config show",
                    "hash": hash,
                    "config": serde_json::to_value(&config)?,
                }))?,
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// output helpers
// ---------------------------------------------------------------------------

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn truncate_path(path: &Path, max_len: usize) -> String {
    let s = path.to_string_lossy();
    let count = s.chars().count();
    if count <= max_len {
        s.into_owned()
    } else {
        let tail: String = s.chars().skip(count - (max_len - 3)).collect();
        format!("...{tail}")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DSC_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
