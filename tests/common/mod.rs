#![allow(dead_code)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub const MIB: u64 = 1024 * 1024;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_dscope") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "dscope.exe" } else { "dscope" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve dscope binary path for integration test"),
    }
}

/// Run `dscope` with `args`, keeping a transcript under the temp dir.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("dscope-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("DSC_OUTPUT_FORMAT")
        .output()
        .expect("execute dscope command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Write a config file that keeps the cache and activity log inside `dir`.
pub fn write_isolated_config(dir: &Path) -> PathBuf {
    let config_path = dir.join("config.toml");
    let body = format!(
        "[cache]\ndir = {:?}\n\n[paths]\nactivity_log = {:?}\n",
        dir.join("cache").to_string_lossy(),
        dir.join("activity.jsonl").to_string_lossy(),
    );
    fs::write(&config_path, body).expect("write config");
    config_path
}

/// Create a sparse file of `len` bytes, creating parents as needed.
pub fn sparse_file(path: &Path, len: u64) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    File::create(path)
        .and_then(|f| f.set_len(len))
        .expect("create sparse file");
}

/// `count` sibling directories, each holding one small file.
pub fn wide_tree(root: &Path, count: usize) {
    for i in 0..count {
        sparse_file(&root.join(format!("dir{i:04}")).join("f.txt"), 1);
    }
}
