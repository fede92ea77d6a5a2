//! Shared mock infrastructure: env file fixtures, filesystem doubles and a
//! command runner that records instead of spawning.

#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use environ_agent::{
    CommandRunner, ConfigStore, Dispatcher, ExecError, ExecPolicy, FileSystem, NodeIdentity,
    Shell, TokioFs,
};
use tempfile::TempDir;

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Temp dir holding a `.env` with `content`. Keep the `TempDir` alive.
pub fn env_file(content: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(".env");
    std::fs::write(&path, content).expect("write fixture");
    (dir, path)
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).expect("read env file")
}

pub fn node() -> NodeIdentity {
    NodeIdentity {
        hostname: "web-1".to_string(),
        node_name: "orion_minion".to_string(),
        node_type: "api".to_string(),
    }
}

/// Dispatcher over a real env file with a recording runner.
pub async fn dispatcher(path: &Path, runner: RecordingRunner) -> Dispatcher<TokioFs, RecordingRunner> {
    dispatcher_with_policy(path, runner, ExecPolicy::default()).await
}

pub async fn dispatcher_with_policy(
    path: &Path,
    runner: RecordingRunner,
    policy: ExecPolicy,
) -> Dispatcher<TokioFs, RecordingRunner> {
    let store = ConfigStore::open(path).await.expect("open store");
    Dispatcher::new(store, Shell::new(runner, policy), node())
}

// ── Output helpers ────────────────────────────────────────────────────────────

#[cfg(unix)]
pub fn exit_status(code: i32) -> std::process::ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    std::process::ExitStatus::from_raw(code << 8)
}

#[cfg(windows)]
pub fn exit_status(code: i32) -> std::process::ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    #[allow(clippy::cast_sign_loss)]
    std::process::ExitStatus::from_raw(code as u32)
}

pub fn ok_output(stdout: &[u8]) -> Output {
    Output {
        status: exit_status(0),
        stdout: stdout.to_vec(),
        stderr: Vec::new(),
    }
}

pub fn err_output(code: i32, stderr: &[u8]) -> Output {
    Output {
        status: exit_status(code),
        stdout: Vec::new(),
        stderr: stderr.to_vec(),
    }
}

// ── Mock: command runner ──────────────────────────────────────────────────────

/// Returns a canned output and records every command it is asked to run.
/// Clones share the record.
#[derive(Clone)]
pub struct RecordingRunner {
    output: Output,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingRunner {
    pub fn new(output: Output) -> Self {
        Self {
            output,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn silent() -> Self {
        Self::new(ok_output(b""))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl CommandRunner for RecordingRunner {
    async fn run_shell(&self, cmd: &str) -> Result<Output, ExecError> {
        self.calls.lock().expect("calls lock").push(cmd.to_string());
        Ok(self.output.clone())
    }
}

// ── Mock: filesystem ──────────────────────────────────────────────────────────

/// Real filesystem whose whole-file replace always fails.
#[derive(Default)]
pub struct ReplaceFailsFs {
    pub replaces: AtomicUsize,
}

impl FileSystem for ReplaceFailsFs {
    async fn is_file(&self, path: &Path) -> bool {
        TokioFs.is_file(path).await
    }
    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        TokioFs.read_to_string(path).await
    }
    async fn append(&self, path: &Path, data: &str) -> io::Result<()> {
        TokioFs.append(path, data).await
    }
    async fn replace(&self, _: &Path, _: &str) -> io::Result<()> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only filesystem"))
    }
}

/// Real filesystem that counts reads and writes. Clones share counters, so
/// a test can keep one while the store owns another.
#[derive(Clone, Default)]
pub struct CountingFs {
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl CountingFs {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl FileSystem for CountingFs {
    async fn is_file(&self, path: &Path) -> bool {
        TokioFs.is_file(path).await
    }
    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        TokioFs.read_to_string(path).await
    }
    async fn append(&self, path: &Path, data: &str) -> io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        TokioFs.append(path, data).await
    }
    async fn replace(&self, path: &Path, data: &str) -> io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        TokioFs.replace(path, data).await
    }
}
