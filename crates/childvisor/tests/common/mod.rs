//! Shared helpers for childvisor integration tests

#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use childvisor::{Handle, Params, Process, ProcessManager, Reaper};
use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// Simulated frame length between ticks
pub const FRAME: Duration = Duration::from_millis(50);

/// Upper bound for anything a test waits on
pub const PATIENCE: Duration = Duration::from_secs(20);

/// Manager with its own reaper, isolated from other tests
pub fn manager() -> ProcessManager {
    ProcessManager::with_reaper(Arc::new(Reaper::default()))
}

/// `sh -c <script> sh <args...>`: inside the script `$1` is the first extra arg
pub fn sh(script: &str) -> Params {
    Params::new("sh").args(["-c", script, "sh"])
}

/// One simulated host frame: sleep, then tick
pub fn frame(manager: &ProcessManager) {
    sleep(FRAME);
    manager.tick();
}

pub fn wait_for(manager: &ProcessManager, process: &Process) {
    let deadline = Instant::now() + PATIENCE;
    while process.is_running() {
        assert!(Instant::now() < deadline, "{} never terminated", process.desc());
        frame(manager);
    }
}

pub fn wait_for_handle(manager: &ProcessManager, handle: Handle) {
    let deadline = Instant::now() + PATIENCE;
    while manager.is_running(handle) {
        assert!(Instant::now() < deadline, "{} never terminated", handle);
        frame(manager);
    }
}

/// Tick until `path` holds `expected` (ignoring surrounding whitespace)
pub fn wait_for_contents(manager: &ProcessManager, path: &Path, expected: &str) {
    let deadline = Instant::now() + PATIENCE;
    while read_trimmed(path) != expected {
        assert!(
            Instant::now() < deadline,
            "{} never contained {:?}",
            path.display(),
            expected
        );
        frame(manager);
    }
}

pub fn read_trimmed(path: &Path) -> String {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Collects formatted log output in memory
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl LogCapture {
    pub fn messages(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.buffer.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Most recent message containing `needle`
    pub fn message_with(&self, needle: &str) -> Option<String> {
        self.messages()
            .into_iter()
            .rev()
            .find(|message| message.contains(needle))
    }
}

/// Run `f` with a subscriber that records everything at DEBUG and above
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, LogCapture) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, capture)
}
