//! Lifetime-independent process identifier

use std::fmt;

/// Opaque identifier for a spawned child.
///
/// A `Handle` stays valid after the owning [`Process`](crate::Process) is
/// dropped, so a child launched with `autokill = false` can still be queried
/// through [`ProcessManager::is_running`](crate::ProcessManager::is_running)
/// or [`Process::is_running_handle`](crate::Process::is_running_handle).
///
/// Besides the pid it records which reaper registered the child and under
/// which registration id, so a handle outliving its child never matches a
/// later child that happens to reuse the pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    reaper: u64,
    id: u64,
    pid: u32,
}

impl Handle {
    pub(crate) fn new(reaper: u64, id: u64, pid: u32) -> Self {
        Self { reaper, id, pid }
    }

    /// OS process ID
    pub fn pid(self) -> u32 {
        self.pid
    }

    pub(crate) fn reaper_id(self) -> u64 {
        self.reaper
    }

    pub(crate) fn registration_id(self) -> u64 {
        self.id
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.pid)
    }
}
