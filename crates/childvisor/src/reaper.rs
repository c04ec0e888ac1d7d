//! Registry of in-flight children, refreshed by the host's tick
//!
//! Nothing here ever waits for a child. The host calls [`Reaper::tick`] once
//! per iteration of its main loop; each tick polls every registered child
//! with a non-blocking wait, records the decoded [`Status`] of any that have
//! terminated and sweeps them out of the table.

use std::collections::{BTreeMap, HashMap};
use std::process::Child;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::{
    error::{ProcessError, Result},
    handle::Handle,
    status::Status,
};

/// SIGKILL escalation delay (200ms)
const DEFAULT_KILL_GRACE_MS: u64 = 200;

/// Status recorded when a child disappears without us reaping it
const LOST_CHILD_CODE: i32 = -1;

static GLOBAL: Lazy<Arc<Reaper>> = Lazy::new(|| Arc::new(Reaper::new(ReaperConfig::default())));

static NEXT_REAPER_ID: AtomicU64 = AtomicU64::new(1);

/// Registries of every live reaper, so a bare [`Handle`] finds its own
static DIRECTORY: Lazy<Mutex<HashMap<u64, Weak<Mutex<Registry>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Status shared between the registry and the owning `Process`
pub(crate) type StatusCell = Arc<Mutex<Status>>;

/// Sent through [`Params::on_exit`](crate::Params::on_exit) when a child is reaped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitEvent {
    pub handle: Handle,
    pub desc: String,
    pub status: Status,
}

/// Reaper tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// How long a terminated child gets before SIGKILL
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_kill_grace_ms() -> u64 {
    DEFAULT_KILL_GRACE_MS
}

impl ReaperConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
        }
    }
}

#[derive(Debug)]
struct WaitRecord {
    handle: Handle,
    desc: String,
    child: Child,
    status: StatusCell,
    autokill: bool,
    kill_requested: bool,
    on_exit: Option<UnboundedSender<ExitEvent>>,
    /// Marked during a tick, swept after the traversal
    reaped: bool,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    entries: BTreeMap<u64, WaitRecord>,
}

impl Registry {
    /// Registration ids are never reused, so a stale handle misses here
    /// even when its pid now belongs to another child
    fn live_mut(&mut self, handle: Handle) -> Option<&mut WaitRecord> {
        self.entries
            .get_mut(&handle.registration_id())
            .filter(|record| record.handle == handle && !record.reaped)
    }

    fn sweep(&mut self) {
        self.entries.retain(|_, record| {
            if record.reaped {
                debug!(desc = %record.desc, pid = record.handle.pid(), "Unregistered child");
            }
            !record.reaped
        });
    }
}

/// Process-wide table of children awaiting reaping
#[derive(Debug)]
pub struct Reaper {
    id: u64,
    config: ReaperConfig,
    registry: Arc<Mutex<Registry>>,
}

impl Reaper {
    pub fn new(config: ReaperConfig) -> Self {
        let id = NEXT_REAPER_ID.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::new(Mutex::new(Registry::default()));
        DIRECTORY.lock().insert(id, Arc::downgrade(&registry));
        Self {
            id,
            config,
            registry,
        }
    }

    /// Whether the child behind `handle` was alive at the last tick of the
    /// reaper that registered it, wherever that reaper lives.
    ///
    /// False once that reaper has been dropped.
    pub fn is_running_handle(handle: Handle) -> bool {
        let registry = DIRECTORY
            .lock()
            .get(&handle.reaper_id())
            .and_then(Weak::upgrade);
        match registry {
            Some(registry) => registry.lock().live_mut(handle).is_some(),
            None => false,
        }
    }

    /// Shared instance, created on first use
    pub fn global() -> Arc<Reaper> {
        Arc::clone(&GLOBAL)
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    pub(crate) fn register(
        &self,
        child: Child,
        desc: &str,
        autokill: bool,
        on_exit: Option<UnboundedSender<ExitEvent>>,
    ) -> (Handle, StatusCell) {
        let status: StatusCell = Arc::new(Mutex::new(Status::RUNNING));

        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        let handle = Handle::new(self.id, id, child.id());
        registry.entries.insert(
            id,
            WaitRecord {
                handle,
                desc: desc.to_string(),
                child,
                status: Arc::clone(&status),
                autokill,
                kill_requested: false,
                on_exit,
                reaped: false,
            },
        );
        debug!(desc = %desc, pid = handle.pid(), id, "Registered child");

        (handle, status)
    }

    /// Observe terminations since the last tick.
    ///
    /// Returns the number of children reaped.
    pub fn tick(&self) -> usize {
        let mut registry = self.registry.lock();
        let mut reaped = 0;

        for record in registry.entries.values_mut() {
            if record.reaped {
                continue;
            }

            let status = match record.child.try_wait() {
                Ok(None) => continue,
                Ok(Some(exit)) => Status::from_exit_status(exit),
                Err(e) => {
                    warn!(
                        desc = %record.desc,
                        pid = record.handle.pid(),
                        error = %e,
                        "Lost track of child"
                    );
                    Status::exited(LOST_CHILD_CODE)
                }
            };

            info!(
                desc = %record.desc,
                pid = record.handle.pid(),
                "{} {}",
                record.desc,
                status
            );

            *record.status.lock() = status;
            record.reaped = true;
            reaped += 1;

            if let Some(sender) = record.on_exit.take() {
                // The listener may have gone away
                let _ = sender.send(ExitEvent {
                    handle: record.handle,
                    desc: record.desc.clone(),
                    status,
                });
            }
        }

        registry.sweep();
        reaped
    }

    /// Whether `handle` was still alive at the last tick
    pub fn is_running(&self, handle: Handle) -> bool {
        self.registry.lock().live_mut(handle).is_some()
    }

    /// Last recorded status for a child that has not been swept yet
    pub fn status(&self, handle: Handle) -> Option<Status> {
        let mut registry = self.registry.lock();
        registry.live_mut(handle).map(|record| *record.status.lock())
    }

    /// Number of children not yet reaped
    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send `signal` to a registered child.
    ///
    /// Returns false when the child is unknown or already reaped.
    pub fn signal(&self, handle: Handle, signal: Signal) -> Result<bool> {
        let mut registry = self.registry.lock();
        let Some(record) = registry.live_mut(handle) else {
            return Ok(false);
        };

        match kill(Pid::from_raw(handle.pid() as i32), signal) {
            Ok(()) => {
                debug!(desc = %record.desc, pid = handle.pid(), signal = signal.as_str(), "Sent signal");
                if matches!(signal, Signal::SIGTERM | Signal::SIGKILL) {
                    record.kill_requested = true;
                }
                Ok(true)
            }
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => {
                warn!(desc = %record.desc, pid = handle.pid(), error = %e, "Failed to signal child");
                Err(ProcessError::KillFailed(format!("{}: {}", record.desc, e)))
            }
        }
    }

    /// Ask a child to terminate (SIGTERM). Does not wait.
    pub fn terminate(&self, handle: Handle) -> Result<bool> {
        self.signal(handle, Signal::SIGTERM)
    }

    /// SIGKILL every child that was asked to terminate and is still alive
    /// after `grace`.
    ///
    /// Children launched with `autokill = false` are only touched if someone
    /// explicitly killed them. Returns the number of children force-killed.
    pub async fn escalate(&self, grace: Duration) -> usize {
        if !self.has_pending_kills() {
            return 0;
        }

        tokio::time::sleep(grace).await;
        self.tick();

        let pending: Vec<Handle> = {
            let registry = self.registry.lock();
            registry
                .entries
                .values()
                .filter(|record| record.kill_requested && !record.reaped)
                .map(|record| record.handle)
                .collect()
        };

        let mut killed = 0;
        for handle in pending {
            match self.signal(handle, Signal::SIGKILL) {
                Ok(true) => killed += 1,
                Ok(false) => {}
                Err(e) => warn!(pid = handle.pid(), error = %e, "SIGKILL escalation failed"),
            }
        }
        killed
    }

    /// Terminate every autokill child, then escalate after `grace`.
    ///
    /// Meant for application exit; children launched with
    /// `autokill = false` are left running.
    pub async fn teardown(&self, grace: Duration) -> usize {
        let autokill: Vec<Handle> = {
            let registry = self.registry.lock();
            registry
                .entries
                .values()
                .filter(|record| record.autokill && !record.reaped)
                .map(|record| record.handle)
                .collect()
        };

        for handle in autokill {
            if let Err(e) = self.terminate(handle) {
                warn!(pid = handle.pid(), error = %e, "Teardown could not terminate child");
            }
        }

        self.escalate(grace).await
    }

    fn has_pending_kills(&self) -> bool {
        self.registry
            .lock()
            .entries
            .values()
            .any(|record| record.kill_requested && !record.reaped)
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        DIRECTORY.lock().remove(&self.id);
    }
}

impl Default for Reaper {
    fn default() -> Self {
        Self::new(ReaperConfig::default())
    }
}
