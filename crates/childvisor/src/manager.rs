//! Process manager - launch and tick orchestration

use std::fs::File;
use std::os::fd::OwnedFd;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::{
    child::Process,
    config::{validate, FileKind, Params, Slot},
    error::{ProcessError, Result},
    handle::Handle,
    pipe::{PipeEndpoint, ReadPipe, WritePipe},
    reaper::Reaper,
    status::Status,
};

/// Launches children and drives their reaper.
///
/// Cloning is cheap; clones share the same [`Reaper`].
#[derive(Debug, Clone)]
pub struct ProcessManager {
    reaper: Arc<Reaper>,
}

impl ProcessManager {
    /// Manager backed by the process-wide reaper
    pub fn new() -> Self {
        Self::with_reaper(Reaper::global())
    }

    /// Manager backed by a caller-supplied reaper
    pub fn with_reaper(reaper: Arc<Reaper>) -> Self {
        Self { reaper }
    }

    pub fn reaper(&self) -> &Arc<Reaper> {
        &self.reaper
    }

    /// Launch a child, logging and discarding any failure.
    ///
    /// # Examples
    /// ```no_run
    /// use childvisor::{FileParam, Params, ProcessManager, Slot};
    ///
    /// let manager = ProcessManager::new();
    /// let params = Params::new("sh")
    ///     .args(["-c", "echo hello"])
    ///     .file(FileParam::inherit())
    ///     .file(FileParam::pipe());
    /// if let Some(mut child) = manager.create(params) {
    ///     while child.is_running() {
    ///         manager.tick();
    ///         child.poll_pipes().ok();
    ///     }
    ///     let stdout = child.read_pipe(Slot::STDOUT).unwrap();
    ///     println!("{:?}", stdout.get_line());
    /// }
    /// ```
    pub fn create(&self, params: Params) -> Option<Process> {
        let desc = params.description().to_string();
        match self.spawn(params) {
            Ok(process) => Some(process),
            Err(e) => {
                error!(desc = %desc, error = %e, "Failed to launch {}: {}", desc, e);
                None
            }
        }
    }

    /// Launch a child
    ///
    /// # Arguments
    /// * `params` - Launch parameters
    ///
    /// # Returns
    /// Owning process wrapper, registered with this manager's reaper
    pub fn spawn(&self, params: Params) -> Result<Process> {
        let desc = params.description().to_string();
        for warning in validate(&params)? {
            warn!(desc = %desc, "{}: {}", desc, warning);
        }

        debug!(
            desc = %desc,
            executable = %params.executable,
            args = ?params.args,
            "Spawning process"
        );

        // Build command
        let mut cmd = Command::new(&params.executable);
        cmd.args(&params.args);

        if let Some(ref dir) = params.cwd {
            cmd.current_dir(dir);
        }

        if params.env_clear {
            cmd.env_clear();
        }
        cmd.envs(&params.env);

        // Configure stdio
        cmd.stdin(stdio_for(&params, Slot::STDIN));
        cmd.stdout(stdio_for(&params, Slot::STDOUT));
        cmd.stderr(stdio_for(&params, Slot::STDERR));

        let mut child = cmd.spawn().map_err(ProcessError::SpawnFailed)?;
        info!(pid = child.id(), desc = %desc, "Process spawned");

        let streams = take_streams(&mut child);
        let (handle, status) =
            self.reaper
                .register(child, &desc, params.autokill, params.on_exit.clone());

        let pipes = match wire_pipes(&desc, streams) {
            Ok(pipes) => pipes,
            Err(e) => {
                // Registered already, so the next ticks still reap it
                if let Err(kill_err) = self.reaper.terminate(handle) {
                    warn!(desc = %desc, error = %kill_err, "Failed to terminate half-wired child");
                }
                return Err(e);
            }
        };

        Ok(Process::new(
            params,
            handle,
            status,
            pipes,
            Arc::clone(&self.reaper),
        ))
    }

    /// Observe child terminations; call once per host loop iteration
    pub fn tick(&self) -> usize {
        self.reaper.tick()
    }

    /// Whether the child behind `handle` was alive at the last tick
    pub fn is_running(&self, handle: Handle) -> bool {
        self.reaper.is_running(handle)
    }

    /// Last recorded status for a child still in the registry
    pub fn status(&self, handle: Handle) -> Option<Status> {
        self.reaper.status(handle)
    }

    /// SIGKILL children that ignored termination for longer than `grace`
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.reaper.escalate(grace).await
    }

    /// [`shutdown`](Self::shutdown) with the reaper's configured grace period
    pub async fn shutdown_default(&self) -> usize {
        let grace = self.reaper.config().kill_grace();
        self.shutdown(grace).await
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

fn stdio_for(params: &Params, slot: Slot) -> Stdio {
    match params.slot_kind(slot) {
        FileKind::Pipe => Stdio::piped(),
        _ => Stdio::inherit(),
    }
}

type Streams = [Option<OwnedFd>; 3];

fn take_streams(child: &mut Child) -> Streams {
    [
        child.stdin.take().map(OwnedFd::from),
        child.stdout.take().map(OwnedFd::from),
        child.stderr.take().map(OwnedFd::from),
    ]
}

fn wire_pipes(desc: &str, streams: Streams) -> Result<Vec<Option<PipeEndpoint>>> {
    let mut pipes = Vec::with_capacity(streams.len());
    for (index, fd) in streams.into_iter().enumerate() {
        let slot = Slot(index);
        let Some(fd) = fd else {
            pipes.push(None);
            continue;
        };

        let file = File::from(fd);
        let endpoint = if slot == Slot::STDIN {
            WritePipe::new(slot, desc, file).map(PipeEndpoint::Write)
        } else {
            ReadPipe::new(slot, desc, file).map(PipeEndpoint::Read)
        };
        pipes.push(Some(
            endpoint.map_err(|source| ProcessError::StreamIo { slot, source })?,
        ));
    }
    Ok(pipes)
}
