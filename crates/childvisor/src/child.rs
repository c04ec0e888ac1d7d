//! Owning wrapper around a supervised child

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    config::{Params, Slot, STANDARD_SLOTS},
    error::{ProcessError, Result},
    handle::Handle,
    pipe::{Direction, PipeEndpoint, ReadPipe, WritePipe},
    reaper::{Reaper, StatusCell},
    status::Status,
};

/// A launched child together with its pipes.
///
/// Created by [`ProcessManager::create`](crate::ProcessManager::create).
/// Status is refreshed only by [`Reaper::tick`]; dropping a `Process` whose
/// params have `autokill` set sends the child SIGTERM.
#[derive(Debug)]
pub struct Process {
    params: Params,
    handle: Handle,
    status: StatusCell,
    pipes: Vec<Option<PipeEndpoint>>,
    reaper: Arc<Reaper>,
}

impl Process {
    pub(crate) fn new(
        params: Params,
        handle: Handle,
        status: StatusCell,
        pipes: Vec<Option<PipeEndpoint>>,
        reaper: Arc<Reaper>,
    ) -> Self {
        Self {
            params,
            handle,
            status,
            pipes,
            reaper,
        }
    }

    /// Launch with the process-wide reaper; `None` on any failure (logged)
    pub fn create(params: Params) -> Option<Self> {
        crate::ProcessManager::new().create(params)
    }

    /// Query a child through its handle, e.g. after its `Process` was dropped.
    ///
    /// Asks whichever reaper registered the child and is only as fresh as
    /// that reaper's last tick.
    pub fn is_running_handle(handle: Handle) -> bool {
        Reaper::is_running_handle(handle)
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    /// Launch parameters this child was started with
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn desc(&self) -> &str {
        self.params.description()
    }

    /// Status as of the last tick
    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    /// Cached check; does not poll the OS
    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Request termination. Idempotent.
    ///
    /// The status changes to `Killed` only once a later tick observes the
    /// death.
    pub fn kill(&self) -> Result<()> {
        if self.status().is_terminal() {
            debug!(desc = %self.desc(), pid = self.pid(), "Kill requested for finished process");
            return Ok(());
        }
        self.reaper.terminate(self.handle).map(|_| ())
    }

    /// Canonical name of a slot ("stdin", "stdout", "stderr")
    pub fn pipe_name(slot: impl Into<Slot>) -> String {
        slot.into().name()
    }

    fn check_pipe(&self, slot: Slot, expected: Direction) -> Result<()> {
        if slot.index() >= STANDARD_SLOTS {
            return Err(ProcessError::NoPipe(format!(
                "{}: {} requested, but there is no slot {}",
                self.desc(),
                expected,
                slot.index()
            )));
        }

        match self.pipes.get(slot.index()).and_then(Option::as_ref) {
            None => Err(ProcessError::NoPipe(format!(
                "{}: {} is not a monitored pipe",
                self.desc(),
                slot
            ))),
            Some(endpoint) if endpoint.direction() != expected => Err(ProcessError::NoPipe(
                format!("{}: {} is not a {}", self.desc(), slot, expected),
            )),
            Some(_) => Ok(()),
        }
    }

    fn endpoint_mut(&mut self, slot: Slot) -> Option<&mut PipeEndpoint> {
        self.pipes.get_mut(slot.index()).and_then(Option::as_mut)
    }

    /// Pipe carrying the child's output on `slot`
    pub fn read_pipe(&mut self, slot: impl Into<Slot>) -> Result<&mut ReadPipe> {
        let slot = slot.into();
        self.check_pipe(slot, Direction::Read)?;
        match self.endpoint_mut(slot) {
            Some(PipeEndpoint::Read(pipe)) => Ok(pipe),
            _ => Err(ProcessError::NoPipe(format!("{} is not a ReadPipe", slot))),
        }
    }

    /// Pipe feeding the child's input on `slot`
    pub fn write_pipe(&mut self, slot: impl Into<Slot>) -> Result<&mut WritePipe> {
        let slot = slot.into();
        self.check_pipe(slot, Direction::Write)?;
        match self.endpoint_mut(slot) {
            Some(PipeEndpoint::Write(pipe)) => Ok(pipe),
            _ => Err(ProcessError::NoPipe(format!("{} is not a WritePipe", slot))),
        }
    }

    /// Like [`read_pipe`](Self::read_pipe), but logs the failure instead of returning it
    pub fn opt_read_pipe(&mut self, slot: impl Into<Slot>) -> Option<&mut ReadPipe> {
        let pid = self.pid();
        self.read_pipe(slot)
            .map_err(|e| warn!(pid, "{}", e))
            .ok()
    }

    /// Like [`write_pipe`](Self::write_pipe), but logs the failure instead of returning it
    pub fn opt_write_pipe(&mut self, slot: impl Into<Slot>) -> Option<&mut WritePipe> {
        let pid = self.pid();
        self.write_pipe(slot)
            .map_err(|e| warn!(pid, "{}", e))
            .ok()
    }

    /// Poll every read pipe and flush every write pipe once
    pub fn poll_pipes(&mut self) -> Result<()> {
        for endpoint in self.pipes.iter_mut().flatten() {
            match endpoint {
                PipeEndpoint::Read(pipe) => {
                    pipe.poll()?;
                }
                PipeEndpoint::Write(pipe) => {
                    pipe.flush()?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if !self.params.autokill {
            debug!(desc = %self.desc(), pid = self.pid(), "Leaving child running");
            return;
        }
        if let Err(e) = self.kill() {
            warn!(desc = %self.desc(), pid = self.pid(), error = %e, "Autokill failed");
        }
    }
}
