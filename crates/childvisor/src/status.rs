//! Normalized child status and decoding of raw wait data

use std::fmt;
use std::process::ExitStatus;

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

/// Lifecycle state of a child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Not launched yet
    Unstarted,
    /// Launched and not yet observed to terminate
    Running,
    /// Terminated normally; `data` holds the exit code
    Exited,
    /// Terminated by a signal; `data` holds the signal number
    Killed,
}

/// Child state plus its associated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    pub state: State,
    pub data: i32,
}

impl Status {
    pub const UNSTARTED: Status = Status {
        state: State::Unstarted,
        data: 0,
    };

    pub const RUNNING: Status = Status {
        state: State::Running,
        data: 0,
    };

    pub fn exited(code: i32) -> Self {
        Self {
            state: State::Exited,
            data: code,
        }
    }

    pub fn killed(signal: i32) -> Self {
        Self {
            state: State::Killed,
            data: signal,
        }
    }

    /// Exited or Killed
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, State::Exited | State::Killed)
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    /// Decode the raw status word a Unix `wait` call reports.
    ///
    /// Anything that is neither a normal exit nor a signal death is
    /// reported as `Exited` carrying the raw value.
    pub fn from_raw(raw: i32) -> Self {
        match WaitStatus::from_raw(Pid::from_raw(0), raw) {
            Ok(WaitStatus::Exited(_, code)) => Self::exited(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => Self::killed(signal as i32),
            _ => Self::exited(raw),
        }
    }

    /// Decode a status obtained from `std::process::Child::try_wait`
    pub fn from_exit_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        Self::from_raw(status.into_raw())
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::UNSTARTED
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            State::Unstarted => f.write_str("not started"),
            State::Running => f.write_str("running"),
            State::Exited => write!(f, "exited with code {}", self.data),
            State::Killed => match Signal::try_from(self.data) {
                Ok(signal) => write!(f, "killed by signal {} ({})", self.data, signal.as_str()),
                Err(_) => write!(f, "killed by signal {}", self.data),
            },
        }
    }
}
