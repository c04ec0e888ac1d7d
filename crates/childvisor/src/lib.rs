//! # childvisor
//!
//! **Purpose**: Child process supervision for long-running interactive hosts
//!
//! Spawns helper processes, exchanges data with them over non-blocking pipes,
//! observes their termination and optionally kills them, without ever
//! blocking the host's main loop.
//!
//! ## Features
//!
//! - **Launch validation**: unsupported slot wiring is rejected before any OS
//!   process exists
//! - **Non-blocking pipes**: reads and writes report would-block instead of
//!   stalling; partial lines are buffered across polls
//! - **Tick-driven reaping**: the host calls `tick()` once per loop iteration
//!   and terminated children are observed there
//! - **Lifetime-independent handles**: a child launched with `autokill = false`
//!   can still be queried after its owner is gone
//! - **Autokill**: dropping a `Process` terminates its child unless disabled
//!
//! ## Usage
//!
//! ```rust,no_run
//! use childvisor::{FileParam, Params, ProcessManager, Slot, State};
//!
//! let manager = ProcessManager::new();
//!
//! let params = Params::new("sh")
//!     .args(["-c", "echo ready; exit 2"])
//!     .file(FileParam::inherit())
//!     .file(FileParam::pipe());
//!
//! let mut child = manager.create(params).expect("launch failed");
//!
//! // Host main loop
//! while child.is_running() {
//!     manager.tick();
//!     child.poll_pipes().ok();
//! }
//!
//! assert_eq!(child.status().state, State::Exited);
//! assert_eq!(child.status().data, 2);
//! let stdout = child.read_pipe(Slot::STDOUT).unwrap();
//! stdout.poll().ok();
//! assert_eq!(stdout.get_line().as_deref(), Some("ready"));
//! ```

#[cfg(not(unix))]
compile_error!("childvisor requires a Unix platform");

pub mod child;
pub mod config;
pub mod error;
pub mod handle;
pub mod manager;
pub mod pipe;
pub mod reaper;
pub mod status;

pub use child::Process;
pub use config::{validate, FileKind, FileParam, Params, Slot, ValidationWarning, STANDARD_SLOTS};
pub use error::{ProcessError, Result};
pub use handle::Handle;
pub use manager::ProcessManager;
pub use pipe::{Direction, PipeEndpoint, PipeEvent, PollStatus, ReadPipe, WritePipe};
pub use reaper::{ExitEvent, Reaper, ReaperConfig};
pub use status::{State, Status};
