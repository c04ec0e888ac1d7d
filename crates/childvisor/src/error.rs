//! Error types for child process supervision

use std::io;
use thiserror::Error;

use crate::config::Slot;

/// Process supervision errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A file slot names a type that is recognized but not implemented,
    /// or not recognized at all
    #[error("unsupported file type '{kind}' for {slot}")]
    UnsupportedFile { slot: Slot, kind: String },

    /// A non-inherit entry was placed on a slot past stderr
    #[error("{slot} is reserved; file type '{kind}' cannot be used there")]
    ReservedSlot { slot: Slot, kind: String },

    /// Invalid launch parameters
    #[error("Invalid process configuration: {0}")]
    InvalidConfig(String),

    /// Failed to spawn process
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[source] io::Error),

    /// Requested pipe does not exist or has the wrong direction
    #[error("{0}")]
    NoPipe(String),

    /// Non-blocking pipe I/O failed for a reason other than would-block or EOF
    #[error("I/O error on {slot}: {source}")]
    StreamIo {
        slot: Slot,
        #[source]
        source: io::Error,
    },

    /// Failed to deliver a termination signal
    #[error("Failed to kill process: {0}")]
    KillFailed(String),
}

impl ProcessError {
    /// True for errors raised before any OS process was created
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFile { .. } | Self::ReservedSlot { .. } | Self::InvalidConfig(_)
        )
    }
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
