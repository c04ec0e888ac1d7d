//! Non-blocking pipe endpoints
//!
//! Each managed slot of a child is exposed as either a [`ReadPipe`] (child
//! stdout/stderr) or a [`WritePipe`] (child stdin). Both sit on a descriptor
//! in `O_NONBLOCK` mode: an attempt that cannot make progress reports
//! would-block instead of stalling the host loop.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::{
    config::Slot,
    error::{ProcessError, Result},
};

/// Bytes requested from the OS per read call
const READ_CHUNK: usize = 4096;

/// Upper bound on bytes pulled in by a single poll
const MAX_POLL_BYTES: usize = 64 * 1024;

/// Capacity of each read pipe's notification channel
const EVENT_CAPACITY: usize = 64;

/// Which way data flows, seen from the parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Parent reads what the child writes
    Read,
    /// Parent writes what the child reads
    Write,
}

impl Direction {
    /// Direction a managed pipe on `slot` gets: stdin is written, the rest are read
    pub fn for_slot(slot: Slot) -> Self {
        if slot == Slot::STDIN {
            Self::Write
        } else {
            Self::Read
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("ReadPipe"),
            Self::Write => f.write_str("WritePipe"),
        }
    }
}

/// Outcome of one [`ReadPipe::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// This many new bytes were appended to the buffer
    Data(usize),
    /// Nothing available right now; poll again on a later tick
    WouldBlock,
    /// The child closed its end
    Eof,
}

/// Notification published when a read pipe receives data or hits EOF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeEvent {
    pub slot: Slot,
    pub desc: String,
    /// Up to [`ReadPipe::limit`] bytes from the front of the buffer
    pub data: Vec<u8>,
    /// Total bytes buffered at the time of the event
    pub len: usize,
    pub eof: bool,
}

/// One managed slot of a child
#[derive(Debug)]
pub enum PipeEndpoint {
    Read(ReadPipe),
    Write(WritePipe),
}

impl PipeEndpoint {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Read(_) => Direction::Read,
            Self::Write(_) => Direction::Write,
        }
    }
}

pub(crate) fn set_nonblocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Parent side of a pipe carrying the child's output
#[derive(Debug)]
pub struct ReadPipe {
    slot: Slot,
    desc: String,
    file: File,
    buffer: Vec<u8>,
    eof: bool,
    limit: usize,
    events: broadcast::Sender<PipeEvent>,
}

impl ReadPipe {
    pub(crate) fn new(slot: Slot, desc: impl Into<String>, file: File) -> io::Result<Self> {
        set_nonblocking(&file)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            slot,
            desc: desc.into(),
            file,
            buffer: Vec::new(),
            eof: false,
            limit: 0,
            events,
        })
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Pull whatever the child has written so far into the buffer.
    ///
    /// Never blocks. Data that arrives together with EOF is reported as
    /// `Data`; the following poll reports `Eof`.
    pub fn poll(&mut self) -> Result<PollStatus> {
        if self.eof {
            return Ok(PollStatus::Eof);
        }

        let mut total = 0;
        let mut chunk = [0u8; READ_CHUNK];
        while total < MAX_POLL_BYTES {
            match self.file.read(&mut chunk) {
                Ok(0) => {
                    debug!(desc = %self.desc, slot = %self.slot, "Pipe reached EOF");
                    self.eof = true;
                    break;
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(ProcessError::StreamIo {
                        slot: self.slot,
                        source,
                    })
                }
            }
        }

        if total > 0 || self.eof {
            trace!(desc = %self.desc, slot = %self.slot, bytes = total, "Pipe poll");
            self.notify();
        }

        Ok(if total > 0 {
            PollStatus::Data(total)
        } else if self.eof {
            PollStatus::Eof
        } else {
            PollStatus::WouldBlock
        })
    }

    fn notify(&self) {
        let take = self.limit.min(self.buffer.len());
        // No subscribers is not an error
        let _ = self.events.send(PipeEvent {
            slot: self.slot,
            desc: self.desc.clone(),
            data: self.buffer[..take].to_vec(),
            len: self.buffer.len(),
            eof: self.eof,
        });
    }

    /// Receive a [`PipeEvent`] for every poll that makes progress
    pub fn subscribe(&self) -> broadcast::Receiver<PipeEvent> {
        self.events.subscribe()
    }

    /// Maximum bytes of buffered data copied into each [`PipeEvent`]
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    /// Take the next complete line, without its terminator.
    ///
    /// A partial line is held back until its `\n` arrives, or returned as-is
    /// once the child has closed the pipe.
    pub fn get_line(&mut self) -> Option<String> {
        let end = match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None if self.eof && !self.buffer.is_empty() => self.buffer.len(),
            None => return None,
        };

        let mut line: Vec<u8> = self.buffer.drain(..end).collect();
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Consume and return up to `len` bytes
    pub fn read(&mut self, len: usize) -> Vec<u8> {
        let len = len.min(self.buffer.len());
        self.buffer.drain(..len).collect()
    }

    /// Consume and return everything buffered
    pub fn read_all(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Buffered bytes in `offset..offset + len`, clamped to what is available
    pub fn peek(&self, offset: usize, len: usize) -> &[u8] {
        let start = offset.min(self.buffer.len());
        let end = start.saturating_add(len).min(self.buffer.len());
        &self.buffer[start..end]
    }

    /// Discard up to `len` bytes from the front of the buffer
    pub fn consume(&mut self, len: usize) {
        let len = len.min(self.buffer.len());
        self.buffer.drain(..len);
    }

    /// Offset of the first occurrence of `needle` in the buffer
    pub fn find(&self, needle: impl AsRef<[u8]>) -> Option<usize> {
        let needle = needle.as_ref();
        if needle.is_empty() {
            return Some(0);
        }
        self.buffer
            .windows(needle.len())
            .position(|window| window == needle)
    }

    pub fn contains(&self, needle: impl AsRef<[u8]>) -> bool {
        self.find(needle).is_some()
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True once the child has closed its end
    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

/// Parent side of a pipe feeding the child's input
#[derive(Debug)]
pub struct WritePipe {
    slot: Slot,
    desc: String,
    file: Option<File>,
    pending: Vec<u8>,
}

impl WritePipe {
    pub(crate) fn new(slot: Slot, desc: impl Into<String>, file: File) -> io::Result<Self> {
        set_nonblocking(&file)?;
        Ok(Self {
            slot,
            desc: desc.into(),
            file: Some(file),
            pending: Vec::new(),
        })
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Queue `data` and push as much as the OS accepts right now.
    ///
    /// Returns the number of bytes still pending.
    pub fn write(&mut self, data: impl AsRef<[u8]>) -> Result<usize> {
        if self.file.is_none() {
            return Err(ProcessError::StreamIo {
                slot: self.slot,
                source: io::Error::new(io::ErrorKind::BrokenPipe, "pipe already closed"),
            });
        }
        self.pending.extend_from_slice(data.as_ref());
        self.flush()
    }

    /// Push pending bytes without blocking; returns the number still pending
    pub fn flush(&mut self) -> Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(self.pending.len());
        };

        while !self.pending.is_empty() {
            match file.write(&self.pending) {
                Ok(0) => break,
                Ok(n) => {
                    self.pending.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(ProcessError::StreamIo {
                        slot: self.slot,
                        source,
                    })
                }
            }
        }

        Ok(self.pending.len())
    }

    /// Close the parent's end so the child sees EOF.
    ///
    /// Bytes the OS has not yet accepted are discarded.
    pub fn close(&mut self) -> Result<()> {
        let pending = self.flush()?;
        if pending > 0 {
            debug!(
                desc = %self.desc,
                slot = %self.slot,
                pending,
                "Closing pipe with unsent data"
            );
        }
        self.pending.clear();
        self.file = None;
        Ok(())
    }

    /// Bytes queued but not yet accepted by the OS
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}
