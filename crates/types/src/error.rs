use std::io;

use thiserror::Error;

/// A configuration parameter outside its accepted range. Blocks
/// initialization; nothing is partially applied.
#[derive(Debug, Error)]
#[error("invalid {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub reason: &'static str,
}

impl ConfigError {
    pub fn new(key: &'static str, reason: &'static str) -> Self {
        Self { key, reason }
    }
}

/// Memory subsystem failures. Everything except `Backing` is recoverable at
/// the instruction boundary; a backing-store I/O failure is fatal and
/// triggers a graceful scheduler stop.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("process {0} already has memory allocated")]
    AlreadyAllocated(u32),

    #[error("process {0} has no memory allocated")]
    NoMapping(u32),

    #[error("virtual memory size {requested} below minimum {minimum}")]
    UndersizedAllocation { requested: usize, minimum: usize },

    #[error("address {addr:#x} out of range for process {pid}")]
    OutOfRange { pid: u32, addr: u32 },

    #[error("backing store I/O failure: {0}")]
    Backing(#[from] io::Error),
}

impl MemoryError {
    /// True for failures that must stop the emulator rather than be
    /// swallowed at the instruction boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MemoryError::Backing(_))
    }
}
