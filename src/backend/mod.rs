//! Record/container store capability surface.
//!
//! The transfer core never talks to a concrete service.  It receives an
//! already-authorized `&dyn Backend` and drives it through the six calls
//! below.  Record indices are 1-based and ranges are inclusive, matching the
//! `A1:A1000` addressing of the spreadsheet stores this layout was built for.
//!
//! Two implementations ship with the crate:
//! - [`MemoryBackend`]: in-process, enforces limits, counts calls and can be
//!   armed to fail; used by the test suite.
//! - [`LocalBackend`]: one directory per container, one file per record; used
//!   by the CLI.

use std::io;

use thiserror::Error;

pub mod local;
pub mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

// ── Types ────────────────────────────────────────────────────────────────────

/// Opaque reference to one remote container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id:      String,
    pub name:    String,
    /// Populated records: the highest record index written so far.
    pub records: usize,
}

/// Visibility granted by [`Backend::share_container`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareScope {
    /// Anyone holding the id may read.
    AnyoneReader,
}

impl ShareScope {
    pub fn name(self) -> &'static str {
        match self {
            ShareScope::AnyoneReader => "anyone:reader",
        }
    }
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("records {start}..={end} outside container bounds 1..={limit}")]
    OutOfRange { start: usize, end: usize, limit: usize },
    #[error("record {index} holds {len} characters, limit is {limit}")]
    RecordTooLong { index: usize, len: usize, limit: usize },
    #[error("backend rejected request: {0}")]
    Rejected(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Capability trait ─────────────────────────────────────────────────────────

pub trait Backend: Send + Sync {
    fn create_container(&self, name: &str) -> Result<ContainerHandle, BackendError>;
    fn share_container(&self, handle: &ContainerHandle, scope: ShareScope) -> Result<(), BackendError>;
    fn delete_container(&self, id: &str) -> Result<(), BackendError>;
    fn open_container(&self, id: &str) -> Result<ContainerHandle, BackendError>;
    /// Records `start..=end`; unwritten records come back as empty strings.
    fn read_record_range(&self, handle: &ContainerHandle, start: usize, end: usize)
        -> Result<Vec<String>, BackendError>;
    /// Overwrite records `start..start + records.len()`.
    fn write_record_batch(&self, handle: &ContainerHandle, start: usize, records: &[String])
        -> Result<(), BackendError>;
}

/// Shared bounds check for implementations with a fixed record limit.
pub(crate) fn check_range(start: usize, end: usize, limit: usize) -> Result<(), BackendError> {
    if start == 0 || end < start || end > limit {
        return Err(BackendError::OutOfRange { start, end, limit });
    }
    Ok(())
}

/// Shared record length check; lengths are counted in characters.
pub(crate) fn check_records(start: usize, records: &[String], max_chars: usize) -> Result<(), BackendError> {
    for (offset, record) in records.iter().enumerate() {
        let len = record.chars().count();
        if len > max_chars {
            return Err(BackendError::RecordTooLong { index: start + offset, len, limit: max_chars });
        }
    }
    Ok(())
}
