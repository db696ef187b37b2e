//! Upload and download orchestration.
//!
//! Both directions process containers strictly one after another; only the
//! record I/O inside a container runs in parallel.  State that must survive
//! an interruption (the manifest on upload, the bitmap and staging files on
//! download) is touched only by the orchestrating thread.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::backend::BackendError;
use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::manifest::ManifestError;
use crate::pageio::PageIoError;

pub mod download;
pub mod upload;

pub use download::{DownloadOrchestrator, DownloadReport};
pub use upload::{UploadOrchestrator, UploadReport, UploadStart};

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("upload of {name:?} is incomplete ({committed} of {expected} containers committed)")]
    IncompleteUpload { name: String, committed: usize, expected: usize },
    #[error("cannot resume upload: {0}")]
    ResumeNotSupported(String),
    #[error("source needs {actual} containers but the manifest records {expected}")]
    SourceMismatch { expected: usize, actual: usize },
    #[error("interrupted before container {container}")]
    Interrupted { container: usize },
    #[error("container {container}: {source}")]
    Backend { container: usize, source: BackendError },
    #[error("container {container}: {source}")]
    PageIo { container: usize, source: PageIoError },
}

/// `path` with `suffix` appended to its final component.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
