//! Containers → staging files → decoded output, resumable per container.
//!
//! Each container moves `Pending → Staged` exactly once: its text is written
//! to `<output>.<n>.b64` under a temporary name, renamed into place, and only
//! then is its bit in `<output>.bitmap` set.  A bit is therefore never set
//! for a container whose staging file is incomplete.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::codec;
use crate::config::TransferConfig;
use crate::manifest::{Manifest, ManifestError, ProgressBitmap};
use crate::pageio::{ContainerPosition, PageIo, ProgressRenderer};
use crate::reader::SequentialMultiFileReader;

use super::{with_suffix, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    /// Containers fetched from the backend in this run.
    pub retrieved:     usize,
    /// Containers already staged by an earlier run.
    pub reused:        usize,
    pub bytes_written: u64,
}

pub struct DownloadOrchestrator<'a> {
    backend:  &'a dyn Backend,
    config:   TransferConfig,
    manifest: Manifest,
    output:   PathBuf,
    renderer: ProgressRenderer,
    stop:     Arc<AtomicBool>,
}

impl<'a> DownloadOrchestrator<'a> {
    /// Refuses manifests of unfinished uploads before any backend call.
    pub fn new<P: AsRef<Path>>(
        backend:  &'a dyn Backend,
        config:   TransferConfig,
        manifest: Manifest,
        output:   P,
    ) -> Result<Self, TransferError> {
        if !manifest.complete {
            return Err(TransferError::IncompleteUpload {
                name:      manifest.name.clone(),
                committed: manifest.committed(),
                expected:  manifest.container_count,
            });
        }
        if manifest.committed() != manifest.container_count {
            return Err(ManifestError::Invalid {
                path:   manifest.name.clone(),
                reason: format!(
                    "marked complete with {} of {} container ids",
                    manifest.committed(),
                    manifest.container_count
                ),
            }.into());
        }
        config.validate()?;

        let renderer = ProgressRenderer::for_terminal(config.show_progress);
        Ok(Self {
            backend,
            config,
            manifest,
            output: output.as_ref().to_owned(),
            renderer,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Load the manifest at `manifest_path` and build an orchestrator for it.
    pub fn from_manifest_file<P: AsRef<Path>, Q: AsRef<Path>>(
        backend:       &'a dyn Backend,
        config:        TransferConfig,
        manifest_path: P,
        output:        Q,
    ) -> Result<Self, TransferError> {
        let manifest = Manifest::load(manifest_path)?;
        Self::new(backend, config, manifest, output)
    }

    pub fn renderer(mut self, renderer: ProgressRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Stop before the next container once `stop` is raised; staged
    /// containers are kept for the next run.
    pub fn stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn bitmap_path(&self) -> PathBuf {
        with_suffix(&self.output, ".bitmap")
    }

    /// Staging file of container `index` (0-based); named 1-based on disk.
    pub fn staging_path(&self, index: usize) -> PathBuf {
        with_suffix(&self.output, &format!(".{}.b64", index + 1))
    }

    pub fn run(&mut self) -> Result<DownloadReport, TransferError> {
        let total = self.manifest.container_count;
        let mut bitmap = ProgressBitmap::load_or_create(self.bitmap_path(), total)?;

        // A staged flag without its file cannot be trusted.
        for index in 0..total {
            if bitmap.is_set(index) && !self.staging_path(index).is_file() {
                warn!(container = index + 1, "staging file missing, fetching again");
                bitmap.clear(index)?;
            }
        }
        let reused = bitmap.count_set();
        if reused > 0 {
            info!(reused, total, "resuming download");
        }

        let outcome = self
            .retrieve(&mut bitmap)
            .and_then(|retrieved| Ok((retrieved, self.decode()?)));
        let finalized = self.finalize(&bitmap, outcome.is_ok());

        match (outcome, finalized) {
            (Ok((retrieved, bytes_written)), Ok(())) => {
                info!(output = %self.output.display(), bytes_written, "file has been decoded");
                Ok(DownloadReport { retrieved, reused, bytes_written })
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), finalized) => {
                if let Err(fe) = finalized {
                    warn!(error = %fe, "cleanup after failed download also failed");
                }
                Err(e)
            }
        }
    }

    fn retrieve(&mut self, bitmap: &mut ProgressBitmap) -> Result<usize, TransferError> {
        let total = self.manifest.container_count;
        let io = PageIo::new(self.backend, self.config.download_workers, self.config.poll_interval);
        let mut retrieved = 0;

        for index in bitmap.pending() {
            let container = index + 1;
            if self.stop.load(Ordering::SeqCst) {
                return Err(TransferError::Interrupted { container });
            }
            let id = &self.manifest.container_ids[index];
            debug!(container, %id, "opening container");
            let handle = self
                .backend
                .open_container(id)
                .map_err(|source| TransferError::Backend { container, source })?;

            let text = io
                .read_container(&handle, ContainerPosition { index: container, total }, &mut self.renderer)
                .map_err(|source| TransferError::PageIo { container, source })?;

            write_staging(&self.staging_path(index), text.as_bytes())?;
            bitmap.set(index)?;
            retrieved += 1;
            info!(container, total, chars = text.len(), "container staged");
        }
        Ok(retrieved)
    }

    /// Stream every staging file, in container order, through the decoder.
    fn decode(&self) -> Result<u64, TransferError> {
        info!("encoded file staged, starting decoding");
        let block = self.config.decode_block_chars;
        let mut reader = SequentialMultiFileReader::from_paths(
            (0..self.manifest.container_count).map(|i| self.staging_path(i)),
        );
        let mut out = BufWriter::new(File::create(&self.output)?);
        let mut written = 0u64;

        loop {
            let text = reader.read_chunk(block)?;
            if text.is_empty() {
                break;
            }
            let bytes = codec::decode(&text)?;
            out.write_all(&bytes)?;
            written += bytes.len() as u64;
            if text.len() < block {
                break;
            }
        }
        out.flush()?;
        Ok(written)
    }

    fn finalize(&self, bitmap: &ProgressBitmap, decoded: bool) -> Result<(), TransferError> {
        if decoded {
            for index in 0..self.manifest.container_count {
                remove_if_present(&self.staging_path(index))?;
            }
            bitmap.remove()?;
            debug!("staging files and bitmap removed");
        } else if bitmap.none_set() {
            bitmap.remove()?;
            debug!("nothing staged, bitmap removed");
        } else {
            info!(
                staged = bitmap.count_set(),
                total = bitmap.len(),
                bitmap = %bitmap.path().display(),
                "keeping partial download for resume"
            );
        }
        Ok(())
    }
}

fn write_staging(path: &Path, text: &[u8]) -> io::Result<()> {
    let tmp = with_suffix(path, ".tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(text)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
