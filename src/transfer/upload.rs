//! File → containers, resumable at container granularity.
//!
//! ```text
//! Init ─┬─ Fresh ────┐
//!       └─ Resuming ─┴─▶ per container: Skip | EncodeAndCommit ─▶ Finalize
//! ```
//!
//! The manifest is written as soon as the first container is committed and
//! rewritten in place after every further commit, so even a killed process
//! leaves a manifest to resume from.  `Finalize` runs whether or not the loop
//! succeeded: a container that was created but not fully written is deleted
//! first, so the backend never keeps a half-filled container that no manifest
//! refers to.  A raised stop flag ends the loop between containers.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{Backend, ShareScope};
use crate::codec::BlockEncoder;
use crate::config::TransferConfig;
use crate::manifest::{compute_container_count, timestamp, Manifest};
use crate::pageio::{to_records, ContainerPosition, PageIo, ProgressRenderer};

use super::TransferError;

/// How an upload run begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStart {
    Fresh,
    /// Continuing after this many committed containers.
    Resuming { committed: usize },
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub start:         UploadStart,
    pub manifest:      Manifest,
    /// `None` when nothing was committed and no manifest was written.
    pub manifest_path: Option<PathBuf>,
    pub uploaded:      usize,
    pub skipped:       usize,
}

pub struct UploadOrchestrator<'a> {
    backend:      &'a dyn Backend,
    config:       TransferConfig,
    source:       PathBuf,
    manifest_dir: PathBuf,
    renderer:     ProgressRenderer,
    stop:         Arc<AtomicBool>,
    /// Where this run's manifest lives once first written.
    working:      Option<PathBuf>,
}

impl<'a> UploadOrchestrator<'a> {
    pub fn new<P: AsRef<Path>>(backend: &'a dyn Backend, config: TransferConfig, source: P) -> Self {
        let renderer = ProgressRenderer::for_terminal(config.show_progress);
        Self {
            backend,
            config,
            source: source.as_ref().to_owned(),
            manifest_dir: PathBuf::from("."),
            renderer,
            stop: Arc::new(AtomicBool::new(false)),
            working: None,
        }
    }

    /// Directory the manifest is written into (default: working directory).
    pub fn manifest_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.manifest_dir = dir.as_ref().to_owned();
        self
    }

    pub fn renderer(mut self, renderer: ProgressRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Stop before the next container once `stop` is raised.
    pub fn stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Upload the source.  With `resume_from`, containers already listed in
    /// that manifest are skipped.
    pub fn run(&mut self, resume_from: Option<&Path>) -> Result<UploadReport, TransferError> {
        self.working = None;
        let (start, mut manifest) = self.init(resume_from)?;
        let skipped = manifest.committed();

        let mut in_flight = None;
        let mut uploaded = 0;
        let outcome = self.transfer(&mut manifest, &mut in_flight, &mut uploaded);
        let finalized = self.finalize(&manifest, in_flight);

        match (outcome, finalized) {
            (Ok(()), Ok(manifest_path)) => {
                info!(name = %manifest.name, uploaded, skipped, complete = manifest.complete, "upload finished");
                Ok(UploadReport { start, manifest, manifest_path, uploaded, skipped })
            }
            (Ok(()), Err(e)) => Err(e),
            (Err(e), finalized) => {
                if let Err(fe) = finalized {
                    warn!(error = %fe, "manifest could not be written after failure");
                }
                warn!(
                    error = %e,
                    committed = manifest.committed(),
                    expected = manifest.container_count,
                    "upload interrupted; file may not have been uploaded completely"
                );
                Err(e)
            }
        }
    }

    /// Everything that can fail without touching the backend.
    fn init(&self, resume_from: Option<&Path>) -> Result<(UploadStart, Manifest), TransferError> {
        self.config.validate()?;

        let meta = fs::metadata(&self.source)?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", self.source.display()),
            ).into());
        }
        let needed = compute_container_count(meta.len(), self.config.container_capacity());

        match resume_from {
            Some(path) => {
                let manifest = Manifest::load(path)?;
                manifest
                    .ensure_supported()
                    .map_err(|e| TransferError::ResumeNotSupported(e.to_string()))?;
                if manifest.container_count != needed {
                    return Err(TransferError::SourceMismatch {
                        expected: manifest.container_count,
                        actual:   needed,
                    });
                }
                info!(
                    manifest = %path.display(),
                    committed = manifest.committed(),
                    total = manifest.container_count,
                    "resuming upload"
                );
                Ok((UploadStart::Resuming { committed: manifest.committed() }, manifest))
            }
            None => {
                let name = self
                    .source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?;
                info!(%name, bytes = meta.len(), containers = needed, "performing fresh upload");
                Ok((UploadStart::Fresh, Manifest::new(name, needed)))
            }
        }
    }

    fn transfer(
        &mut self,
        manifest:  &mut Manifest,
        in_flight: &mut Option<String>,
        uploaded:  &mut usize,
    ) -> Result<(), TransferError> {
        let total = manifest.container_count;
        let committed = manifest.committed();

        let mut encoder = BlockEncoder::new(File::open(&self.source)?, self.config.container_capacity());
        if committed > 0 {
            encoder.skip_blocks(committed)?;
        }
        let io = PageIo::new(self.backend, self.config.upload_workers, self.config.poll_interval);

        for index in 1..=total {
            if index <= committed {
                info!(container = index, total, "already committed, skipping");
                continue;
            }
            if self.stop.load(Ordering::SeqCst) {
                return Err(TransferError::Interrupted { container: index });
            }

            let text = encoder.next_block()?.ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "source ended before the last container")
            })?;
            let records = to_records(&text, self.config.chars_per_record);

            let name = format!("{} {} {}", manifest.name, index, timestamp());
            info!(container = index, total, %name, "creating container");
            let handle = self
                .backend
                .create_container(&name)
                .map_err(|source| TransferError::Backend { container: index, source })?;
            *in_flight = Some(handle.id.clone());

            self.backend
                .share_container(&handle, ShareScope::AnyoneReader)
                .map_err(|source| TransferError::Backend { container: index, source })?;

            debug!(container = index, records = records.len(), "writing records");
            io.write_container(&handle, &records, ContainerPosition { index, total }, &mut self.renderer)
                .map_err(|source| TransferError::PageIo { container: index, source })?;

            manifest.commit(handle.id);
            *in_flight = None;
            *uploaded += 1;
            self.checkpoint(manifest)?;
            info!(container = index, total, "container uploaded");
        }
        Ok(())
    }

    /// Bring the on-disk manifest up to date with the committed list.
    fn checkpoint(&mut self, manifest: &Manifest) -> Result<(), TransferError> {
        if let Some(path) = &self.working {
            manifest.save(path)?;
        } else {
            self.working = Some(manifest.persist(&self.manifest_dir)?);
        }
        Ok(())
    }

    fn finalize(&self, manifest: &Manifest, in_flight: Option<String>) -> Result<Option<PathBuf>, TransferError> {
        if let Some(id) = in_flight {
            warn!(%id, "deleting partially written container");
            if let Err(e) = self.backend.delete_container(&id) {
                warn!(%id, error = %e, "could not delete partially written container");
            }
        }

        let path = match &self.working {
            Some(path) => {
                manifest.save(path)?;
                path.clone()
            }
            // An empty blob is complete with zero containers and still gets a
            // manifest so it can be downloaded.
            None if manifest.container_ids.is_empty() && !manifest.complete => {
                debug!("nothing committed, not writing a manifest");
                return Ok(None);
            }
            None => manifest.persist(&self.manifest_dir)?,
        };
        info!(path = %path.display(), complete = manifest.complete, "manifest written");
        Ok(Some(path))
    }
}
