//! Concurrent record I/O for one container.
//!
//! # Work division
//! A container's `n` records are split across `w` workers with integer range
//! division: worker `k` gets `n*k/w + 1 ..= n*(k+1)/w` (1-based).  The
//! ranges are disjoint, ordered and tile `1..=n` exactly for every `n` and
//! `w ≥ 1`.  Each worker issues one backend call for its whole range.
//!
//! # Progress
//! Workers report finished record counts over a channel.  The calling thread
//! acts as coordinator: it waits on the channel with a timeout, folds counts
//! into a running total, redraws the progress line, and returns only once
//! every worker has exited and the channel is empty.
//!
//! # Failures
//! All workers are joined before anything is reported.  The first failure in
//! range order is returned; ranges other workers already committed stay
//! committed.

use std::fmt;
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, trace};

use crate::backend::{Backend, BackendError, ContainerHandle};
use crate::codec;

pub mod progress;

pub use progress::{Frame, ProgressRenderer};

/// Leading character of every stored record.  It stops spreadsheet-like
/// stores from interpreting encoded text (e.g. a leading `+` or `=`).
pub const RECORD_MARKER: char = '\'';

// ── Ranges ───────────────────────────────────────────────────────────────────

/// 1-based inclusive record range.  Empty when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRange {
    pub start: usize,
    pub end:   usize,
}

impl RecordRange {
    pub fn len(&self) -> usize {
        (self.end + 1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

impl fmt::Display for RecordRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Divide records `1..=records` among `workers` workers.
pub fn partition(records: usize, workers: usize) -> Vec<RecordRange> {
    let workers = workers.max(1);
    (0..workers)
        .map(|k| RecordRange {
            start: records * k / workers + 1,
            end:   records * (k + 1) / workers,
        })
        .collect()
}

// ── Records ──────────────────────────────────────────────────────────────────

/// Split one container's encoded text into marker-prefixed records.
pub fn to_records(text: &str, chars_per_record: usize) -> Vec<String> {
    codec::chunk(text, chars_per_record)
        .map(|piece| {
            let mut record = String::with_capacity(piece.len() + 1);
            record.push(RECORD_MARKER);
            record.push_str(piece);
            record
        })
        .collect()
}

/// Payload of a stored record.  Empty records carry nothing.
pub fn strip_record(index: usize, record: &str) -> Result<&str, PageIoError> {
    if record.is_empty() {
        return Ok("");
    }
    record
        .strip_prefix(RECORD_MARKER)
        .ok_or(PageIoError::MalformedRecord { index })
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PageIoError {
    #[error("worker {worker} failed on records {range}: {source}")]
    Worker {
        worker: usize,
        range:  RecordRange,
        source: BackendError,
    },
    #[error("worker {worker} panicked on records {range}")]
    WorkerPanicked { worker: usize, range: RecordRange },
    #[error("record {index} is missing its leading marker")]
    MalformedRecord { index: usize },
}

// ── Worker plumbing ──────────────────────────────────────────────────────────

/// Everything one worker needs, handed over at spawn time.
pub struct WorkerContext<'h> {
    pub worker:   usize,
    pub handle:   &'h ContainerHandle,
    pub range:    RecordRange,
    pub progress: Sender<usize>,
}

impl WorkerContext<'_> {
    fn report(&self, records: usize) {
        // The coordinator outlives every worker; a closed channel only means
        // nobody is drawing progress any more.
        let _ = self.progress.send(records);
    }

    fn fail(&self, source: BackendError) -> PageIoError {
        PageIoError::Worker { worker: self.worker, range: self.range, source }
    }
}

/// What a read worker hands back for reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Every record in the range was empty.
    Skip,
    /// Payload text of the range, markers removed.
    Contribute(String),
}

/// Position of the container being transferred, for progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerPosition {
    /// 1-based.
    pub index: usize,
    pub total: usize,
}

// ── PageIo ───────────────────────────────────────────────────────────────────

pub struct PageIo<'a> {
    backend:       &'a dyn Backend,
    workers:       usize,
    poll_interval: Duration,
}

impl<'a> PageIo<'a> {
    pub fn new(backend: &'a dyn Backend, workers: usize, poll_interval: Duration) -> Self {
        Self { backend, workers: workers.max(1), poll_interval }
    }

    /// Write `records` as records `1..=records.len()` of `handle`.
    /// Returns the number of records written.
    pub fn write_container(
        &self,
        handle:   &ContainerHandle,
        records:  &[String],
        position: ContainerPosition,
        renderer: &mut ProgressRenderer,
    ) -> Result<usize, PageIoError> {
        let backend = self.backend;
        let counts = self.run(handle, records.len(), position, renderer, |ctx| {
            let batch = &records[ctx.range.start - 1..ctx.range.end];
            backend
                .write_record_batch(ctx.handle, ctx.range.start, batch)
                .map_err(|e| ctx.fail(e))?;
            ctx.report(batch.len());
            Ok(batch.len())
        })?;
        Ok(counts.into_iter().sum())
    }

    /// Read every populated record of `handle` and return the concatenated
    /// payload text in record order.
    pub fn read_container(
        &self,
        handle:   &ContainerHandle,
        position: ContainerPosition,
        renderer: &mut ProgressRenderer,
    ) -> Result<String, PageIoError> {
        let backend = self.backend;
        let outcomes = self.run(handle, handle.records, position, renderer, |ctx| {
            let records = backend
                .read_record_range(ctx.handle, ctx.range.start, ctx.range.end)
                .map_err(|e| ctx.fail(e))?;
            ctx.report(records.len());

            if records.iter().all(String::is_empty) {
                return Ok(ReadOutcome::Skip);
            }
            let mut text = String::with_capacity(records.iter().map(String::len).sum());
            for (offset, record) in records.iter().enumerate() {
                text.push_str(strip_record(ctx.range.start + offset, record)?);
            }
            Ok(ReadOutcome::Contribute(text))
        })?;

        let mut text = String::new();
        for outcome in outcomes {
            if let ReadOutcome::Contribute(part) = outcome {
                text.push_str(&part);
            }
        }
        Ok(text)
    }

    /// Spawn one scoped worker per non-empty range, coordinate progress, join
    /// everything, and return the per-worker results in range order.
    fn run<T, F>(
        &self,
        handle:   &ContainerHandle,
        records:  usize,
        position: ContainerPosition,
        renderer: &mut ProgressRenderer,
        work:     F,
    ) -> Result<Vec<T>, PageIoError>
    where
        T: Send,
        F: Fn(WorkerContext<'_>) -> Result<T, PageIoError> + Sync,
    {
        let ranges: Vec<(usize, RecordRange)> = partition(records, self.workers)
            .into_iter()
            .enumerate()
            .filter(|(_, range)| !range.is_empty())
            .collect();
        debug!(
            container = position.index,
            records,
            workers = ranges.len(),
            "starting container I/O"
        );

        thread::scope(|scope| {
            let (tx, rx) = crossbeam_channel::unbounded();
            let work = &work;
            let workers: Vec<ScopedJoinHandle<'_, Result<T, PageIoError>>> = ranges
                .iter()
                .map(|&(worker, range)| {
                    let ctx = WorkerContext { worker, handle, range, progress: tx.clone() };
                    scope.spawn(move || work(ctx))
                })
                .collect();
            drop(tx);

            let frame = Frame {
                container:  position.index,
                containers: position.total,
                done:       0,
                total:      records,
            };
            let done = self.coordinate(&rx, &workers, frame, renderer);
            trace!(container = position.index, done, "progress drained");

            let mut results = Vec::with_capacity(workers.len());
            let mut failure = None;
            for (joined, &(worker, range)) in workers.into_iter().zip(&ranges) {
                match joined.join() {
                    Ok(Ok(value)) => results.push(value),
                    Ok(Err(e)) => {
                        failure.get_or_insert(e);
                    }
                    Err(_) => {
                        failure.get_or_insert(PageIoError::WorkerPanicked { worker, range });
                    }
                }
            }
            match failure {
                Some(e) => Err(e),
                None    => Ok(results),
            }
        })
    }

    /// Fold progress reports until every worker has exited and the channel is
    /// drained.  Returns the number of records reported.
    fn coordinate<T>(
        &self,
        rx:       &Receiver<usize>,
        workers:  &[ScopedJoinHandle<'_, T>],
        mut frame: Frame,
        renderer: &mut ProgressRenderer,
    ) -> usize {
        renderer.render(&frame);
        loop {
            match rx.recv_timeout(self.poll_interval) {
                Ok(count) => {
                    frame.done += count;
                    renderer.render(&frame);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if workers.iter().all(|w| w.is_finished()) {
                        frame.done += rx.try_iter().sum::<usize>();
                        break;
                    }
                    renderer.render(&frame);
                }
                // Every sender is gone and the queue is empty.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        renderer.finish(&frame);
        frame.done
    }
}
