//! Parallel export scheduler.
//!
//! The frame range is cut into contiguous chunks, one per worker. Workers
//! share nothing mutable: each opens its own encoder sink on its own chunk
//! file in the export directory, renders its frames into it and reports back
//! over a channel. Once every worker has reported, the encoder joins the
//! chunk files in chunk order, never in completion order.
//!
//! A single chunk skips the chunk files entirely and renders straight into
//! the output stream. Because rendering is pure, both paths encode identical
//! frames.

use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::unbounded;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::media::{FrameSink, VideoEncoder};
use crate::renderer::{FrameRenderer, RenderFrame};

// ═══════════════════════════════════════════════════════════════════════
// Chunks
// ═══════════════════════════════════════════════════════════════════════

/// A contiguous range of frames assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportChunk {
    pub chunk_index: usize,
    pub first_frame: i64,
    /// Inclusive.
    pub last_frame: i64,
}

impl ExportChunk {
    pub fn frames(&self) -> RangeInclusive<i64> {
        self.first_frame..=self.last_frame
    }

    pub fn len(&self) -> usize {
        (self.last_frame - self.first_frame + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split `[lo, hi]` into at most `workers` ordered, disjoint chunks of
/// `ceil(n / workers)` frames; the last chunk takes what is left. When the
/// range is too short to give every worker a frame, fewer chunks come back.
pub fn partition(lo: i64, hi: i64, workers: usize) -> Vec<ExportChunk> {
    if hi < lo {
        return Vec::new();
    }
    let total = (hi - lo + 1) as u64;
    let workers = workers.max(1) as u64;
    let size = total.div_ceil(workers) as i64;

    let mut chunks = Vec::new();
    let mut first = lo;
    while first <= hi {
        let last = (first + size - 1).min(hi);
        chunks.push(ExportChunk {
            chunk_index: chunks.len(),
            first_frame: first,
            last_frame: last,
        });
        first = last + 1;
    }
    chunks
}

// ═══════════════════════════════════════════════════════════════════════
// Cancellation & progress
// ═══════════════════════════════════════════════════════════════════════

/// Cooperative abort flag shared by the scheduler and its workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Advisory frame counters, one per worker. Safe to poll from any thread.
#[derive(Debug, Default)]
pub struct ExportProgress {
    total: AtomicU64,
    workers: Mutex<Vec<Arc<AtomicU64>>>,
}

impl ExportProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames the current run will produce.
    pub fn total_frames(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Frames rendered so far, summed over all workers.
    pub fn frames_done(&self) -> u64 {
        self.worker_frames().iter().sum()
    }

    /// Frames rendered so far by each worker, in chunk order.
    pub fn worker_frames(&self) -> Vec<u64> {
        match self.workers.lock() {
            Ok(w) => w.iter().map(|c| c.load(Ordering::Relaxed)).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn reset(&self, total: u64, workers: usize) -> Vec<Arc<AtomicU64>> {
        let counters: Vec<_> = (0..workers).map(|_| Arc::new(AtomicU64::new(0))).collect();
        self.total.store(total, Ordering::Relaxed);
        if let Ok(mut w) = self.workers.lock() {
            *w = counters.clone();
        }
        counters
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Frame sources
// ═══════════════════════════════════════════════════════════════════════

/// Something that can produce any frame on demand, from any thread.
pub trait FrameSource: Sync {
    /// Bytes per frame; every frame has the same size.
    fn frame_len(&self) -> usize;
    fn render_frame(&self, frame: i64) -> Result<RenderFrame>;
}

impl FrameSource for FrameRenderer<'_> {
    fn frame_len(&self) -> usize {
        FrameRenderer::frame_len(self)
    }

    fn render_frame(&self, frame: i64) -> Result<RenderFrame> {
        Ok(self.render(frame))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Scheduler
// ═══════════════════════════════════════════════════════════════════════

/// Geometry and rate of every stream a scheduler opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Result a worker sends back when it stops.
struct WorkerReport {
    chunk_index: usize,
    result: Result<PathBuf>,
}

pub struct Scheduler<'a> {
    chunk_dir: &'a Path,
    encoder: &'a dyn VideoEncoder,
    format: StreamFormat,
    cancel: CancelToken,
    progress: Arc<ExportProgress>,
}

impl<'a> Scheduler<'a> {
    /// Chunk files go to `chunk_dir`, which the caller owns and removes.
    pub fn new(
        chunk_dir: &'a Path,
        encoder: &'a dyn VideoEncoder,
        format: StreamFormat,
        cancel: CancelToken,
        progress: Arc<ExportProgress>,
    ) -> Self {
        Self {
            chunk_dir,
            encoder,
            format,
            cancel,
            progress,
        }
    }

    /// Render every chunk and write all frames, in frame order, to one
    /// stream at `out`.
    pub fn run(&self, chunks: &[ExportChunk], source: &dyn FrameSource, out: &Path) -> Result<()> {
        match chunks {
            [] => self.open(out)?.finish(),
            [single] => self.run_serial(single, source, out),
            _ => {
                let files = self.render_chunks(chunks, source)?;
                self.join(chunks, &files, out)
            }
        }
    }

    /// One synchronous pass, straight into the output stream. The sink is
    /// closed even when rendering fails.
    fn run_serial(&self, chunk: &ExportChunk, source: &dyn FrameSource, out: &Path) -> Result<()> {
        let counters = self.progress.reset(chunk.len() as u64, 1);
        info!(frames = chunk.len(), "rendering in a single pass");
        let mut sink = self.open(out)?;
        let written = self.write_serial(chunk, source, sink.as_mut(), &counters[0]);
        let finished = sink.finish();
        written?;
        finished
    }

    fn write_serial(
        &self,
        chunk: &ExportChunk,
        source: &dyn FrameSource,
        sink: &mut dyn FrameSink,
        counter: &AtomicU64,
    ) -> Result<()> {
        for frame in chunk.frames() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let rendered = source.render_frame(frame).map_err(|e| Error::WorkerFailure {
                chunk: chunk.chunk_index,
                reason: e.to_string(),
            })?;
            sink.write_frame(rendered.as_bytes())?;
            counter.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Dispatch one worker per chunk and wait for all of them. Returns the
    /// encoded chunk files ordered by chunk index. On failure every chunk
    /// file is removed before the error is returned.
    pub fn render_chunks(
        &self,
        chunks: &[ExportChunk],
        source: &dyn FrameSource,
    ) -> Result<Vec<PathBuf>> {
        let total: u64 = chunks.iter().map(|c| c.len() as u64).sum();
        let counters = self.progress.reset(total, chunks.len());
        let (tx, rx) = unbounded::<WorkerReport>();
        let mut slots: Vec<Option<PathBuf>> = vec![None; chunks.len()];
        let mut failure: Option<Error> = None;
        let mut cancelled = false;

        info!(workers = chunks.len(), frames = total, "dispatching export workers");

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(chunks.len());
            for (chunk, counter) in chunks.iter().zip(&counters) {
                let tx = tx.clone();
                let worker = Worker {
                    chunk: *chunk,
                    path: self.chunk_path(chunk.chunk_index),
                    encoder: self.encoder,
                    format: self.format,
                    cancel: self.cancel.clone(),
                    counter: Arc::clone(counter),
                };
                handles.push((
                    chunk.chunk_index,
                    scope.spawn(move || {
                        let result = worker.run(source);
                        // The receiver outlives every worker inside this scope.
                        let _ = tx.send(WorkerReport {
                            chunk_index: worker.chunk.chunk_index,
                            result,
                        });
                    }),
                ));
            }
            drop(tx);

            for report in rx.iter() {
                match report.result {
                    Ok(path) => {
                        debug!(
                            chunk = report.chunk_index,
                            done = self.progress.frames_done(),
                            total,
                            "worker finished"
                        );
                        slots[report.chunk_index] = Some(path);
                    }
                    Err(Error::Cancelled) => cancelled = true,
                    Err(e) => {
                        if failure.is_none() {
                            warn!(
                                chunk = report.chunk_index,
                                error = %e,
                                "worker failed, aborting export"
                            );
                            self.cancel.cancel();
                            failure = Some(Error::WorkerFailure {
                                chunk: report.chunk_index,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }

            for (chunk_index, handle) in handles {
                if handle.join().is_err() && failure.is_none() {
                    self.cancel.cancel();
                    failure = Some(Error::WorkerFailure {
                        chunk: chunk_index,
                        reason: "worker panicked".into(),
                    });
                }
            }
        });

        let error = failure.or_else(|| {
            let missing = slots.iter().any(Option::is_none);
            (cancelled || missing).then_some(Error::Cancelled)
        });
        if let Some(error) = error {
            self.discard(chunks);
            return Err(error);
        }
        Ok(slots.into_iter().flatten().collect())
    }

    /// Join the chunk files into `out` in the given order, then remove them.
    fn join(&self, chunks: &[ExportChunk], files: &[PathBuf], out: &Path) -> Result<()> {
        let joined = if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            self.encoder.concat(files, out)
        };
        self.discard(chunks);
        joined?;
        info!(chunks = files.len(), path = %out.display(), "chunks joined");
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn FrameSink>> {
        let StreamFormat { width, height, fps } = self.format;
        self.encoder.open(path, width, height, fps)
    }

    fn chunk_path(&self, chunk_index: usize) -> PathBuf {
        self.chunk_dir.join(format!("chunk_{chunk_index:04}.{}", self.encoder.extension()))
    }

    fn discard(&self, chunks: &[ExportChunk]) {
        for chunk in chunks {
            let path = self.chunk_path(chunk.chunk_index);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove chunk file"),
            }
        }
    }
}

/// Everything one worker owns.
struct Worker<'a> {
    chunk: ExportChunk,
    path: PathBuf,
    encoder: &'a dyn VideoEncoder,
    format: StreamFormat,
    cancel: CancelToken,
    counter: Arc<AtomicU64>,
}

impl Worker<'_> {
    /// Encode every frame of the chunk into the worker's own file.
    fn run(&self, source: &dyn FrameSource) -> Result<PathBuf> {
        let StreamFormat { width, height, fps } = self.format;
        let mut sink = self.encoder.open(&self.path, width, height, fps)?;
        let written = self.write(source, sink.as_mut());
        let finished = sink.finish();
        written?;
        finished?;
        Ok(self.path.clone())
    }

    fn write(&self, source: &dyn FrameSource, sink: &mut dyn FrameSink) -> Result<()> {
        for frame in self.chunk.frames() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let rendered = source.render_frame(frame)?;
            sink.write_frame(rendered.as_bytes())?;
            self.counter.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
