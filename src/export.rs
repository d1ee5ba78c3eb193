//! Compositions and the end-to-end export job.
//!
//! An export runs in this order: plan, render (possibly in parallel) into
//! the video encoder, assemble audio, mux, then move the result to its
//! destination. Everything transient lives in one private work directory
//! that is removed whether the export succeeds or not. The destination is
//! written only by the final atomic rename.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use tempfile::{NamedTempFile, TempDir};
use tracing::{info, instrument, warn};

use crate::audio::{AudioAssembler, AudioSource};
use crate::config::{ExportOptions, ProjectConfig, TrackStyle, VideoConfig};
use crate::error::{Error, Result};
use crate::media::MediaServices;
use crate::plan::ExportPlan;
use crate::renderer::FrameRenderer;
use crate::scheduler::{CancelToken, ExportProgress, FrameSource, Scheduler, StreamFormat};
use crate::timeline::Timeline;

// ═══════════════════════════════════════════════════════════════════════
// Composition
// ═══════════════════════════════════════════════════════════════════════

/// A video: its tracks, output parameters and sound.
#[derive(Debug, Clone)]
pub struct Composition {
    video: VideoConfig,
    timelines: Vec<Timeline>,
    audio: Vec<AudioSource>,
}

impl Composition {
    /// An empty composition whose audio is synthesized from its tracks.
    pub fn new(video: VideoConfig) -> Self {
        Self {
            video,
            timelines: Vec::new(),
            audio: vec![AudioSource::Synthesized],
        }
    }

    pub fn from_project(config: &ProjectConfig) -> Self {
        let mut composition = Self::new(config.video.clone());
        for track in &config.tracks {
            let timeline = Timeline::new(track.sources.iter().cloned(), track.style.clone());
            composition.add_timeline(timeline);
        }
        composition.audio = config.audio.iter().map(|a| AudioSource::parse(a)).collect();
        composition
    }

    pub fn add_timeline(&mut self, timeline: Timeline) {
        self.timelines.push(timeline);
    }

    /// Add a track made of `sources`. Returns its index.
    pub fn add_track<I, P>(&mut self, sources: I, style: TrackStyle) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.timelines.push(Timeline::new(sources, style));
        self.timelines.len() - 1
    }

    /// Add an audio source, or make it the only one when `overwrite` is set.
    pub fn set_audio(&mut self, source: AudioSource, overwrite: bool) {
        if overwrite {
            self.audio.clear();
        }
        self.audio.push(source);
    }

    /// Parse every track. Notes are shifted by the start offset so the
    /// lead-in frames come before the first note.
    #[instrument(skip(self), fields(tracks = self.timelines.len()))]
    pub fn register(&mut self) -> Result<()> {
        self.video.validate()?;
        let offset = self.video.start_offset as i64;
        for timeline in &mut self.timelines {
            timeline.register(self.video.fps, offset)?;
        }
        info!(
            notes = self.timelines.iter().map(|t| t.notes().len()).sum::<usize>(),
            "composition registered"
        );
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.timelines.iter().all(Timeline::is_registered)
    }

    pub fn video(&self) -> &VideoConfig {
        &self.video
    }

    pub fn timelines(&self) -> &[Timeline] {
        &self.timelines
    }

    pub fn audio(&self) -> &[AudioSource] {
        &self.audio
    }

    /// Event-source files of every track, in track order.
    pub fn event_sources(&self) -> Vec<PathBuf> {
        self.timelines
            .iter()
            .flat_map(|t| t.sources().iter().cloned())
            .collect()
    }

    pub fn renderer(&self) -> Result<FrameRenderer<'_>> {
        FrameRenderer::new(&self.video, &self.timelines)
    }

    /// Frame range and chunking for `workers` workers, without clamping.
    pub fn plan(&self, preview_fraction: f64, workers: usize) -> Result<ExportPlan> {
        ExportPlan::new(&self.video, &self.timelines, preview_fraction, workers)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Export job
// ═══════════════════════════════════════════════════════════════════════

/// Outcome of a successful export.
#[derive(Debug)]
pub struct ExportReport {
    pub destination: PathBuf,
    pub frames: u64,
    pub duration_ms: f64,
    pub workers: usize,
    /// Problems recovered from along the way.
    pub warnings: Vec<Error>,
}

/// One export of a registered composition.
pub struct ExportJob<'a> {
    composition: &'a Composition,
    options: ExportOptions,
    services: MediaServices,
    cancel: CancelToken,
    progress: Arc<ExportProgress>,
}

impl<'a> ExportJob<'a> {
    pub fn new(composition: &'a Composition, options: ExportOptions) -> Self {
        Self {
            composition,
            options,
            services: MediaServices::default(),
            cancel: CancelToken::new(),
            progress: Arc::new(ExportProgress::new()),
        }
    }

    pub fn with_services(mut self, services: MediaServices) -> Self {
        self.services = services;
        self
    }

    /// Token that aborts this job when cancelled from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> Arc<ExportProgress> {
        Arc::clone(&self.progress)
    }

    /// The plan `run` will execute, worker count clamped to the machine.
    pub fn plan(&self) -> Result<ExportPlan> {
        self.options.validate()?;
        if !self.composition.is_registered() {
            return Err(Error::RenderFault("composition is not registered".into()));
        }
        let available = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        let workers = self.options.workers.min(available);
        if workers < self.options.workers {
            warn!(requested = self.options.workers, available, "clamping worker count");
        }
        let plan = self.composition.plan(self.options.preview_fraction, workers)?;
        if plan.chunks.len() < workers {
            warn!(workers, frames = plan.total_frames(), "fewer frames than workers");
        }
        Ok(plan)
    }

    /// Render, assemble and mux into `dest`. On any failure the work
    /// directory is removed and `dest` is left as it was.
    pub fn run(&self, dest: &Path) -> Result<ExportReport> {
        let renderer = self.composition.renderer()?;
        self.run_with(dest, &renderer)
    }

    /// Like [`run`](Self::run), but frames come from `source`, which must
    /// produce frames of the composition's resolution.
    #[instrument(skip(self, source), fields(dest = %dest.display()))]
    pub fn run_with(&self, dest: &Path, source: &dyn FrameSource) -> Result<ExportReport> {
        let composition = self.composition;
        let plan = self.plan()?;
        info!(
            width = plan.width,
            height = plan.height,
            fps = plan.fps,
            frames = plan.total_frames(),
            duration_ms = plan.duration_ms(),
            workers = plan.chunks.len(),
            "export planned"
        );

        let work = self.work_dir()?;
        let video_path = work.path().join(format!("video.{}", self.services.encoder.extension()));
        let format = StreamFormat {
            width: plan.width,
            height: plan.height,
            fps: plan.fps,
        };
        Scheduler::new(
            work.path(),
            self.services.encoder.as_ref(),
            format,
            self.cancel.clone(),
            Arc::clone(&self.progress),
        )
        .run(&plan.chunks, source, &video_path)?;
        info!(path = %video_path.display(), "video stream written");

        self.check_cancelled()?;
        let audio = AudioAssembler::new(&self.services, work.path()).assemble(
            composition.audio(),
            &composition.event_sources(),
            &plan.audio_window(),
        )?;
        let audio_path = work.path().join("audio.wav");
        audio.clip.write_wav(&audio_path)?;

        self.check_cancelled()?;
        let ext = dest.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
        let muxed = work.path().join(format!("output.{ext}"));
        self.services.muxer.mux(&video_path, &audio_path, &muxed)?;
        info!(path = %muxed.display(), "muxed");

        persist(&muxed, dest)?;
        work.close()?;
        info!(frames = plan.total_frames(), warnings = audio.warnings.len(), "export finished");

        Ok(ExportReport {
            destination: dest.to_path_buf(),
            frames: plan.total_frames(),
            duration_ms: plan.duration_ms(),
            workers: plan.chunks.len(),
            warnings: audio.warnings,
        })
    }

    fn work_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pianovis-export-");
        let dir = match &self.options.work_dir {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Copy `staged` next to `dest` and rename it into place.
fn persist(staged: &Path, dest: &Path) -> Result<()> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(parent)?;
    std::fs::copy(staged, tmp.path())?;
    tmp.persist(dest).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
