//! Export plan: which frames get rendered, how they are split across
//! workers, and how the audio track lines up with them.
//!
//! The frame range is derived from the notes of every timeline:
//!
//!   `first = min(note starts) - start_offset`
//!   `last  = max(note ends) + end_offset`
//!
//! Compositions register their timelines with `frame_offset = start_offset`,
//! so the first note lands exactly `start_offset` frames after the first
//! exported frame. The preview fraction trims the note range before padding
//! is added.
//!
//! Audio is aligned through the timeline holding the earliest note: its own
//! `frame_offset` maps that note back to the source's clock, whatever offset
//! the timeline was built with.

use serde::Serialize;

use crate::audio::AudioWindow;
use crate::config::VideoConfig;
use crate::error::{Error, Result};
use crate::scheduler::{partition, ExportChunk};
use crate::timeline::Timeline;

/// Everything an export run needs to know about its frame range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportPlan {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub start_offset: i64,
    pub end_offset: i64,
    /// First note frame (inclusive), offset applied.
    pub note_first_frame: i64,
    /// The first note's frame on its source's own clock, before the track's
    /// frame offset. Audio rendered from the sources starts here.
    pub note_source_frame: i64,
    /// Last note frame (inclusive), after preview trimming.
    pub note_last_frame: i64,
    /// First exported frame.
    pub first_frame: i64,
    /// Last exported frame (inclusive).
    pub last_frame: i64,
    pub chunks: Vec<ExportChunk>,
}

impl ExportPlan {
    pub fn new(
        video: &VideoConfig,
        timelines: &[Timeline],
        preview_fraction: f64,
        workers: usize,
    ) -> Result<Self> {
        video.validate()?;
        if timelines.is_empty() {
            return Err(Error::RenderFault("nothing to export: no tracks".into()));
        }
        let earliest = timelines
            .iter()
            .filter_map(|t| t.min_frame().map(|f| (f, t.frame_offset())))
            .min();
        let last = timelines.iter().filter_map(Timeline::max_frame).max();
        let (Some((note_first, first_offset)), Some(note_last)) = (earliest, last) else {
            return Err(Error::RenderFault("nothing to export: tracks contain no notes".into()));
        };

        let fraction = preview_fraction.clamp(0.0, 1.0);
        let note_last = note_first + (fraction * (note_last - note_first) as f64).floor() as i64;

        let start_offset = video.start_offset as i64;
        let end_offset = video.end_offset as i64;
        let first_frame = note_first - start_offset;
        let last_frame = note_last + end_offset;

        Ok(Self {
            width: video.width,
            height: video.height,
            fps: video.fps,
            start_offset,
            end_offset,
            note_first_frame: note_first,
            note_source_frame: note_first - first_offset,
            note_last_frame: note_last,
            first_frame,
            last_frame,
            chunks: partition(first_frame, last_frame, workers.max(1)),
        })
    }

    /// Number of frames in the exported video.
    pub fn total_frames(&self) -> u64 {
        (self.last_frame - self.first_frame + 1) as u64
    }

    pub fn duration_ms(&self) -> f64 {
        self.frames_to_ms(self.total_frames() as i64)
    }

    fn frames_to_ms(&self, frames: i64) -> f64 {
        frames as f64 / self.fps as f64 * 1000.0
    }

    /// How the sound must be cut and padded to match the frames.
    pub fn audio_window(&self) -> AudioWindow {
        AudioWindow {
            skip_ms: self.frames_to_ms(self.note_source_frame),
            content_ms: self.frames_to_ms(self.note_last_frame - self.note_first_frame + 1),
            lead_ms: self.frames_to_ms(self.start_offset),
            tail_ms: self.frames_to_ms(self.end_offset),
        }
    }
}

/// Serialize an ExportPlan to JSON.
pub fn plan_to_json(plan: &ExportPlan) -> String {
    serde_json::to_string(plan).unwrap_or_else(|_| "{}".to_string())
}
