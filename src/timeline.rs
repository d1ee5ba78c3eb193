//! One visual piano track: its event sources, resolved notes and style.

use std::path::PathBuf;

use tracing::{debug, instrument};

use crate::config::TrackStyle;
use crate::error::{Error, Result};
use crate::events;
use crate::model::{NoteEvent, KEY_COUNT};

/// A piano track.
///
/// Created with its sources and style, populated once by [`Timeline::register`]
/// and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Timeline {
    sources: Vec<PathBuf>,
    style: TrackStyle,
    notes: Vec<NoteEvent>,
    fps: u32,
    frame_offset: i64,
    registered: bool,
}

impl Timeline {
    pub fn new<I, P>(sources: I, style: TrackStyle) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            style,
            notes: Vec::new(),
            fps: 0,
            frame_offset: 0,
            registered: false,
        }
    }

    /// Build a timeline from notes resolved elsewhere. Frames are shifted by
    /// `frame_offset` like parsed notes are.
    pub fn from_notes(
        notes: Vec<NoteEvent>,
        fps: u32,
        frame_offset: i64,
        style: TrackStyle,
    ) -> Result<Self> {
        let mut notes: Vec<NoteEvent> = notes
            .into_iter()
            .map(|n| NoteEvent {
                start_frame: n.start_frame + frame_offset,
                end_frame: n.end_frame + frame_offset,
                ..n
            })
            .collect();
        if let Some(bad) = notes.iter().find(|n| {
            n.start_frame < 0 || n.end_frame < n.start_frame || n.pitch as usize >= KEY_COUNT
        }) {
            return Err(Error::RenderFault(format!("invalid note {bad:?}")));
        }
        notes.sort_by_key(|n| (n.start_frame, n.pitch, n.end_frame));
        Ok(Self {
            sources: Vec::new(),
            style,
            notes,
            fps,
            frame_offset,
            registered: true,
        })
    }

    pub fn add_source<P: Into<PathBuf>>(&mut self, path: P) {
        self.sources.push(path.into());
    }

    /// Parse every source at the given frame rate and offset.
    ///
    /// Replaces any notes from an earlier registration. Timelines built with
    /// [`Timeline::from_notes`] keep their notes when they have no sources.
    #[instrument(skip(self), fields(sources = self.sources.len()))]
    pub fn register(&mut self, fps: u32, frame_offset: i64) -> Result<()> {
        if self.registered && self.sources.is_empty() {
            return Ok(());
        }
        self.notes = events::parse_files(&self.sources, fps, frame_offset)?;
        self.fps = fps;
        self.frame_offset = frame_offset;
        self.registered = true;
        debug!(notes = self.notes.len(), "timeline registered");
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn style(&self) -> &TrackStyle {
        &self.style
    }

    /// Notes sorted by start frame.
    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn frame_offset(&self) -> i64 {
        self.frame_offset
    }

    /// Earliest start frame, `None` for a track without notes.
    pub fn min_frame(&self) -> Option<i64> {
        self.notes.iter().map(|n| n.start_frame).min()
    }

    /// Latest end frame, `None` for a track without notes.
    pub fn max_frame(&self) -> Option<i64> {
        self.notes.iter().map(|n| n.end_frame).max()
    }

    /// Keys held down on `frame`.
    pub fn active_keys(&self, frame: i64) -> KeySet {
        let mut keys = KeySet::default();
        // Notes are sorted by start, nothing after the first later start can be active.
        for note in self.notes.iter().take_while(|n| n.start_frame <= frame) {
            if note.end_frame >= frame {
                keys.insert(note.pitch);
            }
        }
        keys
    }
}

/// Set of piano keys, one flag per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySet([bool; KEY_COUNT]);

impl Default for KeySet {
    fn default() -> Self {
        Self([false; KEY_COUNT])
    }
}

impl KeySet {
    pub fn insert(&mut self, pitch: u8) {
        if let Some(slot) = self.0.get_mut(pitch as usize) {
            *slot = true;
        }
    }

    pub fn contains(&self, pitch: u8) -> bool {
        self.0.get(pitch as usize).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.iter().filter(|k| **k).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .map(|(i, _)| i as u8)
    }
}
