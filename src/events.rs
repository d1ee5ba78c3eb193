//! Event-stream parser: Standard MIDI Files to resolved piano notes.
//!
//! Every track is scanned independently: it starts at the default tempo and
//! only its own tempo-change events move its clock. Note-ons open a pending
//! note per key, note-offs (or note-ons with velocity 0) close it. Pairing
//! rules:
//!
//! - a second note-on for a key that is already pending replaces the pending
//!   start (last note-on wins);
//! - a note-off without a pending start is ignored;
//! - a note-on that is never released before the end of its track is dropped.
//!   Incomplete notes are never emitted.

use std::path::Path;

use midly::{MetaMessage, MidiMessage, Timing, TrackEvent, TrackEventKind};
use tracing::{debug, instrument};

use crate::error::{Error, Result, SourcePosition};
use crate::model::{piano_key, NoteEvent, KEY_COUNT};
use crate::tempo::{FrameClock, TempoMap, TickBase};

// ═══════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════

/// Parse one event-source file into notes on the output frame grid.
///
/// `frame_offset` is added to every resolved frame (lead-in padding).
pub fn parse_file<P: AsRef<Path>>(path: P, fps: u32, frame_offset: i64) -> Result<Vec<NoteEvent>> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| Error::Parse {
        path: path.to_path_buf(),
        position: SourcePosition::Header,
        message: format!("failed to read file: {e}"),
    })?;
    parse_bytes(&data, path, fps, frame_offset)
}

/// Parse several sources assigned to the same timeline and union their notes.
pub fn parse_files<P: AsRef<Path>>(
    paths: &[P],
    fps: u32,
    frame_offset: i64,
) -> Result<Vec<NoteEvent>> {
    let mut notes = Vec::new();
    for path in paths {
        notes.extend(parse_file(path, fps, frame_offset)?);
    }
    sort_notes(&mut notes);
    Ok(notes)
}

/// Parse an in-memory event source. `path` is only used for error reports.
#[instrument(skip(data), fields(path = %path.display(), bytes = data.len()))]
pub fn parse_bytes(
    data: &[u8],
    path: &Path,
    fps: u32,
    frame_offset: i64,
) -> Result<Vec<NoteEvent>> {
    let fail = |position: SourcePosition, message: String| Error::Parse {
        path: path.to_path_buf(),
        position,
        message,
    };

    if fps == 0 {
        return Err(Error::RenderFault("fps must be positive".into()));
    }

    let (header, track_iter) =
        midly::parse(data).map_err(|e| fail(SourcePosition::Header, e.to_string()))?;

    let base = match header.timing {
        Timing::Metrical(tpq) => {
            if tpq.as_int() == 0 {
                return Err(fail(
                    SourcePosition::Header,
                    "ticks per quarter note is zero".into(),
                ));
            }
            TickBase::Metrical {
                ticks_per_quarter: tpq.as_int(),
            }
        }
        Timing::Timecode(smpte, subframes) => TickBase::Timecode {
            ticks_per_second: smpte.as_f32() as f64 * subframes as f64,
        },
    };

    // Decode every event up front so a malformed file fails before any
    // note is produced.
    let mut tracks: Vec<Vec<TrackEvent>> = Vec::new();
    for (track_idx, track) in track_iter.enumerate() {
        let events = track.map_err(|e| fail(SourcePosition::Track(track_idx), e.to_string()))?;
        let mut decoded = Vec::new();
        for (event_idx, event) in events.enumerate() {
            let event = event.map_err(|e| {
                fail(
                    SourcePosition::Event {
                        track: track_idx,
                        event: event_idx,
                    },
                    e.to_string(),
                )
            })?;
            decoded.push(event);
        }
        tracks.push(decoded);
    }

    let mut notes = Vec::new();
    let mut tempo_changes = 0;
    for (track_idx, track) in tracks.iter().enumerate() {
        let tempo_map = track_tempo_map(base, track);
        tempo_changes += tempo_map.changes().len();
        let mut clock = FrameClock::new(&tempo_map, fps);
        let mut pairer = NotePairer::new();

        for event in track {
            clock.advance(event.delta.as_int() as u64);
            let TrackEventKind::Midi { message, .. } = event.kind else {
                continue;
            };
            let frame = clock.frame() + frame_offset;
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    pairer.press(key.as_int(), frame);
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    pairer.release(key.as_int(), frame);
                }
                _ => {}
            }
        }

        let (track_notes, dropped) = pairer.finish();
        if dropped > 0 {
            debug!(track = track_idx, dropped, "dropping notes never released");
        }
        notes.extend(track_notes);
    }

    sort_notes(&mut notes);
    debug!(
        tracks = tracks.len(),
        tempo_changes,
        notes = notes.len(),
        "event source parsed"
    );
    Ok(notes)
}

// ═══════════════════════════════════════════════════════════════════════
// Internals
// ═══════════════════════════════════════════════════════════════════════

/// Tempo changes carried by one track. A track never sees another track's
/// tempo events.
fn track_tempo_map(base: TickBase, track: &[TrackEvent]) -> TempoMap {
    let mut map = TempoMap::new(base);
    let mut tick: u64 = 0;
    for event in track {
        tick += event.delta.as_int() as u64;
        if let TrackEventKind::Meta(MetaMessage::Tempo(t)) = event.kind {
            map.insert(tick, t.as_int());
        }
    }
    map
}

fn sort_notes(notes: &mut [NoteEvent]) {
    notes.sort_by_key(|n| (n.start_frame, n.pitch, n.end_frame));
}

/// Matches presses to releases per key within one track.
struct NotePairer {
    pending: [Option<i64>; KEY_COUNT],
    notes: Vec<NoteEvent>,
}

impl NotePairer {
    fn new() -> Self {
        Self {
            pending: [None; KEY_COUNT],
            notes: Vec::new(),
        }
    }

    fn press(&mut self, midi_key: u8, frame: i64) {
        let Some(pitch) = piano_key(midi_key) else {
            debug!(midi_key, "ignoring key outside the 88-key range");
            return;
        };
        self.pending[pitch as usize] = Some(frame);
    }

    fn release(&mut self, midi_key: u8, frame: i64) {
        let Some(pitch) = piano_key(midi_key) else {
            return;
        };
        if let Some(start) = self.pending[pitch as usize].take() {
            self.notes.push(NoteEvent::new(pitch, start, frame.max(start)));
        }
    }

    /// Completed notes plus the number of presses that were never released.
    fn finish(self) -> (Vec<NoteEvent>, usize) {
        let dropped = self.pending.iter().filter(|p| p.is_some()).count();
        (self.notes, dropped)
    }
}
