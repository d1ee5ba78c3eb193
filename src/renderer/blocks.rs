//! Falling note blocks above the keyboard.
//!
//! A block's bottom edge touches the top of the keys on the note's first
//! frame and it keeps falling at `block_speed` pixels per second, so the
//! block scrolls into the keys for exactly the note's duration.

use super::accent_color;
use super::canvas::RenderFrame;
use super::layout::KeyboardLayout;
use crate::config::TrackStyle;
use crate::model::{NoteEvent, Rect};

/// Vertical extent `(top, bottom)` of `note`'s block on `frame`, or `None`
/// when it lies entirely outside `area`.
pub(crate) fn block_span(
    note: &NoteEvent,
    frame: i64,
    fps: u32,
    speed: f64,
    area: Rect,
) -> Option<(f64, f64)> {
    let px_per_frame = speed / fps as f64;
    let bottom = (frame - note.start_frame) as f64 * px_per_frame + area.bottom();
    let top = bottom - note.length_frames() as f64 * px_per_frame;
    (top <= area.bottom() && bottom >= area.y).then_some((top, bottom))
}

pub(super) fn render_blocks(
    frame: &mut RenderFrame,
    layout: &KeyboardLayout,
    style: &TrackStyle,
    notes: &[NoteEvent],
    frame_number: i64,
    fps: u32,
    area: Rect,
) {
    if area.height <= 0.0 {
        return;
    }
    for note in notes {
        let span = block_span(note, frame_number, fps, style.block_speed, area);
        let Some((top, bottom)) = span else {
            continue;
        };
        let key = layout.key_rect(note.pitch);
        let color = accent_color(style, key.x - layout.x, layout.width, style.palette.block);
        frame.fill_rounded_rect(
            Rect::new(key.x, top, key.width, bottom - top),
            style.block_rounding,
            color,
            area,
        );
    }
}
