//! Keyboard geometry: where every key sits inside a track panel.
//!
//! Stateless: a [`KeyboardLayout`] is computed from the panel rectangle and
//! the number of stacked tracks, and only answers geometry queries.

use super::constants::*;
use crate::model::{Rect, KEY_COUNT};

/// True for the sharps/flats. Key 0 is the low A of an 88-key piano.
pub fn is_black_key(pitch: u8) -> bool {
    matches!((pitch as i32 - 3).rem_euclid(12), 1 | 3 | 6 | 8 | 10)
}

/// Number of white keys strictly left of `pitch`.
fn whites_before(pitch: u8) -> usize {
    (0..pitch.min(KEY_COUNT as u8))
        .filter(|p| !is_black_key(*p))
        .count()
}

/// White key height for a frame of `frame_height` pixels shared by
/// `track_count` stacked keyboards. Many tracks shrink the keys down to a
/// floor instead of overflowing.
pub fn white_key_height(frame_height: f64, track_count: usize) -> f64 {
    let min = frame_height * MIN_KEY_HEIGHT_RATIO;
    let max = frame_height * MAX_KEY_HEIGHT_RATIO;
    ((frame_height - KEYBOARD_MARGIN) / (track_count as f64 + 2.0)).clamp(min, max)
}

/// Key geometry of one keyboard, sitting at the bottom of its panel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyboardLayout {
    /// Left edge of the keyboard.
    pub x: f64,
    /// Top edge of the keys.
    pub top: f64,
    /// Full keyboard width.
    pub width: f64,
    pub white_width: f64,
    pub white_height: f64,
    pub black_width: f64,
    pub black_height: f64,
    pub gap: f64,
}

impl KeyboardLayout {
    pub fn new(panel: Rect, track_count: usize, frame_height: f64) -> Self {
        let gap = KEY_GAP;
        let white_width = (panel.width / WHITE_KEY_COUNT as f64 - gap).max(1.0);
        let white_height = white_key_height(frame_height, track_count).min(panel.height);
        Self {
            x: panel.x,
            top: panel.bottom() - white_height,
            width: panel.width,
            white_width,
            white_height,
            black_width: white_width * BLACK_KEY_WIDTH_RATIO,
            black_height: white_height * BLACK_KEY_HEIGHT_RATIO,
            gap,
        }
    }

    /// Rectangle of key `pitch`. Black keys straddle the gap between their
    /// two white neighbours.
    pub fn key_rect(&self, pitch: u8) -> Rect {
        let boundary = self.x + whites_before(pitch) as f64 * (self.white_width + self.gap);
        if is_black_key(pitch) {
            Rect::new(
                boundary - self.gap / 2.0 - self.black_width / 2.0,
                self.top,
                self.black_width,
                self.black_height,
            )
        } else {
            Rect::new(boundary, self.top, self.white_width, self.white_height)
        }
    }

    /// The strip behind the keys.
    pub fn keybed(&self) -> Rect {
        Rect::new(self.x, self.top, self.width, self.white_height)
    }
}
