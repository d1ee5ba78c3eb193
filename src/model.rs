//! Data model shared by the event parser, timelines and the frame renderer.
//!
//! Everything here is plain immutable data: notes are resolved to absolute
//! output frames once, then only ever read.

use serde::{Deserialize, Serialize};

/// Number of keys on the rendered piano.
pub const KEY_COUNT: usize = 88;

/// MIDI key number of piano key 0 (the low A).
pub const LOWEST_MIDI_KEY: u8 = 21;

/// One resolved note on a timeline, in absolute output-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteEvent {
    /// Piano key index, 0 = lowest of the 88 keys.
    pub pitch: u8,
    /// First frame on which the key is held (inclusive).
    pub start_frame: i64,
    /// Last frame on which the key is held (inclusive).
    pub end_frame: i64,
}

impl NoteEvent {
    pub fn new(pitch: u8, start_frame: i64, end_frame: i64) -> Self {
        debug_assert!((pitch as usize) < KEY_COUNT, "pitch {pitch} out of range");
        debug_assert!(start_frame <= end_frame, "note ends before it starts");
        Self {
            pitch,
            start_frame,
            end_frame,
        }
    }

    /// Whether the key is held down on `frame`.
    pub fn is_active(&self, frame: i64) -> bool {
        self.start_frame <= frame && frame <= self.end_frame
    }

    pub fn length_frames(&self) -> i64 {
        self.end_frame - self.start_frame
    }
}

/// Convert a MIDI key number to a piano key index, if it is on the keyboard.
pub fn piano_key(midi_key: u8) -> Option<u8> {
    let idx = midi_key.checked_sub(LOWEST_MIDI_KEY)?;
    ((idx as usize) < KEY_COUNT).then_some(idx)
}

/// 8-bit RGB color. Serialized as `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
    pub const WHITE: Rgb = Rgb(255, 255, 255);
    pub const RED: Rgb = Rgb(255, 0, 0);

    /// Linear blend from `self` (t = 0) to `other` (t = 1).
    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }

    /// Multiply every channel by `factor` (brightness scaling).
    pub fn scaled(self, factor: f64) -> Rgb {
        let s = |c: u8| (c as f64 * factor).round().clamp(0.0, 255.0) as u8;
        Rgb(s(self.0), s(self.1), s(self.2))
    }

    /// HSV to RGB with all components in `0.0..=1.0`. Hue wraps.
    pub fn from_hsv(h: f64, s: f64, v: f64) -> Rgb {
        let h = h.rem_euclid(1.0) * 6.0;
        let s = s.clamp(0.0, 1.0);
        let v = v.clamp(0.0, 1.0);
        let sector = h.floor();
        let f = h - sector;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));
        let (r, g, b) = match sector as u8 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        };
        let c = |x: f64| (x * 255.0).round() as u8;
        Rgb(c(r), c(g), c(b))
    }
}

/// Axis-aligned rectangle in pixel units (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}
