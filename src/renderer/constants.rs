//! Shared constants for the frame renderer (all in pixels unless noted).

use crate::model::Rgb;

// ── Keyboard sizing ─────────────────────────────────────────────────
pub(super) const WHITE_KEY_COUNT: usize = 52;
pub(super) const KEY_GAP: f64 = 1.0; // horizontal gap between white keys
pub(super) const KEYBOARD_MARGIN: f64 = 100.0; // subtracted from frame height before sharing it out
pub(super) const MIN_KEY_HEIGHT_RATIO: f64 = 1.0 / 12.0; // of frame height
pub(super) const MAX_KEY_HEIGHT_RATIO: f64 = 1.0 / 5.0; // of frame height
pub(super) const BLACK_KEY_HEIGHT_RATIO: f64 = 1.0 / 2.4; // of white key height
pub(super) const BLACK_KEY_WIDTH_RATIO: f64 = 0.75; // of white key width

// ── Shading & colors ────────────────────────────────────────────────
pub(super) const WHITE_KEY_SHADE: f64 = 0.8; // brightness at the bottom edge of a white key
pub(super) const RAINBOW_SATURATION: f64 = 1.0;
pub(super) const RAINBOW_VALUE: f64 = 1.0;
pub(super) const KEYBED_COLOR: Rgb = Rgb::BLACK;
