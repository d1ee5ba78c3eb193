//! Keyboard painting: keybed, white keys, then black keys on top.

use super::accent_color;
use super::canvas::RenderFrame;
use super::constants::*;
use super::layout::{is_black_key, KeyboardLayout};
use crate::config::TrackStyle;
use crate::model::KEY_COUNT;
use crate::timeline::KeySet;

pub(super) fn render_keyboard(
    frame: &mut RenderFrame,
    layout: &KeyboardLayout,
    style: &TrackStyle,
    active: &KeySet,
) {
    let palette = &style.palette;
    frame.fill_rect(layout.keybed(), KEYBED_COLOR);

    let white_bottom = palette.white.scaled(WHITE_KEY_SHADE);
    for pitch in (0..KEY_COUNT as u8).filter(|p| !is_black_key(*p)) {
        let rect = layout.key_rect(pitch);
        let top = if active.contains(pitch) {
            accent_color(style, rect.x - layout.x, layout.width, palette.white_hit)
        } else {
            palette.white
        };
        frame.fill_vertical_gradient(rect, top, white_bottom);
    }

    for pitch in (0..KEY_COUNT as u8).filter(|p| is_black_key(*p)) {
        let rect = layout.key_rect(pitch);
        if active.contains(pitch) {
            let hit = accent_color(style, rect.x - layout.x, layout.width, palette.black_hit);
            frame.fill_vertical_gradient(rect, hit, palette.black);
        } else {
            frame.fill_rect(rect, palette.black);
        }
    }
}
